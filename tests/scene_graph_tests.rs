//! Scene-Graph Evaluator Tests
//!
//! Tests for:
//! - Hierarchy construction (parents, order, cycle rejection)
//! - Full world-matrix evaluation through non-joint ancestors
//! - Dirty propagation and partial flush
//! - Joint-matrix composition against the skeleton root

use std::f32::consts::FRAC_PI_2;

use glam::{Affine3A, Mat4, Quat, Vec3};

use skinstance::scene::{
    Hierarchy, Joint, Pose, Skin, Transform, compute_all_joint_matrices, evaluate_world_matrices,
};

const EPSILON: f32 = 1e-5;

fn mat_approx(a: Mat4, b: Mat4) -> bool {
    a.abs_diff_eq(b, EPSILON)
}

/// ```text
///   0          3
///   ├── 1      └── 4
///   │   └── 2
///   └── 5
/// ```
fn two_trees() -> Hierarchy {
    Hierarchy::from_children(vec![vec![1, 5], vec![2], vec![], vec![4], vec![], vec![]]).unwrap()
}

fn offset_locals(count: usize) -> Vec<Transform> {
    (0..count)
        .map(|i| Transform::from_translation(Vec3::new(i as f32, 1.0, 0.0)))
        .collect()
}

// ============================================================================
// Hierarchy
// ============================================================================

#[test]
fn hierarchy_records_parents_and_roots() {
    let hierarchy = two_trees();
    assert_eq!(hierarchy.len(), 6);
    assert_eq!(hierarchy.roots(), &[0, 3]);
    assert_eq!(hierarchy.parent(2), Some(1));
    assert_eq!(hierarchy.parent(0), None);
    assert_eq!(hierarchy.children(0), &[1, 5]);
    assert_eq!(hierarchy.depth(2), 2);
    assert!(hierarchy.is_ancestor(0, 2));
    assert!(!hierarchy.is_ancestor(3, 2));
}

#[test]
fn order_visits_parents_first() {
    let hierarchy = two_trees();
    let order = hierarchy.order();
    assert_eq!(order.len(), 6);
    for &node in order {
        if let Some(parent) = hierarchy.parent(node) {
            let p = order.iter().position(|&n| n == parent).unwrap();
            let c = order.iter().position(|&n| n == node).unwrap();
            assert!(p < c, "parent {parent} after child {node}");
        }
    }
}

#[test]
fn from_parents_matches_from_children() {
    let by_parents =
        Hierarchy::from_parents(&[None, Some(0), Some(1), None, Some(3), Some(0)]).unwrap();
    let by_children = two_trees();
    assert_eq!(by_parents.roots(), by_children.roots());
    for node in 0..6 {
        assert_eq!(by_parents.parent(node), by_children.parent(node));
    }
}

#[test]
fn malformed_topologies_are_rejected() {
    // Cycle with no root
    assert!(Hierarchy::from_children(vec![vec![1], vec![2], vec![0]]).is_err());
    // Self loop
    assert!(Hierarchy::from_children(vec![vec![0]]).is_err());
    // Two parents
    assert!(Hierarchy::from_children(vec![vec![2], vec![2], vec![]]).is_err());
    // Out-of-range parent
    assert!(Hierarchy::from_parents(&[Some(4)]).is_err());
}

// ============================================================================
// Evaluation
// ============================================================================

#[test]
fn world_matrices_compose_through_ancestors() {
    let hierarchy = Hierarchy::from_children(vec![vec![1], vec![2], vec![]]).unwrap();
    let locals = vec![
        Transform::from_rotation(Quat::from_rotation_y(FRAC_PI_2)),
        Transform::from_translation(Vec3::X),
        Transform::from_trs(Vec3::X, Quat::IDENTITY, Vec3::splat(2.0)),
    ];
    let pose = Pose::new(&hierarchy, locals);

    // Rotating the root 90° about Y maps +X onto -Z.
    let tip = Vec3::from(pose.world(2).unwrap().translation);
    assert!(tip.abs_diff_eq(Vec3::new(0.0, 0.0, -2.0), EPSILON), "got {tip}");
}

#[test]
fn pose_matches_full_evaluation() {
    let hierarchy = two_trees();
    let locals = offset_locals(6);
    let pose = Pose::new(&hierarchy, locals.clone());

    let mut worlds = Vec::new();
    evaluate_world_matrices(&hierarchy, &locals, &mut worlds);
    assert_eq!(pose.worlds(), worlds.as_slice());
}

// ============================================================================
// Dirty propagation
// ============================================================================

#[test]
fn flush_changes_only_the_dirty_subtree() {
    let hierarchy = two_trees();
    let mut pose = Pose::new(&hierarchy, offset_locals(6));
    let before: Vec<Affine3A> = pose.worlds().to_vec();

    let moved = Transform::from_translation(Vec3::new(0.0, 0.0, 5.0));
    assert!(pose.set_local(&hierarchy, 1, moved));
    assert_eq!(pose.flush(&hierarchy), 2);

    let after = pose.worlds();
    // 1 and its descendant 2 moved
    assert_ne!(after[1], before[1]);
    assert_ne!(after[2], before[2]);
    // Parent, sibling and the unrelated tree are bit-identical
    for node in [0, 3, 4, 5] {
        let a: [f32; 12] = after[node].to_cols_array();
        let b: [f32; 12] = before[node].to_cols_array();
        assert_eq!(
            a.map(f32::to_bits),
            b.map(f32::to_bits),
            "node {node} changed"
        );
    }
}

#[test]
fn partial_flush_equals_full_evaluation() {
    let hierarchy = two_trees();
    let mut pose = Pose::new(&hierarchy, offset_locals(6));

    pose.set_local(&hierarchy, 2, Transform::from_rotation(Quat::from_rotation_x(0.3)));
    pose.set_local(&hierarchy, 0, Transform::from_translation(Vec3::splat(-1.0)));
    pose.set_local(&hierarchy, 4, Transform::from_rotation(Quat::from_rotation_z(1.1)));
    assert!(pose.has_pending());
    pose.flush(&hierarchy);
    assert!(!pose.has_pending());

    let mut expected = Vec::new();
    evaluate_world_matrices(&hierarchy, pose.locals(), &mut expected);
    assert_eq!(pose.worlds(), expected.as_slice());
}

#[test]
fn ancestor_and_descendant_marks_recompute_each_node_once() {
    let hierarchy = two_trees();
    let mut pose = Pose::new(&hierarchy, offset_locals(6));
    pose.mark_dirty(&hierarchy, 2);
    pose.mark_dirty(&hierarchy, 0);
    // 0, 1, 2, 5
    assert_eq!(pose.flush(&hierarchy), 4);
}

#[test]
fn set_local_out_of_range_is_rejected() {
    let hierarchy = two_trees();
    let mut pose = Pose::new(&hierarchy, offset_locals(6));
    assert!(!pose.set_local(&hierarchy, 6, Transform::IDENTITY));
    assert!(!pose.has_pending());
}

#[test]
fn reset_locals_restores_bind_pose() {
    let hierarchy = two_trees();
    let bind = offset_locals(6);
    let mut pose = Pose::new(&hierarchy, bind.clone());
    let bind_worlds = pose.worlds().to_vec();

    pose.set_local(&hierarchy, 3, Transform::from_translation(Vec3::splat(9.0)));
    pose.flush(&hierarchy);
    assert!(pose.reset_locals(&hierarchy, &bind));
    pose.flush(&hierarchy);
    assert_eq!(pose.worlds(), bind_worlds.as_slice());
}

#[test]
fn reset_locals_with_wrong_length_is_rejected() {
    let hierarchy = two_trees();
    let mut pose = Pose::new(&hierarchy, offset_locals(6));
    let worlds = pose.worlds().to_vec();

    assert!(!pose.reset_locals(&hierarchy, &offset_locals(4)));
    assert!(!pose.reset_locals(&hierarchy, &offset_locals(7)));
    assert_eq!(pose.len(), 6);
    assert!(!pose.has_pending());
    assert_eq!(pose.worlds(), worlds.as_slice());
}

// ============================================================================
// Joint matrices
// ============================================================================

fn joint(name: &str, node: usize, inverse_bind: Mat4) -> Joint {
    Joint {
        name: name.into(),
        node,
        inverse_bind,
        children: vec![],
    }
}

#[test]
fn bind_pose_joint_matrices_are_identity() {
    // armature(0) -> hip(1) -> knee(2)
    let hierarchy = Hierarchy::from_children(vec![vec![1], vec![2], vec![]]).unwrap();
    let locals = vec![
        Transform::from_translation(Vec3::new(3.0, 0.0, 0.0)),
        Transform::from_translation(Vec3::Y),
        Transform::from_translation(Vec3::Y),
    ];
    let pose = Pose::new(&hierarchy, locals);

    // Inverse binds expressed relative to the skeleton root (hip)
    let joints = vec![
        joint("hip", 1, Mat4::IDENTITY),
        joint("knee", 2, Mat4::from_translation(-Vec3::Y)),
    ];
    let skins = vec![Skin {
        name: "legs".into(),
        joints: 0..2,
        skeleton_root: 1,
    }];

    let mut out = Vec::new();
    compute_all_joint_matrices(pose.worlds(), &joints, &skins, &mut out);
    assert_eq!(out.len(), 2);
    for m in out {
        assert!(mat_approx(m, Mat4::IDENTITY), "got {m:?}");
    }
}

#[test]
fn joint_matrices_follow_non_joint_ancestors_relative_to_root() {
    let hierarchy = Hierarchy::from_children(vec![vec![1], vec![2], vec![]]).unwrap();
    let mut pose = Pose::new(
        &hierarchy,
        vec![
            Transform::IDENTITY,
            Transform::IDENTITY,
            Transform::from_translation(Vec3::Y),
        ],
    );
    let joints = vec![
        joint("hip", 1, Mat4::IDENTITY),
        joint("knee", 2, Mat4::from_translation(-Vec3::Y)),
    ];
    let skins = vec![Skin {
        name: "legs".into(),
        joints: 0..2,
        skeleton_root: 1,
    }];

    // Moving the non-joint armature moves the whole skeleton, which the
    // instance's draw matrix accounts for; relative joint matrices stay put.
    pose.set_local(&hierarchy, 0, Transform::from_translation(Vec3::splat(7.0)));
    pose.flush(&hierarchy);

    let mut out = Vec::new();
    compute_all_joint_matrices(pose.worlds(), &joints, &skins, &mut out);
    assert!(mat_approx(out[1], Mat4::IDENTITY));
}

#[test]
fn skins_write_into_their_own_ranges() {
    let hierarchy = Hierarchy::from_children(vec![vec![], vec![]]).unwrap();
    let pose = Pose::new(
        &hierarchy,
        vec![
            Transform::from_translation(Vec3::X),
            Transform::from_translation(Vec3::Z),
        ],
    );
    let joints = vec![
        joint("a", 0, Mat4::IDENTITY),
        joint("b", 1, Mat4::IDENTITY),
    ];
    let skins = vec![
        Skin {
            name: "first".into(),
            joints: 0..1,
            skeleton_root: 1,
        },
        Skin {
            name: "second".into(),
            joints: 1..2,
            skeleton_root: 1,
        },
    ];

    let mut out = Vec::new();
    compute_all_joint_matrices(pose.worlds(), &joints, &skins, &mut out);
    // inverse(root world) * joint world
    assert!(mat_approx(out[0], Mat4::from_translation(Vec3::X - Vec3::Z)));
    assert!(mat_approx(out[1], Mat4::IDENTITY));
}
