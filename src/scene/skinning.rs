use std::ops::Range;

use glam::{Affine3A, Mat4};

/// One entry of a model's joint table.
///
/// The position of a joint in the table is its canonical joint index: the
/// value stored in the `JOINTS_0` vertex stream and the slot of its skinning
/// matrix in every instance buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub name: String,
    /// Node index in the model's hierarchy
    pub node: usize,
    /// Mesh bind space -> joint local space at rest pose
    pub inverse_bind: Mat4,
    /// Indices of child joints within the same table
    pub children: Vec<usize>,
}

/// A contiguous run of the joint table belonging to one source skin.
#[derive(Debug, Clone, PartialEq)]
pub struct Skin {
    pub name: String,
    pub joints: Range<usize>,
    /// Node whose world matrix the skinning matrices are expressed against
    pub skeleton_root: usize,
}

/// Computes the skinning matrix of every joint of `skin`.
///
/// `worlds` are node world matrices of the evaluated pose and `out` is indexed
/// by canonical joint index. Each joint gets
/// `inverse(skeleton_root_world) * joint_world * inverse_bind`.
pub fn compute_joint_matrices(worlds: &[Affine3A], joints: &[Joint], skin: &Skin, out: &mut [Mat4]) {
    let root_inv = worlds
        .get(skin.skeleton_root)
        .map_or(Affine3A::IDENTITY, Affine3A::inverse);
    let root_inv = Mat4::from(root_inv);

    for index in skin.joints.clone() {
        let (Some(joint), Some(slot)) = (joints.get(index), out.get_mut(index)) else {
            continue;
        };
        let Some(joint_world) = worlds.get(joint.node) else {
            continue;
        };
        // Order matters: IBM first, then the joint's pose, then back into
        // skeleton-root space.
        *slot = root_inv * Mat4::from(*joint_world) * joint.inverse_bind;
    }
}

/// Skinning matrices for every skin of a model, written into one flat table.
pub fn compute_all_joint_matrices(
    worlds: &[Affine3A],
    joints: &[Joint],
    skins: &[Skin],
    out: &mut Vec<Mat4>,
) {
    out.resize(joints.len(), Mat4::IDENTITY);
    for skin in skins {
        compute_joint_matrices(worlds, joints, skin, out);
    }
}
