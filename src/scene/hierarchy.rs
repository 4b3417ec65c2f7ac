//! Scene-Graph Evaluator
//!
//! Composes node-local transforms into world matrices. The topology
//! ([`Hierarchy`]) is built once per model and shared; every instance owns a
//! [`Pose`] holding its own local transforms, world matrices and dirty flags.
//!
//! # Ordering
//!
//! The hierarchy is flattened level by level (BFS order): all roots first,
//! then their children, and so on. Walking that order guarantees a node's
//! world matrix is never computed before its parent's.
//!
//! # Partial updates
//!
//! [`Pose::mark_dirty`] flags a node and all of its descendants;
//! [`Pose::flush`] recomputes only flagged subtrees, shallowest first.
//! Untouched subtrees keep their previous matrices bit for bit.

use glam::Affine3A;

use crate::scene::transform::Transform;

/// Immutable parent/child topology of a node graph.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
    /// Top-down (level order) traversal of every node
    order: Vec<usize>,
    depth: Vec<u32>,
}

impl Hierarchy {
    /// Builds the topology from per-node child lists.
    ///
    /// Fails when a child index is out of range, a node has two parents, or
    /// the links form a cycle.
    pub fn from_children(children: Vec<Vec<usize>>) -> Result<Self, String> {
        let count = children.len();
        let mut parents = vec![None; count];

        for (parent, kids) in children.iter().enumerate() {
            for &child in kids {
                if child >= count {
                    return Err(format!(
                        "node {parent} references child {child}, but only {count} nodes exist"
                    ));
                }
                if child == parent {
                    return Err(format!("node {parent} lists itself as a child"));
                }
                if let Some(existing) = parents[child] {
                    return Err(format!(
                        "node {child} has two parents ({existing} and {parent})"
                    ));
                }
                parents[child] = Some(parent);
            }
        }

        let roots: Vec<usize> = (0..count).filter(|&i| parents[i].is_none()).collect();

        let mut order = Vec::with_capacity(count);
        let mut depth = vec![0u32; count];
        let mut current_level = roots.clone();
        let mut level = 0u32;

        while !current_level.is_empty() {
            let mut next_level = Vec::new();
            for &node in &current_level {
                depth[node] = level;
                order.push(node);
                next_level.extend_from_slice(&children[node]);
            }
            current_level = next_level;
            level += 1;
        }

        // Nodes on a cycle are never reached from a root.
        if order.len() != count {
            return Err(format!(
                "node graph contains a cycle ({} of {count} nodes unreachable from a root)",
                count - order.len()
            ));
        }

        Ok(Self {
            parents,
            children,
            roots,
            order,
            depth,
        })
    }

    /// Builds the topology from per-node parent links.
    pub fn from_parents(parents: &[Option<usize>]) -> Result<Self, String> {
        let mut children = vec![Vec::new(); parents.len()];
        for (node, parent) in parents.iter().enumerate() {
            if let Some(parent) = *parent {
                let slot = children.get_mut(parent).ok_or_else(|| {
                    format!("node {node} has out-of-range parent {parent}")
                })?;
                slot.push(node);
            }
        }
        Self::from_children(children)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn parent(&self, node: usize) -> Option<usize> {
        self.parents.get(node).copied().flatten()
    }

    #[inline]
    #[must_use]
    pub fn children(&self, node: usize) -> &[usize] {
        self.children.get(node).map_or(&[], Vec::as_slice)
    }

    #[inline]
    #[must_use]
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Every node, parents strictly before their children.
    #[inline]
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    #[inline]
    #[must_use]
    pub fn depth(&self, node: usize) -> u32 {
        self.depth.get(node).copied().unwrap_or(0)
    }

    /// Returns `true` if `ancestor` lies on the parent chain of `node`.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: usize, node: usize) -> bool {
        let mut current = self.parent(node);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }
}

/// World matrix of one node: `parent_world * local`, or `local` for roots.
#[inline]
#[must_use]
pub fn compose_world(parent_world: Option<&Affine3A>, local: &Transform) -> Affine3A {
    let local = local.to_affine();
    match parent_world {
        Some(parent) => *parent * local,
        None => local,
    }
}

/// Evaluates world matrices for the whole graph from any local-transform
/// source (bind pose or an animated pose).
pub fn evaluate_world_matrices(
    hierarchy: &Hierarchy,
    locals: &[Transform],
    out: &mut Vec<Affine3A>,
) {
    out.clear();
    out.resize(hierarchy.len(), Affine3A::IDENTITY);
    for &node in hierarchy.order() {
        let parent_world = hierarchy.parent(node).map(|p| out[p]);
        out[node] = compose_world(parent_world.as_ref(), &locals[node]);
    }
}

/// Per-instance transform state of a node graph.
#[derive(Debug, Clone)]
pub struct Pose {
    locals: Vec<Transform>,
    worlds: Vec<Affine3A>,
    /// Invariant: a dirty node's descendants are dirty too.
    dirty: Vec<bool>,
    /// Nodes passed to `mark_dirty` since the last flush
    pending: Vec<usize>,
}

impl Pose {
    /// Creates a pose from local transforms and evaluates it fully.
    ///
    /// # Panics
    /// Panics if `locals.len()` differs from the hierarchy size.
    #[must_use]
    pub fn new(hierarchy: &Hierarchy, locals: Vec<Transform>) -> Self {
        assert_eq!(
            locals.len(),
            hierarchy.len(),
            "pose must provide one local transform per node"
        );
        let mut pose = Self {
            dirty: vec![false; locals.len()],
            worlds: Vec::with_capacity(locals.len()),
            locals,
            pending: Vec::new(),
        };
        pose.evaluate_all(hierarchy);
        pose
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.locals.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn local(&self, node: usize) -> Option<&Transform> {
        self.locals.get(node)
    }

    #[inline]
    #[must_use]
    pub fn locals(&self) -> &[Transform] {
        &self.locals
    }

    #[inline]
    #[must_use]
    pub fn world(&self, node: usize) -> Option<&Affine3A> {
        self.worlds.get(node)
    }

    #[inline]
    #[must_use]
    pub fn worlds(&self) -> &[Affine3A] {
        &self.worlds
    }

    #[inline]
    #[must_use]
    pub fn is_dirty(&self, node: usize) -> bool {
        self.dirty.get(node).copied().unwrap_or(false)
    }

    #[inline]
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Recomputes every world matrix and clears all dirty state.
    pub fn evaluate_all(&mut self, hierarchy: &Hierarchy) {
        evaluate_world_matrices(hierarchy, &self.locals, &mut self.worlds);
        self.dirty.fill(false);
        self.pending.clear();
    }

    /// Replaces a node's local transform and flags its subtree.
    pub fn set_local(&mut self, hierarchy: &Hierarchy, node: usize, transform: Transform) -> bool {
        let Some(slot) = self.locals.get_mut(node) else {
            return false;
        };
        *slot = transform;
        self.mark_dirty(hierarchy, node);
        true
    }

    /// Overwrites every local transform (e.g. back to bind pose) and flags
    /// the whole graph. A slice of the wrong length is rejected and the pose
    /// left untouched.
    pub fn reset_locals(&mut self, hierarchy: &Hierarchy, locals: &[Transform]) -> bool {
        if locals.len() != self.locals.len() {
            log::warn!(
                "Pose reset with {} transforms for {} nodes ignored",
                locals.len(),
                self.locals.len()
            );
            return false;
        }
        self.locals.copy_from_slice(locals);
        for &root in hierarchy.roots() {
            self.mark_dirty(hierarchy, root);
        }
        true
    }

    /// Flags `node` and all of its descendants for recomputation.
    pub fn mark_dirty(&mut self, hierarchy: &Hierarchy, node: usize) {
        if node >= self.dirty.len() || self.dirty[node] {
            return;
        }
        self.pending.push(node);

        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            self.dirty[current] = true;
            for &child in hierarchy.children(current) {
                if !self.dirty[child] {
                    stack.push(child);
                }
            }
        }
    }

    /// Recomputes flagged subtrees top-down and returns how many nodes were
    /// recomputed.
    pub fn flush(&mut self, hierarchy: &Hierarchy) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|&node| hierarchy.depth(node));

        let mut recomputed = 0;
        let mut stack = Vec::new();
        for start in pending.drain(..) {
            // Already handled as part of an ancestor's subtree.
            if !self.dirty[start] {
                continue;
            }
            stack.push(start);
            while let Some(node) = stack.pop() {
                let parent_world = hierarchy.parent(node).map(|p| self.worlds[p]);
                self.worlds[node] = compose_world(parent_world.as_ref(), &self.locals[node]);
                self.dirty[node] = false;
                recomputed += 1;
                stack.extend_from_slice(hierarchy.children(node));
            }
        }

        // Keep the allocation for the next frame.
        self.pending = pending;
        recomputed
    }
}
