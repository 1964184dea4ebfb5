//! Object groups and their cached optimized layout.

use std::collections::BTreeSet;

use crate::scene::optimizer::GroupLayout;

/// A caller-defined, mutable set of objects optimized and drawn together.
///
/// The optimized layout is derived state: it is valid only while no member
/// has been added, removed, deleted, re-created, hidden, shown or toggled
/// transparent since the last optimization. Any such mutation must call
/// [`GroupInfo::invalidate`], which also drops the buffers synthesized for
/// instancing before new ones are built.
pub struct GroupInfo {
    /// Member object ids. Ids may refer to deleted objects; those are
    /// skipped at optimization time (and rejoin if the id is re-created).
    pub(crate) objects: BTreeSet<i32>,
    pub(crate) layout: Option<GroupLayout>,
}

impl GroupInfo {
    /// Creates an empty group.
    pub fn new() -> GroupInfo {
        GroupInfo {
            objects: BTreeSet::new(),
            layout: None,
        }
    }

    /// The current member ids, in ascending order.
    pub fn objects(&self) -> impl Iterator<Item = i32> + '_ {
        self.objects.iter().copied()
    }

    /// Is the group empty?
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Has this group a valid optimized layout?
    pub fn is_optimized(&self) -> bool {
        self.layout.is_some()
    }

    /// Adds members. Returns `true` if the membership changed.
    pub(crate) fn add(&mut self, ids: &[i32]) -> bool {
        let mut changed = false;
        for id in ids {
            changed |= self.objects.insert(*id);
        }
        if changed {
            self.invalidate();
        }
        changed
    }

    /// Removes members. Returns `true` if the membership changed.
    pub(crate) fn remove(&mut self, ids: &[i32]) -> bool {
        let mut changed = false;
        for id in ids {
            changed |= self.objects.remove(id);
        }
        if changed {
            self.invalidate();
        }
        changed
    }

    /// Empties the group.
    pub(crate) fn clear(&mut self) {
        self.objects.clear();
        self.invalidate();
    }

    /// Drops the cached layout and the GPU buffers synthesized for it.
    pub(crate) fn invalidate(&mut self) {
        self.layout = None;
    }
}

impl Default for GroupInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_edits_invalidate() {
        let mut g = GroupInfo::new();
        assert!(g.add(&[3, 1, 2]));
        g.layout = Some(GroupLayout::default());
        assert!(g.is_optimized());

        // Adding an already-present id is not a mutation.
        assert!(!g.add(&[2]));
        assert!(g.is_optimized());

        assert!(g.add(&[4]));
        assert!(!g.is_optimized());

        g.layout = Some(GroupLayout::default());
        assert!(g.remove(&[1]));
        assert!(!g.is_optimized());

        assert!(!g.remove(&[99]));
        assert_eq!(g.objects().collect::<Vec<_>>(), vec![2, 3, 4]);
    }
}
