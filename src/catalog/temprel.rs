//! Per-worker temporary relation registry.
//!
//! Temp relations get normal catalog rows under a unique physical name;
//! this registry maps the user-visible logical name onto the physical one.
//! Name lookups are filtered through it before the catalog sees them,
//! which lets a temp relation mask a permanent relation of the same name
//! for the duration of the session. The registry also remembers what to
//! drop at worker shutdown.
//!
//! Deletion is logical: a dropped or renamed-away entry stays in the list
//! (ignored for lookup) until transaction end, so that an abort can bring
//! it back.

use crate::catalog::RelKind;
use crate::common::error::{CatalogError, PlatterError, Result};
use crate::common::relation::RelId;

#[derive(Debug, Clone)]
pub struct TempRelEntry {
    pub logical_name: String,
    pub physical_name: String,
    pub rel_id: RelId,
    pub kind: RelKind,
    pub created_in_cur_xact: bool,
    pub deleted_in_cur_xact: bool,
}

/// The list is small by design; lookups are linear.
#[derive(Debug, Default)]
pub struct TempRelRegistry {
    entries: Vec<TempRelEntry>,
}

impl TempRelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a temp relation created in the current
    /// transaction. The caller has already checked for a
    /// duplicate logical name.
    pub fn create(&mut self, logical: &str, physical: &str, rel_id: RelId, kind: RelKind) {
        self.entries.push(TempRelEntry {
            logical_name: logical.to_string(),
            physical_name: physical.to_string(),
            rel_id,
            kind,
            created_in_cur_xact: true,
            deleted_in_cur_xact: false,
        });
    }

    /// Logical drop. Keeps scanning because a rename can
    /// leave multiple entries with the same rel id.
    pub fn drop_by_id(&mut self, rel_id: RelId) {
        for entry in &mut self.entries {
            if entry.rel_id == rel_id {
                entry.deleted_in_cur_xact = true;
            }
        }
    }

    /// The active entry for a logical name: the one with the
    /// greatest creation order among non-deleted entries, or
    /// nothing.
    pub fn resolve(&self, logical: &str) -> Option<&TempRelEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| !e.deleted_in_cur_xact && e.logical_name == logical)
    }

    /// Map a physical name back to its logical name.
    pub fn resolve_physical(&self, physical: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .filter(|e| !e.deleted_in_cur_xact)
            .find(|e| e.physical_name == physical)
            .map(|e| e.logical_name.as_str())
    }

    pub fn is_temp_name(&self, logical: &str) -> bool {
        self.resolve(logical).is_some()
    }

    /// Rename handling, invoked before the catalog-level
    /// rename. Returns true when `old` named a temp relation
    /// and the rename was fully handled here; the physical
    /// relation is not touched at all, only the mapping.
    ///
    /// Renaming onto a name held by a live temp entry is
    /// rejected either way; so is renaming a permanent
    /// relation into temp-held territory.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<bool> {
        if self.is_temp_name(new) {
            return Err(PlatterError::Catalog(CatalogError::TempNameInUse(
                new.to_string(),
            )));
        }

        let idx = self
            .entries
            .iter()
            .rposition(|e| !e.deleted_in_cur_xact && e.logical_name == old);
        let idx = match idx {
            Some(idx) => idx,
            // not a temp relation; the normal rename path
            // proceeds
            None => return Ok(false),
        };

        // insert the new mapping next to the old one so that
        // shutdown still deletes in dependency order, and
        // logically delete the old mapping
        let mut renamed = self.entries[idx].clone();
        renamed.logical_name = new.to_string();
        renamed.created_in_cur_xact = true;
        self.entries[idx].deleted_in_cur_xact = true;
        self.entries.insert(idx + 1, renamed);
        Ok(true)
    }

    /// Transaction-end sweep. On commit, entries deleted in
    /// this transaction go away; on abort, entries created in
    /// this transaction go away. Survivors have their flags
    /// cleared.
    pub fn at_xact_end(&mut self, committed: bool) {
        self.entries.retain(|e| {
            if committed {
                !e.deleted_in_cur_xact
            } else {
                !e.created_in_cur_xact
            }
        });
        for entry in &mut self.entries {
            entry.created_in_cur_xact = false;
            entry.deleted_in_cur_xact = false;
        }
    }

    /// Entries whose underlying relations were dropped in
    /// the current transaction; commit removes their files.
    pub fn deleted_this_xact(&self) -> Vec<(RelId, RelKind)> {
        self.entries
            .iter()
            .filter(|e| e.deleted_in_cur_xact)
            .map(|e| (e.rel_id, e.kind))
            .collect()
    }

    /// Drain every live entry for worker shutdown, newest
    /// first so that indexes go before their tables.
    pub fn drain_for_shutdown(&mut self) -> Vec<TempRelEntry> {
        let mut live: Vec<TempRelEntry> = self
            .entries
            .drain(..)
            .filter(|e| !e.deleted_in_cur_xact)
            .collect();
        live.reverse();
        live
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(names: &[(&str, RelId)]) -> TempRelRegistry {
        let mut reg = TempRelRegistry::new();
        for (name, id) in names {
            reg.create(name, &format!("ptmp_{}", id), *id, RelKind::Heap);
        }
        reg
    }

    #[test]
    fn newest_active_entry_wins() {
        let mut reg = registry_with(&[("t", 10)]);
        reg.at_xact_end(true);
        reg.create("t", "ptmp_11", 11, RelKind::Heap);
        assert_eq!(reg.resolve("t").unwrap().rel_id, 11);

        reg.drop_by_id(11);
        assert_eq!(reg.resolve("t").unwrap().rel_id, 10);
    }

    #[test]
    fn commit_drops_deleted_abort_drops_created() {
        let mut reg = registry_with(&[("a", 1), ("b", 2)]);
        reg.at_xact_end(true);
        assert_eq!(reg.len(), 2);

        reg.drop_by_id(1);
        reg.at_xact_end(true);
        assert!(reg.resolve("a").is_none());
        assert!(reg.resolve("b").is_some());

        reg.create("c", "ptmp_3", 3, RelKind::Heap);
        reg.at_xact_end(false);
        assert!(reg.resolve("c").is_none());
        assert!(reg.resolve("b").is_some());
    }

    #[test]
    fn abort_restores_a_dropped_entry() {
        let mut reg = registry_with(&[("t", 1)]);
        reg.at_xact_end(true);
        reg.drop_by_id(1);
        assert!(reg.resolve("t").is_none());
        reg.at_xact_end(false);
        assert_eq!(reg.resolve("t").unwrap().rel_id, 1);
    }

    #[test]
    fn rename_swaps_the_mapping_only() -> Result<()> {
        let mut reg = registry_with(&[("old", 1)]);
        reg.at_xact_end(true);

        assert!(reg.rename("old", "new")?);
        assert!(reg.resolve("old").is_none());
        let entry = reg.resolve("new").unwrap();
        assert_eq!(entry.rel_id, 1);
        assert_eq!(entry.physical_name, "ptmp_1");

        // abort rolls the rename back
        reg.at_xact_end(false);
        assert!(reg.resolve("new").is_none());
        assert_eq!(reg.resolve("old").unwrap().rel_id, 1);
        Ok(())
    }

    #[test]
    fn rename_onto_live_temp_name_is_rejected() {
        let mut reg = registry_with(&[("a", 1), ("b", 2)]);
        let err = reg.rename("a", "b").unwrap_err();
        assert!(matches!(
            err,
            PlatterError::Catalog(CatalogError::TempNameInUse(_))
        ));
        // a permanent relation cannot take a temp name either
        assert!(reg.rename("perm", "b").is_err());
        // and a non-temp old name with a free new name is not
        // handled here
        assert_eq!(reg.rename("perm", "free").unwrap(), false);
    }

    #[test]
    fn physical_names_map_back_to_logical() {
        let mut reg = registry_with(&[("t", 1)]);
        assert_eq!(reg.resolve_physical("ptmp_1"), Some("t"));
        assert_eq!(reg.resolve_physical("elsewhere"), None);
        reg.drop_by_id(1);
        assert_eq!(reg.resolve_physical("ptmp_1"), None);
    }

    #[test]
    fn shutdown_order_is_reverse_creation() {
        let mut reg = TempRelRegistry::new();
        reg.create("t", "ptmp_1", 1, RelKind::Heap);
        reg.create("t_idx", "ptmp_2", 2, RelKind::Index);
        reg.at_xact_end(true);

        let order: Vec<RelId> = reg
            .drain_for_shutdown()
            .into_iter()
            .map(|e| e.rel_id)
            .collect();
        assert_eq!(order, vec![2, 1]);
        assert!(reg.is_empty());
    }
}
