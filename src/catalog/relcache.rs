//! Relation descriptor cache.
//!
//! Descriptors are materialized on demand from the catalog tables and
//! cached under both their id and their name; both keys always resolve to
//! the same slot. Slots live in an arena and carry a generation counter:
//! an eviction bumps the generation, so a handle held across an
//! invalidation fails its next use and the caller rebuilds. Reference
//! counts only exist to defer eviction while the current transaction is
//! still using a descriptor.

use crate::catalog::bootstrap::{NAILED_INDEX_IDS, NAILED_RELATIONS, NailedRelation};
use crate::catalog::initfile;
use crate::catalog::{
    scalar_type_of, AccessMethodForm, CatalogAccessPolicy, CatalogStore, ColumnForm,
    RelKind, RelationForm, RuleForm, PLACEHOLDER_TYPE_ID,
};
use crate::common::error::{
    relation_id_not_found, relation_not_found, CatalogError, PlatterError, Result,
};
use crate::common::relation::{ColumnType, RelId, TupleLayout};
use crate::storage::BufferPool;
use crate::txn_mgr::LockTable;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// A cached relation descriptor.
#[derive(Debug, Clone)]
pub struct RelDesc {
    pub form: RelationForm,
    pub nailed: bool,
    /// Created by the current transaction; invisible to
    /// other workers until commit.
    pub local_to_xact: bool,
    pub is_temp: bool,
    pub layout: TupleLayout,
    pub am: Option<AccessMethodForm>,
    pub rules: Vec<RuleForm>,
    pub strategy: Vec<u32>,
    pub support: Vec<u32>,
    pub file_open: bool,
    pub lock_tag: RelId,
}

impl RelDesc {
    pub fn rel_id(&self) -> RelId {
        self.form.id
    }

    pub fn name(&self) -> &str {
        &self.form.name
    }

    pub fn kind(&self) -> RelKind {
        self.form.kind
    }
}

/// Client-side reference to a cache slot. Cheap to copy;
/// stale handles are detected by the generation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescHandle {
    slot: usize,
    gen: u32,
    rel_id: RelId,
}

impl DescHandle {
    pub fn rel_id(&self) -> RelId {
        self.rel_id
    }
}

#[derive(Debug)]
struct Slot {
    gen: u32,
    entry: Option<SlotEntry>,
}

#[derive(Debug)]
struct SlotEntry {
    desc: RelDesc,
    refcount: u32,
    /// An invalidation arrived while references were live;
    /// evict once they drain.
    stale: bool,
}

enum BuildKey<'a> {
    Id(RelId),
    Name(&'a str),
}

#[derive(Debug, Default)]
pub struct RelCache {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_id: HashMap<RelId, usize>,
    by_name: HashMap<String, usize>,
    /// Relations created by the current transaction, in
    /// creation order.
    local_rels: Vec<RelId>,
}

impl RelCache {
    /// Build the cache a worker starts with: the nailed
    /// catalog heap descriptors from the compile-time
    /// schema, and the nailed catalog index descriptors from
    /// the persistent init file (regenerating it when
    /// missing or unreadable).
    pub fn initialize(database_dir: &Path) -> Result<RelCache> {
        let mut cache = RelCache::default();

        for nailed in NAILED_RELATIONS.iter() {
            if nailed.form.kind == RelKind::Heap {
                let desc = desc_from_nailed(nailed)?;
                cache.insert(desc, 0);
            }
        }

        let index_descs = match initfile::read(database_dir) {
            Ok(descs) if descs.len() == NAILED_INDEX_IDS.len() => descs,
            _ => {
                let descs: Vec<RelDesc> = NAILED_RELATIONS
                    .iter()
                    .filter(|n| n.form.kind == RelKind::Index)
                    .map(desc_from_nailed)
                    .collect::<Result<_>>()?;
                initfile::write(database_dir, &descs)?;
                descs
            }
        };
        for desc in index_descs {
            cache.insert(desc, 0);
        }

        Ok(cache)
    }

    pub fn open_by_id(
        &mut self,
        id: RelId,
        store: &dyn CatalogStore,
        policy: CatalogAccessPolicy,
        pool: &dyn BufferPool,
        locks: &mut LockTable,
    ) -> Result<DescHandle> {
        if let Some(handle) = self.open_cached(self.by_id.get(&id).copied(), pool, locks)? {
            return Ok(handle);
        }
        let desc = build_desc(BuildKey::Id(id), store, policy)?;
        self.open_built(desc, pool, locks)
    }

    pub fn open_by_name(
        &mut self,
        name: &str,
        store: &dyn CatalogStore,
        policy: CatalogAccessPolicy,
        pool: &dyn BufferPool,
        locks: &mut LockTable,
    ) -> Result<DescHandle> {
        if let Some(handle) = self.open_cached(self.by_name.get(name).copied(), pool, locks)? {
            return Ok(handle);
        }
        let desc = build_desc(BuildKey::Name(name), store, policy)?;
        self.open_built(desc, pool, locks)
    }

    /// Resolve a handle. Fails with a stale-descriptor error
    /// once the slot has been evicted; the caller re-opens.
    pub fn get(&self, handle: &DescHandle) -> Result<&RelDesc> {
        let slot = self
            .slots
            .get(handle.slot)
            .ok_or(CatalogError::StaleDescriptor(handle.rel_id))?;
        if slot.gen != handle.gen {
            return Err(CatalogError::StaleDescriptor(handle.rel_id).into());
        }
        match &slot.entry {
            Some(entry) => Ok(&entry.desc),
            None => Err(CatalogError::StaleDescriptor(handle.rel_id).into()),
        }
    }

    /// Drop one reference. Eviction is not forced here; a
    /// deferred invalidation completes once the last
    /// reference drains.
    pub fn close(&mut self, handle: DescHandle, locks: &mut LockTable) -> Result<()> {
        let slot = match self.slots.get_mut(handle.slot) {
            Some(slot) if slot.gen == handle.gen => slot,
            _ => {
                // already evicted; the lock was released with
                // the rest at transaction end
                return Ok(());
            }
        };
        let evict = match slot.entry.as_mut() {
            Some(entry) => {
                entry.refcount = entry.refcount.saturating_sub(1);
                locks.release(handle.rel_id);
                entry.stale && entry.refcount == 0
            }
            None => false,
        };
        if evict {
            self.evict_slot(handle.slot);
        }
        Ok(())
    }

    /// An invalidation named this descriptor. Evict now if
    /// nothing references it, otherwise mark it and let the
    /// references drain.
    pub fn invalidate(&mut self, rel_id: RelId) {
        let slot_idx = match self.by_id.get(&rel_id) {
            Some(idx) => *idx,
            None => return,
        };
        let (nailed, referenced) = match self.slots[slot_idx].entry.as_ref() {
            Some(entry) => (entry.desc.nailed, entry.refcount > 0),
            None => return,
        };
        if nailed {
            return;
        }
        if referenced {
            if let Some(entry) = self.slots[slot_idx].entry.as_mut() {
                entry.stale = true;
            }
        } else {
            self.evict_slot(slot_idx);
        }
    }

    /// Evict every cached index descriptor built on the
    /// given access method (all of them when `am_id` is 0).
    pub fn invalidate_indexes_of_am(&mut self, am_id: u32) {
        let victims: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let entry = slot.entry.as_ref()?;
                let matches = entry.desc.kind() == RelKind::Index
                    && !entry.desc.nailed
                    && (am_id == 0 || entry.desc.form.am_id == am_id);
                matches.then_some(i)
            })
            .collect();
        for idx in victims {
            self.evict_slot(idx);
        }
    }

    /// Process-wide cache reset. Nailed descriptors survive
    /// unconditionally; with `only_zero_refs` set, so does
    /// anything still referenced.
    pub fn invalidate_all(&mut self, only_zero_refs: bool) {
        let victims: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let entry = slot.entry.as_ref()?;
                if entry.desc.nailed {
                    return None;
                }
                if only_zero_refs && entry.refcount > 0 {
                    return None;
                }
                Some(i)
            })
            .collect();
        for idx in victims {
            self.evict_slot(idx);
        }
    }

    /// The relation is being dropped by this worker: remove
    /// it from the local-creation list and evict.
    pub fn forget(&mut self, rel_id: RelId) {
        self.local_rels.retain(|id| *id != rel_id);
        if let Some(slot_idx) = self.by_id.get(&rel_id).copied() {
            if self.slots[slot_idx]
                .entry
                .as_ref()
                .map(|e| e.desc.nailed)
                .unwrap_or(false)
            {
                warn!(rel_id, "refusing to forget a nailed descriptor");
                return;
            }
            self.evict_slot(slot_idx);
        }
    }

    /// Flag a cached descriptor as belonging to a temp
    /// relation (its name key is the physical name).
    pub fn set_temp(&mut self, rel_id: RelId) {
        if let Some(slot_idx) = self.by_id.get(&rel_id).copied() {
            if let Some(entry) = self.slots[slot_idx].entry.as_mut() {
                entry.desc.is_temp = true;
            }
        }
    }

    /// Flag a cached descriptor as created by the current
    /// transaction.
    pub fn mark_local(&mut self, rel_id: RelId, is_temp: bool) {
        if let Some(slot_idx) = self.by_id.get(&rel_id).copied() {
            if let Some(entry) = self.slots[slot_idx].entry.as_mut() {
                entry.desc.local_to_xact = true;
                entry.desc.is_temp = is_temp;
                self.local_rels.push(rel_id);
            }
        }
    }

    /// End-of-transaction sweep over relations created by
    /// this transaction. On abort their backing files are
    /// removed; either way the descriptors lose their local
    /// flag and are flushed so the next open rebuilds them
    /// from the (now visible) catalog.
    pub fn purge_local(&mut self, committed: bool, pool: &dyn BufferPool) -> Result<()> {
        let local: Vec<RelId> = std::mem::take(&mut self.local_rels);
        for rel_id in local {
            if !committed {
                pool.unlink_relation(rel_id)?;
            }
            if let Some(slot_idx) = self.by_id.get(&rel_id).copied() {
                if let Some(entry) = self.slots[slot_idx].entry.as_mut() {
                    entry.desc.local_to_xact = false;
                }
                self.evict_slot(slot_idx);
            }
        }
        Ok(())
    }

    pub fn cached_count(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_cached(&self, rel_id: RelId) -> bool {
        self.by_id.contains_key(&rel_id)
    }

    #[cfg(test)]
    pub(crate) fn refcount(&self, rel_id: RelId) -> u32 {
        self.by_id
            .get(&rel_id)
            .and_then(|idx| self.slots[*idx].entry.as_ref())
            .map(|e| e.refcount)
            .unwrap_or(0)
    }

    fn open_cached(
        &mut self,
        slot_idx: Option<usize>,
        pool: &dyn BufferPool,
        locks: &mut LockTable,
    ) -> Result<Option<DescHandle>> {
        let slot_idx = match slot_idx {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let evict_first = match &self.slots[slot_idx].entry {
            Some(entry) => entry.stale && entry.refcount == 0,
            None => return Ok(None),
        };
        if evict_first {
            // the deferred eviction can complete now; rebuild
            self.evict_slot(slot_idx);
            return Ok(None);
        }

        let slot = &mut self.slots[slot_idx];
        let gen = slot.gen;
        let entry = match slot.entry.as_mut() {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let rel_id = entry.desc.rel_id();
        if !entry.desc.file_open {
            pool.open_relation(rel_id)?;
            entry.desc.file_open = true;
        }
        entry.refcount += 1;
        locks.acquire_shared(rel_id);
        Ok(Some(DescHandle {
            slot: slot_idx,
            gen,
            rel_id,
        }))
    }

    fn open_built(
        &mut self,
        desc: RelDesc,
        pool: &dyn BufferPool,
        locks: &mut LockTable,
    ) -> Result<DescHandle> {
        let rel_id = desc.rel_id();
        pool.open_relation(rel_id)?;
        let slot_idx = self.insert(desc, 1);
        if let Some(entry) = self.slots[slot_idx].entry.as_mut() {
            entry.desc.file_open = true;
        }
        locks.acquire_shared(rel_id);
        Ok(DescHandle {
            slot: slot_idx,
            gen: self.slots[slot_idx].gen,
            rel_id,
        })
    }

    /// Insert under both keys. An existing descriptor with
    /// the same id or name is evicted first.
    fn insert(&mut self, desc: RelDesc, refcount: u32) -> usize {
        if let Some(old) = self.by_id.get(&desc.rel_id()).copied() {
            self.evict_slot(old);
        }
        if let Some(old) = self.by_name.get(desc.name()).copied() {
            self.evict_slot(old);
        }

        let slot_idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.slots.push(Slot {
                    gen: 0,
                    entry: None,
                });
                self.slots.len() - 1
            }
        };
        self.by_id.insert(desc.rel_id(), slot_idx);
        self.by_name.insert(desc.name().to_string(), slot_idx);
        self.slots[slot_idx].entry = Some(SlotEntry {
            desc,
            refcount,
            stale: false,
        });
        slot_idx
    }

    fn evict_slot(&mut self, slot_idx: usize) {
        let slot = &mut self.slots[slot_idx];
        let entry = match slot.entry.take() {
            Some(entry) => entry,
            None => return,
        };
        slot.gen = slot.gen.wrapping_add(1);
        if self.by_id.get(&entry.desc.rel_id()) == Some(&slot_idx) {
            self.by_id.remove(&entry.desc.rel_id());
        }
        if self.by_name.get(entry.desc.name()) == Some(&slot_idx) {
            self.by_name.remove(entry.desc.name());
        }
        self.free.push(slot_idx);
    }
}

fn desc_from_nailed(nailed: &NailedRelation) -> Result<RelDesc> {
    let layout = layout_from_columns(&nailed.columns, CatalogAccessPolicy::Bootstrap)?;
    Ok(RelDesc {
        nailed: true,
        local_to_xact: false,
        is_temp: false,
        layout,
        am: nailed.am.clone(),
        rules: Vec::new(),
        strategy: nailed.strategy.clone(),
        support: nailed.support.clone(),
        file_open: false,
        lock_tag: nailed.form.id,
        form: nailed.form.clone(),
    })
}

pub(crate) fn layout_from_columns(
    columns: &[ColumnForm],
    policy: CatalogAccessPolicy,
) -> Result<TupleLayout> {
    let mut types = Vec::with_capacity(columns.len());
    let mut names = Vec::with_capacity(columns.len());
    for column in columns {
        let scalar = match scalar_type_of(column.type_id) {
            Some(t) => t,
            None => {
                return Err(PlatterError::Internal(format!(
                    "unknown type id {} for column {}",
                    column.type_id, column.name
                )))
            }
        };
        if column.type_id == PLACEHOLDER_TYPE_ID && policy == CatalogAccessPolicy::Indexed {
            // only bootstrap may leave a column's type to be
            // patched later
            return Err(PlatterError::Internal(format!(
                "column {} has no committed type",
                column.name
            )));
        }
        types.push(ColumnType::new(scalar, true));
        names.push(column.name.clone());
    }
    TupleLayout::new(types, names)
}

fn build_desc(
    key: BuildKey,
    store: &dyn CatalogStore,
    policy: CatalogAccessPolicy,
) -> Result<RelDesc> {
    // step 1: the relation catalog row, sequentially during
    // bootstrap, through the catalog index otherwise
    let form = match policy {
        CatalogAccessPolicy::Bootstrap => {
            let rows = store.scan_relations()?;
            match key {
                BuildKey::Id(id) => rows.into_iter().find(|r| r.id == id),
                BuildKey::Name(name) => rows.into_iter().find(|r| r.name == name),
            }
        }
        CatalogAccessPolicy::Indexed => match key {
            BuildKey::Id(id) => store.relation_by_id(id)?,
            BuildKey::Name(name) => store.relation_by_name(name)?,
        },
    };
    let form = match (form, &key) {
        (Some(form), _) => form,
        (None, BuildKey::Id(id)) => return Err(relation_id_not_found(*id)),
        (None, BuildKey::Name(name)) => return Err(relation_not_found(name)),
    };

    // steps 2-3: the tuple layout from the column catalog
    let natts = form.column_count;
    let columns: Vec<ColumnForm> = match policy {
        CatalogAccessPolicy::Bootstrap => {
            let cols = store.scan_columns(form.id)?;
            if cols.len() < natts as usize {
                return Err(PlatterError::Internal(format!(
                    "catalog is missing {} attribute(s) for relid {}",
                    natts as usize - cols.len(),
                    form.id
                )));
            }
            cols
        }
        CatalogAccessPolicy::Indexed => (1..=natts)
            .map(|i| {
                store.column(form.id, i)?.ok_or_else(|| {
                    PlatterError::Internal(format!(
                        "cannot find attribute {} of relation {}",
                        i, form.name
                    ))
                })
            })
            .collect::<Result<_>>()?,
    };
    let layout = layout_from_columns(&columns, policy)?;

    // step 4: rewrite rules, opaque to the core
    let rules = if form.has_rules {
        store.rules_of(form.id)?
    } else {
        Vec::new()
    };

    // step 5: index strategy and support vectors. Failure
    // here leaves the worker unrecoverable.
    let (am, strategy, support) = if form.am_id != 0 {
        let am = store.access_method(form.am_id)?.ok_or_else(|| {
            PlatterError::Fatal(format!(
                "access method {} for index {} is missing",
                form.am_id, form.name
            ))
        })?;
        let (strategy, support) =
            store.index_support(form.id, form.am_id)?.ok_or_else(|| {
                PlatterError::Fatal(format!(
                    "index support for {} is missing",
                    form.name
                ))
            })?;
        (Some(am), strategy, support)
    } else {
        (None, Vec::new(), Vec::new())
    };

    // steps 6-8 (lock handle, file open, cache insert) are
    // completed by the caller
    Ok(RelDesc {
        nailed: false,
        local_to_xact: false,
        is_temp: false,
        layout,
        am,
        rules,
        strategy,
        support,
        file_open: false,
        lock_tag: form.id,
        form,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::bootstrap::nailed_count;
    use crate::catalog::memory::{user_relation, MemCatalog};
    use crate::catalog::REL_CATALOG_ID;
    use crate::common::scalar::ScalarType;
    use crate::storage::MemBufferPool;

    fn fixture() -> (RelCache, MemCatalog, MemBufferPool, LockTable, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = RelCache::initialize(dir.path()).unwrap();
        (
            cache,
            MemCatalog::new(),
            MemBufferPool::new(),
            LockTable::default(),
            dir,
        )
    }

    fn seed_table(store: &MemCatalog, name: &str) -> RelId {
        let id = store.allocate_rel_id().unwrap();
        let (form, cols) = user_relation(
            id,
            name,
            RelKind::Heap,
            &[
                ("a".to_string(), ScalarType::Int32.nullable(false)),
                ("b".to_string(), ScalarType::String.nullable(true)),
            ],
        );
        store.create_relation(form, cols).unwrap();
        id
    }

    #[test]
    fn nailed_set_is_resident_at_startup() {
        let (cache, _, _, _, _dir) = fixture();
        assert_eq!(cache.cached_count(), nailed_count());
        assert!(cache.is_cached(REL_CATALOG_ID));
    }

    #[test]
    fn open_close_reopen_same_layout() -> Result<()> {
        let (mut cache, store, pool, mut locks, _dir) = fixture();
        let id = seed_table(&store, "t");

        let h1 = cache.open_by_id(id, &store, CatalogAccessPolicy::Indexed, &pool, &mut locks)?;
        let layout1 = cache.get(&h1)?.layout.clone();
        cache.close(h1, &mut locks)?;

        let h2 = cache.open_by_id(id, &store, CatalogAccessPolicy::Indexed, &pool, &mut locks)?;
        assert_eq!(cache.get(&h2)?.layout, layout1);
        cache.close(h2, &mut locks)?;
        Ok(())
    }

    #[test]
    fn name_and_id_keys_reach_the_same_slot() -> Result<()> {
        let (mut cache, store, pool, mut locks, _dir) = fixture();
        let id = seed_table(&store, "t");

        let by_name =
            cache.open_by_name("t", &store, CatalogAccessPolicy::Indexed, &pool, &mut locks)?;
        let by_id =
            cache.open_by_id(id, &store, CatalogAccessPolicy::Indexed, &pool, &mut locks)?;
        assert_eq!(by_name, by_id);
        assert_eq!(cache.refcount(id), 2);
        cache.close(by_name, &mut locks)?;
        cache.close(by_id, &mut locks)?;
        Ok(())
    }

    #[test]
    fn invalidation_defers_while_referenced() -> Result<()> {
        let (mut cache, store, pool, mut locks, _dir) = fixture();
        let id = seed_table(&store, "t");

        let handle =
            cache.open_by_id(id, &store, CatalogAccessPolicy::Indexed, &pool, &mut locks)?;
        cache.invalidate(id);
        // the holder keeps a consistent view for the rest of
        // its transaction
        assert!(cache.get(&handle).is_ok());

        cache.close(handle, &mut locks)?;
        // the deferred eviction completed with the last close
        assert!(cache.get(&handle).is_err());
        assert!(!cache.is_cached(id));
        Ok(())
    }

    #[test]
    fn stale_handle_fails_after_eviction() -> Result<()> {
        let (mut cache, store, pool, mut locks, _dir) = fixture();
        let id = seed_table(&store, "t");

        let handle =
            cache.open_by_id(id, &store, CatalogAccessPolicy::Indexed, &pool, &mut locks)?;
        cache.close(handle, &mut locks)?;
        cache.invalidate(id);
        let err = cache.get(&handle).unwrap_err();
        assert!(matches!(
            err,
            PlatterError::Catalog(CatalogError::StaleDescriptor(_))
        ));
        Ok(())
    }

    #[test]
    fn full_reset_keeps_only_the_nailed_set() -> Result<()> {
        let (mut cache, store, pool, mut locks, _dir) = fixture();
        let id = seed_table(&store, "t");
        let handle =
            cache.open_by_id(id, &store, CatalogAccessPolicy::Indexed, &pool, &mut locks)?;
        cache.close(handle, &mut locks)?;

        cache.invalidate_all(false);
        assert_eq!(cache.cached_count(), nailed_count());
        // catalog lookups keep working without a rebuild
        assert!(cache.is_cached(REL_CATALOG_ID));
        Ok(())
    }

    #[test]
    fn bootstrap_scan_matches_indexed_build() -> Result<()> {
        let (mut cache, store, pool, mut locks, _dir) = fixture();
        let id = seed_table(&store, "t");

        let seq =
            cache.open_by_id(id, &store, CatalogAccessPolicy::Bootstrap, &pool, &mut locks)?;
        let seq_layout = cache.get(&seq)?.layout.clone();
        cache.close(seq, &mut locks)?;
        cache.invalidate(id);

        let ind =
            cache.open_by_id(id, &store, CatalogAccessPolicy::Indexed, &pool, &mut locks)?;
        assert_eq!(cache.get(&ind)?.layout, seq_layout);
        cache.close(ind, &mut locks)?;
        Ok(())
    }

    #[test]
    fn rules_load_when_the_relation_is_flagged() -> Result<()> {
        use crate::catalog::{RuleEvent, RuleForm};

        let (mut cache, store, pool, mut locks, _dir) = fixture();
        let id = seed_table(&store, "t");
        store.insert_rule(RuleForm {
            rule_id: 900,
            rel_id: id,
            event: RuleEvent::Select,
            attribute_number: 0,
            is_instead: true,
            qual_tree: "<qual>".to_string(),
            action_tree: "<action>".to_string(),
        });

        let handle =
            cache.open_by_id(id, &store, CatalogAccessPolicy::Indexed, &pool, &mut locks)?;
        let desc = cache.get(&handle)?;
        assert!(desc.form.has_rules);
        assert_eq!(desc.rules.len(), 1);
        assert_eq!(desc.rules[0].rule_id, 900);
        cache.close(handle, &mut locks)?;
        Ok(())
    }

    #[test]
    fn abort_purge_unlinks_local_relations() -> Result<()> {
        let (mut cache, store, pool, mut locks, _dir) = fixture();
        let id = seed_table(&store, "t");
        let handle =
            cache.open_by_id(id, &store, CatalogAccessPolicy::Indexed, &pool, &mut locks)?;
        cache.close(handle, &mut locks)?;
        cache.mark_local(id, false);

        cache.purge_local(false, &pool)?;
        assert!(pool.is_unlinked(id));
        assert!(!cache.is_cached(id));
        Ok(())
    }
}
