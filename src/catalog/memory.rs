use crate::catalog::bootstrap::{self, NAILED_RELATIONS};
use crate::catalog::{
    AccessMethodForm, CatalogStore, ColumnForm, RelKind, RelationForm, RuleForm,
    FIRST_USER_REL_ID,
};
use crate::common::error::{relation_id_not_found, Result};
use crate::common::relation::RelId;
use crate::inval::RowPointer;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Mutex;

/// An in-memory catalog store. This is what tests run the
/// core against; a disk-backed store would sit behind the
/// same trait.
///
/// It is shared between workers through an `Arc`, so all
/// methods take `&self` and serialize on an internal lock,
/// the way the real catalog heaps are shared storage.
#[derive(Debug)]
pub struct MemCatalog {
    inner: Mutex<MemCatalogInner>,
}

#[derive(Debug, Default)]
struct MemCatalogInner {
    relations: HashMap<RelId, RelationForm>,
    by_name: HashMap<String, RelId>,
    columns: HashMap<RelId, Vec<ColumnForm>>,
    rules: HashMap<RelId, Vec<RuleForm>>,
    ams: HashMap<u32, AccessMethodForm>,
    next_id: RelId,
    next_row: u32,
}

impl Default for MemCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemCatalog {
    /// A catalog pre-seeded with the bootstrap relations, so
    /// that sequential scans during bootstrap find the same
    /// rows the nailed descriptors were built from.
    pub fn new() -> Self {
        let mut inner = MemCatalogInner {
            next_id: FIRST_USER_REL_ID,
            ..Default::default()
        };
        for nailed in NAILED_RELATIONS.iter() {
            inner
                .by_name
                .insert(nailed.form.name.clone(), nailed.form.id);
            inner.relations.insert(nailed.form.id, nailed.form.clone());
            inner.columns.insert(nailed.form.id, nailed.columns.clone());
        }
        let am = bootstrap::btree_am();
        inner.ams.insert(am.id, am);
        MemCatalog {
            inner: Mutex::new(inner),
        }
    }

    pub fn insert_rule(&self, rule: RuleForm) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(form) = inner.relations.get_mut(&rule.rel_id) {
            form.has_rules = true;
        }
        inner.rules.entry(rule.rel_id).or_default().push(rule);
    }

    pub fn relation_count(&self) -> usize {
        self.inner.lock().unwrap().relations.len()
    }
}

impl MemCatalogInner {
    fn touch_row(&mut self) -> RowPointer {
        self.next_row += 1;
        RowPointer {
            block: self.next_row / 64,
            offset: (self.next_row % 64) as u16,
        }
    }
}

impl CatalogStore for MemCatalog {
    fn relation_by_id(&self, id: RelId) -> Result<Option<RelationForm>> {
        Ok(self.inner.lock().unwrap().relations.get(&id).cloned())
    }

    fn relation_by_name(&self, name: &str) -> Result<Option<RelationForm>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .by_name
            .get(name)
            .and_then(|id| inner.relations.get(id))
            .cloned())
    }

    fn scan_relations(&self) -> Result<Vec<RelationForm>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .relations
            .values()
            .cloned()
            .sorted_by_key(|r| r.id)
            .collect())
    }

    fn column(&self, rel: RelId, column_number: u16) -> Result<Option<ColumnForm>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.columns.get(&rel).and_then(|cols| {
            cols.iter()
                .find(|c| c.column_number == column_number && !c.is_dropped)
                .cloned()
        }))
    }

    fn scan_columns(&self, rel: RelId) -> Result<Vec<ColumnForm>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .columns
            .get(&rel)
            .map(|cols| {
                cols.iter()
                    .filter(|c| !c.is_dropped)
                    .cloned()
                    .sorted_by_key(|c| c.column_number)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn access_method(&self, id: u32) -> Result<Option<AccessMethodForm>> {
        Ok(self.inner.lock().unwrap().ams.get(&id).cloned())
    }

    fn rules_of(&self, rel: RelId) -> Result<Vec<RuleForm>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .rules
            .get(&rel)
            .cloned()
            .unwrap_or_default())
    }

    fn index_support(&self, rel: RelId, am: u32) -> Result<Option<(Vec<u32>, Vec<u32>)>> {
        let inner = self.inner.lock().unwrap();
        let form = match inner.relations.get(&rel) {
            Some(form) => form,
            None => return Ok(None),
        };
        let am_form = match inner.ams.get(&am) {
            Some(am_form) => am_form,
            None => return Ok(None),
        };
        Ok(Some((
            bootstrap::strategy_vector(am_form, form.column_count),
            bootstrap::support_vector(am_form, form.column_count),
        )))
    }

    fn allocate_rel_id(&self) -> Result<RelId> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        Ok(id)
    }

    fn create_relation(
        &self,
        form: RelationForm,
        columns: Vec<ColumnForm>,
    ) -> Result<RowPointer> {
        let mut inner = self.inner.lock().unwrap();
        inner.by_name.insert(form.name.clone(), form.id);
        inner.columns.insert(form.id, columns);
        inner.relations.insert(form.id, form);
        Ok(inner.touch_row())
    }

    fn drop_relation(&self, id: RelId) -> Result<RowPointer> {
        let mut inner = self.inner.lock().unwrap();
        let form = inner
            .relations
            .remove(&id)
            .ok_or_else(|| relation_id_not_found(id))?;
        // only unmap the name if it still points at us; a
        // rename may have moved it
        if inner.by_name.get(&form.name) == Some(&id) {
            inner.by_name.remove(&form.name);
        }
        inner.columns.remove(&id);
        inner.rules.remove(&id);
        Ok(inner.touch_row())
    }

    fn rename_relation(&self, id: RelId, new_name: &str) -> Result<RowPointer> {
        let mut inner = self.inner.lock().unwrap();
        let form = inner
            .relations
            .get(&id)
            .cloned()
            .ok_or_else(|| relation_id_not_found(id))?;
        if inner.by_name.get(&form.name) == Some(&id) {
            inner.by_name.remove(&form.name);
        }
        inner.by_name.insert(new_name.to_string(), id);
        if let Some(form) = inner.relations.get_mut(&id) {
            form.name = new_name.to_string();
        }
        Ok(inner.touch_row())
    }

    fn add_column(&self, rel: RelId, column: ColumnForm) -> Result<RowPointer> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.relations.contains_key(&rel) {
            return Err(relation_id_not_found(rel));
        }
        inner.columns.entry(rel).or_default().push(column);
        if let Some(form) = inner.relations.get_mut(&rel) {
            form.column_count += 1;
        }
        Ok(inner.touch_row())
    }
}

/// Build a relation row and its column rows from a plain
/// (name, type) list; the shape DDL helpers hand the store.
pub fn user_relation(
    id: RelId,
    name: &str,
    kind: RelKind,
    columns: &[(String, crate::common::relation::ColumnType)],
) -> (RelationForm, Vec<ColumnForm>) {
    let forms: Vec<ColumnForm> = columns
        .iter()
        .enumerate()
        .map(|(i, (col_name, ty))| ColumnForm {
            rel_id: id,
            name: col_name.clone(),
            column_number: (i + 1) as u16,
            type_id: crate::catalog::type_id_of(ty.scalar_type),
            len: -1,
            align: b'i',
            by_value: false,
            is_dropped: false,
            type_mod: -1,
        })
        .collect();
    let form = RelationForm {
        id,
        name: name.to_string(),
        kind,
        owner: 0,
        is_shared: false,
        column_count: forms.len() as u16,
        storage_manager: 0,
        has_rules: false,
        has_indexes: false,
        am_id: 0,
    };
    (form, forms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::REL_CATALOG_ID;
    use crate::common::relation::ColumnType;
    use crate::common::scalar::ScalarType;

    #[test]
    fn seeded_with_bootstrap_relations() -> Result<()> {
        let catalog = MemCatalog::new();
        let rel = catalog.relation_by_id(REL_CATALOG_ID)?.expect("seeded");
        assert_eq!(rel.name, "sys_table");
        assert_eq!(
            catalog.scan_columns(REL_CATALOG_ID)?.len(),
            rel.column_count as usize
        );
        Ok(())
    }

    #[test]
    fn create_and_rename() -> Result<()> {
        let catalog = MemCatalog::new();
        let id = catalog.allocate_rel_id()?;
        let (form, cols) = user_relation(
            id,
            "t",
            RelKind::Heap,
            &[("a".to_string(), ColumnType::new(ScalarType::Int32, false))],
        );
        catalog.create_relation(form, cols)?;
        assert!(catalog.relation_by_name("t")?.is_some());

        catalog.rename_relation(id, "t2")?;
        assert!(catalog.relation_by_name("t")?.is_none());
        assert_eq!(catalog.relation_by_name("t2")?.unwrap().id, id);
        Ok(())
    }
}
