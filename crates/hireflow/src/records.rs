//! Write-once record storage.
//!
//! Audit entries, stage transitions, and hiring decisions are created once and then
//! only read. Their types expose getters and no setters; the table that holds them
//! accepts inserts and refuses every replace or delete with
//! [`WorkflowError::ImmutabilityViolation`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::engine::WorkflowError;
use crate::ids::OrganizationId;

pub trait ImmutableRecord: Clone + fmt::Debug + Send + Sync + 'static {
    type Id: Copy + Eq + Hash + fmt::Display + Send + Sync + 'static;

    /// Name used in immutability errors and audit actions.
    const RECORD: &'static str;

    fn record_id(&self) -> Self::Id;
    fn organization_id(&self) -> OrganizationId;
}

/// Insertion-ordered table of immutable records.
#[derive(Debug, Clone)]
pub struct WriteOnceTable<R: ImmutableRecord> {
    rows: Vec<R>,
    index: HashMap<R::Id, usize>,
}

impl<R: ImmutableRecord> Default for WriteOnceTable<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<R: ImmutableRecord> WriteOnceTable<R> {
    pub fn insert(&mut self, record: R) -> Result<(), WorkflowError> {
        let id = record.record_id();
        if self.index.contains_key(&id) {
            return Err(violation::<R>(id, "overwritten"));
        }
        self.index.insert(id, self.rows.len());
        self.rows.push(record);
        Ok(())
    }

    /// Always refuses; records cannot change after creation.
    pub fn replace(&mut self, record: R) -> Result<(), WorkflowError> {
        Err(violation::<R>(record.record_id(), "modified"))
    }

    /// Always refuses; records cannot be removed after creation.
    pub fn remove(&mut self, id: R::Id) -> Result<(), WorkflowError> {
        Err(violation::<R>(id, "deleted"))
    }

    pub fn get(&self, id: &R::Id) -> Option<&R> {
        self.index.get(id).map(|position| &self.rows[*position])
    }

    pub fn contains(&self, id: &R::Id) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &R> + '_ {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Move every row of `other` into this table, keeping insertion order. Ids already
    /// present are skipped; callers check uniqueness before staging.
    pub(crate) fn absorb(&mut self, other: WriteOnceTable<R>) {
        for record in other.rows {
            if !self.contains(&record.record_id()) {
                let _ = self.insert(record);
            }
        }
    }
}

fn violation<R: ImmutableRecord>(id: R::Id, operation: &'static str) -> WorkflowError {
    WorkflowError::ImmutabilityViolation {
        record: R::RECORD,
        id: id.to_string(),
        operation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Note {
        id: u32,
        org: OrganizationId,
    }

    impl ImmutableRecord for Note {
        type Id = u32;
        const RECORD: &'static str = "note";

        fn record_id(&self) -> u32 {
            self.id
        }

        fn organization_id(&self) -> OrganizationId {
            self.org
        }
    }

    #[test]
    fn rejects_duplicate_insert() {
        let org = OrganizationId::new();
        let mut table = WriteOnceTable::default();
        table.insert(Note { id: 1, org }).expect("first insert");
        match table.insert(Note { id: 1, org }) {
            Err(WorkflowError::ImmutabilityViolation { operation, .. }) => {
                assert_eq!(operation, "overwritten")
            }
            other => panic!("expected immutability violation, got {other:?}"),
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn replace_and_remove_always_refuse() {
        let org = OrganizationId::new();
        let mut table = WriteOnceTable::default();
        table.insert(Note { id: 7, org }).expect("insert");

        assert!(matches!(
            table.replace(Note { id: 7, org }),
            Err(WorkflowError::ImmutabilityViolation { operation: "modified", .. })
        ));
        assert!(matches!(
            table.remove(7),
            Err(WorkflowError::ImmutabilityViolation { operation: "deleted", .. })
        ));
        assert!(table.get(&7).is_some());
    }

    #[test]
    fn absorb_preserves_order() {
        let org = OrganizationId::new();
        let mut base = WriteOnceTable::default();
        base.insert(Note { id: 1, org }).expect("insert");
        let mut staged = WriteOnceTable::default();
        staged.insert(Note { id: 2, org }).expect("insert");
        staged.insert(Note { id: 3, org }).expect("insert");

        base.absorb(staged);
        let ids: Vec<u32> = base.iter().map(|note| note.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
