//! Instance store: running workflow instances with optimistic concurrency
//!
//! Instance mutation follows read-validate-write: callers load a
//! snapshot, build the mutated copy, and commit it through
//! `compare_and_update` against the revision they read. A revision
//! mismatch yields `Conflict`, the one error callers may blindly retry.
//!
//! The instance map and the entity uniqueness index live behind a
//! single lock, so every operation sees the two in step and there is
//! only ever one lock to take.

use caseflow_types::{
    EntityId, EntityRef, EntityType, InstanceId, OrgId, TemplateId, WorkflowError, WorkflowInstance,
    WorkflowResult,
};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct InstanceRows {
    instances: HashMap<InstanceId, WorkflowInstance>,
    /// Index from governed entity to its non-terminal instance
    by_entity: HashMap<EntityRef, InstanceId>,
}

/// Store of workflow instances
pub struct InstanceStore {
    rows: RwLock<InstanceRows>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(InstanceRows::default()),
        }
    }

    /// Insert a newly started instance.
    ///
    /// Enforces at most one non-terminal instance per entity. A stale
    /// index entry pointing at a terminal instance is replaced.
    pub fn insert(&self, instance: WorkflowInstance) -> WorkflowResult<WorkflowInstance> {
        let mut rows = self.write()?;

        let entity = EntityRef::new(instance.entity_type, instance.entity_id.clone());
        if let Some(existing_id) = rows.by_entity.get(&entity) {
            let still_running = rows
                .instances
                .get(existing_id)
                .map(|i| !i.is_terminal())
                .unwrap_or(false);
            if still_running {
                return Err(WorkflowError::DuplicateInstance {
                    entity_type: instance.entity_type,
                    entity_id: instance.entity_id.clone(),
                });
            }
        }

        rows.by_entity.insert(entity, instance.id.clone());
        rows.instances.insert(instance.id.clone(), instance.clone());
        tracing::info!(instance = %instance.id, entity = %instance.entity_id, "Instance created");
        Ok(instance)
    }

    /// Remove a row and its entity index entry.
    ///
    /// Used by the lifecycle manager to roll back a start that raced a
    /// template edit; not part of the instance lifecycle itself.
    pub fn remove(&self, org_id: &OrgId, id: &InstanceId) -> WorkflowResult<WorkflowInstance> {
        let mut rows = self.write()?;
        match rows.instances.get(id) {
            Some(i) if &i.org_id == org_id => {}
            _ => return Err(WorkflowError::InstanceNotFound(id.clone())),
        }
        let removed = rows
            .instances
            .remove(id)
            .ok_or_else(|| WorkflowError::InstanceNotFound(id.clone()))?;
        let entity = EntityRef::new(removed.entity_type, removed.entity_id.clone());
        if rows.by_entity.get(&entity) == Some(id) {
            rows.by_entity.remove(&entity);
        }
        tracing::debug!(instance = %id, "Instance removed");
        Ok(removed)
    }

    /// Get an instance by id, scoped to the organization.
    ///
    /// A cross-tenant hit behaves identically to a miss.
    pub fn get(&self, org_id: &OrgId, id: &InstanceId) -> WorkflowResult<WorkflowInstance> {
        self.read()?
            .instances
            .get(id)
            .filter(|i| &i.org_id == org_id)
            .cloned()
            .ok_or_else(|| WorkflowError::InstanceNotFound(id.clone()))
    }

    /// Find the instance governing an entity, if any
    pub fn find_by_entity(
        &self,
        org_id: &OrgId,
        entity_type: EntityType,
        entity_id: &EntityId,
    ) -> WorkflowResult<Option<WorkflowInstance>> {
        let rows = self.read()?;
        let entity = EntityRef::new(entity_type, entity_id.clone());
        Ok(rows
            .by_entity
            .get(&entity)
            .and_then(|id| rows.instances.get(id))
            .filter(|i| &i.org_id == org_id)
            .cloned())
    }

    /// Commit a mutated copy against the revision the caller read.
    ///
    /// The write succeeds only if the stored row still carries
    /// `expected_revision`; otherwise another writer got there first
    /// and the caller must retry with fresh state.
    pub fn compare_and_update(
        &self,
        expected_revision: u64,
        mut updated: WorkflowInstance,
    ) -> WorkflowResult<WorkflowInstance> {
        let mut rows = self.write()?;

        let current = rows
            .instances
            .get(&updated.id)
            .ok_or_else(|| WorkflowError::InstanceNotFound(updated.id.clone()))?;
        if current.revision != expected_revision {
            tracing::debug!(
                instance = %updated.id,
                expected = expected_revision,
                actual = current.revision,
                "Instance update conflict"
            );
            return Err(WorkflowError::Conflict);
        }

        updated.revision = expected_revision + 1;
        rows.instances.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    /// Count ACTIVE instances pinned to a template version row
    pub fn count_active_for(&self, template_id: &TemplateId) -> WorkflowResult<usize> {
        Ok(self
            .read()?
            .instances
            .values()
            .filter(|i| &i.template_id == template_id && i.is_active())
            .count())
    }

    /// Check whether any instance, in any status, references the row
    pub fn any_for_template(&self, template_id: &TemplateId) -> WorkflowResult<bool> {
        Ok(self
            .read()?
            .instances
            .values()
            .any(|i| &i.template_id == template_id))
    }

    /// All instances of an organization
    pub fn list(&self, org_id: &OrgId) -> WorkflowResult<Vec<WorkflowInstance>> {
        Ok(self
            .read()?
            .instances
            .values()
            .filter(|i| &i.org_id == org_id)
            .cloned()
            .collect())
    }

    fn read(&self) -> WorkflowResult<RwLockReadGuard<'_, InstanceRows>> {
        self.rows.read().map_err(|_| WorkflowError::LockPoisoned)
    }

    fn write(&self) -> WorkflowResult<RwLockWriteGuard<'_, InstanceRows>> {
        self.rows.write().map_err(|_| WorkflowError::LockPoisoned)
    }
}

impl Default for InstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseflow_types::{InstanceStatus, StageId};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn org() -> OrgId {
        OrgId::new("org-1")
    }

    fn make_instance(entity: &str) -> WorkflowInstance {
        WorkflowInstance::start(
            org(),
            TemplateId::new("tpl-1"),
            1,
            EntityType::Case,
            EntityId::new(entity),
            StageId::new("new"),
        )
    }

    #[test]
    fn test_insert_and_get() {
        let store = InstanceStore::new();
        let inst = store.insert(make_instance("CASE-1")).unwrap();

        let loaded = store.get(&org(), &inst.id).unwrap();
        assert_eq!(loaded.entity_id, EntityId::new("CASE-1"));

        let found = store
            .find_by_entity(&org(), EntityType::Case, &EntityId::new("CASE-1"))
            .unwrap();
        assert_eq!(found.unwrap().id, inst.id);
    }

    #[test]
    fn test_one_instance_per_entity() {
        let store = InstanceStore::new();
        store.insert(make_instance("CASE-1")).unwrap();

        let dup = store.insert(make_instance("CASE-1"));
        assert!(matches!(
            dup,
            Err(WorkflowError::DuplicateInstance { .. })
        ));

        // A different entity is unaffected
        assert!(store.insert(make_instance("CASE-2")).is_ok());
    }

    #[test]
    fn test_terminal_instance_releases_entity() {
        let store = InstanceStore::new();
        let inst = store.insert(make_instance("CASE-1")).unwrap();

        let mut done = inst.clone();
        done.status = InstanceStatus::Completed;
        store.compare_and_update(inst.revision, done).unwrap();

        // Entity can run a fresh workflow once the old one is terminal
        assert!(store.insert(make_instance("CASE-1")).is_ok());
    }

    #[test]
    fn test_remove_releases_entity() {
        let store = InstanceStore::new();
        let inst = store.insert(make_instance("CASE-1")).unwrap();

        store.remove(&org(), &inst.id).unwrap();

        assert!(matches!(
            store.get(&org(), &inst.id),
            Err(WorkflowError::InstanceNotFound(_))
        ));
        assert!(store
            .find_by_entity(&org(), EntityType::Case, &EntityId::new("CASE-1"))
            .unwrap()
            .is_none());
        // The entity is free again
        assert!(store.insert(make_instance("CASE-1")).is_ok());

        // Cross-tenant removal behaves like a miss
        let other = store.insert(make_instance("CASE-2")).unwrap();
        assert!(matches!(
            store.remove(&OrgId::new("org-2"), &other.id),
            Err(WorkflowError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn test_compare_and_update_conflict() {
        let store = InstanceStore::new();
        let inst = store.insert(make_instance("CASE-1")).unwrap();

        // First writer wins
        let mut a = inst.clone();
        a.outcome = Some("writer-a".into());
        let saved = store.compare_and_update(inst.revision, a).unwrap();
        assert_eq!(saved.revision, inst.revision + 1);

        // Second writer read the same snapshot and must lose
        let mut b = inst.clone();
        b.outcome = Some("writer-b".into());
        assert!(matches!(
            store.compare_and_update(inst.revision, b),
            Err(WorkflowError::Conflict)
        ));

        assert_eq!(
            store.get(&org(), &inst.id).unwrap().outcome.as_deref(),
            Some("writer-a")
        );
    }

    #[test]
    fn test_counts_by_template() {
        let store = InstanceStore::new();
        let inst = store.insert(make_instance("CASE-1")).unwrap();
        store.insert(make_instance("CASE-2")).unwrap();

        let tpl = TemplateId::new("tpl-1");
        assert_eq!(store.count_active_for(&tpl).unwrap(), 2);
        assert!(store.any_for_template(&tpl).unwrap());

        // Completing one drops the active count but not the reference
        let mut done = inst.clone();
        done.status = InstanceStatus::Completed;
        store.compare_and_update(inst.revision, done).unwrap();
        assert_eq!(store.count_active_for(&tpl).unwrap(), 1);
        assert!(store.any_for_template(&tpl).unwrap());

        assert!(!store.any_for_template(&TemplateId::new("tpl-9")).unwrap());
    }

    #[test]
    fn test_cross_tenant_lookup_is_not_found() {
        let store = InstanceStore::new();
        let inst = store.insert(make_instance("CASE-1")).unwrap();

        assert!(matches!(
            store.get(&OrgId::new("org-2"), &inst.id),
            Err(WorkflowError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_inserts_and_lookups_make_progress() {
        let store = Arc::new(InstanceStore::new());
        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::new();

        for worker in 0..4 {
            let store = store.clone();
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    store
                        .insert(make_instance(&format!("CASE-{}-{}", worker, i)))
                        .unwrap();
                }
                tx.send(()).unwrap();
            }));
        }
        for worker in 0..4 {
            let store = store.clone();
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    let entity = EntityId::new(format!("CASE-{}-{}", worker, i));
                    store
                        .find_by_entity(&org(), EntityType::Case, &entity)
                        .unwrap();
                }
                tx.send(()).unwrap();
            }));
        }

        for _ in 0..8 {
            rx.recv_timeout(Duration::from_secs(30))
                .expect("store stalled under concurrent insert and lookup");
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.list(&org()).unwrap().len(), 2000);
    }
}
