//! Template store: versioned workflow template rows
//!
//! Each template version is its own row. Creating yields an inactive
//! draft; publishing activates it and demotes any previous active
//! default for the same (organization, entity type). Version families
//! are grouped by display name — a deliberate carry-over from the
//! source system, fragile when unrelated templates share a name.

use caseflow_types::{
    EntityType, OrgId, TemplateDefinition, TemplateId, WorkflowError, WorkflowResult,
    WorkflowTemplate,
};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};

/// Store of workflow template versions
pub struct TemplateStore {
    templates: RwLock<HashMap<TemplateId, WorkflowTemplate>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new draft template from a definition.
    ///
    /// Validates structure plus name uniqueness among active templates
    /// of the same entity type within the organization. Nothing is
    /// persisted on any violation.
    pub fn create(
        &self,
        org_id: &OrgId,
        definition: TemplateDefinition,
    ) -> WorkflowResult<WorkflowTemplate> {
        let template = WorkflowTemplate::from_definition(org_id.clone(), definition);
        template.validate()?;

        let mut templates = self.write()?;
        if Self::active_name_taken(&templates, org_id, template.entity_type, &template.name, None) {
            return Err(WorkflowError::Validation(format!(
                "An active template named '{}' already exists for {}",
                template.name, template.entity_type
            )));
        }

        templates.insert(template.id.clone(), template.clone());
        tracing::info!(template = %template.id, name = %template.name, "Template created");
        Ok(template)
    }

    /// Activate a draft version.
    ///
    /// When the version is flagged default, any previous active default
    /// for the same (organization, entity type) is deactivated, keeping
    /// at most one active default per pair.
    pub fn publish(&self, org_id: &OrgId, id: &TemplateId) -> WorkflowResult<WorkflowTemplate> {
        let mut templates = self.write()?;

        let target = templates
            .get(id)
            .filter(|t| &t.org_id == org_id)
            .cloned()
            .ok_or_else(|| WorkflowError::TemplateNotFound(id.clone()))?;

        if Self::active_name_taken(
            &templates,
            org_id,
            target.entity_type,
            &target.name,
            Some(id),
        ) {
            return Err(WorkflowError::Validation(format!(
                "An active template named '{}' already exists for {}",
                target.name, target.entity_type
            )));
        }

        if target.is_default {
            let superseded: Vec<TemplateId> = templates
                .values()
                .filter(|t| {
                    &t.org_id == org_id
                        && t.entity_type == target.entity_type
                        && t.is_active
                        && t.is_default
                        && &t.id != id
                })
                .map(|t| t.id.clone())
                .collect();
            for old_id in superseded {
                if let Some(old) = templates.get_mut(&old_id) {
                    old.is_active = false;
                    old.revision += 1;
                    old.updated_at = chrono::Utc::now();
                    tracing::debug!(template = %old_id, "Previous default deactivated");
                }
            }
        }

        let row = templates
            .get_mut(id)
            .ok_or_else(|| WorkflowError::TemplateNotFound(id.clone()))?;
        row.is_active = true;
        row.revision += 1;
        row.updated_at = chrono::Utc::now();
        let published = row.clone();
        tracing::info!(template = %id, version = published.version, "Template published");
        Ok(published)
    }

    /// Clone a template into a fresh inactive draft.
    ///
    /// Stages, transitions, and the initial stage are copied verbatim;
    /// the copy gets a "(Copy)" name suffix, version 1, and a
    /// back-reference to the original.
    pub fn clone_template(
        &self,
        org_id: &OrgId,
        id: &TemplateId,
    ) -> WorkflowResult<WorkflowTemplate> {
        let mut templates = self.write()?;
        let original = templates
            .get(id)
            .filter(|t| &t.org_id == org_id)
            .ok_or_else(|| WorkflowError::TemplateNotFound(id.clone()))?;

        let now = chrono::Utc::now();
        let mut copy = original.clone();
        copy.id = TemplateId::generate();
        copy.name = format!("{} (Copy)", original.name);
        copy.version = 1;
        copy.is_active = false;
        copy.is_default = false;
        copy.source_template_id = Some(id.clone());
        copy.revision = 0;
        copy.created_at = now;
        copy.updated_at = now;

        templates.insert(copy.id.clone(), copy.clone());
        tracing::info!(template = %copy.id, source = %id, "Template cloned");
        Ok(copy)
    }

    /// Get a template by id, scoped to the organization.
    ///
    /// A cross-tenant hit behaves identically to a miss.
    pub fn get(&self, org_id: &OrgId, id: &TemplateId) -> WorkflowResult<WorkflowTemplate> {
        self.read()?
            .get(id)
            .filter(|t| &t.org_id == org_id)
            .cloned()
            .ok_or_else(|| WorkflowError::TemplateNotFound(id.clone()))
    }

    /// All versions sharing a display name within the organization,
    /// newest version first.
    ///
    /// Name-based grouping is a heuristic: two unrelated templates with
    /// the same name are merged into one family.
    pub fn find_versions(&self, org_id: &OrgId, name: &str) -> WorkflowResult<Vec<WorkflowTemplate>> {
        let templates = self.read()?;
        let mut versions: Vec<WorkflowTemplate> = templates
            .values()
            .filter(|t| &t.org_id == org_id && t.name == name)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    /// Resolve the active default template for an entity type
    pub fn default_for(
        &self,
        org_id: &OrgId,
        entity_type: EntityType,
    ) -> WorkflowResult<WorkflowTemplate> {
        self.read()?
            .values()
            .find(|t| {
                &t.org_id == org_id
                    && t.entity_type == entity_type
                    && t.is_active
                    && t.is_default
            })
            .cloned()
            .ok_or(WorkflowError::NoDefaultTemplate(entity_type))
    }

    /// All templates of an organization
    pub fn list(&self, org_id: &OrgId) -> WorkflowResult<Vec<WorkflowTemplate>> {
        Ok(self
            .read()?
            .values()
            .filter(|t| &t.org_id == org_id)
            .cloned()
            .collect())
    }

    /// Remove a row unconditionally. The versioning coordinator applies
    /// the instance-reference guard before calling this.
    pub(crate) fn remove(&self, org_id: &OrgId, id: &TemplateId) -> WorkflowResult<WorkflowTemplate> {
        let mut templates = self.write()?;
        match templates.get(id) {
            Some(t) if &t.org_id == org_id => {}
            _ => return Err(WorkflowError::TemplateNotFound(id.clone())),
        }
        let removed = templates
            .remove(id)
            .ok_or_else(|| WorkflowError::TemplateNotFound(id.clone()))?;
        tracing::info!(template = %id, "Template removed");
        Ok(removed)
    }

    pub(crate) fn write(
        &self,
    ) -> WorkflowResult<RwLockWriteGuard<'_, HashMap<TemplateId, WorkflowTemplate>>> {
        self.templates.write().map_err(|_| WorkflowError::LockPoisoned)
    }

    fn read(
        &self,
    ) -> WorkflowResult<std::sync::RwLockReadGuard<'_, HashMap<TemplateId, WorkflowTemplate>>> {
        self.templates.read().map_err(|_| WorkflowError::LockPoisoned)
    }

    fn active_name_taken(
        templates: &HashMap<TemplateId, WorkflowTemplate>,
        org_id: &OrgId,
        entity_type: EntityType,
        name: &str,
        excluding: Option<&TemplateId>,
    ) -> bool {
        templates.values().any(|t| {
            &t.org_id == org_id
                && t.entity_type == entity_type
                && t.is_active
                && t.name == name
                && excluding != Some(&t.id)
        })
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseflow_types::{Stage, Transition};

    fn org() -> OrgId {
        OrgId::new("org-1")
    }

    fn case_pipeline(name: &str) -> TemplateDefinition {
        TemplateDefinition::new(name, EntityType::Case, "new")
            .with_stage(Stage::new("new", "New"))
            .with_stage(Stage::new("closed", "Closed").terminal())
            .with_transition(Transition::new("new", "closed"))
            .as_default()
    }

    #[test]
    fn test_create_draft() {
        let store = TemplateStore::new();
        let template = store.create(&org(), case_pipeline("Case Pipeline")).unwrap();

        assert_eq!(template.version, 1);
        assert!(!template.is_active);
        assert_eq!(store.get(&org(), &template.id).unwrap().name, "Case Pipeline");
    }

    #[test]
    fn test_create_invalid_not_persisted() {
        let store = TemplateStore::new();
        let bad = TemplateDefinition::new("Broken", EntityType::Case, "missing")
            .with_stage(Stage::new("new", "New"));
        assert!(matches!(
            store.create(&org(), bad),
            Err(WorkflowError::Validation(_))
        ));
        assert!(store.list(&org()).unwrap().is_empty());
    }

    #[test]
    fn test_publish_and_default_resolution() {
        let store = TemplateStore::new();
        let template = store.create(&org(), case_pipeline("Case Pipeline")).unwrap();

        assert!(matches!(
            store.default_for(&org(), EntityType::Case),
            Err(WorkflowError::NoDefaultTemplate(_))
        ));

        let published = store.publish(&org(), &template.id).unwrap();
        assert!(published.is_active);

        let resolved = store.default_for(&org(), EntityType::Case).unwrap();
        assert_eq!(resolved.id, template.id);
    }

    #[test]
    fn test_publish_demotes_previous_default() {
        let store = TemplateStore::new();
        let first = store.create(&org(), case_pipeline("Pipeline A")).unwrap();
        store.publish(&org(), &first.id).unwrap();

        let second = store.create(&org(), case_pipeline("Pipeline B")).unwrap();
        store.publish(&org(), &second.id).unwrap();

        // Only one active default per (org, entity type)
        let resolved = store.default_for(&org(), EntityType::Case).unwrap();
        assert_eq!(resolved.id, second.id);
        assert!(!store.get(&org(), &first.id).unwrap().is_active);
    }

    #[test]
    fn test_active_name_uniqueness() {
        let store = TemplateStore::new();
        let first = store.create(&org(), case_pipeline("Case Pipeline")).unwrap();
        store.publish(&org(), &first.id).unwrap();

        let dup = store.create(&org(), case_pipeline("Case Pipeline"));
        assert!(matches!(dup, Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn test_clone_template() {
        let store = TemplateStore::new();
        let original = store.create(&org(), case_pipeline("Case Pipeline")).unwrap();
        store.publish(&org(), &original.id).unwrap();

        let copy = store.clone_template(&org(), &original.id).unwrap();
        assert_eq!(copy.name, "Case Pipeline (Copy)");
        assert_eq!(copy.version, 1);
        assert!(!copy.is_active);
        assert!(!copy.is_default);
        assert_eq!(copy.source_template_id, Some(original.id.clone()));
        assert_eq!(copy.stages.len(), original.stages.len());
        assert_eq!(copy.initial_stage, original.initial_stage);
    }

    #[test]
    fn test_find_versions_orders_descending() {
        let store = TemplateStore::new();
        let v1 = store.create(&org(), case_pipeline("Case Pipeline")).unwrap();

        // Simulate a fork sharing the name
        let mut v2 = v1.clone();
        v2.id = TemplateId::generate();
        v2.version = 2;
        store.write().unwrap().insert(v2.id.clone(), v2.clone());

        let family = store.find_versions(&org(), "Case Pipeline").unwrap();
        assert_eq!(family.len(), 2);
        assert_eq!(family[0].version, 2);
        assert_eq!(family[1].version, 1);
    }

    #[test]
    fn test_cross_tenant_lookup_is_not_found() {
        let store = TemplateStore::new();
        let template = store.create(&org(), case_pipeline("Case Pipeline")).unwrap();

        let other = OrgId::new("org-2");
        assert!(matches!(
            store.get(&other, &template.id),
            Err(WorkflowError::TemplateNotFound(_))
        ));
        assert!(store.find_versions(&other, "Case Pipeline").unwrap().is_empty());
    }
}
