mod api;
mod memory;
mod retry;
pub mod wire;

pub use api::{ApiGateway, ApiSettings};
pub use memory::{CallCounts, GatewayCall, InMemoryGateway};
pub use retry::{RetryPolicy, RetryingGateway};

use crate::{
    error::GatewayError,
    model::{Datatype, EntityId, EntityKind, Operation, RemoteEntity, RemoteStatement, Statement},
    value::Value,
};

/// Terms and initial statements for a new entity, written in one edit.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDraft {
    pub kind: EntityKind,
    /// Required for properties, ignored for items.
    pub datatype: Option<Datatype>,
    pub label: String,
    pub description: String,
    pub aliases: Vec<String>,
    pub language: String,
    pub statements: Vec<Statement>,
}

impl EntityDraft {
    pub fn item(label: &str, language: &str) -> Self {
        Self {
            kind: EntityKind::Item,
            datatype: None,
            label: label.to_string(),
            description: String::new(),
            aliases: Vec::new(),
            language: language.to_string(),
            statements: Vec::new(),
        }
    }

    pub fn property(label: &str, datatype: Datatype, language: &str) -> Self {
        Self {
            kind: EntityKind::Property,
            datatype: Some(datatype),
            ..Self::item(label, language)
        }
    }
}

/// Term changes for an existing entity, in one language.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityPatch {
    pub language: String,
    pub description: Option<String>,
    pub add_aliases: Vec<String>,
    pub remove_aliases: Vec<String>,
}

impl EntityPatch {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.add_aliases.is_empty() && self.remove_aliases.is_empty()
    }

    /// Applies the patch to a locally held copy of the entity.
    pub fn apply_to(&self, entity: &mut RemoteEntity) {
        if let Some(description) = &self.description {
            entity.description = description.clone();
        }
        entity.aliases.retain(|a| !self.remove_aliases.contains(a));
        for alias in &self.add_aliases {
            if !entity.aliases.contains(alias) {
                entity.aliases.push(alias.clone());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedOperation {
    pub operation: Operation,
    pub reason: String,
}

/// Result of [`EntityGateway::apply_statement_ops`]: the operations the store
/// refused, and the entity's statements after the edit when the gateway knows
/// them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyResult {
    pub statements: Option<Vec<RemoteStatement>>,
    pub failed: Vec<FailedOperation>,
}

pub trait EntityGateway: Send + Sync {
    /// Exact label match for `kind` in `language`. More than one match is
    /// [`GatewayError::Ambiguous`].
    fn find_entity(
        &self,
        kind: EntityKind,
        label: &str,
        language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError>;

    /// The item holding a statement `property = value`. More than one match
    /// is [`GatewayError::Ambiguous`].
    fn find_entity_by_statement(
        &self,
        property: &EntityId,
        value: &Value,
        language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError>;

    /// Creates the entity together with `draft.statements`. Either all of it
    /// exists afterwards or none of it does.
    fn create_entity(&self, draft: &EntityDraft) -> Result<RemoteEntity, GatewayError>;

    fn update_entity(&self, id: &EntityId, patch: &EntityPatch) -> Result<(), GatewayError>;

    /// Submits statement operations for one entity. Refused operations come
    /// back in [`ApplyResult::failed`]; `Err` means nothing is known to have
    /// been applied.
    fn apply_statement_ops(
        &self,
        id: &EntityId,
        ops: &[Operation],
    ) -> Result<ApplyResult, GatewayError>;
}

impl<G: EntityGateway + ?Sized> EntityGateway for &G {
    fn find_entity(
        &self,
        kind: EntityKind,
        label: &str,
        language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError> {
        (**self).find_entity(kind, label, language)
    }

    fn find_entity_by_statement(
        &self,
        property: &EntityId,
        value: &Value,
        language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError> {
        (**self).find_entity_by_statement(property, value, language)
    }

    fn create_entity(&self, draft: &EntityDraft) -> Result<RemoteEntity, GatewayError> {
        (**self).create_entity(draft)
    }

    fn update_entity(&self, id: &EntityId, patch: &EntityPatch) -> Result<(), GatewayError> {
        (**self).update_entity(id, patch)
    }

    fn apply_statement_ops(
        &self,
        id: &EntityId,
        ops: &[Operation],
    ) -> Result<ApplyResult, GatewayError> {
        (**self).apply_statement_ops(id, ops)
    }
}

impl<G: EntityGateway + ?Sized> EntityGateway for Box<G> {
    fn find_entity(
        &self,
        kind: EntityKind,
        label: &str,
        language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError> {
        (**self).find_entity(kind, label, language)
    }

    fn find_entity_by_statement(
        &self,
        property: &EntityId,
        value: &Value,
        language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError> {
        (**self).find_entity_by_statement(property, value, language)
    }

    fn create_entity(&self, draft: &EntityDraft) -> Result<RemoteEntity, GatewayError> {
        (**self).create_entity(draft)
    }

    fn update_entity(&self, id: &EntityId, patch: &EntityPatch) -> Result<(), GatewayError> {
        (**self).update_entity(id, patch)
    }

    fn apply_statement_ops(
        &self,
        id: &EntityId,
        ops: &[Operation],
    ) -> Result<ApplyResult, GatewayError> {
        (**self).apply_statement_ops(id, ops)
    }
}
