use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    error::GatewayError,
    gateway::{ApplyResult, EntityDraft, EntityGateway, EntityPatch, FailedOperation},
    model::{EntityId, EntityKind, Operation, RemoteEntity, RemoteStatement, Statement},
    value::Value,
};

/// Gateway entry points, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayCall {
    FindEntity,
    FindByStatement,
    CreateEntity,
    UpdateEntity,
    ApplyStatementOps,
}

/// Snapshot of how often each entry point was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub lookups: usize,
    pub creates: usize,
    pub updates: usize,
    /// Individual statement operations, not calls.
    pub statement_ops: usize,
}

impl CallCounts {
    /// Create/update calls plus statement operations.
    pub fn mutations(&self) -> usize {
        self.creates + self.updates + self.statement_ops
    }
}

struct StoredEntity {
    language: String,
    entity: RemoteEntity,
}

#[derive(Default)]
struct Store {
    entities: BTreeMap<(EntityKind, u64), StoredEntity>,
    next_property: u64,
    next_item: u64,
    next_statement: u64,
}

impl Store {
    fn get_mut(&mut self, id: &EntityId) -> Option<&mut StoredEntity> {
        let kind = kind_of(id)?;
        self.entities.get_mut(&(kind, id.numeric_id()?))
    }
}

/// Statements come back from the store with an explicit rank.
fn stored_form(mut statement: Statement) -> Statement {
    statement.rank.get_or_insert_default();
    statement
}

fn kind_of(id: &EntityId) -> Option<EntityKind> {
    match id.as_str().chars().next()? {
        'P' => Some(EntityKind::Property),
        'Q' => Some(EntityKind::Item),
        _ => None,
    }
}

#[derive(Default)]
pub struct InMemoryGateway {
    store: Mutex<Store>,
    injected: Mutex<HashMap<GatewayCall, VecDeque<GatewayError>>>,
    rejected_properties: Mutex<Vec<EntityId>>,
    latency: Option<Duration>,
    lookups: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    statement_ops: AtomicUsize,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps on every lookup and create, widening race windows in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next call to `call` fail with `error`. Errors queue up.
    pub fn inject_failure(&self, call: GatewayCall, error: GatewayError) {
        self.injected.lock().entry(call).or_default().push_back(error);
    }

    /// Refuses every statement operation whose main snak uses `property`.
    pub fn reject_statements_on(&self, property: &EntityId) {
        self.rejected_properties.lock().push(property.clone());
    }

    pub fn counts(&self) -> CallCounts {
        CallCounts {
            lookups: self.lookups.load(Ordering::SeqCst),
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            statement_ops: self.statement_ops.load(Ordering::SeqCst),
        }
    }

    pub fn reset_counts(&self) {
        for counter in [&self.lookups, &self.creates, &self.updates, &self.statement_ops] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    pub fn entity(&self, id: &EntityId) -> Option<RemoteEntity> {
        self.store.lock().get_mut(id).map(|stored| stored.entity.clone())
    }

    /// Every stored entity of `kind`, in id order.
    pub fn entities(&self, kind: EntityKind) -> Vec<RemoteEntity> {
        self.store
            .lock()
            .entities
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, stored)| stored.entity.clone())
            .collect()
    }

    /// All entities of `kind` labelled `label`, regardless of language.
    pub fn entities_labelled(&self, kind: EntityKind, label: &str) -> Vec<RemoteEntity> {
        self.entities(kind)
            .into_iter()
            .filter(|e| e.label == label)
            .collect()
    }

    /// Seeds an entity (and its draft statements) directly, bypassing
    /// counters and injected failures.
    pub fn seed(&self, draft: &EntityDraft) -> EntityId {
        self.insert(draft).id
    }

    /// Seeds a statement on an existing entity, bypassing counters.
    pub fn seed_statement(&self, id: &EntityId, statement: Statement) -> Option<String> {
        let mut store = self.store.lock();
        store.next_statement += 1;
        let statement_id = format!("{id}${}", store.next_statement);
        let stored = store.get_mut(id)?;
        stored.entity.statements.push(RemoteStatement {
            id: statement_id.clone(),
            statement,
        });
        Some(statement_id)
    }

    fn insert(&self, draft: &EntityDraft) -> RemoteEntity {
        let mut store = self.store.lock();
        let numeric = match draft.kind {
            EntityKind::Property => {
                store.next_property += 1;
                store.next_property
            }
            EntityKind::Item => {
                store.next_item += 1;
                store.next_item
            }
        };
        let prefix = match draft.kind {
            EntityKind::Property => 'P',
            EntityKind::Item => 'Q',
        };
        let id = EntityId::new(format!("{prefix}{numeric}"));
        let mut statements = Vec::with_capacity(draft.statements.len());
        for statement in &draft.statements {
            store.next_statement += 1;
            statements.push(RemoteStatement {
                id: format!("{id}${}", store.next_statement),
                statement: stored_form(statement.clone()),
            });
        }
        let entity = RemoteEntity {
            id,
            kind: draft.kind,
            label: draft.label.clone(),
            description: draft.description.clone(),
            aliases: draft.aliases.clone(),
            datatype: match draft.kind {
                EntityKind::Property => draft.datatype,
                EntityKind::Item => None,
            },
            statements,
        };
        store.entities.insert(
            (draft.kind, numeric),
            StoredEntity {
                language: draft.language.clone(),
                entity: entity.clone(),
            },
        );
        entity
    }

    fn enter(&self, call: GatewayCall) -> Result<(), GatewayError> {
        if let Some(latency) = self.latency {
            if matches!(
                call,
                GatewayCall::FindByStatement | GatewayCall::FindEntity | GatewayCall::CreateEntity
            ) {
                thread::sleep(latency);
            }
        }
        match self.injected.lock().get_mut(&call).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn single(
        key: String,
        mut matches: Vec<RemoteEntity>,
    ) -> Result<Option<RemoteEntity>, GatewayError> {
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => Err(GatewayError::Ambiguous {
                key,
                candidates: matches.into_iter().map(|e| e.id).collect(),
            }),
        }
    }
}

impl EntityGateway for InMemoryGateway {
    fn find_entity(
        &self,
        kind: EntityKind,
        label: &str,
        language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.enter(GatewayCall::FindEntity)?;
        let matches = self
            .store
            .lock()
            .entities
            .values()
            .filter(|s| s.entity.kind == kind && s.language == language && s.entity.label == label)
            .map(|s| s.entity.clone())
            .collect();
        Self::single(format!("{kind} '{label}'@{language}"), matches)
    }

    fn find_entity_by_statement(
        &self,
        property: &EntityId,
        value: &Value,
        _language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.enter(GatewayCall::FindByStatement)?;
        let wanted = value.identity_key();
        let matches = self
            .store
            .lock()
            .entities
            .values()
            .filter(|s| {
                s.entity.kind == EntityKind::Item
                    && s.entity.statements_for(property).any(|st| {
                        st.statement.main.value.identity_key() == wanted
                    })
            })
            .map(|s| s.entity.clone())
            .collect();
        Self::single(format!("{property}='{wanted}'"), matches)
    }

    fn create_entity(&self, draft: &EntityDraft) -> Result<RemoteEntity, GatewayError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.enter(GatewayCall::CreateEntity)?;
        if draft.label.trim().is_empty() {
            return Err(GatewayError::Rejected("label must not be empty".into()));
        }
        if draft.kind == EntityKind::Property {
            if draft.datatype.is_none() {
                return Err(GatewayError::Rejected(format!(
                    "property '{}' needs a datatype",
                    draft.label
                )));
            }
            let taken = self.store.lock().entities.values().any(|s| {
                s.entity.kind == EntityKind::Property
                    && s.language == draft.language
                    && s.entity.label == draft.label
            });
            if taken {
                return Err(GatewayError::Rejected(format!(
                    "property label '{}' is already in use",
                    draft.label
                )));
            }
        }
        let rejected = self.rejected_properties.lock();
        let refused = draft.statements.iter().find(|s| rejected.contains(s.property()));
        if let Some(statement) = refused {
            return Err(GatewayError::Rejected(format!(
                "statement on {} rejected by the store",
                statement.property()
            )));
        }
        drop(rejected);
        Ok(self.insert(draft))
    }

    fn update_entity(&self, id: &EntityId, patch: &EntityPatch) -> Result<(), GatewayError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.enter(GatewayCall::UpdateEntity)?;
        let mut store = self.store.lock();
        let stored = store
            .get_mut(id)
            .ok_or_else(|| GatewayError::Rejected(format!("no such entity {id}")))?;
        patch.apply_to(&mut stored.entity);
        Ok(())
    }

    fn apply_statement_ops(
        &self,
        id: &EntityId,
        ops: &[Operation],
    ) -> Result<ApplyResult, GatewayError> {
        self.statement_ops.fetch_add(ops.len(), Ordering::SeqCst);
        self.enter(GatewayCall::ApplyStatementOps)?;
        let rejected = self.rejected_properties.lock().clone();
        let mut store = self.store.lock();
        if store.get_mut(id).is_none() {
            return Err(GatewayError::Rejected(format!("no such entity {id}")));
        }

        let mut failed = Vec::new();
        for op in ops {
            let refused = match op {
                Operation::Create(s) | Operation::Update { statement: s, .. } => {
                    rejected.contains(s.property())
                }
                Operation::Delete { .. } => false,
            };
            if refused {
                failed.push(FailedOperation {
                    operation: op.clone(),
                    reason: "statement rejected by the store".to_string(),
                });
                continue;
            }
            store.next_statement += 1;
            let fresh_id = format!("{id}${}", store.next_statement);
            let Some(stored) = store.get_mut(id) else {
                break;
            };
            let statements = &mut stored.entity.statements;
            let outcome = match op {
                Operation::Create(statement) => {
                    statements.push(RemoteStatement {
                        id: fresh_id,
                        statement: stored_form(statement.clone()),
                    });
                    Ok(())
                }
                Operation::Update {
                    id: statement_id,
                    statement,
                } => match statements.iter_mut().find(|s| &s.id == statement_id) {
                    Some(existing) => {
                        existing.statement = stored_form(statement.clone());
                        Ok(())
                    }
                    None => Err(format!("no statement {statement_id}")),
                },
                Operation::Delete { id: statement_id } => {
                    let before = statements.len();
                    statements.retain(|s| &s.id != statement_id);
                    if statements.len() < before {
                        Ok(())
                    } else {
                        Err(format!("no statement {statement_id}"))
                    }
                }
            };
            if let Err(reason) = outcome {
                failed.push(FailedOperation {
                    operation: op.clone(),
                    reason,
                });
            }
        }

        let statements = store.get_mut(id).map(|s| s.entity.statements.clone());
        Ok(ApplyResult { statements, failed })
    }
}
