use std::{thread, time::Duration};

use log::warn;

use crate::{
    error::GatewayError,
    gateway::{ApplyResult, EntityDraft, EntityGateway, EntityPatch},
    model::{EntityId, EntityKind, Operation, RemoteEntity},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Retries transient failures of the wrapped gateway. Rejections, auth
/// failures and ambiguity pass straight through.
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: EntityGateway> RetryingGateway<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    fn call<T>(
        &self,
        what: &str,
        mut attempt_call: impl FnMut(&G) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match attempt_call(&self.inner) {
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "{what} failed (attempt {attempt}/{attempts}), retrying in {delay:?}: {err}"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

impl<G: EntityGateway> EntityGateway for RetryingGateway<G> {
    fn find_entity(
        &self,
        kind: EntityKind,
        label: &str,
        language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError> {
        self.call("find_entity", |g| g.find_entity(kind, label, language))
    }

    fn find_entity_by_statement(
        &self,
        property: &EntityId,
        value: &Value,
        language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError> {
        self.call("find_entity_by_statement", |g| {
            g.find_entity_by_statement(property, value, language)
        })
    }

    fn create_entity(&self, draft: &EntityDraft) -> Result<RemoteEntity, GatewayError> {
        self.call("create_entity", |g| g.create_entity(draft))
    }

    fn update_entity(&self, id: &EntityId, patch: &EntityPatch) -> Result<(), GatewayError> {
        self.call("update_entity", |g| g.update_entity(id, patch))
    }

    fn apply_statement_ops(
        &self,
        id: &EntityId,
        ops: &[Operation],
    ) -> Result<ApplyResult, GatewayError> {
        self.call("apply_statement_ops", |g| g.apply_statement_ops(id, ops))
    }
}
