use thiserror::Error;

use crate::model::EntityId;
use crate::value::ValueError;

/// A malformed project config, schema description or mapping description.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("column '{column}' referenced by template '{template}' is missing from the row")]
pub struct UnresolvedPlaceholderError {
    pub column: String,
    pub template: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("statement '{property}' references item '{label}', which does not exist")]
pub struct UnresolvedReferenceError {
    pub property: String,
    pub label: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "identity ({property}, '{value}') matches {} entities: {}",
    .candidates.len(),
    .candidates.iter().map(EntityId::as_str).collect::<Vec<_>>().join(", ")
)]
pub struct IdentityAmbiguityError {
    pub property: String,
    pub value: String,
    pub candidates: Vec<EntityId>,
}

/// Failures reported by an [`EntityGateway`](crate::gateway::EntityGateway).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Timeouts, 5xx responses, rate limiting. Retried with backoff.
    #[error("transient gateway failure: {0}")]
    Transient(String),
    /// Validation failures and other 4xx responses. Never retried.
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("gateway authentication failed: {0}")]
    Auth(String),
    #[error("lookup of {key} matched {} entities", .candidates.len())]
    Ambiguous {
        key: String,
        candidates: Vec<EntityId>,
    },
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, GatewayError::Auth(_))
    }
}

/// Row-scoped failure, accumulated into the run report.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RowError {
    #[error(transparent)]
    Placeholder(#[from] UnresolvedPlaceholderError),
    #[error(transparent)]
    Reference(#[from] UnresolvedReferenceError),
    #[error(transparent)]
    Ambiguity(#[from] IdentityAmbiguityError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("property '{0}' does not exist")]
    UnknownProperty(String),
    #[error("{0} rendered empty")]
    Blank(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("failed to read row: {0}")]
    Read(String),
}

impl RowError {
    /// Statement-scoped errors drop one statement; everything else fails the row.
    pub fn is_statement_scoped(&self) -> bool {
        matches!(
            self,
            RowError::Reference(_) | RowError::Value(_) | RowError::UnknownProperty(_)
        )
    }
}

/// Run-level failure. Anything surfacing as a `SyncError` stops the run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Reference(#[from] UnresolvedReferenceError),
    #[error(transparent)]
    Ambiguity(#[from] IdentityAmbiguityError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
