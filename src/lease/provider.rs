use std::time::Duration;

/// What to lock, and for how long. Constructed fresh for every acquire/renew/release call;
/// never mutated once built.
#[derive(Clone, Debug)]
pub struct LeaseDefinition {
    pub account_name: String,
    pub namespace: String,
    pub name: String,
    pub period: Duration,
    pub lease_id: Option<String>,
}

impl LeaseDefinition {
    /// Lease names follow the `"locks/{host_id}/host"` convention used by blob-backed
    /// providers; providers that don't need this convention may ignore `name` and key off
    /// `namespace` instead.
    pub fn host_lock_name(host_id: &str) -> String {
        format!("locks/{host_id}/host")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseProviderErrorKind {
    Conflict,
    NotFound,
    TransientServerError,
    Other,
}

#[derive(thiserror::Error, Debug)]
#[error("lease provider error ({kind:?}): {message}")]
pub struct LeaseProviderError {
    pub kind: LeaseProviderErrorKind,
    pub message: String,
}

impl LeaseProviderError {
    pub fn new(kind: LeaseProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(LeaseProviderErrorKind::Conflict, message)
    }
}

/// External collaborator: acquires, renews and releases a named lease against whatever
/// store backs it (blob storage, etcd, a k8s `Lease` object, ...). The `LeaseManager` only
/// ever sees this trait.
#[async_trait::async_trait]
pub trait LeaseProvider: Send + Sync {
    async fn acquire(&self, def: &LeaseDefinition) -> Result<String, LeaseProviderError>;
    async fn renew(&self, def: &LeaseDefinition) -> Result<(), LeaseProviderError>;
    async fn release(&self, def: &LeaseDefinition) -> Result<(), LeaseProviderError>;
}
