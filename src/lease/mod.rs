mod error;
mod manager;
mod provider;

pub use error::Error;
pub use manager::{ChangeSubscription, LeaseManager};
pub use provider::{LeaseDefinition, LeaseProvider, LeaseProviderError, LeaseProviderErrorKind};
