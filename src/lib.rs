//! Singleton leader-election and buffered trace shipping for a multi-instance function host.
//!
//! Two independent subsystems live here: [`lease`] gates which host instance acts as primary
//! for a given host identity, and [`trace`] batches operational logs to pluggable sinks.

pub mod lease;
pub mod trace;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Lease(#[from] lease::Error),

    #[error(transparent)]
    Trace(#[from] trace::Error),
}
