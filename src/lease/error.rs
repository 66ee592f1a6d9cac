#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lease_timeout must be between 15s and 60s, got {0:?}")]
    InvalidArgument(std::time::Duration),
}
