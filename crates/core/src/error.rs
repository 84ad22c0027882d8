/// Errors raised while decoding core types from their stored form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A status string did not name any known request status.
    #[error("unknown request status: {0}")]
    UnknownStatus(String),
}
