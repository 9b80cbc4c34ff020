/// Failure to produce the next assistant turn.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("generator exhausted after {0} turns")]
    Exhausted(usize),
}

impl GenerationError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Exhausted(_) => "exhausted",
        }
    }
}
