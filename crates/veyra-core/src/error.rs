use thiserror::Error;

#[derive(Debug, Error)]
pub enum VeyraError {
    // Classification errors (recovered by the dispatcher)
    #[error("Intent classification failed: {0}")]
    Classification(String),

    #[error("Intent confidence out of range: {0}")]
    InvalidConfidence(f64),

    // Model errors
    #[error("Model request failed: {0}")]
    ModelRequest(String),

    #[error("Model response parse error: {0}")]
    ModelParse(String),

    #[error("Model call timed out after {0}s")]
    ModelTimeout(u64),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Routing errors
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    // Config errors (fatal at startup, never at request time)
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Persistence errors (fatal for the current turn)
    #[error("Persistence error: {0}")]
    Persistence(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VeyraError {
    /// Whether this error is allowed to abort a turn.
    ///
    /// Only persistence failures abort; everything else degrades into
    /// normal state flow (clarification, failure results, skipped edges).
    pub fn is_fatal_for_turn(&self) -> bool {
        matches!(self, VeyraError::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, VeyraError>;
