use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{stage} stage failed: {message}")]
    Stage { stage: &'static str, message: String },

    #[error("Missing required column: {0}")]
    MissingColumn(String),
}

impl PipelineError {
    /// Tags an error with the pipeline stage it surfaced in. Errors that
    /// already carry a stage name keep the original tag.
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            err @ PipelineError::Stage { .. } => err,
            other => PipelineError::Stage {
                stage,
                message: other.to_string(),
            },
        }
    }

    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        PipelineError::Stage {
            stage,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
