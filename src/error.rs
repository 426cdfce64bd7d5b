use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Data load error: {0}")]
    DataLoad(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Generation error: {message}")]
    Generation {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Report generation was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

impl ReportError {
    pub fn generation(message: impl Into<String>) -> Self {
        ReportError::Generation {
            message: message.into(),
            source: None,
        }
    }

    pub fn generation_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ReportError::Generation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Only a failed external call is worth retrying unchanged; everything
    /// before it is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReportError::Generation { .. })
    }

    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            ReportError::Template(_) | ReportError::InvalidSelection(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
