use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid bounds for metric '{metric}': min {min} > max {max}")]
    InvalidBounds { metric: String, min: f64, max: f64 },

    #[error("Population segment percentages must sum to 1.0, got {0}")]
    PopulationWeights(f64),

    #[error("Label mismatch for metric '{metric}': expected [{expected}], got [{got}]")]
    LabelMismatch {
        metric: String,
        expected: String,
        got: String,
    },

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Counter '{metric}' received negative delta {delta}")]
    NegativeCounterDelta { metric: String, delta: f64 },

    #[error("Scenario '{scenario}' failed {failed} of {total} assertions")]
    AssertionsFailed {
        scenario: String,
        failed: usize,
        total: usize,
    },

    #[error("Render error: {0}")]
    Render(String),

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;

impl SimError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new render error
    pub fn render<S: Into<String>>(msg: S) -> Self {
        Self::Render(msg.into())
    }

    /// Creates a new parse error
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Returns true if this error must abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::InvalidBounds { .. }
                | Self::PopulationWeights(_)
                | Self::LabelMismatch { .. }
                | Self::UnknownMetric(_)
                | Self::UnknownScenario(_)
        )
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_)
            | Self::InvalidBounds { .. }
            | Self::PopulationWeights(_)
            | Self::LabelMismatch { .. } => "config",
            Self::UnknownMetric(_) | Self::UnknownScenario(_) => "not_found",
            Self::NegativeCounterDelta { .. } => "internal",
            Self::AssertionsFailed { .. } => "scenario",
            Self::Render(_) => "render",
            Self::Parse { .. } | Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Join(_) => "async",
        }
    }
}
