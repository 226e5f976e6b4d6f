use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scenario error: {0}")]
    Scenario(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("AI provider error: {0}")]
    Ai(String),

    #[error("AI response parse error: {0}")]
    AiResponseParse(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Goal not archived after {attempts} attempt(s):\n{status}")]
    GoalNotArchived { attempts: u32, status: String },
}

impl PilotError {
    /// Device-originated failures are the ones worth a reconnect attempt.
    pub fn is_device_error(&self) -> bool {
        matches!(self, PilotError::Device(_))
    }
}

impl serde::Serialize for PilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
