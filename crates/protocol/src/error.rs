use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Duplicate command id '{0}'")]
    DuplicateId(String),

    #[error("Command '{0}' has no example phrasings")]
    EmptyDescriptions(String),

    #[error("Command '{0}' declares both a url and an action")]
    ConflictingTarget(String),

    #[error("Command registry is empty")]
    Empty,
}
