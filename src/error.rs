use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Corrupted postings: {0}")]
    Corruption(String),
    #[error("Unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("Invalid index features: {0}")]
    InvalidFeatures(String),
    #[error(transparent)]
    InvalidOption(#[from] validator::ValidationErrors),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub fn corruption(msg: impl Into<String>) -> Self {
        CodecError::Corruption(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
