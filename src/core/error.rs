use crate::store::ObjectId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZapError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Value type mismatch for '{name}': stored as {width}-byte x {count}")]
    TypeMismatch {
        name: String,
        width: usize,
        count: usize,
    },

    #[error("Invalid entry name: {0:?}")]
    InvalidName(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No such object: {0}")]
    NoSuchObject(ObjectId),

    #[error("Object already exists: {0}")]
    ObjectExists(ObjectId),

    #[error("Invalid block type tag: {0:#x}")]
    InvalidBlockType(u64),

    #[error("Corrupt directory block: {0}")]
    CorruptBlock(String),

    #[error("Store checksum verification failed")]
    ChecksumMismatch,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl ZapError {
    /// True for errors a caller is expected to handle locally
    pub fn is_not_found(&self) -> bool {
        matches!(self, ZapError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ZapError>;
