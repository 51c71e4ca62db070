//! Error types for gmailfilters

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No folders to process")]
    NoMatchingFolders,

    #[error("No matching messages: {0}")]
    NoMatchingMessages(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Rule file error: {0}")]
    Rules(String),

    #[error("Filter export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

pub type Result<T> = std::result::Result<T, Error>;
