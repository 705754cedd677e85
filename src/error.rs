use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Script does not compile: {0:#}")]
    Compile(#[from] anyhow::Error),
    #[error("Script is {size} bytes, larger than the allowed {max}")]
    ScriptTooLarge { size: usize, max: usize },
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),
    #[error("Negative value for i;ascii-numeric comparator: {0:?}")]
    NegativeNumber(String),
    #[error("Delivery refused: {0}")]
    DeliveryRefused(String),
    #[error("No envelope sender or Return-Path to send the reject notice to")]
    NoRejectRecipient,
    #[error("Mailbox operation failed: {0}")]
    Collaborator(String),
    #[error("Malformed rule XML: {0}")]
    Xml(String),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
