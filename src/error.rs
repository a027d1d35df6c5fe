use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },

    #[error("{0} layer not supported")]
    UnsupportedLayer(String),

    #[error("client {0} unauthorized")]
    Unauthorized(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("missing nat")]
    MissingNat,

    #[error("{0} pool empty")]
    PoolEmpty(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
