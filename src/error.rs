use std::io;

use thiserror::Error;

use crate::verify::Mismatch;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Verification(Box<Mismatch>),
    #[error("writer task failed: {0}")]
    WriterTask(#[from] tokio::task::JoinError),
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type BenchResult<T> = Result<T, BenchError>;
