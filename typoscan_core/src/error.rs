use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a run before it starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No base secret found in {0:?}")]
    MissingBaseSecret(PathBuf),
    #[error("No target identifiers to search for")]
    EmptyTargetSet,
    #[error("No base candidates to check")]
    NoCandidates,
    #[error("Failed to read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Typos map file {0:?} not found")]
    MissingTyposMap(PathBuf),
    #[error("Failed to parse TOML from config file {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Worker concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("Oracle command is empty")]
    MissingOracleCommand,
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// A single derivation failure. Always recoverable: the variant that caused it
/// is treated as producing no identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Failed to spawn oracle command: {0}")]
    Spawn(String),
    #[error("Oracle timed out")]
    Timeout,
    #[error("Oracle exited abnormally: {0}")]
    Failed(String),
    #[error("Malformed oracle output: {0}")]
    MalformedOutput(String),
    #[error("Oracle panicked: {0}")]
    Panicked(String),
    #[error("Derivation failed: {0}")]
    Derivation(String),
}

/// Attempt log failures. These never change a search outcome.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open attempt log {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Attempt log write failed: {0}")]
    Write(#[from] std::io::Error),
    #[error("Attempt log writer thread panicked")]
    WriterPanicked,
}
