use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid BDNS identifier: {0}")]
    InvalidBdnsId(String),

    #[error("registry request failed: {0}")]
    RegistryHttp(String),

    #[error("registry returned status {status}: {message}")]
    RegistryStatus { status: u16, message: String },

    #[error("malformed record for BDNS {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    #[error("no data partitions found under {0}")]
    DataUnavailable(Utf8PathBuf),

    #[error("no such partition: {0}")]
    PartitionMissing(Utf8PathBuf),

    #[error("failed to read partition {path}: {message}")]
    PartitionRead { path: Utf8PathBuf, message: String },

    #[error("failed to write partition {path}: {message}")]
    PartitionWrite { path: Utf8PathBuf, message: String },

    #[error("csv export failed: {0}")]
    ExportFailed(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
