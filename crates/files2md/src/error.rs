use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Attachment source error: {0}")]
    Source(#[from] SourceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value for '{field}': {value:?} (expected one of: {expected})")]
    InvalidChoice {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid collection output mapping '{value}': {reason}")]
    InvalidCollectionOutput { value: String, reason: String },

    #[error("Secret error: {0}")]
    Secret(#[from] crate::config::secrets::SecretError),
}

impl ConfigError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to '{url}' failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode response from '{url}': {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to write downloaded file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Attachment '{0}' could not be fetched: {1}")]
    Unavailable(String, String),
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Accelerator memory exhausted on device {device}: {message}")]
    AcceleratorOutOfMemory { device: String, message: String },

    #[error("Failed to read input '{path}': {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to parse PDF: {0}")]
    Pdf(String),

    #[error("Failed to launch conversion command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("Conversion timed out after {0} seconds")]
    Timeout(u64),

    #[error("Conversion produced no output for '{0}'")]
    MissingOutput(PathBuf),

    #[error("Failed to build conversion engine: {0}")]
    Engine(String),

    #[error("Conversion I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Failed to create scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker {worker_id}: {source}")]
    SpawnFailed {
        worker_id: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Expected {expected} results from workers, received {received}")]
    MissingResults { expected: usize, received: usize },
}

/// Accelerator detection failures. Never fatal; detection degrades to CPU.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}")]
    Failed { program: String, status: String },
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Unknown log level '{0}' (expected one of: critical, error, warning, info, debug)")]
    UnknownLevel(String),

    #[error("Failed to bridge log records: {0}")]
    Bridge(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub type Result<T> = std::result::Result<T, ExportError>;
