use std::path::PathBuf;
use std::time::Duration;

/// Problems that stop a run before any image is touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {name} (pass --{flag} or set {env})")]
    Missing {
        name: &'static str,
        flag: &'static str,
        env: &'static str,
    },
    #[error("Image list not found: {0}")]
    InputNotFound(PathBuf),
    #[error("Image list is empty: {0}")]
    InputEmpty(PathBuf),
    #[error("Failed to read image list {path}: {source}")]
    InputUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Image list {path} is not a JSON array of strings: {source}")]
    InputInvalid {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Failure to run an external tool to completion.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} did not finish within {}", humantime::format_duration(.after.to_owned()))]
    TimedOut { program: String, after: Duration },
}
