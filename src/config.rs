use clap::builder::BoolishValueParser;
use clap::{Args, ValueEnum};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::env::load_env_file;
use crate::error::ConfigError;
use crate::resolve::Target;

const DEFAULT_INPUT: &str = "images.json";
const DEFAULT_RETRY_TIMES: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_SKOPEO: &str = "skopeo";

const PROXY_VARS: [&str; 6] = [
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MultiArchMode {
    /// Copy every platform in a manifest list
    All,
    /// Copy only the platform matching this machine
    System,
    /// Copy the manifest list without any platform images
    IndexOnly,
}

impl MultiArchMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            MultiArchMode::All => "all",
            MultiArchMode::System => "system",
            MultiArchMode::IndexOnly => "index-only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DigestCheck {
    /// Compare manifest digests with `skopeo inspect`
    Skopeo,
    /// Ask the local Docker daemon for registry digests
    Docker,
    /// Always copy
    Off,
}

#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Destination registry host (e.g. registry.example.com:5000)
    #[arg(long, env = "MIRROR_REGISTRY")]
    pub registry: Option<String>,

    /// Namespace under the destination registry
    #[arg(long, env = "MIRROR_NAMESPACE")]
    pub namespace: Option<String>,

    /// JSON file holding an array of source image references
    #[arg(short, long, env = "MIRROR_IMAGES")]
    pub input: Option<PathBuf>,

    /// Dotenv file consulted for settings not given on the command line
    #[arg(long, env = "MIRROR_ENV_FILE")]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct MirrorArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Retries the copy tool makes on transient errors
    #[arg(long, env = "MIRROR_RETRY_TIMES")]
    pub retry_times: Option<u32>,

    /// Per-image time limit (e.g. 30m, 1h 15m)
    #[arg(long, env = "MIRROR_TIMEOUT", value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Which platforms of a multi-arch image to copy
    #[arg(long, env = "MIRROR_MULTI_ARCH", value_enum)]
    pub multi_arch: Option<MultiArchMode>,

    /// Pass HTTP(S)_PROXY / NO_PROXY through to the copy tool
    #[arg(
        long,
        env = "MIRROR_USE_PROXY",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub use_proxy: Option<bool>,

    /// Keep going after a failed image (false stops at the first failure)
    #[arg(
        long,
        env = "MIRROR_CONTINUE_ON_ERROR",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub continue_on_error: Option<bool>,

    /// Skip images whose reference contains this text (repeatable)
    #[arg(long = "skip", env = "MIRROR_SKIP", value_delimiter = ',')]
    pub skip: Vec<String>,

    /// How to detect images that are already mirrored
    #[arg(long, env = "MIRROR_DIGEST_CHECK", value_enum)]
    pub digest_check: Option<DigestCheck>,

    /// Registry credentials file handed to skopeo
    #[arg(long, env = "MIRROR_AUTHFILE")]
    pub authfile: Option<PathBuf>,

    /// Path to the skopeo binary
    #[arg(long, env = "MIRROR_SKOPEO")]
    pub skopeo: Option<PathBuf>,

    /// Write a JSON report of every image to this file
    #[arg(long, env = "MIRROR_REPORT")]
    pub report: Option<PathBuf>,
}

/// Options handed to the copy tool for every image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOptions {
    pub retry_times: u32,
    pub multi_arch: MultiArchMode,
    pub timeout: Duration,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            retry_times: DEFAULT_RETRY_TIMES,
            multi_arch: MultiArchMode::All,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Proxy variables captured once at start-up.
///
/// Child processes get exactly these variables: anything proxy-related in
/// the parent environment is removed first, so an empty value means "no
/// proxy" even when the shell has one configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    vars: Vec<(String, String)>,
}

impl ProxySettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = PROXY_VARS
            .iter()
            .filter_map(|name| {
                lookup(name)
                    .filter(|v| !v.is_empty())
                    .map(|v| (name.to_string(), v))
            })
            .collect();
        Self { vars }
    }

    pub fn is_enabled(&self) -> bool {
        !self.vars.is_empty()
    }

    pub fn apply(&self, command: &mut Command) {
        for name in PROXY_VARS {
            command.env_remove(name);
        }
        for (name, value) in &self.vars {
            command.env(name, value);
        }
    }
}

#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub target: Target,
    pub input: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub target: Target,
    pub input: PathBuf,
    pub copy: CopyOptions,
    pub proxy: ProxySettings,
    pub continue_on_error: bool,
    pub skip: Vec<String>,
    pub digest_check: DigestCheck,
    pub authfile: Option<PathBuf>,
    pub skopeo: PathBuf,
    pub report: Option<PathBuf>,
}

impl TargetConfig {
    pub fn from_args(
        args: &TargetArgs,
        dotenv: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let registry = layered(args.registry.clone(), dotenv, "MIRROR_REGISTRY", parse_text)?
            .ok_or(ConfigError::Missing {
                name: "destination registry",
                flag: "registry",
                env: "MIRROR_REGISTRY",
            })?;
        let namespace = layered(args.namespace.clone(), dotenv, "MIRROR_NAMESPACE", parse_text)?
            .ok_or(ConfigError::Missing {
                name: "destination namespace",
                flag: "namespace",
                env: "MIRROR_NAMESPACE",
            })?;
        let input = layered(args.input.clone(), dotenv, "MIRROR_IMAGES", parse_path)?
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT));

        Ok(Self {
            target: Target::new(registry, namespace),
            input,
        })
    }
}

impl MirrorConfig {
    pub fn from_args(
        args: &MirrorArgs,
        dotenv: &HashMap<String, String>,
        process_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let TargetConfig { target, input } = TargetConfig::from_args(&args.target, dotenv)?;

        let copy = CopyOptions {
            retry_times: layered(args.retry_times, dotenv, "MIRROR_RETRY_TIMES", |v| {
                v.parse().ok()
            })?
            .unwrap_or(DEFAULT_RETRY_TIMES),
            multi_arch: layered(args.multi_arch, dotenv, "MIRROR_MULTI_ARCH", |v| {
                MultiArchMode::from_str(v, true).ok()
            })?
            .unwrap_or(MultiArchMode::All),
            timeout: layered(args.timeout, dotenv, "MIRROR_TIMEOUT", |v| {
                humantime::parse_duration(v).ok()
            })?
            .unwrap_or(DEFAULT_TIMEOUT),
        };

        let use_proxy =
            layered(args.use_proxy, dotenv, "MIRROR_USE_PROXY", parse_bool)?.unwrap_or(false);
        let proxy = if use_proxy {
            ProxySettings::from_lookup(|name| {
                process_env(name).or_else(|| dotenv.get(name).cloned())
            })
        } else {
            ProxySettings::default()
        };

        let skip = if args.skip.is_empty() {
            dotenv
                .get("MIRROR_SKIP")
                .map(|v| split_list(v))
                .unwrap_or_default()
        } else {
            args.skip.iter().filter(|s| !s.is_empty()).cloned().collect()
        };

        Ok(Self {
            target,
            input,
            copy,
            proxy,
            continue_on_error: layered(
                args.continue_on_error,
                dotenv,
                "MIRROR_CONTINUE_ON_ERROR",
                parse_bool,
            )?
            .unwrap_or(true),
            skip,
            digest_check: layered(args.digest_check, dotenv, "MIRROR_DIGEST_CHECK", |v| {
                DigestCheck::from_str(v, true).ok()
            })?
            .unwrap_or(DigestCheck::Skopeo),
            authfile: layered(args.authfile.clone(), dotenv, "MIRROR_AUTHFILE", parse_path)?,
            skopeo: layered(args.skopeo.clone(), dotenv, "MIRROR_SKOPEO", parse_path)?
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SKOPEO)),
            report: layered(args.report.clone(), dotenv, "MIRROR_REPORT", parse_path)?,
        })
    }
}

/// Read the dotenv file named on the command line, if any.
pub fn load_dotenv(env_file: Option<&Path>) -> Result<HashMap<String, String>, ConfigError> {
    match env_file {
        Some(path) => load_env_file(path),
        None => Ok(HashMap::new()),
    }
}

/// Load the JSON array of source references.
pub fn load_references(path: &Path) -> Result<Vec<String>, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::InputNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::InputUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let references: Vec<String> =
        serde_json::from_str(&content).map_err(|source| ConfigError::InputInvalid {
            path: path.to_path_buf(),
            source,
        })?;

    if references.is_empty() {
        return Err(ConfigError::InputEmpty(path.to_path_buf()));
    }
    Ok(references)
}

/// Command line / process environment first, then the dotenv file.
fn layered<T>(
    explicit: Option<T>,
    dotenv: &HashMap<String, String>,
    key: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    if explicit.is_some() {
        return Ok(explicit);
    }
    match dotenv.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => parse(raw).map(Some).ok_or_else(|| ConfigError::InvalidValue {
            name: key,
            value: raw.to_string(),
        }),
        None => Ok(None),
    }
}

fn parse_text(v: &str) -> Option<String> {
    Some(v.to_string())
}

fn parse_path(v: &str) -> Option<PathBuf> {
    Some(PathBuf::from(v))
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        mirror: MirrorArgs,
    }

    fn args(argv: &[&str]) -> MirrorArgs {
        let mut full = vec!["regmirror"];
        full.extend_from_slice(argv);
        TestCli::parse_from(full).mirror
    }

    fn dotenv(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn command_line_values() {
        let config = MirrorConfig::from_args(
            &args(&[
                "--registry",
                "registry.local:5000",
                "--namespace",
                "mirror",
                "--timeout",
                "90s",
                "--multi-arch",
                "index-only",
                "--continue-on-error",
                "false",
                "--skip",
                "nvidia,gpu",
            ]),
            &HashMap::new(),
            no_env,
        )
        .unwrap();

        assert_eq!(config.target, Target::new("registry.local:5000", "mirror"));
        assert_eq!(config.copy.timeout, Duration::from_secs(90));
        assert_eq!(config.copy.multi_arch, MultiArchMode::IndexOnly);
        assert_eq!(config.copy.retry_times, DEFAULT_RETRY_TIMES);
        assert!(!config.continue_on_error);
        assert_eq!(config.skip, vec!["nvidia".to_string(), "gpu".to_string()]);
        assert_eq!(config.input, PathBuf::from(DEFAULT_INPUT));
        assert_eq!(config.digest_check, DigestCheck::Skopeo);
        assert!(!config.proxy.is_enabled());
    }

    #[test]
    fn dotenv_fills_missing_values() {
        let env = dotenv(&[
            ("MIRROR_REGISTRY", "from-dotenv"),
            ("MIRROR_NAMESPACE", "ns"),
            ("MIRROR_RETRY_TIMES", "7"),
            ("MIRROR_USE_PROXY", "yes"),
            ("MIRROR_SKIP", "a, b"),
            ("HTTPS_PROXY", "http://proxy:3128"),
        ]);

        let config = MirrorConfig::from_args(&args(&["--registry", "cli"]), &env, no_env).unwrap();
        assert_eq!(config.target.registry, "cli");
        assert_eq!(config.target.namespace, "ns");
        assert_eq!(config.copy.retry_times, 7);
        assert_eq!(config.skip, vec!["a".to_string(), "b".to_string()]);
        assert!(config.proxy.is_enabled());
    }

    #[test]
    fn boolish_values_from_environment_and_command_line() {
        // the other config tests pass with either value of use_proxy
        std::env::set_var("MIRROR_USE_PROXY", "1");
        let from_env =
            TestCli::try_parse_from(["regmirror", "--registry", "r", "--namespace", "n"]);
        std::env::remove_var("MIRROR_USE_PROXY");
        assert_eq!(from_env.unwrap().mirror.use_proxy, Some(true));

        let parsed = args(&["--continue-on-error", "no", "--use-proxy", "off"]);
        assert_eq!(parsed.continue_on_error, Some(false));
        assert_eq!(parsed.use_proxy, Some(false));

        assert_eq!(args(&["--use-proxy"]).use_proxy, Some(true));
    }

    #[test]
    fn missing_registry_is_a_config_error() {
        let err = MirrorConfig::from_args(&args(&["--namespace", "ns"]), &HashMap::new(), no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { flag: "registry", .. }));
    }

    #[test]
    fn invalid_dotenv_value_is_reported() {
        let env = dotenv(&[
            ("MIRROR_REGISTRY", "r"),
            ("MIRROR_NAMESPACE", "n"),
            ("MIRROR_TIMEOUT", "soon"),
        ]);
        let err = MirrorConfig::from_args(&args(&[]), &env, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "MIRROR_TIMEOUT", .. }));
    }

    #[test]
    fn proxy_ignores_empty_values() {
        let proxy = ProxySettings::from_lookup(|name| match name {
            "HTTPS_PROXY" => Some("http://proxy:3128".to_string()),
            "NO_PROXY" => Some(String::new()),
            _ => None,
        });
        assert_eq!(
            proxy.vars,
            vec![("HTTPS_PROXY".to_string(), "http://proxy:3128".to_string())]
        );
    }

    #[test]
    fn reference_list_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            load_references(&missing),
            Err(ConfigError::InputNotFound(_))
        ));

        let empty = dir.path().join("empty.json");
        fs::write(&empty, "[]").unwrap();
        assert!(matches!(load_references(&empty), Err(ConfigError::InputEmpty(_))));

        let invalid = dir.path().join("invalid.json");
        fs::write(&invalid, r#"{"images": []}"#).unwrap();
        assert!(matches!(
            load_references(&invalid),
            Err(ConfigError::InputInvalid { .. })
        ));

        let good = dir.path().join("images.json");
        let mut file = fs::File::create(&good).unwrap();
        write!(file, r#"["ghcr.io/a/x:1", "${{REF:-}}"]"#).unwrap();
        assert_eq!(load_references(&good).unwrap().len(), 2);
    }
}
