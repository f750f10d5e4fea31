use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::env::load_env_file;
use crate::template::expand_vars;

#[derive(Debug, Clone, Args)]
pub struct CollectArgs {
    /// Dotenv file used to expand ${VAR} references
    #[arg(long)]
    pub env: PathBuf,

    /// docker-compose file to scan (repeatable)
    #[arg(long, required = true)]
    pub compose: Vec<PathBuf>,

    /// Also include the image named by this dotenv key (repeatable)
    #[arg(long = "include-var")]
    pub include_vars: Vec<String>,

    /// Where to write the JSON image list
    #[arg(short, long, default_value = "images.json")]
    pub out: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct ComposeFile {
    #[serde(default)]
    services: Option<HashMap<String, Option<Service>>>,
}

#[derive(Debug, Deserialize)]
struct Service {
    #[serde(default)]
    image: Option<Value>,
    #[serde(default)]
    environment: Option<Environment>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Environment {
    Map(BTreeMap<String, Value>),
    List(Vec<Value>),
}

pub fn collect(args: &CollectArgs) -> Result<usize> {
    let env = load_env_file(&args.env)?;

    let mut images = BTreeSet::new();
    for path in &args.compose {
        images.extend(collect_images_from_compose(path, &env)?);
    }

    for key in &args.include_vars {
        match env.get(key).map(|v| expand_vars(v.trim(), &env)) {
            Some(value) if !value.trim().is_empty() => {
                images.insert(value.trim().to_string());
            }
            _ => warn!(key = %key, "env key not set, nothing to include"),
        }
    }

    let out = usable_images(images);

    let json = serde_json::to_string_pretty(&out)?;
    fs::write(&args.out, json)
        .context(format!("Failed to write image list: {}", args.out.display()))?;

    info!(count = out.len(), path = %args.out.display(), "collected images");
    println!("Collected {} images", out.len());
    Ok(out.len())
}

/// Images named by `services.*.image`, plus image-looking values found in
/// `services.*.environment` (both map and `KEY=VALUE` list forms).
fn collect_images_from_compose(
    path: &Path,
    env: &HashMap<String, String>,
) -> Result<BTreeSet<String>> {
    let content = fs::read_to_string(path)
        .context(format!("Failed to read compose file: {}", path.display()))?;

    let compose: ComposeFile = if content.trim().is_empty() {
        ComposeFile::default()
    } else {
        serde_yaml::from_str(&content)
            .context(format!("Failed to parse compose file: {}", path.display()))?
    };

    let mut images = BTreeSet::new();

    for service in compose.services.unwrap_or_default().into_values().flatten() {
        if let Some(image) = service.image.as_ref().and_then(scalar_text) {
            let image = expand_vars(&image, env);
            let image = image.trim();
            if !image.is_empty() {
                images.insert(image.to_string());
            }
        }

        match service.environment {
            Some(Environment::Map(map)) => {
                for value in map.values().filter_map(scalar_text) {
                    images.extend(images_in_env_value(&value, env));
                }
            }
            Some(Environment::List(list)) => {
                for item in list.iter().filter_map(scalar_text) {
                    if let Some((_, value)) = item.trim().split_once('=') {
                        images.extend(images_in_env_value(value, env));
                    }
                }
            }
            None => {}
        }
    }

    Ok(images)
}

/// Pull image references out of an environment value such as
/// `${BASE_IMAGE:-acme/base:1}` or `acme/a:1,acme/b:2`.
fn images_in_env_value(value: &str, env: &HashMap<String, String>) -> BTreeSet<String> {
    let mut images = BTreeSet::new();

    let expanded = expand_vars(value, env);
    for token in expanded.split(|c: char| c.is_whitespace() || c == ',') {
        let token = token.trim();
        if token.is_empty() || token.contains("${") {
            continue;
        }
        if looks_pinned(token) {
            images.insert(token.to_string());
        }
    }

    images
}

/// Drop entries that cannot be mirrored, warning about each.
fn usable_images(images: BTreeSet<String>) -> Vec<String> {
    images
        .into_iter()
        .filter_map(|image| {
            let image = image.trim().to_string();
            if image.is_empty() {
                return None;
            }
            if image.contains("${") {
                warn!(image = %image, "unexpanded image skipped");
                return None;
            }
            if !looks_pinned(&image) {
                warn!(image = %image, "untagged image skipped");
                return None;
            }
            Some(image)
        })
        .collect()
}

fn looks_pinned(s: &str) -> bool {
    s.contains(':') || s.contains('@')
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE: &str = r#"
services:
  web:
    image: ${WEB_IMAGE:-acme/web:1.0}
    environment:
      SANDBOX_IMAGE: ${SANDBOX_IMAGE:-acme/sandbox:2}
      WORKERS: 4
      EMPTY:
  db:
    image: postgres:${PG_TAG}
    environment:
      - EXTRA_IMAGES=acme/a:1, acme/b@sha256:abc
      - PLAIN=hello
  builder:
    build: .
  bare:
"#;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn env_value_heuristics() {
        let env = env(&[]);
        assert_eq!(
            images_in_env_value("${X:-acme/sandbox:2}", &env),
            BTreeSet::from(["acme/sandbox:2".to_string()])
        );
        assert_eq!(
            images_in_env_value("acme/a:1 ${UNSET} acme/b:2", &env),
            BTreeSet::from(["acme/a:1".to_string(), "acme/b:2".to_string()])
        );
        assert!(images_in_env_value("plain", &env).is_empty());
    }

    #[test]
    fn collects_from_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        fs::write(&path, COMPOSE).unwrap();

        let images = collect_images_from_compose(&path, &env(&[("PG_TAG", "16")])).unwrap();
        assert_eq!(
            images.into_iter().collect::<Vec<_>>(),
            vec![
                "acme/a:1",
                "acme/b@sha256:abc",
                "acme/sandbox:2",
                "acme/web:1.0",
                "postgres:16",
            ]
        );
    }

    #[test]
    fn unresolved_and_untagged_are_dropped() {
        let images = BTreeSet::from([
            "postgres:${PG_TAG}".to_string(),
            "redis".to_string(),
            "redis:7".to_string(),
        ]);
        assert_eq!(usable_images(images), vec!["redis:7".to_string()]);
    }

    #[test]
    fn collect_writes_sorted_json() {
        let dir = tempfile::tempdir().unwrap();
        let compose = dir.path().join("compose.yml");
        let dotenv = dir.path().join(".env");
        let out = dir.path().join("images.json");
        fs::write(&compose, COMPOSE).unwrap();
        fs::write(&dotenv, "PG_TAG=16\nAPP_IMAGE=${APP_REPO:-acme/app}:${APP_TAG:-3}\n").unwrap();

        let args = CollectArgs {
            env: dotenv,
            compose: vec![compose],
            include_vars: vec!["APP_IMAGE".to_string(), "MISSING".to_string()],
            out: out.clone(),
        };
        assert_eq!(collect(&args).unwrap(), 6);

        let written: Vec<String> =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written[0], "acme/a:1");
        assert!(written.contains(&"acme/app:3".to_string()));
    }
}
