use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// Parse `KEY=VALUE` lines. Blank lines, `#` comments and lines without `=`
/// are ignored; later keys override earlier ones.
pub fn parse_env(content: &str) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            env.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    env
}

pub fn load_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_env(&String::from_utf8_lossy(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_assignments() {
        let env = parse_env(
            "# comment\n\
             MIRROR_REGISTRY = registry.local:5000\n\
             \n\
             NOT AN ASSIGNMENT\n\
             IMAGE=${IMAGE:-acme/app:1}\n\
             URL=http://x/?a=b\n\
             MIRROR_REGISTRY=override\n",
        );
        assert_eq!(env.len(), 3);
        assert_eq!(env["MIRROR_REGISTRY"], "override");
        assert_eq!(env["IMAGE"], "${IMAGE:-acme/app:1}");
        assert_eq!(env["URL"], "http://x/?a=b");
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "MIRROR_NAMESPACE=mirror").unwrap();

        let env = load_env_file(file.path()).unwrap();
        assert_eq!(env["MIRROR_NAMESPACE"], "mirror");

        let err = load_env_file(Path::new("/nonexistent/.env")).unwrap_err();
        assert!(matches!(err, ConfigError::EnvFile { .. }));
    }
}
