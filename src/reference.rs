use serde::Serialize;
use std::fmt;

/// Content digest attached to a reference with `@`, e.g. `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Digest {
    pub algorithm: String,
    pub encoded: String,
}

impl Digest {
    fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((algorithm, encoded)) => Digest {
                algorithm: algorithm.to_string(),
                encoded: encoded.to_string(),
            },
            None => Digest {
                algorithm: String::new(),
                encoded: raw.to_string(),
            },
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.algorithm.is_empty() {
            write!(f, "{}", self.encoded)
        } else {
            write!(f, "{}:{}", self.algorithm, self.encoded)
        }
    }
}

/// A parsed image reference.
///
/// Parsing never fails: any string yields a value, and missing structure
/// simply leaves the corresponding fields empty. Formatting the value with
/// `Display` gives back the (trimmed) input.
///
/// The first path segment is taken as a registry host only when it contains
/// `.` or `:` and at least two more segments follow it. `quay.io/app` is
/// therefore read as a two-segment repository path, and an organisation
/// name containing a dot (`my.org/team/app`) is mistaken for a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageReference {
    pub registry_host: Option<String>,
    pub path_segments: Vec<String>,
    pub repository_leaf: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

impl ImageReference {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        let (name, digest) = match raw.rsplit_once('@') {
            Some((name, digest)) => (name, Some(Digest::parse(digest))),
            None => (raw, None),
        };

        // A tag is a `:` after the last `/`; earlier colons belong to a port.
        let leaf_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name[leaf_start..].rfind(':') {
            Some(i) => {
                let split = leaf_start + i;
                (&name[..split], Some(name[split + 1..].to_string()))
            }
            None => (name, None),
        };

        let mut segments: Vec<String> = name.split('/').map(str::to_string).collect();

        let registry_host = if segments.len() >= 3 && looks_like_host(&segments[0]) {
            Some(segments.remove(0))
        } else {
            None
        };

        // split() always yields at least one element
        let repository_leaf = segments.pop().unwrap_or_default();

        ImageReference {
            registry_host,
            path_segments: segments,
            repository_leaf,
            tag,
            digest,
        }
    }

    /// Repository path without the registry host: segments and leaf joined by `/`.
    pub fn repository_path(&self) -> String {
        let mut parts: Vec<&str> = self.path_segments.iter().map(String::as_str).collect();
        parts.push(&self.repository_leaf);
        parts.join("/")
    }
}

fn looks_like_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':')
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref host) = self.registry_host {
            write!(f, "{}/", host)?;
        }
        write!(f, "{}", self.repository_path())?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
