use crate::reference::ImageReference;

const DEFAULT_TAG: &str = "latest";
const DIGEST_LABEL_LEN: usize = 12;

/// Destination repository name using only the final path segment.
pub fn short_name(reference: &ImageReference) -> String {
    reference.repository_leaf.clone()
}

/// Destination repository name joining every non-registry segment with `-`.
pub fn flattened_name(reference: &ImageReference) -> String {
    let mut parts: Vec<&str> = reference
        .path_segments
        .iter()
        .map(String::as_str)
        .collect();
    parts.push(&reference.repository_leaf);
    parts.join("-")
}

/// Tag used at the destination.
///
/// Digest references get a `digest-<algorithm>-<12 hex>` label; a digest
/// always wins over a tag given alongside it, since the digest is what gets
/// copied.
pub fn resolved_tag(reference: &ImageReference) -> String {
    if let Some(ref digest) = reference.digest {
        let prefix: String = digest.encoded.chars().take(DIGEST_LABEL_LEN).collect();
        return if digest.algorithm.is_empty() {
            format!("digest-{}", prefix)
        } else {
            format!("digest-{}-{}", digest.algorithm, prefix)
        };
    }

    match reference.tag.as_deref() {
        Some(tag) if !tag.is_empty() => tag.to_string(),
        _ => DEFAULT_TAG.to_string(),
    }
}

/// Collision detection unit: `<short name>:<resolved tag>`.
pub fn resolution_key(reference: &ImageReference) -> String {
    format!("{}:{}", short_name(reference), resolved_tag(reference))
}
