use regex::{Captures, Regex};
use std::collections::HashMap;

const MAX_EXPANSION_ROUNDS: usize = 5;

lazy_static::lazy_static! {
    static ref VARIABLE_RE: Regex = Regex::new(r"\$\{([^}]+)\}").unwrap();
}

/// Result of expanding one raw list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    /// Plain reference, no template syntax.
    Literal(String),
    /// `${IDENT:-literal}` replaced by its default.
    Expanded { template: String, value: String },
    /// Cannot be turned into a usable reference.
    Unresolved { raw: String, reason: &'static str },
}

/// Expand a list entry.
///
/// Only an entry that is exactly `${IDENT:-literal}` is rewritten. Any other
/// `${` left in the string, or an empty result, makes the entry unresolved.
pub fn expand_item(raw: &str) -> Expansion {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return unresolved(raw, "empty reference");
    }

    if !trimmed.contains("${") {
        return Expansion::Literal(trimmed.to_string());
    }

    let Some((ident, default)) = parse_default_template(trimmed) else {
        return unresolved(raw, "unexpanded template");
    };

    let value = default.trim();
    if value.is_empty() {
        return unresolved(raw, "template has no default value");
    }
    if value.contains("${") {
        return unresolved(raw, "unexpanded template");
    }

    tracing::debug!(variable = ident, "using template default");
    Expansion::Expanded {
        template: trimmed.to_string(),
        value: value.to_string(),
    }
}

fn unresolved(raw: &str, reason: &'static str) -> Expansion {
    Expansion::Unresolved {
        raw: raw.to_string(),
        reason,
    }
}

/// Split `${IDENT:-literal}` into `(IDENT, literal)`.
fn parse_default_template(s: &str) -> Option<(&str, &str)> {
    let body = s.strip_prefix("${")?.strip_suffix('}')?;
    let (ident, default) = body.split_once(":-")?;
    if !is_identifier(ident) || default.contains('}') {
        return None;
    }
    Some((ident, default))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Expand docker-compose style variables against `env`.
///
/// * `${VAR}` is replaced when `VAR` is set, otherwise left untouched.
/// * `${VAR:-default}` uses `default` when `VAR` is unset or empty.
/// * `${VAR-default}` uses `default` only when `VAR` is unset.
///
/// Substitution repeats a few rounds so values referring to other variables
/// resolve too.
pub fn expand_vars(s: &str, env: &HashMap<String, String>) -> String {
    let mut current = s.to_string();
    for _ in 0..MAX_EXPANSION_ROUNDS {
        let next = expand_once(&current, env);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn expand_once(s: &str, env: &HashMap<String, String>) -> String {
    VARIABLE_RE
        .replace_all(s, |caps: &Captures| {
            substitute(&caps[1], env).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn substitute(body: &str, env: &HashMap<String, String>) -> Option<String> {
    if let Some((var, default)) = body.split_once(":-") {
        let value = env.get(var).map(String::as_str).unwrap_or("");
        return Some(if value.is_empty() { default } else { value }.to_string());
    }

    if let Some((var, default)) = body.split_once('-') {
        return Some(env.get(var).cloned().unwrap_or_else(|| default.to_string()));
    }

    env.get(body).cloned()
}
