use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use crate::naming::{flattened_name, resolution_key, resolved_tag, short_name};
use crate::reference::ImageReference;
use crate::template::{expand_item, Expansion};

/// Registry host and namespace every destination is placed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub registry: String,
    pub namespace: String,
}

impl Target {
    pub fn new(registry: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            registry: registry.into().trim_end_matches('/').to_string(),
            namespace: namespace.into().trim_matches('/').to_string(),
        }
    }

    pub fn reference(&self, repository: &str, tag: &str) -> String {
        if self.namespace.is_empty() {
            format!("{}/{}:{}", self.registry, repository, tag)
        } else {
            format!("{}/{}/{}:{}", self.registry, self.namespace, repository, tag)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionEntry {
    pub first_source: String,
    pub conflicted: bool,
}

/// Resolution key → first source seen, plus whether another source claimed it.
///
/// Only [`resolve`] builds one; afterwards it is read-only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionTable {
    entries: BTreeMap<String, ResolutionEntry>,
}

impl ResolutionTable {
    fn record(&mut self, key: String, source: &str) {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                if entry.first_source != source {
                    entry.conflicted = true;
                }
            }
            None => {
                self.entries.insert(
                    key,
                    ResolutionEntry {
                        first_source: source.to_string(),
                        conflicted: false,
                    },
                );
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&ResolutionEntry> {
        self.entries.get(key)
    }

    pub fn is_conflicted(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| e.conflicted)
    }

    pub fn conflicted_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.conflicted)
            .map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Short,
    Flattened,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedItem {
    pub source: String,
    pub key: String,
    pub strategy: Strategy,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PlanEntry {
    Resolved(ResolvedItem),
    Unresolved { raw: String, reason: String },
}

/// Distinct sources that still share a destination after flattening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResidualCollision {
    pub destination: String,
    pub sources: Vec<String>,
}

/// Outcome of the scan: the frozen table plus one entry per input, in order.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub target: Target,
    pub table: ResolutionTable,
    pub entries: Vec<PlanEntry>,
    pub residual_collisions: Vec<ResidualCollision>,
}

impl Plan {
    pub fn resolved(&self) -> impl Iterator<Item = &ResolvedItem> {
        self.entries.iter().filter_map(|e| match e {
            PlanEntry::Resolved(item) => Some(item),
            PlanEntry::Unresolved { .. } => None,
        })
    }
}

/// Resolve every raw reference to its destination.
///
/// Collisions are a property of the whole batch, so all keys are recorded
/// before any destination is chosen. A key claimed by two textually
/// different sources switches every reference under it to the flattened
/// name; repeating the same source is harmless.
pub fn resolve(raw_items: &[String], target: &Target) -> Plan {
    let mut parsed: Vec<Result<(String, ImageReference), PlanEntry>> =
        Vec::with_capacity(raw_items.len());

    for raw in raw_items {
        let source = match expand_item(raw) {
            Expansion::Literal(source) => source,
            Expansion::Expanded { template, value } => {
                info!(template = %template, value = %value, "expanded template default");
                value
            }
            Expansion::Unresolved { raw, reason } => {
                parsed.push(Err(unresolved(raw, reason)));
                continue;
            }
        };

        let reference = ImageReference::parse(&source);
        if reference.repository_leaf.is_empty() {
            parsed.push(Err(unresolved(raw.clone(), "missing repository name")));
        } else {
            parsed.push(Ok((source, reference)));
        }
    }

    // Pass 1: record every key.
    let mut table = ResolutionTable::default();
    for (source, reference) in parsed.iter().flatten() {
        table.record(resolution_key(reference), source);
    }
    let table = table;

    // Pass 2: choose a name per item.
    let entries: Vec<PlanEntry> = parsed
        .into_iter()
        .map(|item| match item {
            Ok((source, reference)) => {
                PlanEntry::Resolved(place(&table, target, source, &reference))
            }
            Err(unresolved) => unresolved,
        })
        .collect();

    let residual_collisions = find_residual_collisions(&entries);

    Plan {
        target: target.clone(),
        table,
        entries,
        residual_collisions,
    }
}

fn unresolved(raw: String, reason: &str) -> PlanEntry {
    warn!(reference = %raw, reason, "skipping unresolvable reference");
    PlanEntry::Unresolved {
        raw,
        reason: reason.to_string(),
    }
}

fn place(
    table: &ResolutionTable,
    target: &Target,
    source: String,
    reference: &ImageReference,
) -> ResolvedItem {
    let key = resolution_key(reference);
    let (strategy, repository) = if table.is_conflicted(&key) {
        (Strategy::Flattened, flattened_name(reference))
    } else {
        (Strategy::Short, short_name(reference))
    };

    ResolvedItem {
        destination: target.reference(&repository, &resolved_tag(reference)),
        source,
        key,
        strategy,
    }
}

fn find_residual_collisions(entries: &[PlanEntry]) -> Vec<ResidualCollision> {
    let mut by_destination: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for entry in entries {
        let PlanEntry::Resolved(item) = entry else {
            continue;
        };
        let sources = by_destination.entry(&item.destination).or_insert_with(|| {
            order.push(&item.destination);
            Vec::new()
        });
        if !sources.contains(&item.source.as_str()) {
            sources.push(&item.source);
        }
    }

    order
        .into_iter()
        .filter_map(|destination| {
            let sources = &by_destination[destination];
            (sources.len() > 1).then(|| ResidualCollision {
                destination: destination.to_string(),
                sources: sources.iter().map(|s| s.to_string()).collect(),
            })
        })
        .collect()
}
