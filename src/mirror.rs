use tracing::{error, info, warn};

use crate::models::{MirrorItem, Outcome, RunSummary};
use crate::resolve::{Plan, PlanEntry};
use crate::transfer::TransferExecutor;

/// Drives one batch: every planned image goes through the executor in list order.
pub struct MirrorRun {
    executor: TransferExecutor,
    skip: Vec<String>,
    continue_on_error: bool,
}

impl MirrorRun {
    pub fn new(executor: TransferExecutor) -> Self {
        Self {
            executor,
            skip: Vec::new(),
            continue_on_error: true,
        }
    }

    pub fn skip_matching(mut self, patterns: Vec<String>) -> Self {
        self.skip = patterns;
        self
    }

    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    pub async fn run(&self, plan: &Plan) -> RunSummary {
        log_plan(plan);

        let mut summary = RunSummary::default();
        let total = plan.entries.len();

        for (index, entry) in plan.entries.iter().enumerate() {
            let item = match entry {
                PlanEntry::Unresolved { raw, .. } => MirrorItem {
                    source: raw.clone(),
                    destination: None,
                    outcome: Outcome::SkippedUnexpanded,
                },
                PlanEntry::Resolved(resolved) => {
                    info!(
                        item = index + 1,
                        total,
                        source = %resolved.source,
                        destination = %resolved.destination,
                        "processing image"
                    );
                    let outcome = match self.skip_pattern(&resolved.source) {
                        Some(pattern) => {
                            info!(source = %resolved.source, pattern, "skipping filtered image");
                            Outcome::SkippedFiltered
                        }
                        None => {
                            self.executor
                                .execute(&resolved.source, &resolved.destination)
                                .await
                        }
                    };
                    MirrorItem {
                        source: resolved.source.clone(),
                        destination: Some(resolved.destination.clone()),
                        outcome,
                    }
                }
            };

            let stop = match item.outcome {
                Outcome::Failed(ref failure) if !self.continue_on_error => {
                    Some(failure.exit_code())
                }
                _ => None,
            };
            summary.push(item);

            if let Some(code) = stop {
                error!(
                    remaining = total - index - 1,
                    exit_code = code,
                    "stopping at first failure (continue-on-error disabled)"
                );
                summary.aborted_with = Some(code);
                break;
            }
        }

        info!(
            copied = summary.copied,
            skipped = summary.skipped,
            failed = summary.failed,
            "mirror run finished"
        );
        summary
    }

    fn skip_pattern(&self, source: &str) -> Option<&str> {
        self.skip
            .iter()
            .find(|pattern| source.contains(pattern.as_str()))
            .map(String::as_str)
    }
}

/// Conflict summary logged before the first transfer.
pub fn log_plan(plan: &Plan) {
    let conflicted: Vec<&str> = plan.table.conflicted_keys().collect();
    if conflicted.is_empty() {
        info!(keys = plan.table.len(), "no name conflicts");
    } else {
        warn!(
            count = conflicted.len(),
            keys = %conflicted.join(", "),
            "name conflicts found, using flattened names for them"
        );
        for key in &conflicted {
            if let Some(entry) = plan.table.get(key) {
                info!(key, first_source = %entry.first_source, "conflicted key");
            }
        }
    }

    for collision in &plan.residual_collisions {
        warn!(
            destination = %collision.destination,
            sources = %collision.sources.join(", "),
            "flattened names still collide"
        );
    }
}
