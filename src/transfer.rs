use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::CopyOptions;
use crate::error::ProcessError;
use crate::models::{Failure, Outcome};
use crate::process::ProcessOutput;

const STDERR_TAIL_LINES: usize = 20;

/// Read-only registry query: manifest digest of a reference, if it exists.
#[async_trait]
pub trait DigestInspector: Send + Sync {
    async fn inspect_digest(&self, reference: &str) -> Option<String>;
}

/// Copies one image between registries. Retries happen inside the tool.
#[async_trait]
pub trait ImageCopier: Send + Sync {
    async fn copy(
        &self,
        source: &str,
        destination: &str,
        options: &CopyOptions,
    ) -> Result<ProcessOutput, ProcessError>;
}

pub struct TransferExecutor {
    copier: Box<dyn ImageCopier>,
    inspector: Option<Box<dyn DigestInspector>>,
    options: CopyOptions,
}

impl TransferExecutor {
    pub fn new(copier: Box<dyn ImageCopier>, options: CopyOptions) -> Self {
        Self {
            copier,
            inspector: None,
            options,
        }
    }

    pub fn with_digest_check(mut self, inspector: Box<dyn DigestInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Mirror `source` to `destination`. Every failure comes back as an
    /// [`Outcome::Failed`] so the caller can move on to the next image.
    pub async fn execute(&self, source: &str, destination: &str) -> Outcome {
        if self.is_up_to_date(source, destination).await {
            info!(source, destination, reason = "digest identical", "skipping image");
            return Outcome::SkippedUpToDate;
        }

        info!(source, destination, "copying image");
        match self.copier.copy(source, destination, &self.options).await {
            Ok(output) if output.success() => {
                debug!(source, stdout = %output.stdout.trim_end(), "copy finished");
                info!(source, destination, "copied image");
                Outcome::Copied
            }
            Ok(output) => {
                let failure = match output.code {
                    Some(code) => Failure::Exit { code },
                    None => Failure::Signal,
                };
                warn!(
                    source,
                    destination,
                    error = %failure,
                    stderr = %output.stderr_tail(STDERR_TAIL_LINES),
                    "copy failed"
                );
                Outcome::Failed(failure)
            }
            Err(err) => {
                let failure = match err {
                    ProcessError::TimedOut { after, .. } => Failure::Timeout { after },
                    ProcessError::Spawn { source: cause, .. } => Failure::Spawn {
                        message: cause.to_string(),
                    },
                };
                warn!(source, destination, error = %failure, "copy failed");
                Outcome::Failed(failure)
            }
        }
    }

    async fn is_up_to_date(&self, source: &str, destination: &str) -> bool {
        let Some(ref inspector) = self.inspector else {
            return false;
        };

        let Some(destination_digest) = inspector.inspect_digest(destination).await else {
            debug!(destination, "destination not present");
            return false;
        };
        let Some(source_digest) = inspector.inspect_digest(source).await else {
            debug!(source, "source digest unavailable");
            return false;
        };

        debug!(source = %source_digest, destination = %destination_digest, "compared digests");
        source_digest == destination_digest
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{FakeCopier, FakeInspector, Scripted};
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn successful_copy() {
        let copier = FakeCopier::new(&[]);
        let executor = TransferExecutor::new(Box::new(copier.clone()), CopyOptions::default());

        assert_eq!(executor.execute("a/x:1", "R/N/x:1").await, Outcome::Copied);
        assert_eq!(
            *copier.calls.lock().unwrap(),
            vec![("a/x:1".to_string(), "R/N/x:1".to_string())]
        );
    }

    #[tokio::test]
    async fn every_failure_kind_becomes_an_outcome() {
        let copier = FakeCopier::new(&[
            ("bad:1", Scripted::Exit(2)),
            ("slow:1", Scripted::Timeout(Duration::from_secs(5))),
            ("killed:1", Scripted::Signal),
            ("missing:1", Scripted::NotInstalled),
        ]);
        let executor = TransferExecutor::new(Box::new(copier), CopyOptions::default());

        assert_eq!(
            executor.execute("bad:1", "R/N/bad:1").await,
            Outcome::Failed(Failure::Exit { code: 2 })
        );
        assert_eq!(
            executor.execute("slow:1", "R/N/slow:1").await,
            Outcome::Failed(Failure::Timeout {
                after: Duration::from_secs(5)
            })
        );
        assert_eq!(
            executor.execute("killed:1", "R/N/killed:1").await,
            Outcome::Failed(Failure::Signal)
        );
        assert_eq!(
            executor.execute("missing:1", "R/N/missing:1").await,
            Outcome::Failed(Failure::Spawn {
                message: "not found".to_string()
            })
        );
    }

    #[tokio::test]
    async fn identical_digests_skip_the_copy() {
        let copier = FakeCopier::new(&[]);
        let inspector = FakeInspector(
            [
                ("a/x:1", "sha256:aaa"),
                ("R/N/x:1", "sha256:aaa"),
                ("a/y:1", "sha256:new"),
                ("R/N/y:1", "sha256:old"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        );
        let executor = TransferExecutor::new(Box::new(copier.clone()), CopyOptions::default())
            .with_digest_check(Box::new(inspector));

        assert_eq!(executor.execute("a/x:1", "R/N/x:1").await, Outcome::SkippedUpToDate);
        assert_eq!(executor.execute("a/y:1", "R/N/y:1").await, Outcome::Copied);
        // destination missing entirely
        assert_eq!(executor.execute("a/z:1", "R/N/z:1").await, Outcome::Copied);
        assert_eq!(copier.copied_sources(), vec!["a/y:1", "a/z:1"]);
    }
}
