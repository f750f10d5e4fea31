use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::{CopyOptions, ProxySettings};
use crate::error::ProcessError;
use crate::process::{run_captured, ProcessOutput};
use crate::transfer::{DigestInspector, ImageCopier};

const TRANSPORT: &str = "docker://";

/// `skopeo` as the registry copy and inspect tool.
#[derive(Debug, Clone)]
pub struct Skopeo {
    binary: PathBuf,
    authfile: Option<PathBuf>,
    proxy: ProxySettings,
    inspect_timeout: Duration,
}

impl Skopeo {
    pub fn new(
        binary: PathBuf,
        authfile: Option<PathBuf>,
        proxy: ProxySettings,
        inspect_timeout: Duration,
    ) -> Self {
        Self {
            binary,
            authfile,
            proxy,
            inspect_timeout,
        }
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(subcommand);
        if let Some(ref authfile) = self.authfile {
            cmd.arg("--authfile").arg(authfile);
        }
        self.proxy.apply(&mut cmd);
        cmd
    }

    fn copy_command(&self, source: &str, destination: &str, options: &CopyOptions) -> Command {
        let mut cmd = self.command("copy");
        cmd.arg("--retry-times")
            .arg(options.retry_times.to_string())
            .arg("--multi-arch")
            .arg(options.multi_arch.as_arg())
            .arg(format!("{TRANSPORT}{source}"))
            .arg(format!("{TRANSPORT}{destination}"));
        cmd
    }

    fn inspect_command(&self, reference: &str) -> Command {
        let mut cmd = self.command("inspect");
        cmd.arg("--raw").arg(format!("{TRANSPORT}{reference}"));
        cmd
    }
}

/// `sha256:<hex>` of a manifest exactly as the registry served it.
pub fn manifest_digest(raw_manifest: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(raw_manifest))
}

#[async_trait]
impl ImageCopier for Skopeo {
    async fn copy(
        &self,
        source: &str,
        destination: &str,
        options: &CopyOptions,
    ) -> Result<ProcessOutput, ProcessError> {
        run_captured(self.copy_command(source, destination, options), options.timeout).await
    }
}

#[async_trait]
impl DigestInspector for Skopeo {
    async fn inspect_digest(&self, reference: &str) -> Option<String> {
        match run_captured(self.inspect_command(reference), self.inspect_timeout).await {
            Ok(output) if output.success() => Some(manifest_digest(output.stdout.as_bytes())),
            Ok(output) => {
                debug!(reference, stderr = %output.stderr_tail(3), "inspect found nothing");
                None
            }
            Err(err) => {
                debug!(reference, error = %err, "inspect failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MultiArchMode;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn skopeo(authfile: Option<&str>) -> Skopeo {
        Skopeo::new(
            PathBuf::from("skopeo"),
            authfile.map(PathBuf::from),
            ProxySettings::default(),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn copy_arguments() {
        let options = CopyOptions {
            retry_times: 5,
            multi_arch: MultiArchMode::IndexOnly,
            timeout: Duration::from_secs(60),
        };
        let cmd =
            skopeo(Some("/run/auth.json")).copy_command("ghcr.io/a/x:1", "R/N/a-x:1", &options);

        assert_eq!(
            args(&cmd),
            vec![
                "copy",
                "--authfile",
                "/run/auth.json",
                "--retry-times",
                "5",
                "--multi-arch",
                "index-only",
                "docker://ghcr.io/a/x:1",
                "docker://R/N/a-x:1",
            ]
        );
    }

    #[test]
    fn inspect_arguments() {
        let cmd = skopeo(None).inspect_command("R/N/x:1");
        assert_eq!(args(&cmd), vec!["inspect", "--raw", "docker://R/N/x:1"]);
    }

    #[test]
    fn proxy_variables_are_explicit() {
        let proxy = ProxySettings::from_lookup(|name| {
            (name == "HTTPS_PROXY").then(|| "http://proxy:3128".to_string())
        });
        let skopeo = Skopeo::new(PathBuf::from("skopeo"), None, proxy, Duration::from_secs(1));
        let cmd = skopeo.inspect_command("x:1");

        let envs: Vec<(String, Option<String>)> = cmd
            .as_std()
            .get_envs()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.map(|v| v.to_string_lossy().into_owned()),
                )
            })
            .collect();
        assert!(envs.contains(&("HTTPS_PROXY".to_string(), Some("http://proxy:3128".to_string()))));
        assert!(envs.contains(&("HTTP_PROXY".to_string(), None)));
    }

    #[test]
    fn digest_of_raw_manifest() {
        assert_eq!(
            manifest_digest(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
