//! Remote mirror of per-asset artifacts
//!
//! After an asset log is rewritten, a copy is pushed to remote storage by
//! shelling out to the storage CLI. Uploads run detached from the cycle and
//! their outcome is only logged.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::types::AssetId;

#[derive(Debug, Clone)]
pub struct Mirror {
    program: String,
    rpc_url: String,
    keypair_path: PathBuf,
    base_url: String,
}

impl Mirror {
    pub fn new(
        program: impl Into<String>,
        rpc_url: impl Into<String>,
        keypair_path: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            rpc_url: rpc_url.into(),
            keypair_path: keypair_path.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn remote_url(&self, asset: &AssetId) -> String {
        format!("{}/{}_prices.json", self.base_url, asset)
    }

    /// `edit-file -r <rpc> -kp <keypair> -f <local> -u <remote>`
    pub fn command_args(&self, asset: &AssetId, local_path: &Path) -> Vec<String> {
        vec![
            "edit-file".to_string(),
            "-r".to_string(),
            self.rpc_url.clone(),
            "-kp".to_string(),
            self.keypair_path.display().to_string(),
            "-f".to_string(),
            local_path.display().to_string(),
            "-u".to_string(),
            self.remote_url(asset),
        ]
    }

    /// Fire-and-forget upload of one asset log
    pub fn spawn_upload(&self, asset: AssetId, local_path: PathBuf) -> tokio::task::JoinHandle<()> {
        let program = self.program.clone();
        let args = self.command_args(&asset, &local_path);

        tokio::spawn(async move {
            match Command::new(&program).args(&args).output().await {
                Ok(output) if output.status.success() => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    if stderr.trim().is_empty() {
                        debug!(asset = %asset, "☁️ Mirrored asset log");
                    } else {
                        warn!(asset = %asset, stderr = %stderr.trim(), "Mirror upload reported errors");
                    }
                }
                Ok(output) => {
                    warn!(
                        asset = %asset,
                        status = %output.status,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "Mirror upload failed"
                    );
                }
                Err(e) => warn!(asset = %asset, program = %program, error = %e, "Failed to run mirror upload"),
            }
        })
    }
}
