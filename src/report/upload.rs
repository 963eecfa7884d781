//! Best-effort copy of a written report to remote object storage.

use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("could not start {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// `<remote_dir>/<file name>`, without doubled slashes.
pub fn destination(remote_dir: &str, local: &Path) -> String {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}/{}", remote_dir.trim_end_matches('/'), name)
}

/// Run `<command> cp <local> <remote_dir>/<name>`.
pub async fn copy(command: &str, local: &Path, remote_dir: &str) -> Result<String, UploadError> {
    let dest = destination(remote_dir, local);
    let output = tokio::process::Command::new(command)
        .arg("cp")
        .arg(local)
        .arg(&dest)
        .output()
        .await
        .map_err(|source| UploadError::Spawn {
            command: command.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(UploadError::Failed {
            command: command.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(dest)
}

/// Upload if a destination is configured. Failures are logged and dropped;
/// the local report already exists.
pub async fn upload_best_effort(command: &str, local: &Path, remote_dir: Option<&str>) -> Option<String> {
    let Some(remote_dir) = remote_dir.filter(|d| !d.trim().is_empty()) else {
        info!("No remote artifact directory configured, skipping upload");
        return None;
    };
    match copy(command, local, remote_dir).await {
        Ok(dest) => {
            info!(%dest, "Report uploaded");
            Some(dest)
        }
        Err(e) => {
            warn!(error = %e, local = %local.display(), "Report upload failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_joins_cleanly() {
        let local = Path::new("rca_reports/incident_ab12cd34.md");
        assert_eq!(
            destination("gs://bucket/rca/", local),
            "gs://bucket/rca/incident_ab12cd34.md"
        );
        assert_eq!(
            destination("gs://bucket/rca", local),
            "gs://bucket/rca/incident_ab12cd34.md"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("incident_x.md");
        std::fs::write(&local, "x").unwrap();
        let out = upload_best_effort("definitely-not-a-real-uploader", &local, Some("gs://b/rca")).await;
        assert!(out.is_none());

        let err = copy("definitely-not-a-real-uploader", &local, "gs://b/rca")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_no_destination_skips() {
        assert!(upload_best_effort("gsutil", Path::new("x.md"), None).await.is_none());
        assert!(upload_best_effort("gsutil", Path::new("x.md"), Some("  ")).await.is_none());
    }
}
