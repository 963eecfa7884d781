//! Local persistence for RCA reports.

use super::{RcaReport, ReportError};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Writes `incident_<id>.md` files under one directory.
///
/// Writing the same incident twice replaces the file and the in-memory
/// entry, so each incident has at most one stored report.
pub struct RcaStore {
    dir: PathBuf,
    reports: Mutex<HashMap<String, RcaReport>>,
}

impl RcaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            reports: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, incident_id: &str) -> PathBuf {
        self.dir.join(format!("incident_{}.md", incident_id))
    }

    pub fn write(&self, report: &RcaReport) -> Result<PathBuf, ReportError> {
        if report.incident_id.trim().is_empty() {
            return Err(ReportError::Invalid("report has no incident id".to_string()));
        }
        report.check()?;

        let body = report.render(Utc::now())?;
        let path = self.path_for(&report.incident_id);
        std::fs::create_dir_all(&self.dir).map_err(|source| ReportError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;
        std::fs::write(&path, body).map_err(|source| ReportError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let replaced = self
            .reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(report.incident_id.clone(), report.clone())
            .is_some();
        debug!(path = %path.display(), replaced, "Report stored");
        Ok(path)
    }

    pub fn get(&self, incident_id: &str) -> Option<RcaReport> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(incident_id)
            .cloned()
    }

    /// Number of distinct incidents stored.
    pub fn len(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
