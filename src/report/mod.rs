//! The RCA report: schema, rendering, storage and upload.

pub mod store;
pub mod upload;

pub use store::RcaStore;

use askama::Template;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use validator::{Validate, ValidationError};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report does not match the schema: {0}")]
    Invalid(String),

    #[error("failed to render report")]
    Render(#[from] askama::Error),

    #[error("failed to write {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message("must not be blank".into()));
    }
    Ok(())
}

fn no_blank_entries(values: &[String]) -> Result<(), ValidationError> {
    if values.iter().any(|v| v.trim().is_empty()) {
        return Err(ValidationError::new("blank_entry").with_message("entries must not be blank".into()));
    }
    Ok(())
}

/// Timeline entries arrive either as a list or as one newline-separated block.
fn timeline_entries<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Text(String),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::List(items) => items,
        Raw::Text(text) => text
            .lines()
            .map(|l| l.trim().trim_start_matches("- ").to_string())
            .filter(|l| !l.is_empty())
            .collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RcaReport {
    /// Assigned by the run, whatever the engine supplies.
    #[serde(default)]
    pub incident_id: String,

    #[validate(custom(function = "not_blank"))]
    pub root_cause: String,

    #[serde(default, deserialize_with = "timeline_entries")]
    pub timeline: Vec<String>,

    #[validate(length(min = 1, message = "at least one affected service is required"))]
    #[validate(custom(function = "no_blank_entries"))]
    pub affected_services: Vec<String>,

    #[validate(length(min = 1, message = "at least one remediation step is required"))]
    #[validate(custom(function = "no_blank_entries"))]
    pub remediation_steps: Vec<String>,

    #[validate(range(min = 0.0, max = 1.0, message = "confidence must be within [0, 1]"))]
    pub confidence: f64,
}

impl RcaReport {
    /// Parse and validate an engine-supplied payload.
    pub fn from_value(value: &Value) -> Result<Self, ReportError> {
        let report: Self =
            serde_json::from_value(value.clone()).map_err(|e| ReportError::Invalid(e.to_string()))?;
        report.check()?;
        Ok(report)
    }

    pub fn check(&self) -> Result<(), ReportError> {
        if !self.confidence.is_finite() {
            return Err(ReportError::Invalid("confidence must be a finite number".to_string()));
        }
        self.validate()
            .map_err(|e| ReportError::Invalid(e.to_string()))
    }

    pub fn with_incident_id(mut self, id: &str) -> Self {
        self.incident_id = id.to_string();
        self
    }

    /// Render the markdown document stored on disk.
    pub fn render(&self, generated_at: DateTime<Utc>) -> Result<String, ReportError> {
        let page = RcaPage {
            incident_id: &self.incident_id,
            generated_at: generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            confidence_pct: format!("{:.0}", self.confidence * 100.0),
            root_cause: &self.root_cause,
            timeline: &self.timeline,
            affected_services: &self.affected_services,
            remediation_steps: &self.remediation_steps,
        };
        Ok(page.render()?)
    }

    /// JSON schema advertised to reasoning engines.
    pub fn json_schema() -> Value {
        let string_list = json!({ "type": "array", "items": { "type": "string", "minLength": 1 } });
        json!({
            "type": "object",
            "properties": {
                "root_cause": { "type": "string", "minLength": 1 },
                "timeline": string_list,
                "affected_services": { "type": "array", "items": { "type": "string", "minLength": 1 }, "minItems": 1 },
                "remediation_steps": { "type": "array", "items": { "type": "string", "minLength": 1 }, "minItems": 1 },
                "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
            },
            "required": ["root_cause", "timeline", "affected_services", "remediation_steps", "confidence"]
        })
    }
}

#[derive(Template)]
#[template(path = "rca.md", escape = "none")]
struct RcaPage<'a> {
    incident_id: &'a str,
    generated_at: String,
    confidence_pct: String,
    root_cause: &'a str,
    timeline: &'a [String],
    affected_services: &'a [String],
    remediation_steps: &'a [String],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "root_cause": "Pool shrunk to 2 connections",
            "timeline": ["12:00 deploy", "12:10 latency spike"],
            "affected_services": ["checkout-service"],
            "remediation_steps": ["Roll back checkout-service-config to v2.4.0"],
            "confidence": 0.9
        })
    }

    #[test]
    fn test_valid_payload_parses() {
        let report = RcaReport::from_value(&sample()).unwrap();
        assert_eq!(report.incident_id, "");
        assert_eq!(report.timeline.len(), 2);
    }

    #[test]
    fn test_timeline_accepts_text_block() {
        let mut v = sample();
        v["timeline"] = json!("- 12:00 deploy\n\n- 12:10 spike\n");
        let report = RcaReport::from_value(&v).unwrap();
        assert_eq!(report.timeline, vec!["12:00 deploy", "12:10 spike"]);
    }

    #[test]
    fn test_schema_violations_are_rejected() {
        let cases = [
            ("root_cause", json!("   ")),
            ("affected_services", json!([])),
            ("remediation_steps", json!([])),
            ("remediation_steps", json!([""])),
            ("confidence", json!(1.5)),
            ("confidence", json!(-0.1)),
            ("confidence", json!("high")),
        ];
        for (field, bad) in cases {
            let mut v = sample();
            v[field] = bad.clone();
            assert!(
                matches!(RcaReport::from_value(&v), Err(ReportError::Invalid(_))),
                "{field} = {bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_render_has_every_section() {
        let report = RcaReport::from_value(&sample()).unwrap().with_incident_id("ab12cd34");
        let md = report.render(Utc::now()).unwrap();
        for heading in [
            "# Incident RCA: ab12cd34",
            "## Root Cause",
            "## Timeline",
            "## Affected Services",
            "## Remediation Steps",
            "**Confidence:** 90%",
            "- checkout-service",
            "1. Roll back checkout-service-config to v2.4.0",
        ] {
            assert!(md.contains(heading), "missing {heading:?} in\n{md}");
        }
    }
}
