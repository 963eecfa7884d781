//! Root-cause reasoning over gathered evidence.

pub mod correlation;

pub use correlation::{CorrelationEngine, Evidence, Finding, RootCause};
