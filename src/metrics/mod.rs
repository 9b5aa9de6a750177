//! Metric definitions, instrument state and text exposition.
//!
//! The tick loop is the only writer of [`MetricRegistry`]. Everything a
//! reader sees goes through an immutable [`Snapshot`].

pub mod exposition;
pub mod registry;
pub mod snapshot;
pub mod types;

pub use exposition::{parse_exposition, parse_sample_line, render, ParsedExposition, ParsedSample, CONTENT_TYPE};
pub use registry::{InstanceValue, MetricRegistry};
pub use snapshot::{FamilySnapshot, Sample, Snapshot};
pub use types::{Bounds, LabelValues, MetricDefinition, MetricKind, MetricRole, ACTOR_LABELS};
