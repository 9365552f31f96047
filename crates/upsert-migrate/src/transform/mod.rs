//! Column transform pipeline.
//!
//! Rules are declared per table in the config and compiled once per run
//! into a [`TransformSet`]. Each row read from the source passes through
//! its table's [`TransformPipeline`] before it is compared against or
//! written to the target.

mod cast;
mod pipeline;
mod rules;

pub use cast::{cast_value, CastOutcome};
pub use pipeline::{TransformOutcome, TransformPipeline, TransformSet};
pub use rules::{RuleKind, TransformRule, UnmappedPolicy};
