//! Evaluation entirely in-process over `Vec<Row>` frames, with no SQL and no
//! backend connection: named analytic functions plus a graph walker that
//! mirrors the SQL translator's semantics over in-memory tables.

pub mod analytics;
mod evaluator;

pub use analytics::{AnalyticFn, AnalyticsRegistry};
pub use evaluator::FrameEvaluator;
