//! Metric collection, threshold evaluation and reporting.

pub mod csv;
pub mod db;
pub mod report;
pub mod sink;
pub mod threshold;

pub use report::{InventoryDiff, Report, RunInfo};
pub use sink::{
    Counter, MetricKind, MetricSink, MetricSinkBuilder, MetricsSnapshot, Rate, RateSnapshot,
    Trend, TrendSnapshot,
};
pub use threshold::{evaluate, ThresholdResult, ThresholdSpec, Verdict};
