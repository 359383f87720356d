//! Metric registry that owns every metric family and its labelled series.
//!
//! Families are declared once at startup through [`Registry::register_gauge`] or
//! [`Registry::register_histogram`], which hand back cheap, cloneable handles.
//! Series are created lazily the first time a label combination is updated and
//! live for the lifetime of the registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::naming::{is_valid_label_name, is_valid_metric_name};

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("Metric already registered: {0}")]
    DuplicateMetric(String),
    #[error("Invalid metric name: {0}")]
    InvalidMetricName(String),
    #[error("Invalid label name '{label}' for metric {metric}")]
    InvalidLabelName { metric: String, label: String },
    #[error("Invalid buckets for metric {metric}: {reason}")]
    InvalidBuckets { metric: String, reason: String },
}

/// Kind of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
    Histogram,
}

impl MetricType {
    /// Get the TYPE comment string for the exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
        }
    }
}

/// Mutable state of one histogram series.
///
/// `bucket_counts[i]` is cumulative: it counts every observation `<= bounds[i]`.
#[derive(Debug, Clone)]
struct HistogramState {
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl HistogramState {
    fn new(buckets: usize) -> Self {
        Self {
            bucket_counts: vec![0; buckets],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, bounds: &[f64], value: f64) {
        for (bound, count) in bounds.iter().zip(self.bucket_counts.iter_mut()) {
            if value <= *bound {
                *count += 1;
            }
        }
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Debug, Clone)]
enum SeriesState {
    Gauge(f64),
    Histogram(HistogramState),
}

/// A registered metric family and all of its series.
#[derive(Debug)]
struct Family {
    name: String,
    help: String,
    metric_type: MetricType,
    label_names: Vec<String>,
    /// Upper bounds for histogram families, empty for gauges.
    buckets: Vec<f64>,
    series: RwLock<BTreeMap<Vec<String>, SeriesState>>,
}

impl Family {
    fn new_series(&self) -> SeriesState {
        match self.metric_type {
            MetricType::Gauge => SeriesState::Gauge(0.0),
            MetricType::Histogram => SeriesState::Histogram(HistogramState::new(self.buckets.len())),
        }
    }

    /// Apply `update` to the series for `label_values` under the family write lock.
    fn update(&self, label_values: &[&str], update: impl FnOnce(&mut SeriesState, &[f64])) {
        if label_values.len() != self.label_names.len() {
            warn!(
                metric = %self.name,
                expected = self.label_names.len(),
                got = label_values.len(),
                "Label arity mismatch, dropping update"
            );
            return;
        }

        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        let mut series = self.series.write();
        let state = series.entry(key).or_insert_with(|| self.new_series());
        update(state, &self.buckets);
    }

    fn snapshot(&self) -> FamilySnapshot {
        let series = self.series.read();
        let series = series
            .iter()
            .map(|(labels, state)| SeriesSnapshot {
                label_values: labels.clone(),
                value: match state {
                    SeriesState::Gauge(v) => SeriesValue::Gauge(*v),
                    SeriesState::Histogram(h) => SeriesValue::Histogram(HistogramSnapshot {
                        buckets: self
                            .buckets
                            .iter()
                            .copied()
                            .zip(h.bucket_counts.iter().copied())
                            .collect(),
                        sum: h.sum,
                        count: h.count,
                    }),
                },
            })
            .collect();

        FamilySnapshot {
            name: self.name.clone(),
            help: self.help.clone(),
            metric_type: self.metric_type,
            label_names: self.label_names.clone(),
            series,
        }
    }
}

/// Handle to a registered gauge family.
#[derive(Debug, Clone)]
pub struct GaugeVec {
    family: Arc<Family>,
}

impl GaugeVec {
    /// Set the gauge for `label_values`, overwriting the previous value.
    pub fn set(&self, label_values: &[&str], value: f64) {
        self.family.update(label_values, |state, _| {
            if let SeriesState::Gauge(current) = state {
                *current = value;
            }
        });
    }
}

/// Handle to a registered histogram family.
#[derive(Debug, Clone)]
pub struct HistogramVec {
    family: Arc<Family>,
}

impl HistogramVec {
    /// Record one observation for `label_values`.
    ///
    /// Bucket counts, sum and count move together under a single lock, so a
    /// concurrent snapshot sees either all of them or none.
    pub fn observe(&self, label_values: &[&str], value: f64) {
        self.family.update(label_values, |state, bounds| {
            if let SeriesState::Histogram(histogram) = state {
                histogram.observe(bounds, value);
            }
        });
    }
}

/// Thread-safe metric registry.
#[derive(Debug, Default)]
pub struct Registry {
    /// Families in registration order.
    families: RwLock<Vec<Arc<Family>>>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<Registry>;

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a gauge family.
    pub fn register_gauge(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<GaugeVec, RegistryError> {
        let family = self.register(name, help, label_names, MetricType::Gauge, Vec::new())?;
        Ok(GaugeVec { family })
    }

    /// Declare a histogram family with fixed upper bounds.
    ///
    /// The `+Inf` bucket is implicit and must not be part of `buckets`.
    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        buckets: &[f64],
    ) -> Result<HistogramVec, RegistryError> {
        validate_buckets(name, buckets)?;
        let family = self.register(
            name,
            help,
            label_names,
            MetricType::Histogram,
            buckets.to_vec(),
        )?;
        Ok(HistogramVec { family })
    }

    fn register(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        metric_type: MetricType,
        buckets: Vec<f64>,
    ) -> Result<Arc<Family>, RegistryError> {
        if !is_valid_metric_name(name) {
            return Err(RegistryError::InvalidMetricName(name.to_string()));
        }

        for label in label_names {
            let reserved = metric_type == MetricType::Histogram && *label == "le";
            if !is_valid_label_name(label) || reserved {
                return Err(RegistryError::InvalidLabelName {
                    metric: name.to_string(),
                    label: label.to_string(),
                });
            }
        }

        let mut families = self.families.write();
        if families.iter().any(|f| f.name == name) {
            return Err(RegistryError::DuplicateMetric(name.to_string()));
        }

        let family = Arc::new(Family {
            name: name.to_string(),
            help: help.to_string(),
            metric_type,
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
            buckets,
            series: RwLock::new(BTreeMap::new()),
        });
        families.push(family.clone());

        debug!(metric = %name, kind = metric_type.as_str(), "Registered metric family");
        Ok(family)
    }

    /// Take a point-in-time copy of every family.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let families = self.families.read();
        RegistrySnapshot {
            families: families.iter().map(|f| f.snapshot()).collect(),
        }
    }

    /// Number of registered families.
    pub fn family_count(&self) -> usize {
        self.families.read().len()
    }

    /// Total number of series across all families.
    pub fn series_count(&self) -> usize {
        self.families
            .read()
            .iter()
            .map(|f| f.series.read().len())
            .sum()
    }
}

fn validate_buckets(metric: &str, buckets: &[f64]) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidBuckets {
        metric: metric.to_string(),
        reason: reason.to_string(),
    };

    if buckets.is_empty() {
        return Err(invalid("at least one bucket is required"));
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(invalid("bucket bounds must be finite"));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(invalid("bucket bounds must be strictly increasing"));
    }

    Ok(())
}

/// Immutable copy of the registry contents.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySnapshot {
    pub families: Vec<FamilySnapshot>,
}

impl RegistrySnapshot {
    /// Look up a family by name.
    pub fn family(&self, name: &str) -> Option<&FamilySnapshot> {
        self.families.iter().find(|f| f.name == name)
    }
}

/// Snapshot of one metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilySnapshot {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    pub label_names: Vec<String>,
    /// Series sorted by label values.
    pub series: Vec<SeriesSnapshot>,
}

impl FamilySnapshot {
    /// Look up the series for an exact label combination.
    pub fn series(&self, label_values: &[&str]) -> Option<&SeriesSnapshot> {
        self.series.iter().find(|s| {
            s.label_values.len() == label_values.len()
                && s.label_values.iter().zip(label_values).all(|(a, b)| a == b)
        })
    }
}

/// Snapshot of one labelled series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub label_values: Vec<String>,
    pub value: SeriesValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Gauge(f64),
    Histogram(HistogramSnapshot),
}

impl SeriesValue {
    pub fn as_gauge(&self) -> Option<f64> {
        match self {
            SeriesValue::Gauge(v) => Some(*v),
            SeriesValue::Histogram(_) => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&HistogramSnapshot> {
        match self {
            SeriesValue::Histogram(h) => Some(h),
            SeriesValue::Gauge(_) => None,
        }
    }
}

/// Cumulative histogram counts at snapshot time.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// `(upper_bound, cumulative_count)` pairs, excluding `+Inf`.
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramSnapshot {
    /// Cumulative count for the bucket with the given upper bound.
    ///
    /// `f64::INFINITY` yields the total count.
    pub fn bucket(&self, upper_bound: f64) -> Option<u64> {
        if upper_bound == f64::INFINITY {
            return Some(self.count);
        }
        self.buckets
            .iter()
            .find(|(bound, _)| *bound == upper_bound)
            .map(|(_, count)| *count)
    }
}
