//! Text exposition format (version 0.0.4) rendering.

use std::fmt::Write;

use crate::naming::{escape_help, escape_label_value, format_value};
use crate::registry::{FamilySnapshot, RegistrySnapshot, SeriesValue};

/// Content type served with rendered metrics.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render a registry snapshot.
///
/// Families are written in registration order, series sorted by label values.
/// Families without any series are omitted entirely.
pub fn render(snapshot: &RegistrySnapshot) -> String {
    let mut output = String::with_capacity(snapshot.families.len() * 512);

    for family in snapshot.families.iter().filter(|f| !f.series.is_empty()) {
        render_family(&mut output, family);
    }

    output
}

fn render_family(output: &mut String, family: &FamilySnapshot) {
    let name = &family.name;
    writeln!(output, "# HELP {} {}", name, escape_help(&family.help)).ok();
    writeln!(output, "# TYPE {} {}", name, family.metric_type.as_str()).ok();

    for series in &family.series {
        let labels: Vec<(&str, &str)> = family
            .label_names
            .iter()
            .map(String::as_str)
            .zip(series.label_values.iter().map(String::as_str))
            .collect();

        match &series.value {
            SeriesValue::Gauge(value) => {
                writeln!(
                    output,
                    "{}{} {}",
                    name,
                    format_labels(&labels, None),
                    format_value(*value)
                )
                .ok();
            }
            SeriesValue::Histogram(histogram) => {
                for (bound, count) in &histogram.buckets {
                    let le = format_value(*bound);
                    writeln!(
                        output,
                        "{}_bucket{} {}",
                        name,
                        format_labels(&labels, Some(&le)),
                        count
                    )
                    .ok();
                }
                writeln!(
                    output,
                    "{}_bucket{} {}",
                    name,
                    format_labels(&labels, Some("+Inf")),
                    histogram.count
                )
                .ok();
                writeln!(
                    output,
                    "{}_sum{} {}",
                    name,
                    format_labels(&labels, None),
                    format_value(histogram.sum)
                )
                .ok();
                writeln!(
                    output,
                    "{}_count{} {}",
                    name,
                    format_labels(&labels, None),
                    histogram.count
                )
                .ok();
            }
        }
    }
}

/// Format labels, appending the histogram `le` label last when given.
fn format_labels(labels: &[(&str, &str)], le: Option<&str>) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    if let Some(le) = le {
        parts.push(format!("le=\"{}\"", le));
    }

    if parts.is_empty() {
        return String::new();
    }

    format!("{{{}}}", parts.join(","))
}
