//! Prometheus text exposition format.
//!
//! Renders a registry [`Snapshot`] into the text exposition format
//! (version 0.0.4) for scraping by a Prometheus server or compatible agent.

use tally_core::Labels;

use crate::registry::{FamilySnapshot, Snapshot};
use crate::series::{HistogramState, SeriesValue, SummaryState};

/// Render a snapshot into Prometheus text format.
///
/// Families appear in creation order, separated by a blank line. Output is
/// a pure function of the snapshot, so equal snapshots give equal bytes.
pub fn render_prometheus(snapshot: &Snapshot) -> String {
    let mut out = String::new();

    for (i, family) in snapshot.families.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let name = format!("{}{}", snapshot.prefix, family.name);
        write_family(&mut out, &name, family, &snapshot.quantiles);
    }

    out
}

fn write_family(out: &mut String, name: &str, family: &FamilySnapshot, quantiles: &[f64]) {
    // Help + type declarations.
    if family.help.is_empty() {
        out.push_str(&format!("# HELP {name}\n"));
    } else {
        out.push_str(&format!("# HELP {name} {}\n", escape_help(&family.help)));
    }
    out.push_str(&format!("# TYPE {name} {}\n", family.kind.as_str()));

    for (labels, value) in &family.series {
        match value {
            SeriesValue::Counter(v) | SeriesValue::Gauge(v) => {
                write_sample(out, name, labels, None, *v);
            }
            SeriesValue::Histogram(h) => write_histogram(out, name, labels, h),
            SeriesValue::Summary(s) => write_summary(out, name, labels, s, quantiles),
        }
    }
}

fn write_histogram(out: &mut String, name: &str, labels: &Labels, h: &HistogramState) {
    let bucket = format!("{name}_bucket");
    for (bound, count) in h.bounds.iter().zip(&h.cumulative) {
        let le = format_value(*bound);
        write_sample(out, &bucket, labels, Some(("le", &le)), *count as f64);
    }
    write_sample(out, &bucket, labels, Some(("le", "+Inf")), h.count as f64);
    write_sample(out, &format!("{name}_sum"), labels, None, h.sum);
    write_sample(out, &format!("{name}_count"), labels, None, h.count as f64);
}

fn write_summary(out: &mut String, name: &str, labels: &Labels, s: &SummaryState, quantiles: &[f64]) {
    for (q, v) in quantiles.iter().zip(s.quantiles(quantiles)) {
        let q = format_value(*q);
        write_sample(out, name, labels, Some(("quantile", &q)), v);
    }
    write_sample(out, &format!("{name}_sum"), labels, None, s.sum);
    write_sample(out, &format!("{name}_count"), labels, None, s.count as f64);
}

/// One `name{labels} value` line. `extra` is appended after the series'
/// own labels (`le` for buckets, `quantile` for summaries).
fn write_sample(out: &mut String, name: &str, labels: &Labels, extra: Option<(&str, &str)>, value: f64) {
    out.push_str(name);

    let mut pairs = labels.iter().chain(extra).peekable();
    if pairs.peek().is_some() {
        out.push('{');
        for (i, (k, v)) in pairs.enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&format!("{k}=\"{}\"", escape_label_value(v)));
        }
        out.push('}');
    }

    out.push(' ');
    out.push_str(&format_value(value));
    out.push('\n');
}

/// Canonical, locale-independent number formatting.
///
/// Integral values print without a fractional part (`92`), everything else
/// uses the shortest decimal that round-trips (`200.1`).
pub fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if v.fract() == 0.0 && v.abs() < 1e15 {
        // Also folds -0.0 into "0".
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn escape_help(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tally_core::MetricType;
    use std::sync::Arc;

    fn snapshot(prefix: &str, families: Vec<FamilySnapshot>) -> Snapshot {
        Snapshot {
            prefix: prefix.to_string(),
            quantiles: Arc::from(vec![0.5, 0.9]),
            families,
        }
    }

    fn family(name: &str, kind: MetricType, help: &str, series: Vec<(Labels, SeriesValue)>) -> FamilySnapshot {
        FamilySnapshot {
            name: name.to_string(),
            kind,
            help: help.to_string(),
            series,
        }
    }

    #[test]
    fn render_empty() {
        assert_eq!(render_prometheus(&snapshot("", vec![])), "");
    }

    #[test]
    fn render_prefix_and_separator() {
        let snap = snapshot(
            "app_",
            vec![
                family("up", MetricType::Gauge, "is up", vec![(Labels::new(), SeriesValue::Gauge(1.0))]),
                family(
                    "reqs",
                    MetricType::Counter,
                    "requests",
                    vec![
                        (Labels::new().with("code", "200"), SeriesValue::Counter(10.0)),
                        (Labels::new().with("code", "500").with("a", "b"), SeriesValue::Counter(0.5)),
                    ],
                ),
            ],
        );

        let expected = "\
# HELP app_up is up
# TYPE app_up gauge
app_up 1

# HELP app_reqs requests
# TYPE app_reqs counter
app_reqs{code=\"200\"} 10
app_reqs{a=\"b\",code=\"500\"} 0.5
";
        assert_eq!(render_prometheus(&snap), expected);
    }

    #[test]
    fn render_histogram_lines() {
        let h = HistogramState {
            bounds: Arc::from(vec![0.5, 1.0]),
            cumulative: vec![1, 3],
            sum: 2.25,
            count: 4,
        };
        let snap = snapshot(
            "",
            vec![family(
                "latency",
                MetricType::Histogram,
                "request latency",
                vec![(Labels::new().with("route", "/"), SeriesValue::Histogram(h))],
            )],
        );

        let expected = "\
# HELP latency request latency
# TYPE latency histogram
latency_bucket{route=\"/\",le=\"0.5\"} 1
latency_bucket{route=\"/\",le=\"1\"} 3
latency_bucket{route=\"/\",le=\"+Inf\"} 4
latency_sum{route=\"/\"} 2.25
latency_count{route=\"/\"} 4
";
        assert_eq!(render_prometheus(&snap), expected);
    }

    #[test]
    fn render_summary_lines() {
        let s = SummaryState {
            samples: VecDeque::from(vec![3.0, 1.0, 2.0, 4.0]),
            window: 8,
            sum: 10.0,
            count: 4,
        };
        let snap = snapshot(
            "",
            vec![family("rt", MetricType::Summary, "", vec![(Labels::new(), SeriesValue::Summary(s))])],
        );

        let expected = "\
# HELP rt
# TYPE rt summary
rt{quantile=\"0.5\"} 2
rt{quantile=\"0.9\"} 4
rt_sum 10
rt_count 4
";
        assert_eq!(render_prometheus(&snap), expected);
    }

    #[test]
    fn render_family_without_series_keeps_header() {
        let snap = snapshot("", vec![family("idle", MetricType::Gauge, "nothing yet", vec![])]);
        assert_eq!(
            render_prometheus(&snap),
            "# HELP idle nothing yet\n# TYPE idle gauge\n"
        );
    }

    #[test]
    fn render_escapes_help_and_labels() {
        let snap = snapshot(
            "",
            vec![family(
                "m",
                MetricType::Gauge,
                "line one\nback\\slash",
                vec![(Labels::new().with("path", "C:\\tmp \"x\"\n"), SeriesValue::Gauge(1.0))],
            )],
        );
        let text = render_prometheus(&snap);
        assert!(text.contains("# HELP m line one\\nback\\\\slash\n"));
        assert!(text.contains("m{path=\"C:\\\\tmp \\\"x\\\"\\n\"} 1\n"));
    }

    #[test]
    fn format_value_canonical() {
        assert_eq!(format_value(4.0), "4");
        assert_eq!(format_value(92.0), "92");
        assert_eq!(format_value(-3.0), "-3");
        assert_eq!(format_value(-0.0), "0");
        assert_eq!(format_value(200.1), "200.1");
        assert_eq!(format_value(0.005), "0.005");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
        assert_eq!(format_value(1e15).parse::<f64>().unwrap(), 1e15);
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let snap = snapshot(
            "",
            vec![family(
                "x",
                MetricType::Counter,
                "h",
                vec![(Labels::new().with("a", "1"), SeriesValue::Counter(1.0))],
            )],
        );
        let output = render_prometheus(&snap);

        // Every non-empty, non-comment line should match: metric_name{labels} value
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (series, value) = line.rsplit_once(' ').unwrap();
            assert!(series.contains('{') && series.ends_with('}'), "line: {line}");
            assert!(value.parse::<f64>().is_ok(), "value: {value}");
        }
    }
}
