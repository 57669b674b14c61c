//! Prometheus text exposition format.
//!
//! Renders scaler statuses for scraping by a Prometheus server or
//! compatible agent. Decision gauges are only emitted for scalers that have
//! produced at least one decision.

use std::fmt::Write;

use crate::registry::ScalerStatus;

/// Render scaler statuses into Prometheus text format.
///
/// Produces GAUGE and COUNTER metrics with `scaler` and `metric` labels.
pub fn render_prometheus(statuses: &[ScalerStatus]) -> String {
    let mut out = String::new();

    gauge(
        &mut out,
        "lagscale_total_lag",
        "Consumer-group lag summed over evaluated partitions.",
        statuses,
        |s| s.last_decision.map(|d| d.total_lag.to_string()),
    );
    gauge(
        &mut out,
        "lagscale_desired_replicas",
        "Replica count of the last successful decision.",
        statuses,
        |s| s.last_decision.map(|d| d.desired_replicas.to_string()),
    );
    gauge(
        &mut out,
        "lagscale_active",
        "1 if the last successful decision activated the workload.",
        statuses,
        |s| s.last_decision.map(|d| u8::from(d.active).to_string()),
    );
    gauge(
        &mut out,
        "lagscale_excluded_partitions",
        "Partitions excluded as persistently lagging.",
        statuses,
        |s| s.last_decision.map(|d| d.excluded_partitions.to_string()),
    );

    out.push_str("# HELP lagscale_evaluation_failures_total Evaluation passes that returned an error.\n");
    out.push_str("# TYPE lagscale_evaluation_failures_total counter\n");
    for s in statuses {
        let _ = writeln!(
            out,
            "lagscale_evaluation_failures_total{} {}",
            labels(s),
            s.total_failures
        );
    }

    gauge(
        &mut out,
        "lagscale_consecutive_failures",
        "Failed passes since the last successful one.",
        statuses,
        |s| Some(s.consecutive_failures.to_string()),
    );

    out
}

fn gauge(
    out: &mut String,
    name: &str,
    help: &str,
    statuses: &[ScalerStatus],
    value: impl Fn(&ScalerStatus) -> Option<String>,
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    for s in statuses {
        if let Some(v) = value(s) {
            let _ = writeln!(out, "{name}{} {v}", labels(s));
        }
    }
}

fn labels(s: &ScalerStatus) -> String {
    format!(
        "{{scaler=\"{}\",metric=\"{}\"}}",
        escape(&s.name),
        escape(&s.metric_name)
    )
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
