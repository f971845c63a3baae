//! Markdown rendering of the final usage report.

use std::fmt::Write as _;

use monitor_core::model::ReducerState;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Failure share (in percent) above which the report carries a warning.
const FAILURE_WARNING_PERCENT: u64 = 10;

/// Renders the per-bucket usage summary as GitHub-flavoured markdown.
#[must_use]
pub fn render_markdown(state: &ReducerState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## API rate-limit usage");
    let _ = writeln!(out);

    if state.buckets.is_empty() {
        let _ = writeln!(out, "No rate-limit snapshots were captured.");
    } else {
        let _ = writeln!(
            out,
            "| Bucket | Limit | Calls this job | Windows crossed | Anomalies |"
        );
        let _ = writeln!(out, "|---|---:|---:|---:|---:|");
        for (name, bucket) in &state.buckets {
            let _ = writeln!(
                out,
                "| {name} | {} | {} | {} | {} |",
                bucket.limit, bucket.total_used, bucket.windows_crossed, bucket.anomalies
            );
        }
    }

    let attempts = state.poll_count.saturating_add(state.failure_count);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Polls: {attempts} ({} failed)",
        state.failure_count
    );
    if let Some(started) = state.started_at_ts {
        let _ = writeln!(out, "Monitoring began: {}", fmt_ts(started));
    }
    if let Some(stopped) = state.stopped_at_ts {
        let _ = writeln!(out, "Monitoring ended: {}", fmt_ts(stopped));
    }

    let warnings = collect_warnings(state, attempts);
    if !warnings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "### Warnings");
        let _ = writeln!(out);
        for warning in warnings {
            let _ = writeln!(out, "- {warning}");
        }
    }
    out
}

fn collect_warnings(state: &ReducerState, attempts: u64) -> Vec<String> {
    let mut warnings = Vec::new();
    for (name, bucket) in &state.buckets {
        if bucket.anomalies > 0 {
            warnings.push(format!(
                "bucket `{name}` recorded {} unreconcilable sample transitions; its total may under-count",
                bucket.anomalies
            ));
        }
    }
    if attempts > 0 && state.failure_count * 100 > attempts * FAILURE_WARNING_PERCENT {
        let mut warning = format!(
            "{} of {attempts} polls failed",
            state.failure_count
        );
        if let Some(last_error) = &state.last_error {
            let _ = write!(warning, " (last: {last_error})");
        }
        warnings.push(warning);
    }
    warnings
}

fn fmt_ts(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| "-".to_owned())
}
