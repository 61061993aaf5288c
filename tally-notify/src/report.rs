use std::fmt::Write;

use tally_analytics::{Analysis, EntityDelta};
use tally_types::FetchFailure;

/// Inputs for one rendered run report.
pub struct Report<'a> {
    pub date: &'a str,
    pub analysis: &'a Analysis,
    pub failures: &'a [FetchFailure],
    pub alert_threshold: f64,
    pub top_n: usize,
}

/// Render a report as plain text suitable for a chat webhook.
pub fn render(report: &Report<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Friend count report for {}", report.date);

    let _ = writeln!(out, "\nTop {} by change", report.top_n);
    section(&mut out, &report.analysis.top_delta, |out, i, d| {
        let _ = writeln!(
            out,
            "{:>2}. {} {:+} ({} -> {})",
            i + 1,
            d.entity.name,
            d.delta,
            d.previous,
            d.current
        );
    });

    let _ = writeln!(out, "\nTop {} by rate", report.top_n);
    section(&mut out, &report.analysis.top_rate, |out, i, d| {
        let pct = d.rate.unwrap_or_default() * 100.0;
        let _ = writeln!(out, "{:>2}. {} {:+.2}% ({:+})", i + 1, d.entity.name, pct, d.delta);
    });

    let _ = writeln!(
        out,
        "\nDelta swings of {:.0}% or more",
        report.alert_threshold * 100.0
    );
    if report.analysis.alerts.is_empty() {
        out.push_str("  (none)\n");
    }
    for alert in &report.analysis.alerts {
        let _ = writeln!(
            out,
            "  - {}: {:+} after {:+} (swing {})",
            alert.entity.name, alert.current_delta, alert.previous_delta, alert.ratio
        );
    }

    if !report.failures.is_empty() {
        out.push_str("\nNot collected\n");
        for f in report.failures {
            let _ = writeln!(out, "  - {} ({}): {}", f.name, f.key, f.reason);
        }
    }

    out.trim_end().to_string()
}

fn section<F>(out: &mut String, rows: &[EntityDelta], mut line: F)
where
    F: FnMut(&mut String, usize, &EntityDelta),
{
    if rows.is_empty() {
        out.push_str("  (none)\n");
    }
    for (i, d) in rows.iter().enumerate() {
        line(out, i, d);
    }
}
