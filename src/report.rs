//! Terminal summary and JSON export of a run.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::runner::{RunReport, error_chain};

/// Fixed-width table of every result, followed by skips and failures.
pub fn summary_table(report: &RunReport) -> String {
    let mut out = String::new();
    let rule = "=".repeat(96);

    let _ = writeln!(out, "\n{}", rule);
    let _ = writeln!(out, "SUMMARY ({}×{})", report.size, report.size);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "\n{:<14} {:<42} {:>12} {:>10} {:>9}",
        "Kernel", "Description", "Time (s)", "Speedup", "Verified"
    );
    let _ = writeln!(out, "{}", "-".repeat(96));

    for result in report.results.iter() {
        let speedup = report
            .speedup(result)
            .map(|s| format!("{:.2}×", s))
            .unwrap_or_else(|| "-".to_string());
        let verified = match report.verified.get(result.name()) {
            Some(true) => "yes",
            Some(false) => "NO",
            None => "-",
        };
        let _ = writeln!(
            out,
            "{:<14} {:<42} {:>12.4} {:>10} {:>9}",
            result.name(),
            truncate(result.description(), 42),
            result.seconds(),
            speedup,
            verified
        );
    }

    let _ = writeln!(out, "{}", rule);
    if let Some(baseline) = &report.baseline {
        let _ = writeln!(out, "Speedup relative to `{}`. Higher is better.", baseline.name);
    }
    for name in &report.skipped {
        let _ = writeln!(out, "skipped: {}", name);
    }
    for failure in &report.failures {
        let _ = writeln!(out, "failed:  {} ({})", failure.name, error_chain(&failure.error));
    }
    out
}

pub fn write_json(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json)?;
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
