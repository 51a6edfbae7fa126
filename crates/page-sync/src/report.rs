//! Terminal rendering of plans, divergence reports and summaries.

use page_sync_core::hierarchy::flatten;
use page_sync_core::{RenameDetection, SyncPlan, SyncStatus, SyncSummary};
use std::fmt::Write;

fn marker(status: SyncStatus) -> char {
    match status {
        SyncStatus::New => '+',
        SyncStatus::Changed => '~',
        SyncStatus::UpToDate => ' ',
    }
}

/// Preview tree, one line per entry.
pub fn render_plan(plan: &SyncPlan) -> String {
    let mut out = String::new();
    for node in flatten(&plan.tree) {
        let indent = "  ".repeat(node.level);
        let suffix = if node.is_directory { "/" } else { "" };
        let _ = writeln!(
            out,
            "{} {}{} ({}{}) [{}]",
            marker(node.status),
            indent,
            node.title,
            node.path,
            suffix,
            node.status
        );
    }
    let _ = writeln!(
        out,
        "\n{} new, {} changed, {} up to date",
        plan.count(SyncStatus::New),
        plan.count(SyncStatus::Changed),
        plan.count(SyncStatus::UpToDate)
    );
    for failure in &plan.failures {
        let _ = writeln!(out, "! {}: {}", failure.path, failure.message);
    }
    out
}

pub fn render_divergences(detections: &[RenameDetection]) -> String {
    if detections.is_empty() {
        return "No divergence detected\n".to_string();
    }
    let mut out = String::new();
    for d in detections {
        let _ = writeln!(
            out,
            "[{}] {} {} {} (page {})",
            d.severity.label(),
            d.entity.label(),
            d.local_path,
            d.kind.label(),
            d.page_id
        );
        let _ = writeln!(
            out,
            "    local '{}', cached '{}', remote '{}'",
            d.expected_title,
            d.cached_title,
            d.actual_title.as_deref().unwrap_or("-")
        );
        let _ = writeln!(out, "    {}", d.recommendation);
    }
    out
}

pub fn render_summary(summary: &SyncSummary) -> String {
    if summary.dry_run {
        return "Dry run: no changes made\n".to_string();
    }
    if summary.cancelled {
        return "Sync cancelled\n".to_string();
    }
    let mut out = format!(
        "{} created, {} updated, {} recreated, {} unchanged, {} skipped, {} failed\n",
        summary.created,
        summary.updated,
        summary.recreated,
        summary.unchanged,
        summary.skipped,
        summary.errors
    );
    for failure in &summary.failures {
        let _ = writeln!(out, "  {}: {}", failure.path, failure.message);
    }
    out
}

/// `y` or `yes`, case-insensitive.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
