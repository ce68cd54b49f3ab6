//! CLI output formatting

use crate::{
    core::{ExecutionStatus, JobStatus, StepOutcome, StepState},
    execution::{CellReport, ExecutionEvent, RunReport},
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar over matrix cells
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} cells {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Completed { outcome: StepOutcome::Failure, .. } => {
            style("FAILED (continued)").yellow().to_string()
        }
        StepState::Completed { .. } => style("OK").green().to_string(),
        StepState::Failed { .. } => style("FAILED").red().to_string(),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
        ExecutionStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

/// Format a job or cell status for display
pub fn format_job_status(status: JobStatus) -> String {
    let text = status.as_str().to_uppercase();
    match status {
        JobStatus::Success => style(text).green().to_string(),
        JobStatus::Failure => style(text).red().to_string(),
        JobStatus::Cancelled => style(text).yellow().to_string(),
        JobStatus::Skipped => style(text).dim().to_string(),
    }
}

fn status_icon(status: JobStatus) -> Emoji<'static, 'static> {
    match status {
        JobStatus::Success => CHECK,
        JobStatus::Failure => CROSS,
        JobStatus::Cancelled => WARN,
        JobStatus::Skipped => SKIP,
    }
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Skipped => SKIP,
        _ => INFO,
    };

    format!(
        "{} {} - {} - {} on {} - {} ({}/{} cells passed, {} failed)",
        status_icon,
        style(&summary.execution_id.to_string()[..8]).dim(),
        style(&summary.workflow_name).bold(),
        style(&summary.event).cyan(),
        style(&summary.git_ref).dim(),
        format_status(summary.status),
        summary.succeeded_cells,
        summary.total_cells,
        summary.failed_cells,
    )
}

/// Format an execution event for display; `None` for events not worth a line
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_name,
            event,
        } => format!(
            "{} Starting workflow {} on {} {} ({})",
            ROCKET,
            style(workflow_name).bold(),
            style(&event.kind).cyan(),
            style(&event.git_ref).dim(),
            style(&execution_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::WorkflowSkipped { reason, .. } => {
            format!("{} Workflow not triggered: {}", SKIP, style(reason).dim())
        }
        ExecutionEvent::JobStarted { job_id, cells } => format!(
            "{} Job {} ({} {})",
            INFO,
            style(job_id).bold(),
            cells,
            if *cells == 1 { "cell" } else { "cells" }
        ),
        ExecutionEvent::JobSkipped { job_id, reason } => {
            format!("{} Job {} skipped: {}", SKIP, style(job_id).bold(), style(reason).dim())
        }
        ExecutionEvent::CellSkipped { job_id, cell, reason } => format!(
            "{} {} {} skipped: {}",
            SKIP,
            style(job_id).dim(),
            cell,
            style(reason).dim()
        ),
        ExecutionEvent::StepFailed { job_id, cell, step, error } => format!(
            "{} {} {} {}: {}",
            CROSS,
            style(job_id).dim(),
            cell,
            style(step).red(),
            style(error).dim()
        ),
        ExecutionEvent::CellCompleted { job_id, cell, status } => format!(
            "{} {} {} {}",
            status_icon(*status),
            style(job_id).bold(),
            cell,
            format_job_status(*status)
        ),
        ExecutionEvent::JobCompleted { job_id, status } => {
            format!(
                "{} Job {} {}",
                status_icon(*status),
                style(job_id).bold(),
                format_job_status(*status)
            )
        }
        ExecutionEvent::WorkflowCompleted { execution_id, status } => format!(
            "{} Workflow ({}) {}",
            INFO,
            style(&execution_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
        ExecutionEvent::CellStarted { .. }
        | ExecutionEvent::StepStarted { .. }
        | ExecutionEvent::StepCompleted { .. }
        | ExecutionEvent::StepSkipped { .. } => return None,
    };
    Some(line)
}

/// Per-cell lines for the end-of-run summary
pub fn format_cell(cell: &CellReport) -> String {
    let mut out = format!(
        "{} {} {}",
        status_icon(cell.status),
        style(&cell.name).bold(),
        format_job_status(cell.status)
    );
    if let Some(reason) = &cell.reason {
        out.push_str(&format!(" ({})", style(reason).dim()));
    }
    for step in &cell.steps {
        out.push_str(&format!("\n    {} {}", format_step_state(&step.state), step.name));
        if let StepState::Failed { error, .. } = &step.state {
            out.push_str(&format!(": {}", style(error).dim()));
        }
    }
    out
}

/// Failed step logs, last lines only
pub fn format_failure_logs(report: &RunReport, max_lines: usize) -> Vec<String> {
    report
        .cells
        .iter()
        .filter_map(|cell| {
            let step = cell.failed_step()?;
            if step.logs.trim().is_empty() {
                return None;
            }
            Some(format!(
                "{} {} / {}:\n{}",
                CROSS,
                style(&cell.name).bold(),
                style(&step.name).red(),
                format_output_tail(&step.logs, max_lines)
            ))
        })
        .collect()
}

/// Keep the last `max_lines` lines, where test failures usually are
pub fn format_output_tail(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.trim_end().to_string()
    } else {
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            lines[lines.len() - max_lines..].join("\n")
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_output_tail() {
        let tail = format_output_tail("1\n2\n3\n4\nFAILED test_x\n", 2);
        assert!(tail.ends_with("4\nFAILED test_x"));
        assert!(tail.contains("3 earlier lines"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_quiet_events() {
        let event = ExecutionEvent::StepStarted {
            job_id: "build".to_string(),
            cell: "(3.9)".to_string(),
            step: "Test".to_string(),
        };
        assert!(format_execution_event(&event).is_none());

        let event = ExecutionEvent::JobStarted {
            job_id: "build".to_string(),
            cells: 7,
        };
        assert!(format_execution_event(&event).unwrap().contains("7 cells"));
    }
}
