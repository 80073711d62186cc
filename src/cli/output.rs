//! CLI output formatting

use crate::{
    core::{RunStatus, RunSummary, TaskStatus, TaskSummary},
    execution::ExecutionEvent,
    persistence::RunRecord,
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
pub static RECYCLE: Emoji<'_, '_> = Emoji("♻️  ", "= ");

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a task status for display
pub fn format_task_status(status: TaskStatus) -> String {
    match status {
        TaskStatus::Pending => style("PENDING").dim().to_string(),
        TaskStatus::Ready => style("READY").cyan().to_string(),
        TaskStatus::Running => style("RUNNING").yellow().to_string(),
        TaskStatus::Cached => style("CACHED").blue().to_string(),
        TaskStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        TaskStatus::Failed => style("FAILED").red().to_string(),
        TaskStatus::Skipped => style("SKIPPED").dim().to_string(),
        TaskStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::PartiallyFailed => style("PARTIALLY FAILED").red().to_string(),
        RunStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn status_icon(status: RunStatus) -> Emoji<'static, 'static> {
    match status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed | RunStatus::PartiallyFailed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Cancelled => WARN,
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format one history row for display
pub fn format_run_record(record: &RunRecord) -> String {
    format!(
        "{} {} - {} - {} ({}/{}) - {}",
        status_icon(record.status),
        style(short_id(&record.run_id)).dim(),
        style(&record.pipeline_name).bold(),
        format_status(record.status),
        record.completed_tasks,
        record.total_tasks,
        style(format!("{:.0}%", record.progress * 100.0)).cyan()
    )
}

fn format_task_line(task: &TaskSummary) -> String {
    let mut line = format!("  {:<24} {}", task.name, format_task_status(task.status));

    if let Some(ms) = task.duration_ms {
        line.push_str(&format!(" {}", style(format!("{}ms", ms)).dim()));
    }
    if let Some(output_ref) = &task.output_ref {
        line.push_str(&format!(" -> {}", output_ref));
    }
    if let Some(error) = &task.error {
        line.push_str(&format!("\n      {}", style(error).red()));
        if let Some(log_ref) = &error.log_ref {
            line.push_str(&format!("\n      logs: {}", log_ref));
        }
    }
    if let Some(because) = &task.skipped_because {
        line.push_str(&format!(" {}", style(format!("(upstream {} failed)", because)).dim()));
    }
    line
}

/// Format the final report of a run
pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut out = format!(
        "{} {} ({}) {}\n",
        status_icon(summary.status),
        style(&summary.pipeline_name).bold(),
        style(short_id(&summary.run_id)).dim(),
        format_status(summary.status)
    );
    for task in &summary.tasks {
        out.push_str(&format_task_line(task));
        out.push('\n');
    }
    out
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            total_tasks,
        } => format!(
            "{} Starting pipeline {} ({}) with {} task(s)",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(run_id)).dim(),
            total_tasks
        ),
        ExecutionEvent::TaskReady { task } => {
            format!("{} {} ready", INFO, style(task).dim())
        }
        ExecutionEvent::TaskStarted { task, .. } => {
            format!("{} {}", SPINNER, style(task).cyan())
        }
        ExecutionEvent::TaskCached { task, output_ref } => format!(
            "{} {} (cached: {})",
            RECYCLE,
            style(task).blue(),
            style(output_ref).dim()
        ),
        ExecutionEvent::TaskSucceeded { task, output_ref, .. } => format!(
            "{} {} -> {}",
            CHECK,
            style(task).green(),
            style(output_ref).dim()
        ),
        ExecutionEvent::TaskFailed { task, error } => {
            format!("{} {}: {}", CROSS, style(task).red(), style(error).dim())
        }
        ExecutionEvent::TaskSkipped { task, because } => format!(
            "{} {} skipped ({} failed)",
            WARN,
            style(task).yellow(),
            style(because).dim()
        ),
        ExecutionEvent::TaskCancelled { task } => {
            format!("{} {} cancelled", WARN, style(task).yellow())
        }
        ExecutionEvent::RunCompleted { run_id, status } => format!(
            "{} Pipeline ({}) {}",
            status_icon(*status),
            style(short_id(run_id)).dim(),
            format_status(*status)
        ),
    }
}
