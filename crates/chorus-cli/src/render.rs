//! Terminal rendering of session snapshots.

use chorus_core::session::{JobStatus, ModelJob, Session, SessionStatus};
use colored::{ColoredString, Colorize};
use std::collections::HashMap;

const PREVIEW_CHARS: usize = 60;

/// Turns successive snapshots into lines describing what changed.
#[derive(Default)]
pub struct ProgressRenderer {
    jobs: HashMap<String, JobStatus>,
    session: Option<(SessionStatus, bool)>,
}

impl ProgressRenderer {
    /// Lines for jobs whose status moved since the last snapshot, followed
    /// by the aggregate progress when anything moved.
    pub fn changes(&mut self, session: &Session) -> Vec<String> {
        let mut lines = Vec::new();

        for job in session.jobs_in_order() {
            if self.jobs.get(&job.model_key) == Some(&job.status) {
                continue;
            }
            self.jobs.insert(job.model_key.clone(), job.status);
            lines.push(job_line(job));
        }
        if !lines.is_empty() {
            lines.push(format!("  {} {}", "progress".dimmed(), session.progress()));
        }

        let state = (session.status, session.cancelled);
        if self.session != Some(state) {
            self.session = Some(state);
            if session.cancelled {
                lines.push(format!("{}", "Cancelled".yellow().bold()));
            } else if session.status == SessionStatus::Error {
                lines.push(format!(
                    "{} {}",
                    "Failed:".red().bold(),
                    session.transport_error.as_deref().unwrap_or("transport error")
                ));
            }
        }

        lines
    }

    /// Final per-model output.
    pub fn summary(&self, session: &Session) -> Vec<String> {
        let mut lines = Vec::new();
        for job in session.jobs_in_order() {
            lines.push(String::new());
            lines.push(format!(
                "{} {} [{}]",
                "==".dimmed(),
                heading(job).bold(),
                paint(job.status)
            ));
            match (&job.error_info, job.content()) {
                (Some(error), _) => lines.push(format!("{} ({})", error.message, error.kind)),
                (None, Some(content)) => lines.push(content.to_string()),
                (None, None) if !job.partial_content.is_empty() => {
                    lines.push(job.partial_content.clone())
                }
                (None, None) => {
                    if let Some(result) = &job.result {
                        lines.push(result.to_string());
                    }
                }
            }
        }
        lines.push(String::new());
        lines.push(format!("{} {}", status_label(session).bold(), session.progress()));
        lines
    }
}

/// Session status as shown to the user; cancellation wins over status.
pub fn status_label(session: &Session) -> String {
    if session.cancelled {
        "cancelled".to_string()
    } else {
        session.status.to_string()
    }
}

fn job_line(job: &ModelJob) -> String {
    let detail = match job.status {
        JobStatus::Success => job.content().map(preview).unwrap_or_default(),
        JobStatus::Error => job
            .error_info
            .as_ref()
            .map(|error| error.message.clone())
            .unwrap_or_default(),
        _ => String::new(),
    };
    let line = format!("  {:<28} {}", heading(job), paint(job.status));
    if detail.is_empty() {
        line
    } else {
        format!("{line}  {}", detail.dimmed())
    }
}

fn heading(job: &ModelJob) -> String {
    if job.display_label == job.model_key {
        job.model_key.clone()
    } else {
        format!("{} ({})", job.display_label, job.model_key)
    }
}

fn paint(status: JobStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        JobStatus::Waiting => label.dimmed(),
        JobStatus::Processing | JobStatus::Streaming => label.cyan(),
        JobStatus::Success => label.green(),
        JobStatus::Error => label.red(),
    }
}

fn preview(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
