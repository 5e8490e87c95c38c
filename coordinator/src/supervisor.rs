//! Runs the tasks selected for a tick with independent failure domains.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use ratefeed_common::Result;
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::change_detector::RateChange;
use crate::metrics::Metrics;
use crate::scheduler::RefreshTask;

/// What a completed task did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub task: RefreshTask,
    pub changes: Vec<RateChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TaskSummary {
    pub fn new(task: RefreshTask) -> Self {
        Self {
            task,
            changes: Vec::new(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Result of one task within a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded(TaskSummary),
    Failed {
        task: RefreshTask,
        code: &'static str,
        error: String,
    },
}

impl TaskOutcome {
    pub fn task(&self) -> RefreshTask {
        match self {
            TaskOutcome::Succeeded(summary) => summary.task,
            TaskOutcome::Failed { task, .. } => *task,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded(_))
    }
}

/// Everything that happened during one tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<TaskOutcome>,
}

impl TickReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }
}

/// Runs tasks concurrently; a failing task never affects its siblings.
pub struct Supervisor {
    metrics: Arc<Metrics>,
}

impl Supervisor {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }

    /// Run every task in `tasks` and collect one outcome per task, in order.
    pub async fn run<F, Fut>(&self, now: DateTime<Utc>, tasks: &[RefreshTask], run_task: F) -> TickReport
    where
        F: Fn(RefreshTask) -> Fut,
        Fut: Future<Output = Result<TaskSummary>>,
    {
        let tick_id = Uuid::now_v7();
        self.metrics.tick_started();
        info!(tick_id = %tick_id, tasks = ?tasks, "Tick started");

        let run_task = &run_task;
        let outcomes = join_all(tasks.iter().map(|&task| {
            self.metrics.task_started(task);
            async move {
                match AssertUnwindSafe(run_task(task)).catch_unwind().await {
                    Ok(result) => self.finish(task, result),
                    Err(panic) => self.panicked(task, panic),
                }
            }
            .instrument(info_span!("task", tick_id = %tick_id, task = %task))
        }))
        .await;

        let report = TickReport {
            tick_id,
            started_at: now,
            outcomes,
        };
        info!(
            tick_id = %tick_id,
            tasks = report.outcomes.len(),
            failures = report.failures(),
            "Tick finished"
        );
        report
    }

    fn finish(&self, task: RefreshTask, result: Result<TaskSummary>) -> TaskOutcome {
        match result {
            Ok(summary) => {
                self.metrics.task_succeeded();
                info!(changes = summary.changes.len(), "Task completed");
                TaskOutcome::Succeeded(summary)
            }
            Err(e) => {
                self.metrics.task_failed();
                error!(error = %e, code = e.error_code(), "Task failed");
                TaskOutcome::Failed {
                    task,
                    code: e.error_code(),
                    error: e.to_string(),
                }
            }
        }
    }

    fn panicked(&self, task: RefreshTask, panic: Box<dyn Any + Send>) -> TaskOutcome {
        let message = panic_message(panic.as_ref());
        self.metrics.task_failed();
        error!(error = %message, "Task panicked");
        TaskOutcome::Failed {
            task,
            code: "PANIC",
            error: message,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
