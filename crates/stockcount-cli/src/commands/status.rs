use serde::Serialize;
use stockcount_core::sync::{RetryPolicy, SchedulerState};
use stockcount_core::{QueuedMutation, SyncStatus};

use crate::commands::common::{display_path, queue_item, CliContext, QueueItem};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub status: String,
    pub pending: usize,
    pub open_conflicts: usize,
    pub front: Option<QueueItem>,
    pub db_path: String,
}

/// Status as seen from a one-shot command, which assumes connectivity.
pub fn offline_queue_status(
    pending: usize,
    front: Option<&QueuedMutation>,
    policy: &RetryPolicy,
) -> SyncStatus {
    let scheduler = match front {
        Some(front) if policy.is_exhausted(front.attempts) => SchedulerState::Stalled {
            mutation_id: front.id,
            attempts: front.attempts,
        },
        _ => SchedulerState::Idle,
    };
    SyncStatus::derive(true, &scheduler, pending)
}

pub async fn run_status(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let storage = context.open_storage()?;
    let queue = storage.queue();
    let pending = queue.len().await?;
    let open_conflicts = storage.conflicts().len().await?;
    let front = queue.peek_front().await?;
    let status = offline_queue_status(pending, front.as_ref(), &context.settings.retry_policy());

    if as_json {
        let report = StatusReport {
            status: status.to_string(),
            pending,
            open_conflicts,
            front: front.as_ref().map(queue_item),
            db_path: display_path(&context.db_path),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Status:          {status}");
    println!("Pending:         {pending}");
    println!("Open conflicts:  {open_conflicts}");
    if let Some(front) = front {
        println!(
            "Next:            {} {} (attempts {})",
            front.operation.method.as_str(),
            front.operation.path,
            front.attempts
        );
        if let Some(error) = front.last_error {
            println!("Last error:      {error}");
        }
    }
    println!("Database:        {}", display_path(&context.db_path));
    Ok(())
}
