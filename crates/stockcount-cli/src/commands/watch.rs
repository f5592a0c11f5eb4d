use stockcount_core::sync::{FlushScheduler, FlushTrigger, SchedulerState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use crate::commands::common::{format_timestamp, CliContext};
use crate::error::CliError;

/// Line commands accepted on stdin while watching
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchCommand {
    Online,
    Offline,
    Trigger(FlushTrigger),
}

pub fn parse_watch_command(line: &str) -> Option<WatchCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "online" | "up" => Some(WatchCommand::Online),
        "offline" | "down" => Some(WatchCommand::Offline),
        "flush" | "manual" => Some(WatchCommand::Trigger(FlushTrigger::Manual)),
        "foreground" | "fg" => Some(WatchCommand::Trigger(FlushTrigger::Foreground)),
        _ => None,
    }
}

pub fn format_scheduler_state(state: &SchedulerState) -> String {
    match state {
        SchedulerState::Idle => "idle".to_string(),
        SchedulerState::Flushing => "flushing...".to_string(),
        SchedulerState::Backoff { until_ms, attempts } => format!(
            "backing off after {attempts} failed attempt(s) until {}",
            format_timestamp(*until_ms)
        ),
        SchedulerState::Stalled {
            mutation_id,
            attempts,
        } => format!(
            "sync stalled on {mutation_id} after {attempts} attempts; type `flush` to retry"
        ),
    }
}

pub async fn run_watch(context: &CliContext, offline: bool) -> Result<(), CliError> {
    let storage = context.open_storage()?;
    let backend = context.backend()?;
    let (online_tx, connectivity) = watch::channel(!offline);
    let scheduler = FlushScheduler::new(&storage, backend, connectivity)
        .with_retry_policy(context.settings.retry_policy())
        .with_periodic_flush(context.settings.flush_interval());

    let (trigger_tx, trigger_rx) = mpsc::channel(8);
    trigger_tx.try_send(FlushTrigger::Foreground).ok();

    let mut states = scheduler.subscribe();
    let mut pending = storage.queue().subscribe();
    println!(
        "Watching {} pending mutation(s) ({}). Ctrl-C to stop.",
        *pending.borrow_and_update(),
        if offline { "offline" } else { "online" }
    );

    let report_changes = async {
        loop {
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = states.borrow_and_update().clone();
                    println!("{}", format_scheduler_state(&state));
                }
                changed = pending.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    println!("{} pending", *pending.borrow_and_update());
                }
            }
        }
    };

    let read_commands = async {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_watch_command(&line) {
                Some(WatchCommand::Online) => {
                    online_tx.send_replace(true);
                }
                Some(WatchCommand::Offline) => {
                    online_tx.send_replace(false);
                }
                Some(WatchCommand::Trigger(trigger)) => {
                    if trigger_tx.send(trigger).await.is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!(
                    "Unknown command '{}' (expected online, offline, flush, foreground)",
                    line.trim()
                ),
            }
        }
        // stdin closed; keep watching until Ctrl-C
        std::future::pending::<()>().await;
    };

    tokio::select! {
        result = scheduler.run(trigger_rx) => result?,
        () = report_changes => {}
        () = read_commands => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            println!("Stopping");
        }
    }

    storage.close().await?;
    Ok(())
}
