use stockcount_core::sync::{FlushScheduler, FlushTrigger};
use tokio::sync::watch;

use crate::commands::common::{format_flush_report, CliContext};
use crate::error::CliError;

pub async fn run_flush(context: &CliContext, offline: bool) -> Result<(), CliError> {
    let storage = context.open_storage()?;

    if offline {
        let pending = storage.queue().len().await?;
        println!("Offline; {pending} mutation(s) left queued");
        return Ok(());
    }

    let backend = context.backend()?;
    let (_online, connectivity) = watch::channel(true);
    let scheduler = FlushScheduler::new(&storage, backend, connectivity)
        .with_retry_policy(context.settings.retry_policy());

    let report = scheduler.trigger(FlushTrigger::Manual).await?;
    println!("{}", format_flush_report(&report));

    let pending = storage.queue().len().await?;
    let conflicts = storage.conflicts().len().await?;
    println!("{pending} pending, {conflicts} open conflict(s)");

    storage.close().await?;
    Ok(())
}
