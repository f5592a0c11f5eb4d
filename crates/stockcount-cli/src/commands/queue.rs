use stockcount_core::models::{HttpMethod, Operation};

use crate::commands::common::{
    format_queue_lines, parse_mutation_id, parse_payload, queue_item, CliContext, QueueItem,
};
use crate::error::CliError;

pub async fn run_list(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let storage = context.open_storage()?;
    let mutations = storage.queue().list().await?;

    if as_json {
        let items = mutations.iter().map(queue_item).collect::<Vec<QueueItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if mutations.is_empty() {
        println!("Offline queue is empty.");
    } else {
        for line in format_queue_lines(&mutations) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_add(
    context: &CliContext,
    method: &str,
    path: &str,
    payload: Option<&str>,
) -> Result<(), CliError> {
    let method = method.parse::<HttpMethod>()?;
    let operation = Operation::new(method, path.trim())?;
    let payload = parse_payload(payload)?;

    let storage = context.open_storage()?;
    let id = storage.queue().enqueue(operation, &payload).await?;
    println!("Queued {id}");
    Ok(())
}

pub async fn run_remove(context: &CliContext, id: &str) -> Result<(), CliError> {
    let id = parse_mutation_id(id)?;
    let storage = context.open_storage()?;
    if storage.queue().remove_by_id(&id).await? {
        println!("Removed {id}");
        Ok(())
    } else {
        Err(CliError::NotFound(format!("queued mutation {id}")))
    }
}
