use crate::commands::common::{
    conflict_item, format_conflict_lines, parse_mutation_id, CliContext, ConflictItem,
};
use crate::error::CliError;

pub async fn run_list(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let storage = context.open_storage()?;
    let records = storage.conflicts().list().await?;

    if as_json {
        let items = records.iter().map(conflict_item).collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No open conflicts.");
        return Ok(());
    }

    for line in format_conflict_lines(&records) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_dismiss(context: &CliContext, id: &str) -> Result<(), CliError> {
    let id = parse_mutation_id(id)?;
    let storage = context.open_storage()?;
    if storage.conflicts().dismiss(&id).await? {
        println!("Dismissed {id}");
        Ok(())
    } else {
        Err(CliError::NotFound(format!("open conflict {id}")))
    }
}

pub async fn run_resolve(context: &CliContext, id: &str) -> Result<(), CliError> {
    let id = parse_mutation_id(id)?;
    let storage = context.open_storage()?;
    if storage.conflicts().resolve(&id).await? {
        println!("Resolved {id}");
        Ok(())
    } else {
        Err(CliError::NotFound(format!("open conflict {id}")))
    }
}
