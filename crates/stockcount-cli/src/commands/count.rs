use stockcount_core::Operation;

use crate::commands::common::{count_line_payload, normalize_required, now_ms, CliContext};
use crate::error::CliError;

pub async fn run_add(
    context: &CliContext,
    session: &str,
    item: &str,
    quantity: f64,
) -> Result<(), CliError> {
    let session = normalize_required(session, "Session ID")?;
    let item = normalize_required(item, "Item code")?;
    if !quantity.is_finite() || quantity < 0.0 {
        return Err(CliError::InvalidQuantity);
    }

    let storage = context.open_storage()?;
    let id = storage
        .queue()
        .enqueue(
            Operation::create_count_line(&session),
            &count_line_payload(&item, quantity, now_ms()),
        )
        .await?;
    println!("Queued count line {id} ({item} x {quantity} in session {session})");
    Ok(())
}
