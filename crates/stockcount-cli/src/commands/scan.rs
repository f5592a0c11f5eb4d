use stockcount_core::scan::{scan_channel, AcceptedScan, ConfidenceBuffer, DedupCache, ScanEvent};
use stockcount_core::sync::system_clock;
use stockcount_core::Operation;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::common::{
    count_line_payload, format_timestamp, normalize_required, now_ms, CliContext,
};
use crate::error::CliError;

/// Parse `CODE [T_MS]`. Lines without a timestamp use `fallback_ms`.
pub fn parse_scan_line(line: &str, fallback_ms: i64) -> Option<(String, i64)> {
    let mut parts = line.split_whitespace();
    let code = parts.next()?;
    let at_ms = parts
        .next()
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(fallback_ms);
    Some((code.to_string(), at_ms))
}

pub fn format_accepted_scan(scan: &AcceptedScan) -> String {
    match scan.duplicate.last_scanned_at {
        Some(last) if scan.duplicate.is_duplicate => format!(
            "accepted {} at {} (duplicate: last scanned {})",
            scan.code,
            scan.accepted_at,
            format_timestamp(last)
        ),
        _ => format!("accepted {} at {}", scan.code, scan.accepted_at),
    }
}

pub async fn run_scan(context: &CliContext, session: Option<&str>) -> Result<(), CliError> {
    let session = session
        .map(|session| normalize_required(session, "Session ID"))
        .transpose()?;
    let storage = match session {
        Some(_) => Some(context.open_storage()?),
        None => None,
    };

    let settings = &context.settings;
    let (producer, mut scans) = scan_channel(
        settings.scan.channel_capacity,
        ConfidenceBuffer::new(settings.scan_buffer()),
        DedupCache::new(settings.dedup_window(), system_clock()),
    );

    let read_frames = async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some((code, at_ms)) = parse_scan_line(&line, now_ms()) {
                if !producer.send(code, at_ms).await {
                    break;
                }
            }
        }
        Ok::<(), CliError>(())
    };

    let consume = async move {
        let mut accepted = 0_usize;
        while let Some(event) = scans.next_event().await {
            match event {
                ScanEvent::Tentative { code, count } => {
                    println!("tentative {code} ({count} read(s))");
                }
                ScanEvent::Accepted(scan) => {
                    accepted += 1;
                    println!("{}", format_accepted_scan(&scan));
                    if let (Some(session), Some(storage)) = (&session, &storage) {
                        let id = storage
                            .queue()
                            .enqueue(
                                Operation::create_count_line(session),
                                &count_line_payload(&scan.code, 1.0, now_ms()),
                            )
                            .await?;
                        println!("  queued count line {id}");
                    }
                }
            }
        }
        Ok::<usize, CliError>(accepted)
    };

    let (read, accepted) = tokio::join!(read_frames, consume);
    read?;
    println!("{} scan(s) accepted", accepted?);
    Ok(())
}
