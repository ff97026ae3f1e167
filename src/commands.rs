use anyhow::{bail, Context, Result};
use indicatif::HumanBytes;

use segwatch::utils::{parse_locator, sanitize_filename};
use segwatch::{
    ControlAction, Engine, EngineConfig, HttpSnapshotSource, PollOutcome, SnapshotSource,
    StartRequest, StoreView, TransferView, ViewFilter, WireStatus,
};

fn connect(config: &EngineConfig) -> Result<HttpSnapshotSource> {
    HttpSnapshotSource::new(&config.server, config.fetch_timeout())
        .context(format!("Failed to set up client for {}", config.server))
}

pub async fn start_transfer(
    config: &EngineConfig,
    url: &str,
    name: Option<&str>,
    segments: Option<u32>,
) -> Result<u64> {
    let locator = parse_locator(url)?;
    let file_name = name.map(sanitize_filename).filter(|n| !n.is_empty());
    let source = connect(config)?;

    let snapshot = source
        .start(&StartRequest {
            url: locator.to_string(),
            file_name,
            segments,
        })
        .await
        .context("Failed to start transfer")?;
    let transfer = snapshot.sanitize().context("Backend returned a transfer without an id")?;

    if transfer.status == WireStatus::Failed {
        bail!(
            "Backend could not start {}: {}",
            url,
            transfer.error_message.unwrap_or_else(|| "no reason given".to_string())
        );
    }

    println!(
        "Started transfer {} -> {} ({} segments, {})",
        transfer.id,
        transfer.destination_name,
        transfer.requested_segments.unwrap_or(1),
        transfer
            .total_size
            .map(|s| HumanBytes(s).to_string())
            .unwrap_or_else(|| "unknown size".into())
    );
    Ok(transfer.id)
}

pub async fn send_command(
    config: &EngineConfig,
    transfer_id: u64,
    action: ControlAction,
) -> Result<()> {
    let source = connect(config)?;
    let snapshot = source
        .fetch_one(transfer_id)
        .await
        .context(format!("Transfer {} not found", transfer_id))?;
    let name = snapshot.file_name.unwrap_or_default();

    match action {
        ControlAction::Pause => source.pause(transfer_id).await,
        ControlAction::Resume => source.resume(transfer_id).await,
    }
    .context(format!("Failed to {} transfer {}", action, transfer_id))?;

    println!("Sent {} to transfer {} ({})", action, transfer_id, name);
    println!("Tip: add --follow to watch the backend confirm it");
    Ok(())
}

pub async fn list_transfers(config: &EngineConfig, filter: ViewFilter) -> Result<()> {
    let (mut engine, handle) = Engine::new(connect(config)?, config.clone());
    match engine.poll_once().await {
        PollOutcome::Merged(report) => {
            if report.skipped > 0 {
                eprintln!("Skipped {} malformed transfer record(s)", report.skipped);
            }
        }
        _ => bail!("Could not fetch transfers from {}", config.server),
    }
    render(&handle.view(), filter);
    Ok(())
}

pub async fn follow_transfers(
    config: &EngineConfig,
    filter: ViewFilter,
    commands: &[(u64, ControlAction)],
) -> Result<()> {
    let (engine, handle) = Engine::new(connect(config)?, config.clone());
    let poller = tokio::spawn(engine.run());

    if !commands.is_empty() {
        // Commands overlay known transfers only, so wait for the first table.
        handle.wait_for_cycle(1).await?;
        for (transfer_id, action) in commands {
            let sent = match action {
                ControlAction::Pause => handle.pause(*transfer_id).await,
                ControlAction::Resume => handle.resume(*transfer_id).await,
            };
            if let Err(e) = sent {
                eprintln!("Failed to {} transfer {}: {}", action, transfer_id, e);
            }
        }
    }

    let mut views = handle.subscribe();
    loop {
        let view = views.borrow_and_update().clone();
        print!("\x1B[1;1H\x1B[0J");
        render(&view, filter);
        println!("\n(Press Ctrl+C to exit view)");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    handle.shutdown();
    poller.await.context("Poll task failed")?;
    Ok(())
}

fn render(view: &StoreView, filter: ViewFilter) {
    let summary = view.summary;
    println!(
        "Summary: Active: {} | Paused: {} | Pending: {} | Completed: {} | Failed: {} | Speed: {}",
        summary.active,
        summary.paused,
        summary.pending,
        summary.completed,
        summary.failed,
        view.scaled_rate()
    );
    println!();

    println!(
        "{:<6} {:<40} {:<15} {:<10} {:<25} {}",
        "ID", "Filename", "Status", "Progress", "Size", "Segments"
    );
    println!("{:-<6} {:-<40} {:-<15} {:-<10} {:-<25} {:-<10}", "", "", "", "", "", "");

    let mut found_any = false;
    for transfer in view.filtered(filter) {
        render_row(transfer);
        found_any = true;
    }

    if !found_any {
        println!("No transfers in this category.");
    }
    if view.transfers.iter().any(TransferView::is_optimistic) {
        println!();
        println!("* waiting for the backend to confirm");
    }
}

fn render_row(transfer: &TransferView) {
    let status = if transfer.is_optimistic() {
        format!("{}*", transfer.status)
    } else {
        transfer.status.to_string()
    };
    let size = match transfer.total_size {
        Some(total) => format!("{} / {}", HumanBytes(transfer.downloaded_size), HumanBytes(total)),
        None => format!("{}", HumanBytes(transfer.downloaded_size)),
    };
    let segments = transfer
        .segments
        .iter()
        .map(|s| format!("{}%", s.progress_percent()))
        .collect::<Vec<_>>()
        .join(" ");

    println!(
        "{:<6} {:<40} {:<15} {:<10} {:<25} {}",
        transfer.id,
        truncate(&transfer.destination_name, 40),
        status,
        format!("{}%", transfer.progress_percent),
        size,
        segments
    );
    if let Some(reason) = &transfer.failure_reason {
        println!("{:<6} {}", "", reason);
    }
    if let Some(finished) = transfer.completed_at {
        println!("{:<6} finished {}", "", finished.format("%Y-%m-%d %H:%M"));
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}
