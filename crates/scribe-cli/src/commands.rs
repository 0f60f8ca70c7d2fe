//! Subcommand runners

use anyhow::Result;
use scribe_core::{ApiClient, JobPoller, PollEvent, SessionEnd, StreamOutcome, StreamSession};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Exit status after Ctrl+C
const INTERRUPTED: u8 = 130;

/// Run one streaming generation, printing text to stdout as it arrives
pub async fn stream(
    client: ApiClient,
    endpoint: &str,
    payload: &serde_json::Value,
    json: bool,
) -> ExitCode {
    let session = StreamSession::new(client);

    let handle = session.abort_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, aborting stream");
            handle.abort();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut out = std::io::stdout();
        while let Some(outcome) = rx.recv().await {
            if let Err(e) = print_outcome(&mut out, &outcome, json) {
                tracing::warn!("Failed to write output: {}", e);
            }
        }
    });

    let end = session.start(endpoint, payload, tx).await;
    interrupt.abort();
    // The sink was dropped with the session run, so the printer drains and exits
    let _ = printer.await;

    let state = session.state();
    info!(
        words = state.word_count,
        chars = state.content.chars().count(),
        "Stream finished: {:?}",
        end
    );

    match end {
        SessionEnd::Completed => ExitCode::SUCCESS,
        SessionEnd::Failed => ExitCode::FAILURE,
        SessionEnd::Cancelled => ExitCode::from(INTERRUPTED),
    }
}

fn print_outcome(out: &mut impl Write, outcome: &StreamOutcome, json: bool) -> std::io::Result<()> {
    if json {
        let line = serde_json::to_string(outcome).map_err(std::io::Error::other)?;
        writeln!(out, "{line}")?;
        return out.flush();
    }

    match outcome {
        StreamOutcome::Progress {
            message, percent, ..
        } => eprintln!("[{percent:>3}%] {message}"),
        StreamOutcome::Chunk { text } => {
            write!(out, "{text}")?;
            out.flush()?;
        }
        StreamOutcome::Result { payload } => {
            let pretty = serde_json::to_string_pretty(payload).map_err(std::io::Error::other)?;
            writeln!(out)?;
            writeln!(out, "{pretty}")?;
        }
        StreamOutcome::Error { message, code } => match code {
            Some(code) => eprintln!("\nError ({code}): {message}"),
            None => eprintln!("\nError: {message}"),
        },
        StreamOutcome::Complete => writeln!(out)?,
    }
    Ok(())
}

/// Poll a job until it reaches a terminal status or the user interrupts
pub async fn poll(client: ApiClient, job_id: String, json: bool) -> Result<ExitCode> {
    let interval = client.config().poll_interval();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let poller = JobPoller::new(Arc::new(client), Arc::new(tx)).with_interval(interval);
    poller.start_polling(job_id);

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping poll");
                poller.stop_polling();
                return Ok(ExitCode::from(INTERRUPTED));
            }
            event = rx.recv() => event,
        };
        let Some(event) = event else {
            return Ok(ExitCode::FAILURE);
        };

        print_event(&mut std::io::stdout().lock(), &event, json)?;
        match event {
            PollEvent::Completed { .. } => return Ok(ExitCode::SUCCESS),
            PollEvent::Failed { .. } => return Ok(ExitCode::FAILURE),
            PollEvent::Progress { .. } | PollEvent::FetchFailed { .. } => {}
        }
    }
}

fn print_event(out: &mut impl Write, event: &PollEvent, json: bool) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string(event)?)?;
        out.flush()?;
        return Ok(());
    }

    match event {
        PollEvent::Progress {
            job_id,
            progress,
            current_step,
        } => writeln!(out, "{job_id}: [{progress:>3}%] {current_step}")?,
        PollEvent::FetchFailed { job_id, message } => {
            eprintln!("{job_id}: status unavailable ({message}), retrying")
        }
        PollEvent::Completed { job } => {
            writeln!(out, "{}: completed", job.id)?;
            if let Some(result) = &job.result {
                writeln!(out, "{}", serde_json::to_string_pretty(result)?)?;
            }
        }
        PollEvent::Failed { job } => eprintln!(
            "{}: {} ({})",
            job.id,
            job.status,
            job.error_message.as_deref().unwrap_or("no error message")
        ),
    }
    out.flush()?;
    Ok(())
}
