//! Bake a template into a video file.

use std::path::PathBuf;
use std::process::Stdio;

use glcv_baker::ipc::{encode_line, parse_event};
use glcv_baker::{
    BakeProgress, BakeReport, BakeRequest, Baker, BroadcastPublisher, Cancellable,
    ProgressPublisher, WorkerCommand, WorkerEvent,
};
use glcv_codec::{create_backend, BackendKind};
use glcv_common::config::BakeDefaults;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

pub struct BakeOptions {
    pub request: PathBuf,
    pub output: Option<PathBuf>,
    pub backend: BackendKind,
    pub isolated: bool,
    pub verbose: bool,
}

pub async fn run(options: BakeOptions, defaults: &BakeDefaults) -> anyhow::Result<()> {
    println!("Baking request: {}", options.request.display());

    let mut request = BakeRequest::from_file(&options.request)
        .map_err(|e| anyhow::anyhow!("Failed to load request: {e}"))?;
    if let Some(output) = options.output {
        request.output_path = output;
    }
    request.verbose |= options.verbose;
    request.validate()?;

    let resolution = request.resolution();
    println!("  Output: {}", request.output_path.display());
    println!("  Units: {}", request.template.units.len());
    println!(
        "  Resolution: {}x{} @ {} fps",
        resolution.width, resolution.height, request.fps
    );
    println!("  Backend: {}", options.backend);

    let publisher = BroadcastPublisher::default();
    let printer = spawn_progress_printer(&publisher);

    let result = if options.isolated {
        bake_isolated(request, options.backend, options.verbose, publisher).await
    } else {
        bake_in_process(request, options.backend, publisher, defaults).await
    };
    // The printer ends once every publisher clone is gone.
    let _ = printer.await;

    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            println!("\nBake failed: {e}");
            Err(e)
        }
    }
}

async fn bake_in_process(
    request: BakeRequest,
    backend: BackendKind,
    publisher: BroadcastPublisher,
    defaults: &BakeDefaults,
) -> anyhow::Result<BakeReport> {
    let backend = create_backend(backend)?;
    let handle = Baker::bake_with_defaults(request, backend, Box::new(publisher), defaults)?;
    let canceller = handle.canceller();
    let wait = handle.wait();
    tokio::pin!(wait);

    loop {
        tokio::select! {
            report = &mut wait => return Ok(report?),
            _ = tokio::signal::ctrl_c() => {
                println!("\n  Cancelling...");
                canceller.cancel();
            }
        }
    }
}

async fn bake_isolated(
    request: BakeRequest,
    backend: BackendKind,
    verbose: bool,
    publisher: BroadcastPublisher,
) -> anyhow::Result<BakeReport> {
    let exe = std::env::current_exe()?;
    let mut command = tokio::process::Command::new(exe);
    command
        .arg("worker")
        .arg("--backend")
        .arg(backend.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if verbose {
        command.arg("--verbose");
    }
    let mut child = command.spawn()?;
    tracing::debug!(pid = ?child.id(), "Worker spawned");

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow::anyhow!("Worker stdin unavailable"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("Worker stdout unavailable"))?;

    let start = WorkerCommand::Start {
        request: Box::new(request),
    };
    stdin
        .write_all(format!("{}\n", encode_line(&start)?).as_bytes())
        .await?;
    stdin.flush().await?;

    let mut lines = BufReader::new(stdout).lines();
    let mut cancel_sent = false;
    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break Err(anyhow::anyhow!("Worker exited without a result"));
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_event(&line) {
                    Ok(WorkerEvent::Progress(progress)) => publisher.publish(progress),
                    Ok(WorkerEvent::Finished { report }) => break Ok(report),
                    Ok(WorkerEvent::Failed { message }) => break Err(anyhow::anyhow!(message)),
                    Err(e) => tracing::warn!(error = %e, "Ignoring malformed worker output"),
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_sent => {
                println!("\n  Cancelling...");
                let cancel = encode_line(&WorkerCommand::Cancel)?;
                if let Err(e) = stdin.write_all(format!("{cancel}\n").as_bytes()).await {
                    tracing::warn!(error = %e, "Failed to send cancel to worker");
                }
                let _ = stdin.flush().await;
                cancel_sent = true;
            }
        }
    };

    // Closing stdin lets the worker exit.
    drop(stdin);
    drop(publisher);
    let status = child.wait().await?;
    if !status.success() {
        tracing::debug!(?status, "Worker exited with failure");
    }
    outcome
}

fn spawn_progress_printer(publisher: &BroadcastPublisher) -> tokio::task::JoinHandle<()> {
    let mut rx = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(progress) => print_progress(&progress),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_progress(progress: &BakeProgress) {
    use std::io::Write;
    print!("\r  Progress: {:.1}%  ", progress.percent());
    let _ = std::io::stdout().flush();
}

fn print_report(report: &BakeReport) {
    if report.completed {
        println!("\nBake complete: {}", report.output_path.display());
    } else {
        println!("\nBake cancelled: {}", report.output_path.display());
    }
    println!("  Frames rendered: {}", report.frames_rendered);
    println!(
        "  Samples muxed: {} video, {} audio",
        report.video_samples, report.audio_samples
    );
    for (tag, frames) in &report.decoder_frames {
        println!("  Decoded {tag}: {frames} frames");
    }
    println!("  Elapsed: {:.1}s", report.elapsed_secs);
}
