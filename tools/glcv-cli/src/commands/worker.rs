//! Worker side of `glcv bake --isolated`.
//!
//! Speaks JSON lines: commands on stdin, events on stdout. Logs go to
//! stderr so they never interleave with events.

use std::io::BufReader;

use glcv_baker::ipc::run_worker;
use glcv_baker::EventWriter;
use glcv_codec::{create_backend, BackendKind};
use glcv_common::config::BakeDefaults;

pub async fn run(backend: BackendKind, defaults: BakeDefaults) -> anyhow::Result<()> {
    let backend = create_backend(backend)?;
    tracing::info!(backend = backend.name(), "Worker ready");

    tokio::task::spawn_blocking(move || {
        run_worker(
            BufReader::new(std::io::stdin()),
            EventWriter::stdout(),
            backend,
            &defaults,
            true,
        )
    })
    .await??;
    Ok(())
}
