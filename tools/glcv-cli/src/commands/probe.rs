//! Show media information.

use std::path::PathBuf;

use glcv_baker::probe::probe_media;
use glcv_codec::{create_backend, BackendKind};

pub fn run(path: PathBuf, backend: BackendKind, json: bool) -> anyhow::Result<()> {
    let backend = create_backend(backend)?;
    let metadata = probe_media(backend.as_ref(), &path)
        .map_err(|e| anyhow::anyhow!("Failed to probe {}: {e}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("Media: {}", path.display());
    println!("{}", "=".repeat(50));
    println!("  Kind: {:?}", metadata.kind);
    println!("  Size: {}x{}", metadata.width, metadata.height);
    println!("  Orientation: {} deg", metadata.orientation.degrees());
    println!("  Display aspect: {:.3}", metadata.display_aspect());
    if metadata.duration_ms > 0 {
        println!("  Duration: {:.2}s", metadata.duration_ms as f64 / 1000.0);
    }
    println!("  Audio: {}", if metadata.has_audio { "yes" } else { "no" });

    Ok(())
}
