//! Check codec backends.

use glcv_codec::{create_backend, BackendKind};
use glcv_common::config::{config_file_path, BakeDefaults};

pub fn run(defaults: &BakeDefaults) -> anyhow::Result<()> {
    println!("glcv Backend Check");
    println!("{}", "=".repeat(50));

    let mut default_ok = false;
    for kind in [BackendKind::Gst, BackendKind::Software] {
        let is_default = defaults.backend.parse::<BackendKind>().ok() == Some(kind);
        let marker = if is_default { " (default)" } else { "" };
        match create_backend(kind) {
            Ok(backend) if backend.is_available() => {
                println!(
                    "[OK] Backend {kind}{marker}: max surface {}px",
                    backend.max_surface_size()
                );
                default_ok |= is_default;
            }
            Ok(_) => {
                println!("[WARN] Backend {kind}{marker}: missing components");
                print_missing(kind);
            }
            Err(e) => println!("[FAIL] Backend {kind}{marker}: {e}"),
        }
    }

    println!();
    println!("Config file: {}", config_file_path().display());
    if default_ok {
        println!("The default backend is ready.");
    } else {
        println!("The default backend is unavailable. Use --backend software for dry runs.");
    }

    Ok(())
}

#[cfg(feature = "gst")]
fn print_missing(kind: BackendKind) {
    if kind == BackendKind::Gst {
        for element in glcv_codec::gst::GstBackend::missing_elements() {
            println!("     missing GStreamer element: {element}");
        }
    }
}

#[cfg(not(feature = "gst"))]
fn print_missing(_kind: BackendKind) {}
