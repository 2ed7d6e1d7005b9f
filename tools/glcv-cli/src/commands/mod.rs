pub mod bake;
pub mod check;
pub mod probe;
pub mod worker;

use glcv_codec::BackendKind;
use glcv_common::config::BakeDefaults;

/// Backend named on the command line, else the configured default.
pub fn backend_kind(flag: Option<&str>, defaults: &BakeDefaults) -> anyhow::Result<BackendKind> {
    let name = flag.unwrap_or(&defaults.backend);
    Ok(name.parse()?)
}
