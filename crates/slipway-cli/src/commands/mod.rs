pub mod deploy;
pub mod halt;

use anyhow::Context;

use slipway_core::Release;

/// Read and parse a release document from disk.
pub fn load_release(release_file: &str) -> anyhow::Result<Release> {
    let raw = std::fs::read_to_string(release_file)
        .with_context(|| format!("reading {release_file}"))?;
    let release: Release =
        serde_json::from_str(&raw).with_context(|| format!("parsing {release_file}"))?;
    Ok(release)
}
