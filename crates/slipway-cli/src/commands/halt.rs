//! `slipway halt <release.json>` — raise the halt flag for a release.
//!
//! The running deploy observes the flag on its next health poll and
//! routes to failure cleanup; there is no forced-kill path.

use tracing::info;

use slipway_cloud::{MemoryCloud, MemoryStore};
use slipway_deploy::release as release_ops;

use super::load_release;

pub async fn run(release_file: &str) -> anyhow::Result<()> {
    let release = load_release(release_file)?;

    let cloud = MemoryCloud::new();
    let clients = cloud.clients(&MemoryStore::new());

    release_ops::halt(&clients, &release).await?;

    info!(
        bucket = %release.bucket,
        key = %release.halt_key(),
        "halt flag raised (simulation store)"
    );
    Ok(())
}
