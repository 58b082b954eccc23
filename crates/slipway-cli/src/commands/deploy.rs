//! `slipway deploy <release.json>` — run a release through the machine.
//!
//! The CLI drives the in-process simulation backend: the fake cloud is
//! seeded with every resource the document references, so the full
//! state machine runs end to end with zeroed timers. Production cloud
//! bindings plug in through the same `Clients` bundle.

use tracing::{error, info};

use slipway_cloud::{MemoryCloud, MemoryStore};
use slipway_core::Release;
use slipway_deploy::release as release_ops;
use slipway_deploy::{Machine, MachineOptions, Terminal};

use super::load_release;

pub async fn run(release_file: &str) -> anyhow::Result<()> {
    let release = load_release(release_file)?;

    let cloud = MemoryCloud::new();
    let store = MemoryStore::new();
    seed_simulation(&cloud, &release);
    let clients = cloud.clients(&store);

    release_ops::upload_document(&clients, &release).await?;

    info!(
        project = %release.project_name,
        config = %release.config_name,
        release = %release.release_id,
        "starting deploy (simulation backend)"
    );

    let machine = Machine::with_options(clients, MachineOptions::immediate());
    let execution = machine.execute(release).await;

    for (name, svc) in &execution.release.services {
        if let Some(report) = &svc.health_report {
            info!(
                service = %name,
                healthy = report.healthy,
                target = report.target_healthy,
                "final health report"
            );
        }
    }

    match execution.terminal {
        Terminal::Success => {
            info!("deploy succeeded");
            Ok(())
        }
        terminal => {
            if let Some(fault) = &execution.fault {
                error!(state = %fault.state, message = %fault.message, "deploy failed");
            }
            anyhow::bail!("deploy finished in {terminal:?}")
        }
    }
}

/// Seed the fake cloud with everything the document references.
fn seed_simulation(cloud: &MemoryCloud, release: &Release) {
    for (name, svc) in &release.services {
        for sg in &svc.security_groups {
            cloud.add_security_group(sg, &format!("sg-{name}"));
        }
        for elb in &svc.elbs {
            cloud.add_load_balancer(elb);
        }
        for tg in &svc.target_groups {
            cloud.add_target_group(tg, name);
        }
        if let Some(profile) = &svc.profile {
            cloud.add_instance_profile(profile, &format!("arn:aws:iam::profile/{profile}"));
        }
    }
}
