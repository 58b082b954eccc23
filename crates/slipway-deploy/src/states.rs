//! The task states of the deploy machine.
//!
//! Each state is a step that takes the release snapshot and returns a
//! new snapshot or a typed error; routing and retry live in the driver.
//! Ordering rules the steps uphold: the prior ASG is untouched until
//! the success cleanup, the new ASG is deleted before the lock is
//! released on failure, and the lock is released last on success.

use chrono::Utc;
use tracing::{info, warn};

use slipway_cloud::Clients;
use slipway_core::Release;
use slipway_lock::LockManager;

use crate::error::{DeployError, DeployResult};
use crate::release as release_ops;
use crate::service;

/// Pad added to the derived slow-start duration when the release does
/// not set `wait_for_healthy` explicitly.
const WAIT_FOR_HEALTHY_PAD_SECS: u32 = 10;

/// Validate and set defaults. Runs before the lock is taken, so any
/// error here leaves nothing to clean up.
pub async fn validate(clients: &Clients, mut release: Release) -> DeployResult<Release> {
    release.set_defaults();
    release.validate()?;

    // The synthetic create payloads must pass the cloud's own
    // pre-flight checks before we commit to anything.
    let scope = release.scope();
    for svc in release.services.values() {
        service::preflight(&scope, svc)?;
    }

    // The client uploads the document before starting the execution;
    // a missing or mismatched upload means we are not looking at the
    // release the operator submitted.
    match release_ops::stored_document(clients, &release).await? {
        None => {
            return Err(DeployError::Validation(format!(
                "release document not found at {}",
                release.document_key()
            )))
        }
        Some(stored) => {
            if stored.uuid != release.uuid || stored.release_id != release.release_id {
                return Err(DeployError::Validation(
                    "stored release document does not match this release".to_string(),
                ));
            }
        }
    }

    info!(
        project = %release.project_name,
        config = %release.config_name,
        release = %release.release_id,
        services = release.services.len(),
        "release validated"
    );
    Ok(release)
}

/// Take the `(project, config)` lock and capture each service's prior
/// desired capacity while we hold it.
pub async fn lock(clients: &Clients, mut release: Release) -> DeployResult<Release> {
    let manager = LockManager::new(clients.store.clone(), &release.bucket);
    manager
        .acquire(&release.lock_key(), &release.uuid.to_string())
        .await?;

    let scope = release.scope();
    for (name, svc) in release.services.iter_mut() {
        let previous = release_ops::find_previous_asgs(clients, &scope, name).await?;
        svc.previous_desired_capacity = previous
            .iter()
            .map(|group| group.desired_capacity)
            .max();
        if let Some(capacity) = svc.previous_desired_capacity {
            info!(service = %name, previous_desired_capacity = capacity, "prior group found");
        }
    }

    Ok(release)
}

/// Resolve every referenced cloud resource, and derive the health poll
/// interval from target group slow-start when not set explicitly.
pub async fn validate_resources(clients: &Clients, mut release: Release) -> DeployResult<Release> {
    let scope = release.scope();
    for svc in release.services.values_mut() {
        service::fetch_resources(clients, &scope, svc).await?;
    }

    if release.wait_for_healthy.is_none() {
        let mut longest = 0;
        for svc in release.services.values() {
            longest = longest.max(service::slow_start_duration(clients, svc).await?);
        }
        release.wait_for_healthy = Some(longest + WAIT_FOR_HEALTHY_PAD_SECS);
        info!(
            wait_for_healthy = longest + WAIT_FOR_HEALTHY_PAD_SECS,
            "derived health poll interval from slow-start"
        );
    }

    Ok(release)
}

/// Create the new launch configurations, groups, policies and alarms.
pub async fn deploy(clients: &Clients, mut release: Release) -> DeployResult<Release> {
    if release_ops::is_halted(clients, &release).await? {
        return Err(DeployError::Halt("halt flag present before deploy".to_string()));
    }

    let scope = release.scope();
    for svc in release.services.values_mut() {
        service::create_resources(clients, &scope, svc).await?;
    }

    release.deploy_started_at = Some(Utc::now());
    Ok(release)
}

/// Poll every service's health once and fold the verdicts into
/// `release.healthy`.
pub async fn check_healthy(clients: &Clients, mut release: Release) -> DeployResult<Release> {
    if release_ops::is_halted(clients, &release).await? {
        return Err(DeployError::Halt("halt flag raised by operator".to_string()));
    }

    let scope = release.scope();
    let mut all_healthy = true;
    for svc in release.services.values_mut() {
        service::update_healthy(clients, &scope, svc).await?;
        all_healthy &= svc.healthy;
    }

    if !all_healthy {
        let elapsed = release
            .deploy_started_at
            .map(|started| (Utc::now() - started).num_seconds().max(0) as u32);
        for svc in release.services.values() {
            let budget = svc.autoscaling.timeout.or(release.timeout);
            if let (Some(elapsed), Some(budget)) = (elapsed, budget) {
                if !svc.healthy && elapsed >= budget {
                    return Err(DeployError::Timeout(budget));
                }
            }
        }
    }

    release.healthy = Some(all_healthy);
    Ok(release)
}

/// Promote the new groups and retire the old ones, then release the
/// lock. This is the only state that touches prior ASGs.
pub async fn clean_up_success(clients: &Clients, release: Release) -> DeployResult<Release> {
    let scope = release.scope();

    for (name, svc) in release.services.iter() {
        service::reset_desired_capacity(clients, svc).await?;

        for old in release_ops::find_previous_asgs(clients, &scope, name).await? {
            info!(service = %name, asg = %old.name, "retiring prior group");
            service::delete_asg_and_launch_config(
                clients,
                &old.name,
                &old.launch_configuration_name,
            )
            .await?;
        }
    }

    let manager = LockManager::new(clients.store.clone(), &release.bucket);
    manager
        .release(&release.lock_key(), &release.uuid.to_string())
        .await?;

    info!(release = %release.release_id, "deploy promoted");
    Ok(release)
}

/// Delete everything this release created. Never touches a group that
/// was not created by this execution.
pub async fn clean_up_failure(clients: &Clients, release: Release) -> DeployResult<Release> {
    for (name, svc) in release.services.iter() {
        let Some(created) = svc.created_asg.clone() else {
            continue;
        };
        warn!(service = %name, asg = %created, "deleting group after failed deploy");
        service::delete_asg_and_launch_config(clients, &created, &created).await?;
    }
    Ok(release)
}

/// Release the lock iff this release still holds it.
pub async fn release_lock_failure(clients: &Clients, release: Release) -> DeployResult<Release> {
    let manager = LockManager::new(clients.store.clone(), &release.bucket);
    manager
        .release(&release.lock_key(), &release.uuid.to_string())
        .await?;
    Ok(release)
}
