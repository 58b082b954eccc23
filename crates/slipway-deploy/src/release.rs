//! Release-level operations: control objects and prior-ASG discovery.
//!
//! The object store carries three control objects per release: the
//! `(project, config)` lock, the uploaded release document, and the
//! operator halt flag. Prior groups are discovered by identity tags
//! only; nothing without matching `ProjectName` and `ConfigName` tags
//! is ever touched.

use tracing::{debug, info};

use slipway_cloud::{AsgState, Clients};
use slipway_core::{Release, ReleaseScope};

use crate::error::{DeployError, DeployResult};

/// Upload the release document to its well-known key.
pub async fn upload_document(clients: &Clients, release: &Release) -> DeployResult<()> {
    let body = serde_json::to_vec(release)
        .map_err(|err| DeployError::Validation(format!("unserializable release: {err}")))?;
    clients
        .store
        .put_object(&release.bucket, &release.document_key(), &body)
        .await?;
    debug!(key = %release.document_key(), "release document uploaded");
    Ok(())
}

/// Read back the uploaded release document, if present.
pub async fn stored_document(clients: &Clients, release: &Release) -> DeployResult<Option<Release>> {
    let body = clients
        .store
        .get_object(&release.bucket, &release.document_key())
        .await?;
    match body {
        None => Ok(None),
        Some(bytes) => {
            let stored = serde_json::from_slice(&bytes).map_err(|err| {
                DeployError::Validation(format!("stored release document unparsable: {err}"))
            })?;
            Ok(Some(stored))
        }
    }
}

/// Raise the operator halt flag for this release.
pub async fn halt(clients: &Clients, release: &Release) -> DeployResult<()> {
    clients
        .store
        .put_object(&release.bucket, &release.halt_key(), b"halt")
        .await?;
    info!(key = %release.halt_key(), "halt flag raised");
    Ok(())
}

/// Whether the operator halt flag is present.
pub async fn is_halted(clients: &Clients, release: &Release) -> DeployResult<bool> {
    Ok(clients
        .store
        .object_exists(&release.bucket, &release.halt_key())
        .await?)
}

/// Find this service's ASGs from earlier releases: identity tags match
/// but the group name differs from the one this release would create.
pub async fn find_previous_asgs(
    clients: &Clients,
    scope: &ReleaseScope,
    service_name: &str,
) -> DeployResult<Vec<AsgState>> {
    let service_id = scope.service_id(service_name);
    let groups = clients.asg.describe_auto_scaling_groups().await?;

    Ok(groups
        .into_iter()
        .filter(|group| {
            group.name != service_id
                && group.tag("ProjectName") == Some(scope.project_name.as_str())
                && group.tag("ConfigName") == Some(scope.config_name.as_str())
                && group.tag("ServiceName") == Some(service_name)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use slipway_cloud::{MemoryCloud, MemoryStore};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn test_release() -> Release {
        let mut release = Release {
            project_name: "books".to_string(),
            config_name: "production".to_string(),
            release_id: "42".to_string(),
            uuid: Uuid::from_u128(7),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            bucket: "deploys".to_string(),
            aws_account_id: "000011112222".to_string(),
            aws_region: "us-east-1".to_string(),
            subnets: vec!["subnet-1".to_string()],
            timeout: None,
            wait_for_healthy: None,
            lifecycle_hooks: BTreeMap::new(),
            services: BTreeMap::new(),
            healthy: None,
            error: None,
            deploy_started_at: None,
        };
        release.set_defaults();
        release
    }

    fn tagged_asg(name: &str, service: &str, desired: u32) -> AsgState {
        AsgState {
            name: name.to_string(),
            launch_configuration_name: name.to_string(),
            min_size: 1,
            max_size: 10,
            desired_capacity: desired,
            tags: BTreeMap::from([
                ("ProjectName".to_string(), "books".to_string()),
                ("ConfigName".to_string(), "production".to_string()),
                ("ServiceName".to_string(), service.to_string()),
            ]),
        }
    }

    #[tokio::test]
    async fn halt_flag_round_trip() {
        let cloud = MemoryCloud::new();
        let store = MemoryStore::new();
        let clients = cloud.clients(&store);
        let release = test_release();

        assert!(!is_halted(&clients, &release).await.unwrap());
        halt(&clients, &release).await.unwrap();
        assert!(is_halted(&clients, &release).await.unwrap());
    }

    #[tokio::test]
    async fn document_upload_and_read_back() {
        let cloud = MemoryCloud::new();
        let store = MemoryStore::new();
        let clients = cloud.clients(&store);
        let release = test_release();

        assert!(stored_document(&clients, &release).await.unwrap().is_none());
        upload_document(&clients, &release).await.unwrap();

        let stored = stored_document(&clients, &release).await.unwrap().unwrap();
        assert_eq!(stored.uuid, release.uuid);
        assert_eq!(stored.release_id, release.release_id);
    }

    #[tokio::test]
    async fn previous_asgs_match_tags_and_exclude_own_id() {
        let cloud = MemoryCloud::new();
        let store = MemoryStore::new();
        let clients = cloud.clients(&store);
        let release = test_release();
        let scope = release.scope();

        cloud.seed_asg(tagged_asg("books-production-old-web", "web", 7));
        // Same tags, but it is the group this release would create.
        cloud.seed_asg(tagged_asg(&scope.service_id("web"), "web", 2));
        // Different service.
        cloud.seed_asg(tagged_asg("books-production-old-worker", "worker", 3));
        // Untagged stranger.
        cloud.seed_asg(AsgState {
            name: "someone-elses-group".to_string(),
            ..AsgState::default()
        });

        let previous = find_previous_asgs(&clients, &scope, "web").await.unwrap();
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].name, "books-production-old-web");
        assert_eq!(previous[0].desired_capacity, 7);
    }
}
