//! Input validation for the release document.
//!
//! Validation runs once, before the lock is taken, and again as the
//! cloud-input pre-flight inside the Deploy crate. Everything here is
//! pure; no cloud call is made.

use std::collections::BTreeSet;

use crate::error::{ValidationError, ValidationResult};
use crate::types::{
    AutoScalingConfig, LifeCycleHook, PlacementStrategy, PolicyKind, Release, Service,
};

const LAUNCHING: &str = "autoscaling:EC2_INSTANCE_LAUNCHING";
const TERMINATING: &str = "autoscaling:EC2_INSTANCE_TERMINATING";

impl Release {
    /// Validate the whole document. `set_defaults` must have run.
    pub fn validate(&self) -> ValidationResult {
        let scope = "release";

        for (field, value) in [
            ("project_name", &self.project_name),
            ("config_name", &self.config_name),
            ("release_id", &self.release_id),
            ("bucket", &self.bucket),
            ("aws_account_id", &self.aws_account_id),
            ("aws_region", &self.aws_region),
        ] {
            if value.is_empty() {
                return Err(ValidationError::new(scope, format!("{field} must be set")));
            }
        }

        // These become object-store key segments.
        for (field, value) in [
            ("project_name", &self.project_name),
            ("config_name", &self.config_name),
            ("release_id", &self.release_id),
        ] {
            if value.contains('/') {
                return Err(ValidationError::new(
                    scope,
                    format!("{field} must not contain '/'"),
                ));
            }
        }

        if self.uuid.is_nil() {
            return Err(ValidationError::new(scope, "uuid must be set"));
        }

        if self.subnets.is_empty() {
            return Err(ValidationError::new(scope, "subnets must be included"));
        }
        if !all_unique(&self.subnets) {
            return Err(ValidationError::new(scope, "subnets must be unique"));
        }

        if self.services.is_empty() {
            return Err(ValidationError::new(scope, "services must be included"));
        }

        for (name, hook) in &self.lifecycle_hooks {
            hook.validate(name)?;
        }

        for service in self.services.values() {
            service.validate_attributes()?;
        }

        Ok(())
    }
}

impl Service {
    /// Validate the service's own attributes. The synthetic cloud-input
    /// pre-flight runs separately, where the inputs are built.
    pub fn validate_attributes(&self) -> ValidationResult {
        let scope = match &self.service_name {
            Some(name) if !name.is_empty() => format!("service {name}"),
            _ => {
                return Err(ValidationError::new(
                    "service",
                    "service_name must be defined",
                ))
            }
        };

        if self.instance_type.is_empty() {
            return Err(ValidationError::new(
                &scope,
                "instance_type must be defined",
            ));
        }

        if self.security_groups.is_empty() {
            return Err(ValidationError::new(
                &scope,
                "security_groups must be included",
            ));
        }
        if !all_unique(&self.security_groups) {
            return Err(ValidationError::new(
                &scope,
                "security_groups must be unique",
            ));
        }
        if !all_unique(&self.elbs) {
            return Err(ValidationError::new(&scope, "elbs must be unique"));
        }
        if !all_unique(&self.target_groups) {
            return Err(ValidationError::new(&scope, "target_groups must be unique"));
        }

        self.validate_placement_group(&scope)?;
        self.validate_block_device(&scope)?;
        self.autoscaling.validate(&scope)?;

        Ok(())
    }

    fn validate_placement_group(&self, scope: &str) -> ValidationResult {
        let Some(_name) = &self.placement_group_name else {
            if self.placement_group_strategy.is_some()
                || self.placement_group_partition_count.is_some()
            {
                return Err(ValidationError::new(
                    scope,
                    "placement group settings require placement_group_name",
                ));
            }
            return Ok(());
        };

        let Some(strategy) = self.placement_group_strategy else {
            return Err(ValidationError::new(
                scope,
                "placement_group_strategy must be defined with placement_group_name",
            ));
        };

        match (strategy, self.placement_group_partition_count) {
            (PlacementStrategy::Partition, None) => Err(ValidationError::new(
                scope,
                "placement_group_partition_count must be defined for the partition strategy",
            )),
            (PlacementStrategy::Partition, Some(0)) => Err(ValidationError::new(
                scope,
                "placement_group_partition_count must be positive",
            )),
            (PlacementStrategy::Cluster | PlacementStrategy::Spread, Some(_)) => {
                Err(ValidationError::new(
                    scope,
                    "placement_group_partition_count is only valid for the partition strategy",
                ))
            }
            _ => Ok(()),
        }
    }

    fn validate_block_device(&self, scope: &str) -> ValidationResult {
        let parts = [
            self.ebs_volume_size.is_some(),
            self.ebs_volume_type.is_some(),
            self.ebs_device_name.is_some(),
        ];
        if parts.iter().any(|set| *set) && !parts.iter().all(|set| *set) {
            return Err(ValidationError::new(
                scope,
                "ebs_volume_size, ebs_volume_type and ebs_device_name must be set together",
            ));
        }
        Ok(())
    }
}

impl AutoScalingConfig {
    pub fn validate(&self, scope: &str) -> ValidationResult {
        if self.min_size > self.max_size {
            return Err(ValidationError::new(
                scope,
                format!(
                    "min_size {} must not exceed max_size {}",
                    self.min_size, self.max_size
                ),
            ));
        }

        for policy in &self.policies {
            if !policy.threshold.is_finite() || policy.threshold <= 0.0 {
                return Err(ValidationError::new(
                    scope,
                    "policy threshold must be a positive number",
                ));
            }
            match policy.kind {
                PolicyKind::CpuScaleUp if policy.scaling_adjustment <= 0 => {
                    return Err(ValidationError::new(
                        scope,
                        "cpu_scale_up adjustment must be positive",
                    ));
                }
                PolicyKind::CpuScaleDown if policy.scaling_adjustment >= 0 => {
                    return Err(ValidationError::new(
                        scope,
                        "cpu_scale_down adjustment must be negative",
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

impl LifeCycleHook {
    pub fn validate(&self, name: &str) -> ValidationResult {
        let scope = format!("lifecycle hook {name}");

        if name.is_empty() {
            return Err(ValidationError::new("lifecycle hook", "name must be set"));
        }

        match self.lifecycle_transition.as_deref() {
            Some(LAUNCHING) | Some(TERMINATING) => {}
            Some(other) => {
                return Err(ValidationError::new(
                    &scope,
                    format!("unknown lifecycle_transition {other:?}"),
                ));
            }
            None => {
                return Err(ValidationError::new(
                    &scope,
                    "lifecycle_transition must be set",
                ));
            }
        }

        if self.heartbeat_timeout.is_none() {
            return Err(ValidationError::new(&scope, "heartbeat_timeout must be set"));
        }
        if self.default_result.is_none() {
            return Err(ValidationError::new(&scope, "default_result must be set"));
        }

        Ok(())
    }
}

fn all_unique(items: &[String]) -> bool {
    let mut seen = BTreeSet::new();
    items.iter().all(|item| seen.insert(item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HookResult, ScalingPolicy};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn valid_service() -> Service {
        Service {
            service_name: Some("web".to_string()),
            instance_type: "t3.small".to_string(),
            security_groups: vec!["web-sg".to_string()],
            elbs: vec!["web-elb".to_string()],
            ..Service::default()
        }
    }

    fn valid_release() -> Release {
        let mut release = Release {
            project_name: "books".to_string(),
            config_name: "production".to_string(),
            release_id: "42".to_string(),
            uuid: Uuid::from_u128(9),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            bucket: "deploys".to_string(),
            aws_account_id: "000011112222".to_string(),
            aws_region: "us-east-1".to_string(),
            subnets: vec!["subnet-1".to_string()],
            timeout: None,
            wait_for_healthy: None,
            lifecycle_hooks: BTreeMap::new(),
            services: BTreeMap::from([("web".to_string(), valid_service())]),
            healthy: None,
            error: None,
            deploy_started_at: None,
        };
        release.set_defaults();
        release
    }

    #[test]
    fn valid_release_passes() {
        assert!(valid_release().validate().is_ok());
    }

    #[test]
    fn empty_project_name_fails() {
        let mut release = valid_release();
        release.project_name.clear();
        assert!(release.validate().is_err());
    }

    #[test]
    fn slash_in_release_id_fails() {
        let mut release = valid_release();
        release.release_id = "4/2".to_string();
        assert!(release.validate().is_err());
    }

    #[test]
    fn nil_uuid_fails() {
        let mut release = valid_release();
        release.uuid = Uuid::nil();
        assert!(release.validate().is_err());
    }

    #[test]
    fn no_services_fails() {
        let mut release = valid_release();
        release.services.clear();
        assert!(release.validate().is_err());
    }

    #[test]
    fn missing_instance_type_fails() {
        let mut release = valid_release();
        release.services.get_mut("web").unwrap().instance_type.clear();
        assert!(release.validate().is_err());
    }

    #[test]
    fn missing_security_groups_fails() {
        let mut release = valid_release();
        release.services.get_mut("web").unwrap().security_groups.clear();
        assert!(release.validate().is_err());
    }

    #[test]
    fn duplicate_elbs_fail() {
        let mut release = valid_release();
        release.services.get_mut("web").unwrap().elbs =
            vec!["a".to_string(), "a".to_string()];
        assert!(release.validate().is_err());
    }

    #[test]
    fn min_above_max_fails() {
        let mut release = valid_release();
        let autoscaling = &mut release.services.get_mut("web").unwrap().autoscaling;
        autoscaling.min_size = 5;
        autoscaling.max_size = 2;
        assert!(release.validate().is_err());
    }

    #[test]
    fn scale_up_policy_needs_positive_adjustment() {
        let mut release = valid_release();
        release
            .services
            .get_mut("web")
            .unwrap()
            .autoscaling
            .policies
            .push(ScalingPolicy {
                kind: PolicyKind::CpuScaleUp,
                threshold: 75.0,
                scaling_adjustment: -1,
            });
        assert!(release.validate().is_err());
    }

    #[test]
    fn scale_down_policy_needs_negative_adjustment() {
        let mut release = valid_release();
        release
            .services
            .get_mut("web")
            .unwrap()
            .autoscaling
            .policies
            .push(ScalingPolicy {
                kind: PolicyKind::CpuScaleDown,
                threshold: 20.0,
                scaling_adjustment: 0,
            });
        assert!(release.validate().is_err());
    }

    #[test]
    fn partition_strategy_requires_count() {
        let mut release = valid_release();
        {
            let web = release.services.get_mut("web").unwrap();
            web.placement_group_name = Some("pg".to_string());
            web.placement_group_strategy = Some(PlacementStrategy::Partition);
        }
        assert!(release.validate().is_err());

        {
            let web = release.services.get_mut("web").unwrap();
            web.placement_group_partition_count = Some(3);
        }
        assert!(release.validate().is_ok());
    }

    #[test]
    fn cluster_strategy_rejects_partition_count() {
        let mut release = valid_release();
        let web = release.services.get_mut("web").unwrap();
        web.placement_group_name = Some("pg".to_string());
        web.placement_group_strategy = Some(PlacementStrategy::Cluster);
        web.placement_group_partition_count = Some(3);
        assert!(release.validate().is_err());
    }

    #[test]
    fn partial_block_device_fails() {
        let mut release = valid_release();
        release.services.get_mut("web").unwrap().ebs_volume_size = Some(100);
        assert!(release.validate().is_err());

        let web = release.services.get_mut("web").unwrap();
        web.ebs_volume_type = Some("gp3".to_string());
        web.ebs_device_name = Some("/dev/xvdb".to_string());
        assert!(release.validate().is_ok());
    }

    #[test]
    fn incomplete_lifecycle_hook_fails() {
        let mut release = valid_release();
        release.lifecycle_hooks.insert(
            "term".to_string(),
            LifeCycleHook {
                lifecycle_transition: Some(TERMINATING.to_string()),
                heartbeat_timeout: None,
                default_result: Some(HookResult::Continue),
            },
        );
        assert!(release.validate().is_err());
    }

    #[test]
    fn unknown_transition_fails() {
        let mut release = valid_release();
        release.lifecycle_hooks.insert(
            "term".to_string(),
            LifeCycleHook {
                lifecycle_transition: Some("autoscaling:EC2_INSTANCE_REBOOTING".to_string()),
                heartbeat_timeout: Some(300),
                default_result: Some(HookResult::Abandon),
            },
        );
        assert!(release.validate().is_err());
    }
}
