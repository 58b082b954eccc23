//! Request and response records for the consumed cloud surface.
//!
//! Create-inputs carry their own pre-flight `validate()`, mirroring the
//! cloud API's request validator, so a release can be rejected before
//! the lock is taken.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CloudError, CloudResult};

/// Resource names are capped by the cloud API.
const MAX_NAME_LEN: usize = 255;

// ── Launch configuration ───────────────────────────────────────────

/// CreateLaunchConfiguration request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LaunchConfigInput {
    pub name: String,
    pub image_id: Option<String>,
    pub instance_type: String,
    pub security_group_ids: Vec<String>,
    pub iam_instance_profile: Option<String>,
    /// Base64-encoded user data.
    pub user_data: Option<String>,
    pub spot_price: Option<String>,
    pub associate_public_ip_address: Option<bool>,
    pub block_device: Option<BlockDevice>,
}

/// EBS block device mapping on a launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockDevice {
    pub volume_size: u32,
    pub volume_type: String,
    pub device_name: String,
}

impl LaunchConfigInput {
    /// The checks the cloud API applies before accepting the request.
    pub fn validate(&self) -> CloudResult<()> {
        validate_name("launch configuration", &self.name)?;
        if self.instance_type.is_empty() {
            return Err(CloudError::InvalidRequest(
                "instance_type must be set".to_string(),
            ));
        }
        if self.security_group_ids.is_empty() {
            return Err(CloudError::InvalidRequest(
                "at least one security group is required".to_string(),
            ));
        }
        Ok(())
    }
}

// ── Auto-scaling group ─────────────────────────────────────────────

/// CreateAutoScalingGroup request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AsgInput {
    pub name: String,
    pub launch_configuration_name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub default_cooldown: Option<u32>,
    pub health_check_grace_period: Option<u32>,
    pub load_balancer_names: Vec<String>,
    pub target_group_arns: Vec<String>,
    /// Comma-joined subnet ids.
    pub vpc_zone_identifier: String,
    pub placement_group: Option<String>,
    pub lifecycle_hooks: Vec<LifecycleHookSpec>,
    pub tags: BTreeMap<String, String>,
}

/// Lifecycle hook attached at group creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleHookSpec {
    pub name: String,
    pub lifecycle_transition: String,
    pub heartbeat_timeout: u32,
    pub default_result: String,
}

impl AsgInput {
    /// The checks the cloud API applies before accepting the request.
    pub fn validate(&self) -> CloudResult<()> {
        validate_name("auto-scaling group", &self.name)?;
        validate_name("launch configuration", &self.launch_configuration_name)?;
        if self.min_size > self.max_size {
            return Err(CloudError::InvalidRequest(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        if self.desired_capacity < self.min_size || self.desired_capacity > self.max_size {
            return Err(CloudError::InvalidRequest(format!(
                "desired_capacity {} outside [{}, {}]",
                self.desired_capacity, self.min_size, self.max_size
            )));
        }
        if self.vpc_zone_identifier.is_empty() {
            return Err(CloudError::InvalidRequest(
                "vpc_zone_identifier must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// The described state this group will have right after creation.
    pub fn to_state(&self) -> AsgState {
        AsgState {
            name: self.name.clone(),
            launch_configuration_name: self.launch_configuration_name.clone(),
            min_size: self.min_size,
            max_size: self.max_size,
            desired_capacity: self.desired_capacity,
            tags: self.tags.clone(),
        }
    }
}

/// Described state of an auto-scaling group.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AsgState {
    pub name: String,
    pub launch_configuration_name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub tags: BTreeMap<String, String>,
}

impl AsgState {
    /// Tag lookup helper.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// One instance as reported by DescribeAutoScalingInstances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AsgInstance {
    pub id: String,
    pub lifecycle_state: InstanceLifecycle,
}

/// The lifecycle states the deployer cares about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstanceLifecycle {
    Pending,
    InService,
    Terminating,
}

// ── Scaling policies and alarms ────────────────────────────────────

/// PutScalingPolicy request. The response is the policy ARN.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScalingPolicyInput {
    pub asg_name: String,
    pub policy_name: String,
    pub scaling_adjustment: i32,
    pub cooldown: Option<u32>,
}

/// PutMetricAlarm request wiring a CPU alarm to a scaling policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricAlarmInput {
    pub alarm_name: String,
    pub namespace: String,
    pub metric_name: String,
    pub comparison: ComparisonOperator,
    pub threshold: f64,
    pub period: u32,
    pub evaluation_periods: u32,
    pub alarm_actions: Vec<String>,
    pub dimensions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ComparisonOperator {
    GreaterThanOrEqualToThreshold,
    LessThanOrEqualToThreshold,
}

// ── Lookups ────────────────────────────────────────────────────────

/// Described target group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetGroup {
    pub arn: String,
    pub name: String,
}

/// Described IAM instance profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceProfile {
    pub name: String,
    pub arn: String,
}

/// Described placement group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlacementGroup {
    pub name: String,
    pub strategy: String,
    pub partition_count: Option<u32>,
}

fn validate_name(what: &str, name: &str) -> CloudResult<()> {
    if name.is_empty() {
        return Err(CloudError::InvalidRequest(format!(
            "{what} name must be set"
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CloudError::InvalidRequest(format!(
            "{what} name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asg_input() -> AsgInput {
        AsgInput {
            name: "books-production-x-web".to_string(),
            launch_configuration_name: "books-production-x-web".to_string(),
            min_size: 2,
            max_size: 10,
            desired_capacity: 2,
            vpc_zone_identifier: "subnet-1".to_string(),
            ..AsgInput::default()
        }
    }

    #[test]
    fn asg_input_valid() {
        assert!(asg_input().validate().is_ok());
    }

    #[test]
    fn asg_input_rejects_min_above_max() {
        let mut input = asg_input();
        input.min_size = 11;
        assert!(matches!(
            input.validate(),
            Err(CloudError::InvalidRequest(_))
        ));
    }

    #[test]
    fn asg_input_rejects_desired_outside_bounds() {
        let mut input = asg_input();
        input.desired_capacity = 11;
        assert!(input.validate().is_err());

        input.desired_capacity = 1;
        assert!(input.validate().is_err());
    }

    #[test]
    fn asg_input_requires_subnets() {
        let mut input = asg_input();
        input.vpc_zone_identifier.clear();
        assert!(input.validate().is_err());
    }

    #[test]
    fn launch_config_requires_security_groups() {
        let input = LaunchConfigInput {
            name: "lc".to_string(),
            instance_type: "t3.small".to_string(),
            ..LaunchConfigInput::default()
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn overlong_name_rejected() {
        let mut input = asg_input();
        input.name = "x".repeat(256);
        assert!(input.validate().is_err());
    }
}
