//! Capability traits for the consumed cloud surface.
//!
//! One trait per cloud service, bundled into [`Clients`]. The state
//! machine takes a `Clients` explicitly instead of reaching for ambient
//! globals, so every test can swap in the in-memory fakes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CloudResult;
use crate::types::{
    AsgInput, AsgInstance, AsgState, InstanceProfile, LaunchConfigInput, MetricAlarmInput,
    PlacementGroup, ScalingPolicyInput, TargetGroup,
};

/// Auto-scaling API.
#[async_trait]
pub trait AsgApi: Send + Sync {
    async fn create_launch_configuration(&self, input: &LaunchConfigInput) -> CloudResult<()>;
    async fn create_auto_scaling_group(&self, input: &AsgInput) -> CloudResult<()>;
    async fn update_auto_scaling_group(
        &self,
        name: &str,
        min_size: u32,
        desired_capacity: u32,
    ) -> CloudResult<()>;
    /// Describe every group in the account.
    async fn describe_auto_scaling_groups(&self) -> CloudResult<Vec<AsgState>>;
    /// Describe one group together with its instances.
    async fn describe_instances(&self, asg_name: &str)
        -> CloudResult<(AsgState, Vec<AsgInstance>)>;
    async fn enable_metrics_collection(&self, asg_name: &str, granularity: &str)
        -> CloudResult<()>;
    /// Returns the created policy's ARN.
    async fn put_scaling_policy(&self, input: &ScalingPolicyInput) -> CloudResult<String>;
    async fn delete_auto_scaling_group(&self, name: &str) -> CloudResult<()>;
    async fn delete_launch_configuration(&self, name: &str) -> CloudResult<()>;
}

/// Classic load balancer API.
#[async_trait]
pub trait ElbApi: Send + Sync {
    /// Returns the subset of `names` that exist.
    async fn describe_load_balancers(&self, names: &[String]) -> CloudResult<Vec<String>>;
    /// Per-instance health as seen by one load balancer.
    async fn describe_instance_health(
        &self,
        lb_name: &str,
        instance_ids: &[String],
    ) -> CloudResult<BTreeMap<String, bool>>;
}

/// Application load balancer target group API.
#[async_trait]
pub trait TargetGroupApi: Send + Sync {
    /// Returns the subset of `arns` that exist.
    async fn describe_target_groups(&self, arns: &[String]) -> CloudResult<Vec<TargetGroup>>;
    async fn describe_target_group_attributes(
        &self,
        arn: &str,
    ) -> CloudResult<BTreeMap<String, String>>;
    /// Per-instance health as seen by one target group.
    async fn describe_target_health(
        &self,
        arn: &str,
        instance_ids: &[String],
    ) -> CloudResult<BTreeMap<String, bool>>;
}

/// IAM lookups.
#[async_trait]
pub trait IamApi: Send + Sync {
    async fn get_instance_profile(&self, name: &str) -> CloudResult<InstanceProfile>;
}

/// EC2 lookups and placement groups.
#[async_trait]
pub trait Ec2Api: Send + Sync {
    /// Resolve security group names to ids; missing names are omitted.
    async fn describe_security_groups(
        &self,
        names: &[String],
    ) -> CloudResult<BTreeMap<String, String>>;
    async fn describe_placement_group(&self, name: &str) -> CloudResult<Option<PlacementGroup>>;
    async fn create_placement_group(
        &self,
        name: &str,
        strategy: &str,
        partition_count: Option<u32>,
    ) -> CloudResult<()>;
}

/// CloudWatch alarms.
#[async_trait]
pub trait CloudWatchApi: Send + Sync {
    async fn put_metric_alarm(&self, input: &MetricAlarmInput) -> CloudResult<()>;
}

/// Object store with conditional put, for the lock and control objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Option<Vec<u8>>>;
    async fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> CloudResult<()>;
    /// Atomic if-none-match put. Returns `false` when the key exists.
    async fn put_object_if_absent(&self, bucket: &str, key: &str, body: &[u8])
        -> CloudResult<bool>;
    async fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()>;
    async fn object_exists(&self, bucket: &str, key: &str) -> CloudResult<bool>;
}

/// The capability bundle threaded through the state machine.
#[derive(Clone)]
pub struct Clients {
    pub asg: Arc<dyn AsgApi>,
    pub elb: Arc<dyn ElbApi>,
    pub target_groups: Arc<dyn TargetGroupApi>,
    pub iam: Arc<dyn IamApi>,
    pub ec2: Arc<dyn Ec2Api>,
    pub cloudwatch: Arc<dyn CloudWatchApi>,
    pub store: Arc<dyn ObjectStore>,
}
