//! Domain types for the slipway release document.
//!
//! These types mirror the JSON release document uploaded by the client
//! and threaded through the deploy state machine. Runtime-only fields
//! (`resources`, `created_asg`, `health_report`, ...) are part of the
//! same structs but skipped when absent, so a freshly parsed document
//! re-serializes to the keys the client wrote.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Release ────────────────────────────────────────────────────────

/// The root deployable entity: a set of services sharing one lock and
/// one lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub config_name: String,
    #[serde(default)]
    pub release_id: String,
    #[serde(default)]
    pub uuid: Uuid,
    pub created_at: DateTime<Utc>,

    /// Object-store bucket holding the lock, halt flag, and document.
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub aws_account_id: String,
    #[serde(default)]
    pub aws_region: String,
    /// Subnet ids the new auto-scaling groups span.
    #[serde(default)]
    pub subnets: Vec<String>,

    /// Per-service health poll budget in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    /// Seconds to wait between health polls. When absent it is derived
    /// from the target groups' slow-start duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_healthy: Option<u32>,

    /// Lifecycle hooks installed on every created auto-scaling group.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lifecycle_hooks: BTreeMap<String, LifeCycleHook>,
    #[serde(default)]
    pub services: BTreeMap<String, Service>,

    /// All-services health verdict from the last poll. `None` until a
    /// poll has run; the state machine treats `None` as a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
    /// Last error written by a state, kept in the snapshot for the
    /// operator-facing execution record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StateFault>,
    /// Set by the Deploy state; the health poll deadline counts from here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_started_at: Option<DateTime<Utc>>,
}

/// The error slot written into the release snapshot by a failing state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateFault {
    /// Name of the state that produced the error.
    pub state: String,
    pub message: String,
}

impl Release {
    /// Object-store prefix for this release's objects.
    pub fn release_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.project_name, self.config_name, self.release_id
        )
    }

    /// Key of the `(project, config)` lock object.
    pub fn lock_key(&self) -> String {
        format!("{}/{}/lock", self.project_name, self.config_name)
    }

    /// Key of the operator halt flag.
    pub fn halt_key(&self) -> String {
        format!("{}/halt", self.release_path())
    }

    /// Key of the uploaded release document.
    pub fn document_key(&self) -> String {
        format!("{}/release.json", self.release_path())
    }

    /// Snapshot of the release-level fields service operations need.
    ///
    /// Services hold no back-pointer to the release; callers pass a
    /// scope alongside the service instead.
    pub fn scope(&self) -> ReleaseScope {
        ReleaseScope {
            project_name: self.project_name.clone(),
            config_name: self.config_name.clone(),
            release_id: self.release_id.clone(),
            uuid: self.uuid,
            created_at: self.created_at,
            bucket: self.bucket.clone(),
            aws_account_id: self.aws_account_id.clone(),
            aws_region: self.aws_region.clone(),
            subnets: self.subnets.clone(),
            lifecycle_hooks: self.lifecycle_hooks.clone(),
        }
    }

    /// The ASG / launch-configuration name for one of this release's
    /// services. See [`ReleaseScope::service_id`].
    pub fn service_id(&self, service_name: &str) -> String {
        self.scope().service_id(service_name)
    }

    /// Fill generated fields and defaults. Must run before validation.
    pub fn set_defaults(&mut self) {
        const DEFAULT_TIMEOUT_SECS: u32 = 600;

        if self.timeout.is_none() {
            self.timeout = Some(DEFAULT_TIMEOUT_SECS);
        }

        let timeout = self.timeout;
        for (name, service) in self.services.iter_mut() {
            service.service_name = Some(name.clone());
            if service.autoscaling.timeout.is_none() {
                service.autoscaling.timeout = timeout;
            }
        }
    }
}

// ── Release scope ──────────────────────────────────────────────────

/// Release-level fields passed into per-service operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseScope {
    pub project_name: String,
    pub config_name: String,
    pub release_id: String,
    pub uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub bucket: String,
    pub aws_account_id: String,
    pub aws_region: String,
    pub subnets: Vec<String>,
    pub lifecycle_hooks: BTreeMap<String, LifeCycleHook>,
}

impl ReleaseScope {
    /// The identity shared by a service's ASG and launch configuration:
    /// `{project}-{config}-{created_at}-{service}`, with the timestamp's
    /// colons replaced so the whole string is a valid resource name.
    pub fn service_id(&self, service_name: &str) -> String {
        let stamp = self
            .created_at
            .to_rfc3339_opts(SecondsFormat::Secs, true)
            .replace(':', "-");
        format!(
            "{}-{}-{}-{}",
            self.project_name, self.config_name, stamp, service_name
        )
    }
}

// ── Service ────────────────────────────────────────────────────────

/// A deployable unit: one ASG per service per release.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Service {
    /// Generated from the map key by `Release::set_defaults`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    // Resources to discover.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elbs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_groups: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Extra instance tags, merged with the generated identity tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    // Resources to create.
    #[serde(default)]
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associate_public_ip_address: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs_volume_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs_volume_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs_device_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_group_strategy: Option<PlacementStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_group_partition_count: Option<u32>,

    #[serde(default)]
    pub autoscaling: AutoScalingConfig,

    // Runtime state accumulated by the machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ServiceResources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_asg: Option<String>,
    /// Desired capacity of the prior ASG captured at lock time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_desired_capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_report: Option<HealthReport>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub healthy: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Service {
    /// The service name assigned by `set_defaults`, or empty before it.
    pub fn name(&self) -> &str {
        self.service_name.as_deref().unwrap_or_default()
    }
}

/// Placement group strategy accepted by the cloud.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    Cluster,
    Spread,
    Partition,
}

impl PlacementStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::Spread => "spread",
            Self::Partition => "partition",
        }
    }
}

// ── Autoscaling ────────────────────────────────────────────────────

/// Autoscaling shape of a service's ASG.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoScalingConfig {
    #[serde(default = "default_size")]
    pub min_size: u32,
    #[serde(default = "default_size")]
    pub max_size: u32,
    /// Ramp base when no prior ASG exists: `false` ramps from
    /// `min_size`, `true` from `max_size`.
    #[serde(default)]
    pub spread: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cooldown: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_grace_period: Option<u32>,
    /// Seconds before the health poll gives up. Defaults from the
    /// release timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<ScalingPolicy>,
}

fn default_size() -> u32 {
    1
}

impl Default for AutoScalingConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 1,
            spread: false,
            default_cooldown: None,
            health_check_grace_period: None,
            timeout: None,
            policies: Vec::new(),
        }
    }
}

/// A CPU-threshold scaling policy paired with a CloudWatch alarm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingPolicy {
    #[serde(rename = "type")]
    pub kind: PolicyKind,
    /// CPU-utilization percentage that trips the alarm.
    pub threshold: f64,
    /// Instance-count delta applied when the alarm fires. Positive for
    /// scale-up policies, negative for scale-down.
    pub scaling_adjustment: i32,
}

/// The policy kinds the deployer knows how to create.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    CpuScaleUp,
    CpuScaleDown,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuScaleUp => "cpu_scale_up",
            Self::CpuScaleDown => "cpu_scale_down",
        }
    }
}

// ── Lifecycle hooks ────────────────────────────────────────────────

/// An ASG lifecycle hook installed on every created group. The hook's
/// name is its key in the release's `lifecycle_hooks` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifeCycleHook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_transition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_result: Option<HookResult>,
}

/// What the cloud does when a lifecycle hook times out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookResult {
    Continue,
    Abandon,
}

impl HookResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "CONTINUE",
            Self::Abandon => "ABANDON",
        }
    }
}

// ── Health ─────────────────────────────────────────────────────────

/// Census snapshot written by each health poll.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    /// Healthy-instance count the poll must reach.
    pub target_healthy: u32,
    /// Instance count the deploy aims to launch.
    pub target_launched: u32,
    pub healthy: u32,
    pub launching: u32,
    pub terminating: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terminating_ids: Vec<String>,
    /// The group's desired capacity at poll time.
    pub desired_capacity: u32,
    /// The group's min size at poll time.
    pub min_size: u32,
}

// ── Discovered resources ───────────────────────────────────────────

/// Cloud handles looked up for a service before anything is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceResources {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elb_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_group_arns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_group: Option<String>,
}
