//! Per-service deploy operations.
//!
//! A service's deploy is: look up the resources it references, create
//! its launch configuration and ASG, then poll the instance census
//! until enough instances are healthy. An instance counts as healthy
//! only when the group reports it in service and every attached load
//! balancer and target group agrees.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{debug, info, warn};

use slipway_cloud::{
    AsgInput, AsgInstance, AsgState, BlockDevice, Clients, CloudError, ComparisonOperator,
    InstanceLifecycle, LaunchConfigInput, LifecycleHookSpec, MetricAlarmInput, ScalingPolicyInput,
};
use slipway_core::{HealthReport, PolicyKind, ReleaseScope, Service, ServiceResources};

use crate::error::{DeployError, DeployResult};
use crate::strategy::Strategy;

/// Slow-start attribute key on target groups.
const SLOW_START_ATTRIBUTE: &str = "slow_start.duration_seconds";

// ── Instance census ────────────────────────────────────────────────

/// Per-instance view merged from the group and its load balancers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceCensus {
    entries: BTreeMap<String, CensusEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CensusEntry {
    lifecycle: InstanceLifecycle,
    balancer_healthy: bool,
}

impl InstanceCensus {
    /// Build from the group's own instance list. Balancer health starts
    /// optimistic and is narrowed by [`merge_health`](Self::merge_health).
    pub fn from_instances(instances: &[AsgInstance]) -> Self {
        let entries = instances
            .iter()
            .map(|instance| {
                (
                    instance.id.clone(),
                    CensusEntry {
                        lifecycle: instance.lifecycle_state,
                        balancer_healthy: true,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Narrow health by one balancer's report. An instance the balancer
    /// does not know is unhealthy.
    pub fn merge_health(&mut self, report: &BTreeMap<String, bool>) {
        for (id, entry) in self.entries.iter_mut() {
            entry.balancer_healthy &= report.get(id).copied().unwrap_or(false);
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Instances in service that every balancer reports healthy.
    pub fn healthy_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| {
                entry.lifecycle == InstanceLifecycle::InService && entry.balancer_healthy
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn terminating_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.lifecycle == InstanceLifecycle::Terminating)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Resource discovery ─────────────────────────────────────────────

/// Look up everything the service references. Every lookup must return
/// exactly the requested names; anything missing fails the deploy
/// before the first resource is created.
pub async fn fetch_resources(
    clients: &Clients,
    scope: &ReleaseScope,
    service: &mut Service,
) -> DeployResult<()> {
    let name = service.name().to_string();

    let found_groups = clients
        .ec2
        .describe_security_groups(&service.security_groups)
        .await?;
    let mut security_group_ids = Vec::new();
    for sg_name in &service.security_groups {
        match found_groups.get(sg_name) {
            Some(id) => security_group_ids.push(id.clone()),
            None => {
                return Err(DeployError::NotFound(format!(
                    "security group {sg_name} for service {name}"
                )))
            }
        }
    }

    let elb_names = clients.elb.describe_load_balancers(&service.elbs).await?;
    for elb in &service.elbs {
        if !elb_names.contains(elb) {
            return Err(DeployError::NotFound(format!(
                "load balancer {elb} for service {name}"
            )));
        }
    }

    let target_groups = clients
        .target_groups
        .describe_target_groups(&service.target_groups)
        .await?;
    for arn in &service.target_groups {
        if !target_groups.iter().any(|tg| &tg.arn == arn) {
            return Err(DeployError::NotFound(format!(
                "target group {arn} for service {name}"
            )));
        }
    }

    let placement_group = match &service.placement_group_name {
        Some(pg_name) => {
            find_or_create_placement_group(clients, service, pg_name).await?;
            Some(pg_name.clone())
        }
        None => None,
    };

    let profile_arn = match &service.profile {
        Some(profile) => Some(clients.iam.get_instance_profile(profile).await?.arn),
        None => None,
    };

    service.resources = Some(ServiceResources {
        security_group_ids,
        elb_names,
        target_group_arns: target_groups.into_iter().map(|tg| tg.arn).collect(),
        profile_arn,
        placement_group,
    });

    info!(
        release = %scope.release_id,
        service = %name,
        "resources resolved"
    );
    Ok(())
}

async fn find_or_create_placement_group(
    clients: &Clients,
    service: &Service,
    pg_name: &str,
) -> DeployResult<()> {
    if clients.ec2.describe_placement_group(pg_name).await?.is_some() {
        return Ok(());
    }

    let strategy = service
        .placement_group_strategy
        .ok_or_else(|| {
            DeployError::Validation(format!(
                "placement group {pg_name} has no strategy"
            ))
        })?;

    clients
        .ec2
        .create_placement_group(
            pg_name,
            strategy.as_str(),
            service.placement_group_partition_count,
        )
        .await?;
    debug!(placement_group = %pg_name, strategy = strategy.as_str(), "placement group created");
    Ok(())
}

/// Longest slow-start duration across the service's target groups, in
/// seconds. Used as the health poll interval fallback.
pub async fn slow_start_duration(clients: &Clients, service: &Service) -> DeployResult<u32> {
    let mut longest = 0;
    let Some(resources) = &service.resources else {
        return Ok(0);
    };

    for arn in &resources.target_group_arns {
        let attributes = clients
            .target_groups
            .describe_target_group_attributes(arn)
            .await?;
        if let Some(value) = attributes.get(SLOW_START_ATTRIBUTE) {
            if let Ok(seconds) = value.parse::<u32>() {
                longest = longest.max(seconds);
            }
        }
    }
    Ok(longest)
}

// ── Resource creation ──────────────────────────────────────────────

/// Create the launch configuration, the ASG, its scaling policies and
/// alarms, and enable metrics collection. Individual steps are not
/// reversible; a failure here is compensated by the failure cleanup
/// state deleting whatever was created.
pub async fn create_resources(
    clients: &Clients,
    scope: &ReleaseScope,
    service: &mut Service,
) -> DeployResult<()> {
    let service_id = scope.service_id(service.name());

    let launch_config = build_launch_config_input(scope, service, &service_id);
    launch_config.validate()?;
    clients
        .asg
        .create_launch_configuration(&launch_config)
        .await?;

    let asg_input = build_asg_input(scope, service, &service_id);
    asg_input.validate()?;
    clients.asg.create_auto_scaling_group(&asg_input).await?;
    service.created_asg = Some(service_id.clone());

    create_scaling_policies(clients, service, &service_id).await?;

    clients
        .asg
        .enable_metrics_collection(&service_id, "1Minute")
        .await?;

    set_healthy(service, &asg_input.to_state(), &InstanceCensus::default());

    info!(
        release = %scope.release_id,
        service = %service.name(),
        asg = %service_id,
        desired = asg_input.desired_capacity,
        "auto-scaling group created"
    );
    Ok(())
}

/// Synthetic create inputs for pre-flight validation, before any
/// resource has been discovered. Declared names stand in for the
/// not-yet-resolved handles.
pub fn preflight(scope: &ReleaseScope, service: &Service) -> DeployResult<()> {
    let service_id = scope.service_id(service.name());
    build_launch_config_input(scope, service, &service_id).validate()?;
    build_asg_input(scope, service, &service_id).validate()?;
    Ok(())
}

fn build_launch_config_input(
    scope: &ReleaseScope,
    service: &Service,
    service_id: &str,
) -> LaunchConfigInput {
    let resources = service.resources.clone().unwrap_or_default();

    let security_group_ids = if resources.security_group_ids.is_empty() {
        service.security_groups.clone()
    } else {
        resources.security_group_ids
    };

    let block_device = match (
        service.ebs_volume_size,
        &service.ebs_volume_type,
        &service.ebs_device_name,
    ) {
        (Some(volume_size), Some(volume_type), Some(device_name)) => Some(BlockDevice {
            volume_size,
            volume_type: volume_type.clone(),
            device_name: device_name.clone(),
        }),
        _ => None,
    };

    LaunchConfigInput {
        name: service_id.to_string(),
        image_id: service.image_id.clone(),
        instance_type: service.instance_type.clone(),
        security_group_ids,
        iam_instance_profile: resources.profile_arn.or_else(|| service.profile.clone()),
        user_data: render_user_data(scope, service),
        spot_price: service.spot_price.clone(),
        associate_public_ip_address: service.associate_public_ip_address,
        block_device,
    }
}

/// Substitute the release identity into the user-data template and
/// base64-encode the result for the launch configuration.
fn render_user_data(scope: &ReleaseScope, service: &Service) -> Option<String> {
    let template = service.user_data.as_deref()?;

    let rendered = template
        .replace("{{RELEASE_ID}}", &scope.release_id)
        .replace("{{PROJECT_NAME}}", &scope.project_name)
        .replace("{{CONFIG_NAME}}", &scope.config_name)
        .replace("{{SERVICE_NAME}}", service.name())
        .replace("{{RELEASE_BUCKET}}", &scope.bucket)
        .replace("{{AWS_ACCOUNT_ID}}", &scope.aws_account_id)
        .replace("{{AWS_REGION}}", &scope.aws_region);

    Some(BASE64.encode(rendered))
}

fn build_asg_input(scope: &ReleaseScope, service: &Service, service_id: &str) -> AsgInput {
    let strategy = Strategy::for_service(service);
    let resources = service.resources.clone().unwrap_or_default();

    let load_balancer_names = if resources.elb_names.is_empty() {
        service.elbs.clone()
    } else {
        resources.elb_names
    };
    let target_group_arns = if resources.target_group_arns.is_empty() {
        service.target_groups.clone()
    } else {
        resources.target_group_arns
    };

    let mut tags = service.tags.clone();
    tags.insert("ProjectName".to_string(), scope.project_name.clone());
    tags.insert("ConfigName".to_string(), scope.config_name.clone());
    tags.insert("ServiceName".to_string(), service.name().to_string());
    tags.insert("ReleaseID".to_string(), scope.release_id.clone());
    tags.insert("ReleaseUUID".to_string(), scope.uuid.to_string());
    tags.insert("Name".to_string(), service_id.to_string());

    let lifecycle_hooks = scope
        .lifecycle_hooks
        .iter()
        .map(|(name, hook)| LifecycleHookSpec {
            name: name.clone(),
            lifecycle_transition: hook.lifecycle_transition.clone().unwrap_or_default(),
            heartbeat_timeout: hook.heartbeat_timeout.unwrap_or(300),
            default_result: hook
                .default_result
                .map(|result| result.as_str().to_string())
                .unwrap_or_else(|| "CONTINUE".to_string()),
        })
        .collect();

    AsgInput {
        name: service_id.to_string(),
        launch_configuration_name: service_id.to_string(),
        min_size: strategy.initial_min_size(),
        max_size: service.autoscaling.max_size,
        desired_capacity: strategy.initial_desired_capacity(),
        default_cooldown: service.autoscaling.default_cooldown,
        health_check_grace_period: service.autoscaling.health_check_grace_period,
        load_balancer_names,
        target_group_arns,
        vpc_zone_identifier: scope.subnets.join(","),
        placement_group: service.placement_group_name.clone(),
        lifecycle_hooks,
        tags,
    }
}

async fn create_scaling_policies(
    clients: &Clients,
    service: &Service,
    service_id: &str,
) -> DeployResult<()> {
    for policy in &service.autoscaling.policies {
        let policy_name = format!("{}-{}", service_id, policy.kind.as_str());
        let arn = clients
            .asg
            .put_scaling_policy(&ScalingPolicyInput {
                asg_name: service_id.to_string(),
                policy_name: policy_name.clone(),
                scaling_adjustment: policy.scaling_adjustment,
                cooldown: service.autoscaling.default_cooldown,
            })
            .await?;

        let comparison = match policy.kind {
            PolicyKind::CpuScaleUp => ComparisonOperator::GreaterThanOrEqualToThreshold,
            PolicyKind::CpuScaleDown => ComparisonOperator::LessThanOrEqualToThreshold,
        };

        clients
            .cloudwatch
            .put_metric_alarm(&MetricAlarmInput {
                alarm_name: format!("{policy_name}-alarm"),
                namespace: "AWS/EC2".to_string(),
                metric_name: "CPUUtilization".to_string(),
                comparison,
                threshold: policy.threshold,
                period: 60,
                evaluation_periods: 2,
                alarm_actions: vec![arn],
                dimensions: BTreeMap::from([(
                    "AutoScalingGroupName".to_string(),
                    service_id.to_string(),
                )]),
            })
            .await?;
    }
    Ok(())
}

// ── Health polling ─────────────────────────────────────────────────

/// One health poll: fetch the census, halt on a termination storm,
/// merge balancer health, write the report, and nudge the group's
/// min/desired capacity along the ramp.
pub async fn update_healthy(
    clients: &Clients,
    scope: &ReleaseScope,
    service: &mut Service,
) -> DeployResult<()> {
    let asg_name = service.created_asg.clone().ok_or_else(|| {
        DeployError::NotFound(format!("service {} has no created ASG", service.name()))
    })?;

    let (group, instances) = clients.asg.describe_instances(&asg_name).await?;
    let mut census = InstanceCensus::from_instances(&instances);

    let strategy = Strategy::for_service(service);
    if strategy.reached_max_terminations(&census) {
        return Err(DeployError::Halt(format!(
            "terminating instances on {}: {}",
            service.name(),
            census.terminating_ids().join(",")
        )));
    }

    let resources = service.resources.clone().unwrap_or_default();
    let ids = census.ids();
    for lb_name in &resources.elb_names {
        let report = clients.elb.describe_instance_health(lb_name, &ids).await?;
        census.merge_health(&report);
    }
    for arn in &resources.target_group_arns {
        let report = clients
            .target_groups
            .describe_target_health(arn, &ids)
            .await?;
        census.merge_health(&report);
    }

    set_healthy(service, &group, &census);

    let (min_size, desired_capacity) = strategy.calculate_min_desired();
    safe_set_min_desired_capacity(clients, &group, min_size, desired_capacity)
        .await
        .map_err(|err| {
            DeployError::Transient(format!(
                "setting min and desired capacity for {}: {err}",
                service.name()
            ))
        })?;

    if let Some(report) = &service.health_report {
        info!(
            release = %scope.release_id,
            service = %service.name(),
            healthy = report.healthy,
            launching = report.launching,
            terminating = report.terminating,
            target = report.target_healthy,
            "health poll"
        );
    }
    Ok(())
}

/// Write the health report and the healthy verdict from a census.
fn set_healthy(service: &mut Service, group: &AsgState, census: &InstanceCensus) {
    let strategy = Strategy::for_service(service);
    let healthy_ids = census.healthy_ids();
    let terminating_ids = census.terminating_ids();

    service.health_report = Some(HealthReport {
        target_healthy: strategy.target_healthy(),
        target_launched: strategy.target_capacity(),
        healthy: healthy_ids.len() as u32,
        launching: census.len() as u32,
        terminating: terminating_ids.len() as u32,
        terminating_ids,
        desired_capacity: group.desired_capacity,
        min_size: group.min_size,
    });

    service.healthy = healthy_ids.len() as u32 >= strategy.target_healthy();
}

/// Update the group's min/desired capacity without ever regressing:
/// both values are clamped to at least the group's current values, min
/// is kept at or below desired, and a no-op issues no call.
pub async fn safe_set_min_desired_capacity(
    clients: &Clients,
    group: &AsgState,
    min_size: u32,
    desired_capacity: u32,
) -> DeployResult<()> {
    let desired_capacity = desired_capacity.max(group.desired_capacity);
    let min_size = min_size.max(group.min_size).min(desired_capacity);

    if min_size == group.min_size && desired_capacity == group.desired_capacity {
        return Ok(());
    }

    debug!(
        asg = %group.name,
        min = min_size,
        desired = desired_capacity,
        "updating group capacity"
    );
    clients
        .asg
        .update_auto_scaling_group(&group.name, min_size, desired_capacity)
        .await?;
    Ok(())
}

/// Set the final min/desired capacity on the new group. Runs only from
/// the success cleanup, after the service is healthy.
pub async fn reset_desired_capacity(clients: &Clients, service: &Service) -> DeployResult<()> {
    let asg_name = service.created_asg.clone().ok_or_else(|| {
        DeployError::NotFound(format!("service {} has no created ASG", service.name()))
    })?;
    let strategy = Strategy::for_service(service);

    clients
        .asg
        .update_auto_scaling_group(
            &asg_name,
            service.autoscaling.min_size,
            strategy.desired_capacity(),
        )
        .await?;
    Ok(())
}

/// Delete an ASG and its paired launch configuration, tolerating
/// already-deleted resources so cleanup retries are idempotent.
pub async fn delete_asg_and_launch_config(
    clients: &Clients,
    asg_name: &str,
    launch_config_name: &str,
) -> DeployResult<()> {
    match clients.asg.delete_auto_scaling_group(asg_name).await {
        Ok(()) => {}
        Err(CloudError::NotFound(_)) => {
            warn!(asg = %asg_name, "group already gone during cleanup");
        }
        Err(err) => return Err(err.into()),
    }

    match clients
        .asg
        .delete_launch_configuration(launch_config_name)
        .await
    {
        Ok(()) => {}
        Err(CloudError::NotFound(_)) => {
            warn!(launch_config = %launch_config_name, "launch configuration already gone");
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}
