//! In-memory cloud fakes.
//!
//! `MemoryCloud` implements every capability trait against a single
//! mutex-guarded account snapshot. Instance health is scripted: tests
//! queue [`HealthFrame`]s per ASG and each DescribeAutoScalingInstances
//! call advances the script, so a deploy can observe "5 healthy, then
//! 7 healthy" without real timers. Any operation can be made to fail a
//! fixed number of times via [`MemoryCloud::fail_times`].
//!
//! `MemoryStore` is the matching object store with an atomic
//! if-none-match put.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::api::{
    AsgApi, Clients, CloudWatchApi, Ec2Api, ElbApi, IamApi, ObjectStore, TargetGroupApi,
};
use crate::error::{CloudError, CloudResult};
use crate::types::{
    AsgInput, AsgInstance, AsgState, InstanceLifecycle, InstanceProfile, LaunchConfigInput,
    MetricAlarmInput, PlacementGroup, ScalingPolicyInput, TargetGroup,
};

/// One step of an ASG's scripted instance census.
///
/// `in_service` instances are healthy everywhere (group and load
/// balancers), `terminating` are on their way out, and anything left up
/// to the group's desired capacity is still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthFrame {
    pub in_service: u32,
    pub terminating: u32,
}

impl HealthFrame {
    /// Every instance in service.
    pub fn all_in_service(count: u32) -> Self {
        Self {
            in_service: count,
            terminating: 0,
        }
    }
}

/// A mutating or describing call observed by the fake, kept for the
/// tag-safety assertions in the test suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub op: String,
    pub resource: String,
    pub tags: BTreeMap<String, String>,
}

struct FakeAsg {
    state: AsgState,
    instance_ids: Vec<String>,
    frame: Option<HealthFrame>,
}

struct FakeTargetGroup {
    group: TargetGroup,
    attributes: BTreeMap<String, String>,
}

#[derive(Default)]
struct Inner {
    launch_configs: BTreeMap<String, LaunchConfigInput>,
    asgs: BTreeMap<String, FakeAsg>,
    policies: Vec<ScalingPolicyInput>,
    alarms: Vec<MetricAlarmInput>,
    security_groups: BTreeMap<String, String>,
    load_balancers: BTreeSet<String>,
    target_groups: BTreeMap<String, FakeTargetGroup>,
    instance_profiles: BTreeMap<String, InstanceProfile>,
    placement_groups: BTreeMap<String, PlacementGroup>,
    health_scripts: BTreeMap<String, VecDeque<HealthFrame>>,
    /// Lifecycle of each instance as of the last describe, consulted by
    /// the load balancer and target group health fakes.
    instance_states: BTreeMap<String, InstanceLifecycle>,
    failures: BTreeMap<String, u32>,
    calls: Vec<CallRecord>,
    instance_counter: u32,
}

impl Inner {
    fn begin(&mut self, op: &str, resource: &str, tags: BTreeMap<String, String>) -> CloudResult<()> {
        self.calls.push(CallRecord {
            op: op.to_string(),
            resource: resource.to_string(),
            tags,
        });
        if let Some(remaining) = self.failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CloudError::transient(op, "injected failure"));
            }
        }
        Ok(())
    }

    fn asg_mut(&mut self, name: &str) -> CloudResult<&mut FakeAsg> {
        self.asgs
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(format!("auto-scaling group {name}")))
    }
}

/// In-memory fake for every cloud capability except the object store.
#[derive(Clone, Default)]
pub struct MemoryCloud {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle this fake and a store into a `Clients`.
    pub fn clients(&self, store: &MemoryStore) -> Clients {
        let cloud = Arc::new(self.clone());
        Clients {
            asg: cloud.clone(),
            elb: cloud.clone(),
            target_groups: cloud.clone(),
            iam: cloud.clone(),
            ec2: cloud.clone(),
            cloudwatch: cloud,
            store: Arc::new(store.clone()),
        }
    }

    // ── Seeding ────────────────────────────────────────────────────

    pub fn add_security_group(&self, name: &str, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .security_groups
            .insert(name.to_string(), id.to_string());
    }

    pub fn add_load_balancer(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.load_balancers.insert(name.to_string());
    }

    pub fn add_target_group(&self, arn: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.target_groups.insert(
            arn.to_string(),
            FakeTargetGroup {
                group: TargetGroup {
                    arn: arn.to_string(),
                    name: name.to_string(),
                },
                attributes: BTreeMap::new(),
            },
        );
    }

    pub fn set_target_group_attribute(&self, arn: &str, key: &str, value: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(tg) = inner.target_groups.get_mut(arn) {
            tg.attributes.insert(key.to_string(), value.to_string());
        }
    }

    pub fn add_instance_profile(&self, name: &str, arn: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.instance_profiles.insert(
            name.to_string(),
            InstanceProfile {
                name: name.to_string(),
                arn: arn.to_string(),
            },
        );
    }

    pub fn add_placement_group(&self, group: PlacementGroup) {
        let mut inner = self.inner.lock().unwrap();
        inner.placement_groups.insert(group.name.clone(), group);
    }

    /// Seed a pre-existing ASG, e.g. the prior release's group.
    pub fn seed_asg(&self, state: AsgState) {
        let mut inner = self.inner.lock().unwrap();
        inner.asgs.insert(
            state.name.clone(),
            FakeAsg {
                state,
                instance_ids: Vec::new(),
                frame: None,
            },
        );
    }

    /// Queue census frames for an ASG (it does not need to exist yet).
    /// Each DescribeAutoScalingInstances consumes one frame; the last
    /// frame repeats once the queue is empty.
    pub fn push_health_frames(&self, asg_name: &str, frames: Vec<HealthFrame>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .health_scripts
            .entry(asg_name.to_string())
            .or_default()
            .extend(frames);
    }

    /// Make the named operation fail `count` times with a transient
    /// error before succeeding again.
    pub fn fail_times(&self, op: &str, count: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.insert(op.to_string(), count);
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<CallRecord> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn asg_state(&self, name: &str) -> Option<AsgState> {
        let inner = self.inner.lock().unwrap();
        inner.asgs.get(name).map(|asg| asg.state.clone())
    }

    pub fn launch_config_exists(&self, name: &str) -> bool {
        self.inner.lock().unwrap().launch_configs.contains_key(name)
    }

    pub fn policies(&self) -> Vec<ScalingPolicyInput> {
        self.inner.lock().unwrap().policies.clone()
    }

    pub fn alarms(&self) -> Vec<MetricAlarmInput> {
        self.inner.lock().unwrap().alarms.clone()
    }
}

#[async_trait]
impl AsgApi for MemoryCloud {
    async fn create_launch_configuration(&self, input: &LaunchConfigInput) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("create_launch_configuration", &input.name, BTreeMap::new())?;
        if inner.launch_configs.contains_key(&input.name) {
            return Err(CloudError::InvalidRequest(format!(
                "launch configuration {} already exists",
                input.name
            )));
        }
        inner
            .launch_configs
            .insert(input.name.clone(), input.clone());
        Ok(())
    }

    async fn create_auto_scaling_group(&self, input: &AsgInput) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("create_auto_scaling_group", &input.name, input.tags.clone())?;
        if inner.asgs.contains_key(&input.name) {
            return Err(CloudError::InvalidRequest(format!(
                "auto-scaling group {} already exists",
                input.name
            )));
        }
        inner.asgs.insert(
            input.name.clone(),
            FakeAsg {
                state: input.to_state(),
                instance_ids: Vec::new(),
                frame: None,
            },
        );
        Ok(())
    }

    async fn update_auto_scaling_group(
        &self,
        name: &str,
        min_size: u32,
        desired_capacity: u32,
    ) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let tags = inner.asgs.get(name).map(|a| a.state.tags.clone());
        inner.begin("update_auto_scaling_group", name, tags.unwrap_or_default())?;
        let asg = inner.asg_mut(name)?;
        asg.state.min_size = min_size;
        asg.state.desired_capacity = desired_capacity;
        Ok(())
    }

    async fn describe_auto_scaling_groups(&self) -> CloudResult<Vec<AsgState>> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("describe_auto_scaling_groups", "*", BTreeMap::new())?;
        Ok(inner.asgs.values().map(|asg| asg.state.clone()).collect())
    }

    async fn describe_instances(
        &self,
        asg_name: &str,
    ) -> CloudResult<(AsgState, Vec<AsgInstance>)> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("describe_instances", asg_name, BTreeMap::new())?;

        let frame = match inner.health_scripts.get_mut(asg_name) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().copied(),
            None => None,
        };

        let desired = inner.asg_mut(asg_name)?.state.desired_capacity;
        let frame = frame.unwrap_or(HealthFrame::all_in_service(desired));

        // Grow the stable id list up to the desired capacity.
        let mut fresh = Vec::new();
        {
            let have = inner.asgs.get(asg_name).map(|a| a.instance_ids.len()).unwrap_or(0);
            for _ in have..desired as usize {
                inner.instance_counter += 1;
                fresh.push(format!("i-{:08x}", inner.instance_counter));
            }
        }
        let asg = inner.asg_mut(asg_name)?;
        asg.instance_ids.extend(fresh);
        asg.frame = Some(frame);

        let mut instances = Vec::new();
        for (index, id) in asg.instance_ids.iter().enumerate() {
            let index = index as u32;
            let lifecycle = if index < frame.terminating {
                InstanceLifecycle::Terminating
            } else if index < frame.terminating + frame.in_service {
                InstanceLifecycle::InService
            } else {
                InstanceLifecycle::Pending
            };
            instances.push(AsgInstance {
                id: id.clone(),
                lifecycle_state: lifecycle,
            });
        }

        let state = asg.state.clone();
        for instance in &instances {
            inner
                .instance_states
                .insert(instance.id.clone(), instance.lifecycle_state);
        }
        Ok((state, instances))
    }

    async fn enable_metrics_collection(
        &self,
        asg_name: &str,
        _granularity: &str,
    ) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let tags = inner.asgs.get(asg_name).map(|a| a.state.tags.clone());
        inner.begin(
            "enable_metrics_collection",
            asg_name,
            tags.unwrap_or_default(),
        )?;
        inner.asg_mut(asg_name)?;
        Ok(())
    }

    async fn put_scaling_policy(&self, input: &ScalingPolicyInput) -> CloudResult<String> {
        let mut inner = self.inner.lock().unwrap();
        let tags = inner.asgs.get(&input.asg_name).map(|a| a.state.tags.clone());
        inner.begin("put_scaling_policy", &input.asg_name, tags.unwrap_or_default())?;
        inner.asg_mut(&input.asg_name)?;
        inner.policies.push(input.clone());
        Ok(format!(
            "arn:aws:autoscaling:policy/{}/{}",
            input.asg_name, input.policy_name
        ))
    }

    async fn delete_auto_scaling_group(&self, name: &str) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let tags = inner.asgs.get(name).map(|a| a.state.tags.clone());
        inner.begin(
            "delete_auto_scaling_group",
            name,
            tags.unwrap_or_default(),
        )?;
        if inner.asgs.remove(name).is_none() {
            return Err(CloudError::NotFound(format!("auto-scaling group {name}")));
        }
        Ok(())
    }

    async fn delete_launch_configuration(&self, name: &str) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("delete_launch_configuration", name, BTreeMap::new())?;
        if inner.launch_configs.remove(name).is_none() {
            return Err(CloudError::NotFound(format!("launch configuration {name}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ElbApi for MemoryCloud {
    async fn describe_load_balancers(&self, names: &[String]) -> CloudResult<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("describe_load_balancers", "*", BTreeMap::new())?;
        Ok(names
            .iter()
            .filter(|name| inner.load_balancers.contains(*name))
            .cloned()
            .collect())
    }

    async fn describe_instance_health(
        &self,
        lb_name: &str,
        instance_ids: &[String],
    ) -> CloudResult<BTreeMap<String, bool>> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("describe_instance_health", lb_name, BTreeMap::new())?;
        if !inner.load_balancers.contains(lb_name) {
            return Err(CloudError::NotFound(format!("load balancer {lb_name}")));
        }
        Ok(health_view(&inner, instance_ids))
    }
}

#[async_trait]
impl TargetGroupApi for MemoryCloud {
    async fn describe_target_groups(&self, arns: &[String]) -> CloudResult<Vec<TargetGroup>> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("describe_target_groups", "*", BTreeMap::new())?;
        Ok(arns
            .iter()
            .filter_map(|arn| inner.target_groups.get(arn).map(|tg| tg.group.clone()))
            .collect())
    }

    async fn describe_target_group_attributes(
        &self,
        arn: &str,
    ) -> CloudResult<BTreeMap<String, String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("describe_target_group_attributes", arn, BTreeMap::new())?;
        inner
            .target_groups
            .get(arn)
            .map(|tg| tg.attributes.clone())
            .ok_or_else(|| CloudError::NotFound(format!("target group {arn}")))
    }

    async fn describe_target_health(
        &self,
        arn: &str,
        instance_ids: &[String],
    ) -> CloudResult<BTreeMap<String, bool>> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("describe_target_health", arn, BTreeMap::new())?;
        if !inner.target_groups.contains_key(arn) {
            return Err(CloudError::NotFound(format!("target group {arn}")));
        }
        Ok(health_view(&inner, instance_ids))
    }
}

#[async_trait]
impl IamApi for MemoryCloud {
    async fn get_instance_profile(&self, name: &str) -> CloudResult<InstanceProfile> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("get_instance_profile", name, BTreeMap::new())?;
        inner
            .instance_profiles
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("instance profile {name}")))
    }
}

#[async_trait]
impl Ec2Api for MemoryCloud {
    async fn describe_security_groups(
        &self,
        names: &[String],
    ) -> CloudResult<BTreeMap<String, String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("describe_security_groups", "*", BTreeMap::new())?;
        Ok(names
            .iter()
            .filter_map(|name| {
                inner
                    .security_groups
                    .get(name)
                    .map(|id| (name.clone(), id.clone()))
            })
            .collect())
    }

    async fn describe_placement_group(&self, name: &str) -> CloudResult<Option<PlacementGroup>> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("describe_placement_group", name, BTreeMap::new())?;
        Ok(inner.placement_groups.get(name).cloned())
    }

    async fn create_placement_group(
        &self,
        name: &str,
        strategy: &str,
        partition_count: Option<u32>,
    ) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("create_placement_group", name, BTreeMap::new())?;
        if inner.placement_groups.contains_key(name) {
            return Err(CloudError::InvalidRequest(format!(
                "placement group {name} already exists"
            )));
        }
        inner.placement_groups.insert(
            name.to_string(),
            PlacementGroup {
                name: name.to_string(),
                strategy: strategy.to_string(),
                partition_count,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl CloudWatchApi for MemoryCloud {
    async fn put_metric_alarm(&self, input: &MetricAlarmInput) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin("put_metric_alarm", &input.alarm_name, input.dimensions.clone())?;
        inner.alarms.push(input.clone());
        Ok(())
    }
}

fn health_view(inner: &Inner, instance_ids: &[String]) -> BTreeMap<String, bool> {
    instance_ids
        .iter()
        .map(|id| {
            let healthy = matches!(
                inner.instance_states.get(id),
                Some(InstanceLifecycle::InService)
            );
            (id.clone(), healthy)
        })
        .collect()
}

// ── Object store ───────────────────────────────────────────────────

#[derive(Default)]
struct StoreInner {
    objects: BTreeMap<String, Vec<u8>>,
    failures: BTreeMap<String, u32>,
}

/// In-memory object store with native conditional put.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named operation fail `count` times before succeeding.
    pub fn fail_times(&self, op: &str, count: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.insert(op.to_string(), count);
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().objects.keys().cloned().collect()
    }

    fn check(inner: &mut StoreInner, op: &str) -> CloudResult<()> {
        if let Some(remaining) = inner.failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CloudError::transient(op, "injected failure"));
            }
        }
        Ok(())
    }
}

fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Option<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&mut inner, "get_object")?;
        Ok(inner.objects.get(&object_key(bucket, key)).cloned())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&mut inner, "put_object")?;
        inner.objects.insert(object_key(bucket, key), body.to_vec());
        Ok(())
    }

    async fn put_object_if_absent(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
    ) -> CloudResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&mut inner, "put_object_if_absent")?;
        let full = object_key(bucket, key);
        if inner.objects.contains_key(&full) {
            return Ok(false);
        }
        inner.objects.insert(full, body.to_vec());
        Ok(true)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&mut inner, "delete_object")?;
        inner.objects.remove(&object_key(bucket, key));
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> CloudResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&mut inner, "object_exists")?;
        Ok(inner.objects.contains_key(&object_key(bucket, key)))
    }
}
