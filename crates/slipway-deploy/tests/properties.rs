//! Property tests for the capacity ramp and the state machine.
//!
//! The quantified invariants: min never exceeds desired, capacity never
//! regresses between polls, and no mangled input drives the machine
//! outside its topology or into a panic.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use slipway_cloud::{Clients, HealthFrame, MemoryCloud, MemoryStore};
use slipway_core::{
    AutoScalingConfig, HookResult, LifeCycleHook, PolicyKind, Release, ScalingPolicy, Service,
};
use slipway_deploy::release as release_ops;
use slipway_deploy::strategy::Strategy as Ramp;
use slipway_deploy::{service, Machine, MachineOptions, State, Terminal};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn autoscaling(min: u32, spread_above: u32, spread: bool) -> AutoScalingConfig {
    AutoScalingConfig {
        min_size: min,
        max_size: min + spread_above,
        spread,
        ..AutoScalingConfig::default()
    }
}

proptest! {
    /// The computed min never exceeds the computed desired capacity,
    /// for any config and any prior capacity.
    #[test]
    fn min_is_never_above_desired(
        min in 0u32..40,
        spread_above in 0u32..40,
        spread in any::<bool>(),
        previous in proptest::option::of(0u32..80),
    ) {
        let strategy = Ramp::new(autoscaling(min, spread_above, spread), previous);
        let (min_size, desired) = strategy.calculate_min_desired();
        prop_assert!(min_size <= desired);
    }

    /// The ramp target is bounded below by min_size and covers the
    /// prior capacity when one exists.
    #[test]
    fn target_covers_prior_and_min(
        min in 0u32..40,
        spread_above in 0u32..40,
        previous in proptest::option::of(0u32..80),
    ) {
        let strategy = Ramp::new(autoscaling(min, spread_above, false), previous);
        let target = strategy.target_capacity();
        match previous {
            Some(previous) => prop_assert_eq!(target, previous.max(min)),
            None => prop_assert_eq!(target, min),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Across consecutive polls within one deploy, the group's
    /// min_size and desired_capacity never decrease.
    #[test]
    fn capacity_never_regresses_between_polls(
        min in 1u32..8,
        spread_above in 0u32..8,
        previous in proptest::option::of(1u32..16),
        in_service_frames in proptest::collection::vec(0u32..16, 1..6),
    ) {
        runtime().block_on(async move {
            let cloud = MemoryCloud::new();
            let store = MemoryStore::new();
            let clients = cloud.clients(&store);
            cloud.add_security_group("web-sg", "sg-1");

            // A prior capacity above max_size fails the group's own
            // create validation; the ramp property is about polls.
            let previous = previous.map(|p| p.min(min + spread_above));

            let scope = test_release(1, min, spread_above).scope();
            let mut svc = Service {
                service_name: Some("web".to_string()),
                instance_type: "t3.small".to_string(),
                security_groups: vec!["web-sg".to_string()],
                autoscaling: autoscaling(min, spread_above, false),
                previous_desired_capacity: previous,
                ..Service::default()
            };

            service::fetch_resources(&clients, &scope, &mut svc).await.unwrap();
            service::create_resources(&clients, &scope, &mut svc).await.unwrap();

            let asg_name = svc.created_asg.clone().unwrap();
            cloud.push_health_frames(
                &asg_name,
                in_service_frames
                    .iter()
                    .map(|count| HealthFrame::all_in_service(*count))
                    .collect(),
            );

            let mut last = cloud.asg_state(&asg_name).unwrap();
            for _ in 0..in_service_frames.len() {
                service::update_healthy(&clients, &scope, &mut svc).await.unwrap();
                let current = cloud.asg_state(&asg_name).unwrap();
                assert!(
                    current.min_size >= last.min_size,
                    "min_size regressed: {} -> {}",
                    last.min_size,
                    current.min_size
                );
                assert!(
                    current.desired_capacity >= last.desired_capacity,
                    "desired_capacity regressed: {} -> {}",
                    last.desired_capacity,
                    current.desired_capacity
                );
                assert!(current.min_size <= current.desired_capacity);
                last = current;
            }
        });
    }
}

// ── Machine fuzzing ────────────────────────────────────────────────

fn test_release(uuid: u128, min: u32, spread_above: u32) -> Release {
    Release {
        project_name: "books".to_string(),
        config_name: "production".to_string(),
        release_id: "42".to_string(),
        uuid: Uuid::from_u128(uuid),
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        bucket: "deploys".to_string(),
        aws_account_id: "000011112222".to_string(),
        aws_region: "us-east-1".to_string(),
        subnets: vec!["subnet-1".to_string()],
        timeout: Some(0),
        wait_for_healthy: None,
        lifecycle_hooks: BTreeMap::new(),
        services: BTreeMap::from([(
            "web".to_string(),
            Service {
                instance_type: "t3.small".to_string(),
                security_groups: vec!["web-sg".to_string()],
                autoscaling: autoscaling(min, spread_above, false),
                ..Service::default()
            },
        )]),
        healthy: None,
        error: None,
        deploy_started_at: None,
    }
}

fn name_strategy() -> impl proptest::strategy::Strategy<Value = String> {
    prop_oneof![
        Just("web".to_string()),
        Just(String::new()),
        Just("a/b".to_string()),
        "[a-z0-9-]{1,12}",
        "\\PC{0,8}",
    ]
}

fn policy_strategy() -> impl proptest::strategy::Strategy<Value = ScalingPolicy> {
    (
        prop_oneof![Just(PolicyKind::CpuScaleUp), Just(PolicyKind::CpuScaleDown)],
        -10.0f64..200.0,
        -5i32..5,
    )
        .prop_map(|(kind, threshold, scaling_adjustment)| ScalingPolicy {
            kind,
            threshold,
            scaling_adjustment,
        })
}

fn hook_strategy() -> impl proptest::strategy::Strategy<Value = LifeCycleHook> {
    (
        proptest::option::of(prop_oneof![
            Just("autoscaling:EC2_INSTANCE_LAUNCHING".to_string()),
            Just("autoscaling:EC2_INSTANCE_TERMINATING".to_string()),
            "\\PC{0,16}",
        ]),
        proptest::option::of(0u32..4000),
        proptest::option::of(prop_oneof![
            Just(HookResult::Continue),
            Just(HookResult::Abandon)
        ]),
    )
        .prop_map(|(lifecycle_transition, heartbeat_timeout, default_result)| LifeCycleHook {
            lifecycle_transition,
            heartbeat_timeout,
            default_result,
        })
}

async fn fuzz_run(release: Release) -> (Terminal, Vec<State>) {
    let cloud = MemoryCloud::new();
    let store = MemoryStore::new();
    let clients: Clients = cloud.clients(&store);

    // Seed whatever the mangled document references so deep paths stay
    // reachable.
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

    let _ = release_ops::upload_document(&clients, &release).await;

    let execution = Machine::with_options(clients, MachineOptions::immediate())
        .execute(release)
        .await;
    (execution.terminal, execution.path)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Mangled inputs must never panic the machine nor drive it
    /// outside the fixed topology.
    #[test]
    fn mangled_releases_stay_inside_the_topology(
        project in name_strategy(),
        config in name_strategy(),
        release_id in name_strategy(),
        uuid in any::<u128>(),
        min in 0u32..20,
        max in 0u32..20,
        spread in any::<bool>(),
        instance_type in name_strategy(),
        security_groups in proptest::collection::vec(name_strategy(), 0..3),
        policies in proptest::collection::vec(policy_strategy(), 0..3),
        hooks in proptest::collection::btree_map("[a-z]{0,6}", hook_strategy(), 0..3),
    ) {
        let (terminal, path) = runtime().block_on(async move {
            let mut release = test_release(uuid, 1, 1);
            release.project_name = project;
            release.config_name = config;
            release.release_id = release_id;
            release.lifecycle_hooks = hooks;

            let web = release.services.get_mut("web").unwrap();
            web.instance_type = instance_type;
            web.security_groups = security_groups;
            web.autoscaling = AutoScalingConfig {
                min_size: min,
                max_size: max,
                spread,
                ..AutoScalingConfig::default()
            };
            web.autoscaling.policies = policies;

            fuzz_run(release).await
        });

        prop_assert!(matches!(
            terminal,
            Terminal::Success | Terminal::FailureClean | Terminal::FailureDirty
        ));
        prop_assert_eq!(path[0], State::Validate);
        let last = path[path.len() - 1];
        prop_assert!(matches!(
            last,
            State::Success | State::FailureClean | State::FailureDirty
        ));
    }

    /// Fuzzing the autoscaling numbers alone must not escape either.
    #[test]
    fn mangled_capacity_numbers_terminate_cleanly(
        min in 0u32..64,
        max in 0u32..64,
        previous in proptest::option::of(0u32..64),
        timeout in proptest::option::of(0u32..2),
    ) {
        let (terminal, _) = runtime().block_on(async move {
            let mut release = test_release(99, 1, 1);
            release.timeout = timeout;
            let web = release.services.get_mut("web").unwrap();
            web.autoscaling.min_size = min;
            web.autoscaling.max_size = max;
            web.previous_desired_capacity = previous;
            fuzz_run(release).await
        });

        prop_assert!(matches!(
            terminal,
            Terminal::Success | Terminal::FailureClean | Terminal::FailureDirty
        ));
    }
}
