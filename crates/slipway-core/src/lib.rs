//! slipway-core — release document model for the slipway deployer.
//!
//! A release is the unit of deployment: one or more services that ship
//! together behind a single lock. This crate holds the serde model for
//! the release document, the object-store key layout, and the input
//! validation that runs before any cloud call is made.
//!
//! # Architecture
//!
//! Types here are pure data. Services are stored in the release's
//! `services` map and carry no back-pointer to their parent; operations
//! that need release-level fields take a [`ReleaseScope`] snapshot
//! instead, so the serialized form stays acyclic.

pub mod error;
pub mod types;
pub mod validate;

pub use error::{ValidationError, ValidationResult};
pub use types::{
    AutoScalingConfig, HealthReport, HookResult, LifeCycleHook, PlacementStrategy, PolicyKind,
    Release, ReleaseScope, ScalingPolicy, Service, ServiceResources, StateFault,
};
