//! slipway-cloud — the cloud surface the deployer consumes.
//!
//! Everything the state machine does to the outside world goes through
//! the capability traits in [`api`], bundled into a [`Clients`] value
//! that is passed explicitly through the machine. Production bindings
//! live outside this workspace; [`memory`] provides in-memory fakes
//! with scripted instance health and per-operation failure injection,
//! which the test suite and the CLI's simulation backend run against.

pub mod api;
pub mod error;
pub mod memory;
pub mod types;

pub use api::{AsgApi, Clients, CloudWatchApi, Ec2Api, ElbApi, IamApi, ObjectStore, TargetGroupApi};
pub use error::{CloudError, CloudResult};
pub use memory::{CallRecord, HealthFrame, MemoryCloud, MemoryStore};
pub use types::{
    AsgInput, AsgInstance, AsgState, BlockDevice, ComparisonOperator, InstanceLifecycle,
    InstanceProfile, LaunchConfigInput, LifecycleHookSpec, MetricAlarmInput, PlacementGroup,
    ScalingPolicyInput, TargetGroup,
};
