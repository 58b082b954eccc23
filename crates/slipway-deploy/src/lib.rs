//! slipway-deploy — blue/green deploys for auto-scaling groups.
//!
//! For each release the machine creates a new ASG next to any prior
//! group for the same service, waits until enough instances are
//! healthy, and only then retires the old group. On any failure the
//! newly created resources are deleted and the lock released, so the
//! prior group keeps serving.
//!
//! # Components
//!
//! - **`strategy`** — pure capacity ramp math and the halt predicate
//! - **`service`** — per-service resource discovery, creation, health polling
//! - **`release`** — control objects (document, halt flag) and prior-ASG discovery
//! - **`states`** — one step per task state
//! - **`machine`** — the fixed topology, retry budgets and catch routes

pub mod error;
pub mod machine;
pub mod release;
pub mod service;
pub mod states;
pub mod strategy;

pub use error::{DeployError, DeployResult};
pub use machine::{Execution, Machine, MachineOptions, RetryPolicy, State, Terminal};
pub use service::InstanceCensus;
pub use strategy::Strategy;
