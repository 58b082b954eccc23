//! The deploy state machine driver.
//!
//! Fixed topology:
//!
//! ```text
//! Validate            → Lock                 (any error → FailureClean)
//! Lock                → ValidateResources    (LockExists → FailureClean; else → ReleaseLockFailure)
//! ValidateResources   → Deploy               (any → ReleaseLockFailure)
//! Deploy              → WaitForDeploy        (Halt → ReleaseLockFailure; else → CleanUpFailure)
//! WaitForDeploy       → WaitForHealthy
//! WaitForHealthy      → CheckHealthy
//! CheckHealthy        → Healthy?             (Halt: no retry; else retry, then → CleanUpFailure)
//! Healthy?            → CleanUpSuccess | WaitForHealthy | CleanUpFailure
//! CleanUpSuccess      → Success              (retry; exhausted → FailureDirty)
//! CleanUpFailure      → ReleaseLockFailure   (retry; exhausted → FailureDirty)
//! ReleaseLockFailure  → FailureClean         (retry; exhausted → FailureDirty)
//! ```
//!
//! Every error is caught and routed; nothing bypasses the machine. The
//! waits are timers owned by the driver, so tests run the whole machine
//! with zeroed durations.

use std::fmt;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use slipway_cloud::Clients;
use slipway_core::{Release, StateFault};

use crate::error::{DeployError, DeployResult};
use crate::states;

/// States of the deploy machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Validate,
    Lock,
    ValidateResources,
    Deploy,
    WaitForDeploy,
    WaitForHealthy,
    CheckHealthy,
    HealthyChoice,
    CleanUpSuccess,
    CleanUpFailure,
    ReleaseLockFailure,
    Success,
    FailureClean,
    FailureDirty,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "Validate",
            Self::Lock => "Lock",
            Self::ValidateResources => "ValidateResources",
            Self::Deploy => "Deploy",
            Self::WaitForDeploy => "WaitForDeploy",
            Self::WaitForHealthy => "WaitForHealthy",
            Self::CheckHealthy => "CheckHealthy",
            Self::HealthyChoice => "Healthy?",
            Self::CleanUpSuccess => "CleanUpSuccess",
            Self::CleanUpFailure => "CleanUpFailure",
            Self::ReleaseLockFailure => "ReleaseLockFailure",
            Self::Success => "Success",
            Self::FailureClean => "FailureClean",
            Self::FailureDirty => "FailureDirty",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcomes of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// The new groups serve traffic and the old ones are gone.
    Success,
    /// The deploy failed but left no resources behind.
    FailureClean,
    /// A cleanup step kept failing; resources may remain. Pageable.
    FailureDirty,
}

impl Terminal {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A state's retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

/// Timer and retry knobs. Production defaults mirror the workflow
/// definition; tests zero the durations.
#[derive(Debug, Clone)]
pub struct MachineOptions {
    /// Pause after Deploy so instances can boot.
    pub wait_for_deploy: Duration,
    /// Overrides the release's `wait_for_healthy` timer when set.
    pub wait_for_healthy_override: Option<Duration>,
    pub health_retry: RetryPolicy,
    pub cleanup_retry: RetryPolicy,
    /// Hard ceiling on state transitions, a guard against a deploy
    /// that can neither become healthy nor time out.
    pub max_transitions: usize,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            wait_for_deploy: Duration::from_secs(30),
            wait_for_healthy_override: None,
            health_retry: RetryPolicy {
                max_retries: 3,
                interval: Duration::from_secs(15),
            },
            cleanup_retry: RetryPolicy {
                max_retries: 3,
                interval: Duration::from_secs(30),
            },
            max_transitions: 1000,
        }
    }
}

impl MachineOptions {
    /// All timers zeroed, for tests and simulations.
    pub fn immediate() -> Self {
        Self {
            wait_for_deploy: Duration::ZERO,
            wait_for_healthy_override: Some(Duration::ZERO),
            health_retry: RetryPolicy {
                max_retries: 3,
                interval: Duration::ZERO,
            },
            cleanup_retry: RetryPolicy {
                max_retries: 3,
                interval: Duration::ZERO,
            },
            ..Self::default()
        }
    }
}

/// Record of one finished execution.
#[derive(Debug, Clone)]
pub struct Execution {
    pub terminal: Terminal,
    /// The final release snapshot, including the last health reports.
    pub release: Release,
    /// Every state entered, in order.
    pub path: Vec<State>,
    /// The last error written by a failing state, if any.
    pub fault: Option<StateFault>,
}

/// Drives a release through the fixed topology.
pub struct Machine {
    clients: Clients,
    options: MachineOptions,
}

impl Machine {
    pub fn new(clients: Clients) -> Self {
        Self {
            clients,
            options: MachineOptions::default(),
        }
    }

    pub fn with_options(clients: Clients, options: MachineOptions) -> Self {
        Self { clients, options }
    }

    /// Run the release to a terminal state. Never returns an error:
    /// failures are routed to the failure terminals.
    pub async fn execute(&self, release: Release) -> Execution {
        let mut release = release;
        let mut path = Vec::new();
        let mut state = State::Validate;

        loop {
            path.push(state);
            debug!(state = %state, "entering state");

            if path.len() > self.options.max_transitions {
                warn!(transitions = path.len(), "transition budget exhausted");
                record(
                    &mut release,
                    state,
                    &DeployError::Transient("state transition budget exhausted".to_string()),
                );
                path.push(State::FailureDirty);
                return self.finish(Terminal::FailureDirty, release, path);
            }

            state = match state {
                State::Validate => {
                    match states::validate(&self.clients, release.clone()).await {
                        Ok(next) => {
                            release = next;
                            State::Lock
                        }
                        Err(err) => {
                            record(&mut release, state, &err);
                            State::FailureClean
                        }
                    }
                }

                State::Lock => match states::lock(&self.clients, release.clone()).await {
                    Ok(next) => {
                        release = next;
                        State::ValidateResources
                    }
                    Err(err @ DeployError::LockExists(_)) => {
                        record(&mut release, state, &err);
                        State::FailureClean
                    }
                    Err(err) => {
                        record(&mut release, state, &err);
                        State::ReleaseLockFailure
                    }
                },

                State::ValidateResources => {
                    match states::validate_resources(&self.clients, release.clone()).await {
                        Ok(next) => {
                            release = next;
                            State::Deploy
                        }
                        Err(err) => {
                            record(&mut release, state, &err);
                            State::ReleaseLockFailure
                        }
                    }
                }

                State::Deploy => match states::deploy(&self.clients, release.clone()).await {
                    Ok(next) => {
                        release = next;
                        State::WaitForDeploy
                    }
                    Err(err) if err.is_halt() => {
                        record(&mut release, state, &err);
                        State::ReleaseLockFailure
                    }
                    Err(err) => {
                        record(&mut release, state, &err);
                        State::CleanUpFailure
                    }
                },

                State::WaitForDeploy => {
                    self.pause(self.options.wait_for_deploy).await;
                    State::WaitForHealthy
                }

                State::WaitForHealthy => {
                    self.pause(self.wait_for_healthy(&release)).await;
                    State::CheckHealthy
                }

                State::CheckHealthy => {
                    match self
                        .run_with_retry(State::CheckHealthy, &release, self.options.health_retry)
                        .await
                    {
                        Ok(next) => {
                            release = next;
                            State::HealthyChoice
                        }
                        Err(err) => {
                            record(&mut release, state, &err);
                            State::CleanUpFailure
                        }
                    }
                }

                State::HealthyChoice => match release.healthy {
                    Some(true) => State::CleanUpSuccess,
                    Some(false) => State::WaitForHealthy,
                    None => State::CleanUpFailure,
                },

                State::CleanUpSuccess => {
                    match self
                        .run_with_retry(State::CleanUpSuccess, &release, self.options.cleanup_retry)
                        .await
                    {
                        Ok(next) => {
                            release = next;
                            State::Success
                        }
                        Err(err) => {
                            record(&mut release, state, &err);
                            State::FailureDirty
                        }
                    }
                }

                State::CleanUpFailure => {
                    match self
                        .run_with_retry(State::CleanUpFailure, &release, self.options.cleanup_retry)
                        .await
                    {
                        Ok(next) => {
                            release = next;
                            State::ReleaseLockFailure
                        }
                        Err(err) => {
                            record(&mut release, state, &err);
                            State::FailureDirty
                        }
                    }
                }

                State::ReleaseLockFailure => {
                    match self
                        .run_with_retry(
                            State::ReleaseLockFailure,
                            &release,
                            self.options.cleanup_retry,
                        )
                        .await
                    {
                        Ok(next) => {
                            release = next;
                            State::FailureClean
                        }
                        Err(err) => {
                            record(&mut release, state, &err);
                            State::FailureDirty
                        }
                    }
                }

                State::Success => return self.finish(Terminal::Success, release, path),
                State::FailureClean => {
                    return self.finish(Terminal::FailureClean, release, path)
                }
                State::FailureDirty => {
                    return self.finish(Terminal::FailureDirty, release, path)
                }
            };
        }
    }

    fn finish(&self, terminal: Terminal, release: Release, path: Vec<State>) -> Execution {
        info!(
            terminal = ?terminal,
            states = path.len(),
            "execution finished"
        );
        Execution {
            terminal,
            fault: release.error.clone(),
            release,
            path,
        }
    }

    async fn run_with_retry(
        &self,
        state: State,
        release: &Release,
        policy: RetryPolicy,
    ) -> DeployResult<Release> {
        let mut attempt = 0;
        loop {
            match self.task(state, release.clone()).await {
                Ok(next) => return Ok(next),
                Err(err) if !err.is_halt() && attempt < policy.max_retries => {
                    attempt += 1;
                    warn!(state = %state, attempt, error = %err, "state failed, retrying");
                    self.pause(policy.interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn task(&self, state: State, release: Release) -> DeployResult<Release> {
        match state {
            State::CheckHealthy => states::check_healthy(&self.clients, release).await,
            State::CleanUpSuccess => states::clean_up_success(&self.clients, release).await,
            State::CleanUpFailure => states::clean_up_failure(&self.clients, release).await,
            State::ReleaseLockFailure => {
                states::release_lock_failure(&self.clients, release).await
            }
            // Only the retried states dispatch through here.
            _ => Err(DeployError::Validation(format!(
                "{state} is not a retryable task state"
            ))),
        }
    }

    fn wait_for_healthy(&self, release: &Release) -> Duration {
        self.options.wait_for_healthy_override.unwrap_or_else(|| {
            Duration::from_secs(u64::from(release.wait_for_healthy.unwrap_or(0)))
        })
    }

    async fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            sleep(duration).await;
        }
    }
}

fn record(release: &mut Release, state: State, err: &DeployError) {
    warn!(state = %state, error = %err, "state failed");
    release.error = Some(StateFault {
        state: state.as_str().to_string(),
        message: err.to_string(),
    });
}
