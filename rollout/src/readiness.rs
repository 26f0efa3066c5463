// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Readiness checkpoints: wait until a service that an install step
//! (re)started is actually answering.

use crate::classify::ResolvedHost;
use crate::collaborators::HostExecutor;
use crate::command_builder;
use crate::errors::{ExecutionError, OrchestrationError, ReadinessTimeoutError};
use crate::retry::{poll_until, CondCheckError, PollError, RetryPolicy};
use crate::steps::ShellCommand;
use regex::Regex;
use rollout_common::thresholds::{CONSOLE_STATUS, DATA_TIER_STATUS};
use rollout_common::Host;
use slog::{debug, info, o, Logger};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

/// The console services that must all report `running`.
pub const CONSOLE_SERVICES: [&str; 3] =
    ["classifier-service", "rbac-service", "activity-service"];

const DATA_TIER_INTERVAL: Duration = Duration::from_secs(1);
const DATA_TIER_DEADLINE: Duration = Duration::from_secs(60);
const FIBONACCI_UNIT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    DataTier,
    Console,
    WebInstaller,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Checkpoint::DataTier => "data tier",
            Checkpoint::Console => "console",
            Checkpoint::WebInstaller => "web installer",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Ready { attempts: usize },
    /// The service doesn't exist at this version.
    Skipped { reason: &'static str },
}

pub fn data_tier_policy() -> RetryPolicy {
    RetryPolicy::fixed_with_deadline(DATA_TIER_INTERVAL, DATA_TIER_DEADLINE)
}

pub fn console_policy(attempts: usize) -> RetryPolicy {
    RetryPolicy::fibonacci_with_attempts(FIBONACCI_UNIT, attempts)
}

/// True if the data tier's version report names a version.
pub fn data_tier_reports_version(stdout: &str) -> bool {
    static VERSION: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"version.*\d+\.\d+\.\d+")
            .expect("data tier version regex should be valid")
    });
    VERSION.is_match(stdout)
}

/// True if the console status document reports every service in
/// [`CONSOLE_SERVICES`] as running. Anything unparseable counts as not
/// running.
pub fn console_services_running(stdout: &str) -> bool {
    let Ok(status) = serde_json::from_str::<serde_json::Value>(stdout) else {
        return false;
    };
    CONSOLE_SERVICES.iter().all(|service| {
        status
            .get(service)
            .and_then(|s| s.get("state"))
            .and_then(serde_json::Value::as_str)
            == Some("running")
    })
}

/// Runs readiness checkpoints against a host.
pub struct ReadinessPoller<'a> {
    log: Logger,
    executor: &'a dyn HostExecutor,
}

impl<'a> ReadinessPoller<'a> {
    pub fn new(log: &Logger, executor: &'a dyn HostExecutor) -> Self {
        Self { log: log.new(o!("component" => "ReadinessPoller")), executor }
    }

    /// Waits for the data tier's version report.
    pub async fn data_tier(
        &self,
        host: &ResolvedHost,
    ) -> Result<CheckpointOutcome, OrchestrationError> {
        if host.version() < &DATA_TIER_STATUS {
            return Ok(CheckpointOutcome::Skipped {
                reason: "data tier predates the version endpoint",
            });
        }
        self.wait(
            Checkpoint::DataTier,
            host.host(),
            &data_tier_policy(),
            &command_builder::data_tier_status_command(),
            data_tier_reports_version,
        )
        .await
    }

    /// Waits for the console services to report `running`, giving up after
    /// `attempts` checks.
    pub async fn console(
        &self,
        host: &ResolvedHost,
        attempts: usize,
    ) -> Result<CheckpointOutcome, OrchestrationError> {
        if host.version() < &CONSOLE_STATUS {
            return Ok(CheckpointOutcome::Skipped {
                reason: "console predates the status endpoint",
            });
        }
        self.wait(
            Checkpoint::Console,
            host.host(),
            &console_policy(attempts),
            &command_builder::console_status_command(&host.host().name),
            console_services_running,
        )
        .await
    }

    /// Polls `command` on `host` until `ready` accepts its output.
    pub async fn wait(
        &self,
        checkpoint: Checkpoint,
        host: &Host,
        policy: &RetryPolicy,
        command: &ShellCommand,
        ready: fn(&str) -> bool,
    ) -> Result<CheckpointOutcome, OrchestrationError> {
        info!(
            self.log,
            "waiting for checkpoint";
            "checkpoint" => %checkpoint,
            "host" => &host.name,
            "policy" => %policy,
        );
        let result = poll_until(policy, || async {
            let output = match self.executor.execute(host, command).await {
                Ok(output) => output,
                Err(error) => {
                    return Err(CondCheckError::Failed(ExecutionError::transport(
                        &host.name,
                        format!("{checkpoint} status check"),
                        error,
                    )));
                }
            };
            if ready(&output.stdout) {
                Ok(())
            } else {
                debug!(
                    self.log,
                    "checkpoint not ready";
                    "checkpoint" => %checkpoint,
                    "host" => &host.name,
                    "stdout" => &output.stdout,
                );
                Err(CondCheckError::NotYet)
            }
        })
        .await;

        match result {
            Ok(((), attempts)) => {
                info!(
                    self.log,
                    "checkpoint ready";
                    "checkpoint" => %checkpoint,
                    "host" => &host.name,
                    "attempts" => attempts,
                );
                Ok(CheckpointOutcome::Ready { attempts })
            }
            Err(PollError::Failed(error)) => Err(error.into()),
            Err(PollError::Exhausted { attempts }) => {
                Err(ReadinessTimeoutError {
                    checkpoint,
                    host: host.name.clone(),
                    attempts,
                    budget: policy.to_string(),
                }
                .into())
            }
        }
    }
}
