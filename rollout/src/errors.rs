// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::readiness::Checkpoint;
use crate::steps::ExitCodes;
use rollout_common::{Role, VersionParseError};
use thiserror::Error;

/// Every way a run can stop. The run aborts at the first of these; there is
/// no partial continuation.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    ReadinessTimeout(#[from] ReadinessTimeoutError),
    #[error(transparent)]
    DependencyUnavailable(#[from] DependencyUnavailableError),
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("attempting installation on {host}, {path} does not exist")]
    MissingArtifact { host: String, path: String },
    #[error("no artifact source configured for {host}")]
    MissingSource { host: String },
    #[error("{operation} is not supported on {host} (platform {platform})")]
    UnsupportedPlatform {
        host: String,
        platform: String,
        operation: &'static str,
    },
    #[error("malformed version for {host}")]
    MalformedVersion {
        host: String,
        #[source]
        error: VersionParseError,
    },
    #[error("could not determine the version to install on {host}")]
    UnresolvedVersion {
        host: String,
        #[source]
        error: anyhow::Error,
    },
    #[error("role {role} is held by more than one host: {hosts}")]
    DuplicateRole { role: Role, hosts: String },
    #[error("a clustered run requires a host with role {role}")]
    MissingRole { role: Role },
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(
        "command on {host} exited with {exit_code} (acceptable: {acceptable}): \
         {command}"
    )]
    UnacceptableExitCode {
        host: String,
        command: String,
        exit_code: i32,
        acceptable: ExitCodes,
        stdout: String,
    },
    #[error("{operation} failed on {host}")]
    Transport {
        host: String,
        operation: String,
        #[source]
        error: anyhow::Error,
    },
}

impl ExecutionError {
    pub(crate) fn transport(
        host: &str,
        operation: impl Into<String>,
        error: anyhow::Error,
    ) -> Self {
        Self::Transport {
            host: host.to_owned(),
            operation: operation.into(),
            error,
        }
    }

    /// The host the failure happened on.
    pub fn host(&self) -> &str {
        match self {
            Self::UnacceptableExitCode { host, .. }
            | Self::Transport { host, .. } => host,
        }
    }
}

#[derive(Debug, Error)]
#[error(
    "{checkpoint} on {host} not ready after {attempts} attempts ({budget})"
)]
pub struct ReadinessTimeoutError {
    pub checkpoint: Checkpoint,
    pub host: String,
    pub attempts: usize,
    pub budget: String,
}

#[derive(Debug, Error)]
#[error("{capability} is required but unavailable: {remediation}")]
pub struct DependencyUnavailableError {
    pub capability: &'static str,
    pub remediation: &'static str,
}
