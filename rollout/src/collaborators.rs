// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capabilities the engine needs from the outside world.
//!
//! The engine decides what to run and in which order; these traits do the
//! running. Every method returns `anyhow::Result`, and the engine wraps
//! failures in an [`ExecutionError::Transport`] naming the host and the
//! operation.
//!
//! [`ExecutionError::Transport`]: crate::errors::ExecutionError::Transport

use crate::config_payload::PayloadHints;
use crate::steps::{AgentPackageRequest, ShellCommand};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use rollout_common::{Host, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What a remote command produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self { stdout: stdout.into(), exit_code: 0 }
    }
}

/// Runs commands on, and moves files to, a managed host.
#[async_trait]
pub trait HostExecutor: Send + Sync {
    /// Runs `command` and reports its output and exit code. Exit codes are
    /// not interpreted here; that is the caller's job.
    async fn execute(
        &self,
        host: &Host,
        command: &ShellCommand,
    ) -> anyhow::Result<CommandOutput>;

    async fn copy_to(
        &self,
        host: &Host,
        local: &Utf8Path,
        remote: &Utf8Path,
    ) -> anyhow::Result<()>;

    /// Has a network appliance download `url` through its own CLI.
    async fn fetch_remote_file(&self, host: &Host, url: &str)
        -> anyhow::Result<()>;

    /// Installs a package previously downloaded onto a network appliance.
    async fn install_from_file(&self, host: &Host, file: &str)
        -> anyhow::Result<()>;

    async fn create_remote_file(
        &self,
        host: &Host,
        path: &Utf8Path,
        contents: &str,
    ) -> anyhow::Result<()>;

    /// Creates a fresh temporary directory on the host whose name includes
    /// `name`, returning its path.
    async fn create_tmpdir(
        &self,
        host: &Host,
        name: &str,
    ) -> anyhow::Result<Utf8PathBuf>;
}

/// Agent-level operations that need more than a single shell command.
#[async_trait]
pub trait AgentLifecycle: Send + Sync {
    async fn install_msi(
        &self,
        host: &Host,
        msi_path: &str,
        debug: bool,
    ) -> anyhow::Result<()>;

    async fn install_agent_package(
        &self,
        host: &Host,
        request: &AgentPackageRequest,
    ) -> anyhow::Result<()>;

    async fn configure_type_defaults(&self, host: &Host) -> anyhow::Result<()>;

    async fn sign_certificate(&self, host: &Host) -> anyhow::Result<()>;

    async fn stop_agent(&self, host: &Host) -> anyhow::Result<()>;

    /// Blocks until the console knows about `host`.
    async fn wait_for_host_in_console(&self, host: &Host) -> anyhow::Result<()>;

    /// Reads one agent setting (e.g. `client_datadir`) from the host.
    async fn agent_setting(
        &self,
        host: &Host,
        name: &str,
    ) -> anyhow::Result<String>;
}

/// Locates install artifacts and the files naming the latest build.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// True if `source` names a directory visible to the control process.
    /// Anything else is treated as a URL.
    async fn is_local_dir(&self, source: &str) -> bool;

    async fn local_file_exists(&self, path: &Utf8Path) -> bool;

    async fn remote_link_exists(&self, url: &str) -> anyhow::Result<bool>;

    /// Downloads `<base_url>/<file_name>` into `local_dir` on the control
    /// process and returns the local path.
    async fn fetch_to_local(
        &self,
        base_url: &str,
        file_name: &str,
        local_dir: &Utf8Path,
    ) -> anyhow::Result<Utf8PathBuf>;

    /// Reads the version named by `version_file` under `source`.
    async fn load_version(
        &self,
        source: &str,
        version_file: &str,
    ) -> anyhow::Result<Version>;
}

/// Produces installer configuration text (flat answers or structured
/// configuration).
#[async_trait]
pub trait ConfigPayloadGenerator: Send + Sync {
    async fn generate(
        &self,
        version: &Version,
        hosts: &[Host],
        target: &Host,
        hints: &PayloadHints,
    ) -> anyhow::Result<String>;
}

/// A console node group as read from and written to the management API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub name: String,
    pub rule: serde_json::Value,
    #[serde(default)]
    pub classes: BTreeMap<String, serde_json::Value>,
}

/// Client for the console's node classification API.
#[async_trait]
pub trait PackageClassRegistrar: Send + Sync {
    async fn node_group(&self, name: &str) -> anyhow::Result<Option<NodeGroup>>;

    async fn save_node_group(&self, group: &NodeGroup) -> anyhow::Result<()>;
}

/// The full set of capabilities handed to the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn HostExecutor>,
    pub lifecycle: Arc<dyn AgentLifecycle>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub payloads: Arc<dyn ConfigPayloadGenerator>,
    /// Only needed for frictionless hosts at or after the modern
    /// registration release.
    pub registrar: Option<Arc<dyn PackageClassRegistrar>>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("registrar", &self.registrar.is_some())
            .finish_non_exhaustive()
    }
}
