// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory cluster standing in for every collaborator.

use crate::artifact_name::ArtifactName;
use crate::classify::{Classification, ResolvedHost, DEFAULT_INSTALLER};
use crate::collaborators::{
    AgentLifecycle, ArtifactStore, Collaborators, CommandOutput,
    ConfigPayloadGenerator, HostExecutor, NodeGroup, PackageClassRegistrar,
};
use crate::config_payload::PayloadHints;
use crate::install_mode::InstallMode;
use crate::steps::{AgentPackageRequest, ShellCommand};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use rollout_common::{Host, HostOverrides, InstallPlan, Role, Version};
use slog::{o, Drain, Logger};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

pub const DEFAULT_SOURCE: &str = "http://builds";

pub const CONSOLE_RUNNING: &str = r#"{
    "classifier-service": {"state": "running"},
    "rbac-service": {"state": "running"},
    "activity-service": {"state": "running"}
}"#;

pub fn test_logger() -> Logger {
    let decorator =
        slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, o!())
}

/// Everything the fake was asked to do, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Execute { host: String, command: String },
    CopyTo { host: String, local: Utf8PathBuf, remote: Utf8PathBuf },
    FetchRemoteFile { host: String, url: String },
    InstallFromFile { host: String, file: String },
    CreateRemoteFile { host: String, path: Utf8PathBuf, contents: String },
    CreateTmpdir { host: String },
    InstallMsi { host: String, msi_path: String },
    InstallAgentPackage { host: String },
    ConfigureTypeDefaults { host: String },
    SignCertificate { host: String },
    StopAgent { host: String },
    WaitForHostInConsole { host: String },
    FetchToLocal { url: String },
    SaveNodeGroup { name: String },
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    /// Searched newest first; the last queued output repeats.
    responses: Vec<(String, VecDeque<CommandOutput>)>,
    failing: Vec<String>,
    versions: BTreeMap<(String, String), Version>,
    version_lookups: Vec<(String, String)>,
    local_dirs: BTreeSet<String>,
    missing: BTreeSet<String>,
    node_groups: BTreeMap<String, NodeGroup>,
    node_group_saves: usize,
}

pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        let fake = Arc::new(Self { state: Mutex::new(FakeState::default()) });
        fake.respond(
            "pdb/meta/v1/version",
            vec![CommandOutput::success(r#"{"version": "4.2.3"}"#)],
        );
        fake.respond(
            "status/v1/services",
            vec![CommandOutput::success(CONSOLE_RUNNING)],
        );
        fake
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Commands containing `needle` produce `outputs` in order.
    pub fn respond(&self, needle: &str, outputs: Vec<CommandOutput>) {
        assert!(!outputs.is_empty());
        self.state().responses.push((needle.to_owned(), outputs.into()));
    }

    /// Commands containing `needle` fail at the transport level.
    pub fn fail_on(&self, needle: &str) {
        self.state().failing.push(needle.to_owned());
    }

    pub fn set_version(&self, source: &str, file: &str, version: Version) {
        let key = (source.to_owned(), file.to_owned());
        self.state().versions.insert(key, version);
    }

    pub fn version_lookups(&self) -> Vec<(String, String)> {
        self.state().version_lookups.clone()
    }

    pub fn add_local_dir(&self, dir: &str) {
        self.state().local_dirs.insert(dir.to_owned());
    }

    /// Every artifact path or URL exists unless marked missing.
    pub fn mark_missing(&self, path: &str) {
        self.state().missing.insert(path.to_owned());
    }

    pub fn node_group_saves(&self) -> usize {
        self.state().node_group_saves
    }

    pub fn stored_node_group(&self, name: &str) -> Option<NodeGroup> {
        self.state().node_groups.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Shell commands run on `host`, in order.
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Execute { host: h, command } if h == host => {
                    Some(command.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Every shell command, as `host: command`.
    pub fn all_commands(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Execute { host, command } => {
                    Some(format!("{host}: {command}"))
                }
                _ => None,
            })
            .collect()
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            registrar: Some(self.clone()),
            ..self.collaborators_without_registrar()
        }
    }

    pub fn collaborators_without_registrar(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            executor: self.clone(),
            lifecycle: self.clone(),
            artifacts: self.clone(),
            payloads: self.clone(),
            registrar: None,
        }
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }
}

#[async_trait]
impl HostExecutor for FakeCluster {
    async fn execute(
        &self,
        host: &Host,
        command: &ShellCommand,
    ) -> anyhow::Result<CommandOutput> {
        let mut state = self.state();
        state.calls.push(Call::Execute {
            host: host.name.clone(),
            command: command.text.clone(),
        });
        let fails = state
            .failing
            .iter()
            .any(|needle| command.text.contains(needle.as_str()));
        if fails {
            bail!("connection reset by {}", host.name);
        }
        let queue = state
            .responses
            .iter_mut()
            .rev()
            .find(|(needle, _)| command.text.contains(needle.as_str()))
            .map(|(_, queue)| queue);
        let output = match queue {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(output.unwrap_or_default())
    }

    async fn copy_to(
        &self,
        host: &Host,
        local: &Utf8Path,
        remote: &Utf8Path,
    ) -> anyhow::Result<()> {
        self.record(Call::CopyTo {
            host: host.name.clone(),
            local: local.to_owned(),
            remote: remote.to_owned(),
        });
        Ok(())
    }

    async fn fetch_remote_file(
        &self,
        host: &Host,
        url: &str,
    ) -> anyhow::Result<()> {
        self.record(Call::FetchRemoteFile {
            host: host.name.clone(),
            url: url.to_owned(),
        });
        Ok(())
    }

    async fn install_from_file(
        &self,
        host: &Host,
        file: &str,
    ) -> anyhow::Result<()> {
        self.record(Call::InstallFromFile {
            host: host.name.clone(),
            file: file.to_owned(),
        });
        Ok(())
    }

    async fn create_remote_file(
        &self,
        host: &Host,
        path: &Utf8Path,
        contents: &str,
    ) -> anyhow::Result<()> {
        self.record(Call::CreateRemoteFile {
            host: host.name.clone(),
            path: path.to_owned(),
            contents: contents.to_owned(),
        });
        Ok(())
    }

    async fn create_tmpdir(
        &self,
        host: &Host,
        name: &str,
    ) -> anyhow::Result<Utf8PathBuf> {
        self.record(Call::CreateTmpdir { host: host.name.clone() });
        Ok(Utf8PathBuf::from(format!("/tmp/{}/{name}", host.name)))
    }
}

#[async_trait]
impl AgentLifecycle for FakeCluster {
    async fn install_msi(
        &self,
        host: &Host,
        msi_path: &str,
        _debug: bool,
    ) -> anyhow::Result<()> {
        self.record(Call::InstallMsi {
            host: host.name.clone(),
            msi_path: msi_path.to_owned(),
        });
        Ok(())
    }

    async fn install_agent_package(
        &self,
        host: &Host,
        _request: &AgentPackageRequest,
    ) -> anyhow::Result<()> {
        self.record(Call::InstallAgentPackage { host: host.name.clone() });
        Ok(())
    }

    async fn configure_type_defaults(&self, host: &Host) -> anyhow::Result<()> {
        self.record(Call::ConfigureTypeDefaults { host: host.name.clone() });
        Ok(())
    }

    async fn sign_certificate(&self, host: &Host) -> anyhow::Result<()> {
        self.record(Call::SignCertificate { host: host.name.clone() });
        Ok(())
    }

    async fn stop_agent(&self, host: &Host) -> anyhow::Result<()> {
        self.record(Call::StopAgent { host: host.name.clone() });
        Ok(())
    }

    async fn wait_for_host_in_console(
        &self,
        host: &Host,
    ) -> anyhow::Result<()> {
        self.record(Call::WaitForHostInConsole { host: host.name.clone() });
        Ok(())
    }

    async fn agent_setting(
        &self,
        _host: &Host,
        name: &str,
    ) -> anyhow::Result<String> {
        match name {
            "client_datadir" => Ok(
                "C:/ProgramData/PuppetLabs/puppet/cache/client_data".to_owned()
            ),
            other => Err(anyhow!("no such setting: {other}")),
        }
    }
}

#[async_trait]
impl ArtifactStore for FakeCluster {
    async fn is_local_dir(&self, source: &str) -> bool {
        self.state().local_dirs.contains(source)
    }

    async fn local_file_exists(&self, path: &Utf8Path) -> bool {
        !self.state().missing.contains(path.as_str())
    }

    async fn remote_link_exists(&self, url: &str) -> anyhow::Result<bool> {
        Ok(!self.state().missing.contains(url))
    }

    async fn fetch_to_local(
        &self,
        base_url: &str,
        file_name: &str,
        local_dir: &Utf8Path,
    ) -> anyhow::Result<Utf8PathBuf> {
        self.record(Call::FetchToLocal {
            url: format!("{base_url}/{file_name}"),
        });
        Ok(local_dir.join(file_name))
    }

    async fn load_version(
        &self,
        source: &str,
        version_file: &str,
    ) -> anyhow::Result<Version> {
        let mut state = self.state();
        let key = (source.to_owned(), version_file.to_owned());
        state.version_lookups.push(key.clone());
        state
            .versions
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("{source}/{version_file} not found"))
    }
}

#[async_trait]
impl ConfigPayloadGenerator for FakeCluster {
    async fn generate(
        &self,
        version: &Version,
        _hosts: &[Host],
        target: &Host,
        hints: &PayloadHints,
    ) -> anyhow::Result<String> {
        Ok(format!(
            "# configuration for {} ({}, {:?})",
            target.name, version, hints.format
        ))
    }
}

#[async_trait]
impl PackageClassRegistrar for FakeCluster {
    async fn node_group(
        &self,
        name: &str,
    ) -> anyhow::Result<Option<NodeGroup>> {
        Ok(self.state().node_groups.get(name).cloned())
    }

    async fn save_node_group(&self, group: &NodeGroup) -> anyhow::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::SaveNodeGroup { name: group.name.clone() });
        state.node_group_saves += 1;
        state.node_groups.insert(group.name.clone(), group.clone());
        Ok(())
    }
}

/// A classified host with working directory `/tmp/<name>/wd`.
pub fn resolved_host<const N: usize>(
    name: &str,
    platform: &str,
    roles: [Role; N],
    version: &str,
) -> ResolvedHost {
    resolved_host_with(
        name,
        platform,
        roles,
        version,
        None,
        HostOverrides::default(),
    )
}

pub fn resolved_host_with<const N: usize>(
    name: &str,
    platform: &str,
    roles: [Role; N],
    version: &str,
    previous_version: Option<&str>,
    overrides: HostOverrides,
) -> ResolvedHost {
    let mut host = Host::new(name, platform, roles);
    host.overrides = overrides;
    let version = Version::parse(version).unwrap();
    let classification = Classification {
        artifact: ArtifactName::for_host(
            &host,
            &version,
            &InstallPlan::default(),
        ),
        mode: InstallMode::resolve(&host, &version, false),
        previous_version: previous_version.map(|v| Version::parse(v).unwrap()),
        source: Some(
            host.overrides
                .source
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE.to_owned()),
        ),
        installer: DEFAULT_INSTALLER.to_owned(),
        version,
        host,
    };
    let working_dir = Utf8PathBuf::from(format!("/tmp/{name}/wd"));
    ResolvedHost::new(classification, working_dir)
}
