// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `Classifying` phase: resolve every host's version, install mode,
//! artifact and installer exactly once.

use crate::artifact_name::ArtifactName;
use crate::collaborators::{ArtifactStore, HostExecutor};
use crate::errors::{ConfigurationError, ExecutionError};
use crate::install_mode::InstallMode;
use crate::topology::Topology;
use camino::{Utf8Path, Utf8PathBuf};
use rollout_common::thresholds::{LIGHTWEIGHT_AGENT, SEPARATE_UPGRADER};
use rollout_common::{Host, InstallPlan, Version};
use slog::{debug, info, o, Logger};

pub const DEFAULT_INSTALLER: &str = "puppet-enterprise-installer";
pub const SEPARATE_UPGRADER_BINARY: &str = "puppet-enterprise-upgrader";

/// Everything decided about a host before it has a working directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub host: Host,
    pub version: Version,
    /// The version installed before an upgrade, if known.
    pub previous_version: Option<Version>,
    /// Directory or URL this host's artifacts come from.
    pub source: Option<String>,
    pub mode: InstallMode,
    pub artifact: ArtifactName,
    /// Installer binary inside the unpacked artifact.
    pub installer: String,
}

/// A fully classified host with its working directory.
///
/// Immutable for the rest of the run; a new upgrade pass classifies from
/// scratch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedHost {
    classification: Classification,
    working_dir: Option<Utf8PathBuf>,
}

impl ResolvedHost {
    pub fn new(
        classification: Classification,
        working_dir: Utf8PathBuf,
    ) -> Self {
        Self { classification, working_dir: Some(working_dir) }
    }

    /// A host whose install mode never stages files on it.
    pub fn without_working_dir(classification: Classification) -> Self {
        Self { classification, working_dir: None }
    }

    pub fn host(&self) -> &Host {
        &self.classification.host
    }

    pub fn name(&self) -> &str {
        &self.classification.host.name
    }

    pub fn version(&self) -> &Version {
        &self.classification.version
    }

    pub fn previous_version(&self) -> Option<&Version> {
        self.classification.previous_version.as_ref()
    }

    pub fn source(&self) -> Option<&str> {
        self.classification.source.as_deref()
    }

    pub fn mode(&self) -> InstallMode {
        self.classification.mode
    }

    pub fn artifact(&self) -> &ArtifactName {
        &self.classification.artifact
    }

    pub fn installer(&self) -> &str {
        &self.classification.installer
    }

    /// The per-run directory on the host. Hosts installed from a package
    /// repository have none and run from the login directory.
    pub fn working_dir(&self) -> &Utf8Path {
        self.working_dir.as_deref().unwrap_or(Utf8Path::new("."))
    }

    pub fn has_working_dir(&self) -> bool {
        self.working_dir.is_some()
    }
}

impl AsRef<Host> for ResolvedHost {
    fn as_ref(&self) -> &Host {
        self.host()
    }
}

/// Resolves versions and install modes for a set of hosts.
pub struct Classifier<'a> {
    log: Logger,
    artifacts: &'a dyn ArtifactStore,
    plan: &'a InstallPlan,
    topology: &'a Topology,
}

impl<'a> Classifier<'a> {
    pub fn new(
        log: &Logger,
        artifacts: &'a dyn ArtifactStore,
        plan: &'a InstallPlan,
        topology: &'a Topology,
    ) -> Self {
        Self {
            log: log.new(o!("component" => "Classifier")),
            artifacts,
            plan,
            topology,
        }
    }

    /// Classifies `hosts` in topology order.
    ///
    /// `upgrade_path` is the default artifact source for an upgrade run; it
    /// is ignored when the plan is an install.
    pub async fn classify(
        &self,
        hosts: &[Host],
        upgrade_path: Option<&str>,
    ) -> Result<Vec<Classification>, ConfigurationError> {
        let mut classified = Vec::with_capacity(hosts.len());
        // Windows hosts may inherit the primary's version, and the primary
        // always sorts first.
        let mut primary_version: Option<Version> = None;

        for host in self.topology.sort(hosts) {
            let classification = if self.plan.is_upgrade() {
                self.classify_upgrade(host, upgrade_path).await?
            } else {
                self.classify_install(host, primary_version.as_ref()).await?
            };
            if self.topology.is_primary(&host.name) {
                primary_version = Some(classification.version.clone());
            }
            info!(
                self.log,
                "classified host";
                "host" => &host.name,
                "version" => %classification.version,
                "mode" => %classification.mode,
                "artifact" => %classification.artifact,
            );
            classified.push(classification);
        }
        Ok(classified)
    }

    async fn classify_install(
        &self,
        host: &Host,
        primary_version: Option<&Version>,
    ) -> Result<Classification, ConfigurationError> {
        let source =
            host.overrides.source.clone().or_else(|| self.plan.source.clone());
        let version = if host.platform.is_windows() {
            let inherited = primary_version
                .filter(|v| !self.plan.masterless && *v >= &LIGHTWEIGHT_AGENT);
            match host
                .overrides
                .version
                .as_ref()
                .or(self.plan.windows_version.as_ref())
                .or(inherited)
            {
                Some(version) => version.clone(),
                None => {
                    self.load_version(
                        host,
                        source.as_deref(),
                        &self.plan.windows_version_file,
                    )
                    .await?
                }
            }
        } else {
            match host.overrides.version.as_ref().or(self.plan.version.as_ref())
            {
                Some(version) => version.clone(),
                None => {
                    self.load_version(
                        host,
                        source.as_deref(),
                        &self.plan.version_file,
                    )
                    .await?
                }
            }
        };
        let installer = host
            .overrides
            .installer
            .clone()
            .unwrap_or_else(|| DEFAULT_INSTALLER.to_owned());
        Ok(self.finish(host, version, None, source, installer))
    }

    async fn classify_upgrade(
        &self,
        host: &Host,
        upgrade_path: Option<&str>,
    ) -> Result<Classification, ConfigurationError> {
        let source = host
            .overrides
            .upgrade_source
            .clone()
            .or_else(|| upgrade_path.map(str::to_owned));
        let version_file = if host.platform.is_windows() {
            &self.plan.windows_version_file
        } else {
            &self.plan.version_file
        };
        let version = match host
            .overrides
            .upgrade_version
            .as_ref()
            .or(self.plan.upgrade_version.as_ref())
        {
            Some(version) => version.clone(),
            None => {
                self.load_version(host, source.as_deref(), version_file).await?
            }
        };
        let installer = match &host.overrides.installer {
            Some(installer) => installer.clone(),
            None if version < SEPARATE_UPGRADER => {
                SEPARATE_UPGRADER_BINARY.to_owned()
            }
            None => DEFAULT_INSTALLER.to_owned(),
        };
        let previous = self.configured_version(host).cloned();
        Ok(self.finish(host, version, previous, source, installer))
    }

    /// The version the inventory says the host runs today.
    fn configured_version<'h>(
        &'h self,
        host: &'h Host,
    ) -> Option<&'h Version> {
        let plan_version = if host.platform.is_windows() {
            self.plan
                .windows_version
                .as_ref()
                .or(self.plan.version.as_ref())
        } else {
            self.plan.version.as_ref()
        };
        host.overrides.version.as_ref().or(plan_version)
    }

    fn finish(
        &self,
        host: &Host,
        version: Version,
        previous_version: Option<Version>,
        source: Option<String>,
        installer: String,
    ) -> Classification {
        let mode = InstallMode::resolve(host, &version, self.plan.masterless);
        let artifact = ArtifactName::for_host(host, &version, self.plan);
        Classification {
            host: host.clone(),
            version,
            previous_version,
            source,
            mode,
            artifact,
            installer,
        }
    }

    async fn load_version(
        &self,
        host: &Host,
        source: Option<&str>,
        version_file: &str,
    ) -> Result<Version, ConfigurationError> {
        let source = source.ok_or_else(|| ConfigurationError::MissingSource {
            host: host.name.clone(),
        })?;
        self.artifacts.load_version(source, version_file).await.map_err(
            |error| ConfigurationError::UnresolvedVersion {
                host: host.name.clone(),
                error,
            },
        )
    }
}

/// The timestamped name used for per-run working directories.
pub fn working_dir_name() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H.%M.%S").to_string()
}

/// Creates a working directory on every host that stages files and pairs
/// it with the host's classification.
pub async fn allocate_working_dirs(
    log: &Logger,
    executor: &dyn HostExecutor,
    classified: Vec<Classification>,
) -> Result<Vec<ResolvedHost>, ExecutionError> {
    let name = working_dir_name();
    let mut resolved = Vec::with_capacity(classified.len());
    for classification in classified {
        if !classification.mode.needs_working_dir() {
            debug!(
                log,
                "no working directory needed";
                "host" => &classification.host.name,
                "mode" => %classification.mode,
            );
            resolved.push(ResolvedHost::without_working_dir(classification));
            continue;
        }
        let host = &classification.host;
        let working_dir =
            executor.create_tmpdir(host, &name).await.map_err(|error| {
                ExecutionError::transport(
                    &host.name,
                    "create working directory",
                    error,
                )
            })?;
        info!(
            log,
            "allocated working directory";
            "host" => &host.name,
            "dir" => %working_dir,
        );
        resolved.push(ResolvedHost::new(classification, working_dir));
    }
    Ok(resolved)
}
