// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drives an install or upgrade through its phases.
//!
//! A run walks `Classifying → Fetching → (Staging → Executing → Certifying
//! per host) → AgentConverge → ServiceWait → Finalizing → Done` and stops at
//! the first error. Progress is recorded in a [`RunLog`] that callers can
//! snapshot at any time.

use crate::classify::{allocate_working_dirs, Classifier, ResolvedHost};
use crate::collaborators::{Collaborators, NodeGroup};
use crate::command_builder::{
    self, converge_command, gpg_key_repair_command, install_command,
    legacy_registration_commands, package_class_name, BuildContext,
};
use crate::config_payload::{
    console_password_needed, ConfigPayloadCoordinator,
};
use crate::errors::{
    DependencyUnavailableError, ExecutionError, OrchestrationError,
};
use crate::fetch::ArtifactFetcher;
use crate::install_mode::InstallMode;
use crate::readiness::{Checkpoint, CheckpointOutcome, ReadinessPoller};
use crate::run_log::{Phase, RunLog, RunLogHandle, StepOutcome};
use crate::runner::StepRunner;
use crate::topology::Topology;
use rollout_common::thresholds::{
    uses_structured_config, LEGACY_DATA_TIER, LIGHTWEIGHT_AGENT,
    MODERN_REGISTRATION,
};
use rollout_common::{Host, InstallPlan, OsFamily, RunType};
use slog::{debug, info, o, Logger};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;

/// Node group that pins frictionless package classes to the primary.
pub const FRICTIONLESS_NODE_GROUP: &str = "Frictionless Agent";

pub struct Orchestrator {
    log: Logger,
    collaborators: Collaborators,
    // Package classes registered on the primary during this run. Held across
    // the registrar's read-then-save so two hosts on one platform can't both
    // create the class.
    registered_classes: Mutex<BTreeSet<String>>,
    run_log: RunLogHandle,
}

impl Orchestrator {
    pub fn new(log: &Logger, collaborators: Collaborators) -> Self {
        Self {
            log: log.new(o!("component" => "Orchestrator")),
            collaborators,
            registered_classes: Mutex::new(BTreeSet::new()),
            run_log: RunLogHandle::new(),
        }
    }

    /// A handle to the current run's log.
    pub fn run_log(&self) -> RunLogHandle {
        self.run_log.clone()
    }

    pub fn snapshot(&self) -> RunLog {
        self.run_log.snapshot()
    }

    pub async fn install(
        &self,
        hosts: &[Host],
        plan: &InstallPlan,
    ) -> Result<(), OrchestrationError> {
        self.run(hosts, plan, None).await
    }

    /// Upgrades `hosts`, taking artifacts from `upgrade_path` unless a host
    /// names its own source. Sets `plan.upgraded` once the run succeeds.
    pub async fn upgrade(
        &self,
        hosts: &[Host],
        plan: &mut InstallPlan,
        upgrade_path: Option<&str>,
    ) -> Result<(), OrchestrationError> {
        let upgrade_plan =
            InstallPlan { run_type: RunType::Upgrade, ..plan.clone() };
        self.run(hosts, &upgrade_plan, upgrade_path).await?;
        plan.upgraded = true;
        Ok(())
    }

    async fn run(
        &self,
        hosts: &[Host],
        plan: &InstallPlan,
        upgrade_path: Option<&str>,
    ) -> Result<(), OrchestrationError> {
        self.run_log.reset();
        self.registered_classes.lock().await.clear();
        info!(
            self.log,
            "starting run";
            "type" => ?plan.run_type,
            "hosts" => hosts.len(),
            "masterless" => plan.masterless,
        );

        self.run_log.phase_started(Phase::Classifying);
        let topology = Topology::from_hosts(hosts, plan.masterless)?;
        let classified = Classifier::new(
            &self.log,
            &*self.collaborators.artifacts,
            plan,
            &topology,
        )
        .classify(hosts, upgrade_path)
        .await?;
        let resolved = allocate_working_dirs(
            &self.log,
            &*self.collaborators.executor,
            classified,
        )
        .await?;

        let run = Run {
            orchestrator: self,
            log: self.log.new(o!("run" => format!("{:?}", plan.run_type))),
            plan,
            all_hosts: hosts,
            topology: &topology,
            resolved: &resolved,
            runner: StepRunner::new(&self.log, &self.collaborators),
        };
        run.execute().await?;
        info!(self.log, "run complete");
        Ok(())
    }
}

/// One pass over a classified cluster.
struct Run<'a> {
    orchestrator: &'a Orchestrator,
    log: Logger,
    plan: &'a InstallPlan,
    all_hosts: &'a [Host],
    topology: &'a Topology,
    resolved: &'a [ResolvedHost],
    runner: StepRunner<'a>,
}

impl<'a> Run<'a> {
    fn run_log(&self) -> &RunLogHandle {
        &self.orchestrator.run_log
    }

    fn collaborators(&self) -> &Collaborators {
        &self.orchestrator.collaborators
    }

    fn find(&self, host: Option<&Host>) -> Option<&'a ResolvedHost> {
        let name = &host?.name;
        self.resolved.iter().find(|resolved| resolved.name() == name)
    }

    fn primary(&self) -> Option<&'a ResolvedHost> {
        self.find(self.topology.primary())
    }

    fn database(&self) -> Option<&'a ResolvedHost> {
        self.find(self.topology.database())
    }

    fn console(&self) -> Option<&'a ResolvedHost> {
        self.find(self.topology.console())
    }

    /// True if the data tier predates [`LEGACY_DATA_TIER`] and has no
    /// readiness endpoint to wait on.
    fn legacy_data_tier(&self) -> bool {
        self.database()
            .is_some_and(|db| db.version() < &LEGACY_DATA_TIER)
    }

    /// Hosts that get installed and converged: everything except a legacy
    /// data tier that doesn't share a machine with the primary or console.
    fn install_hosts(&self) -> Vec<&'a ResolvedHost> {
        self.resolved
            .iter()
            .filter(|host| {
                let name = host.name();
                let excluded = !self.plan.masterless
                    && self.legacy_data_tier()
                    && self.topology.is_database(name)
                    && !self.topology.is_primary(name)
                    && !self.topology.is_console(name);
                if excluded {
                    info!(
                        self.log,
                        "excluding legacy data tier";
                        "host" => name,
                    );
                }
                !excluded
            })
            .collect()
    }

    async fn execute(&self) -> Result<(), OrchestrationError> {
        self.fetch().await?;

        let install_hosts = self.install_hosts();
        for host in &install_hosts {
            self.stage(host).await?;
            self.install(host).await?;
            if self.plan.masterless {
                // Nothing to sign without a primary.
                self.stop_agent(host).await?;
            } else {
                self.certify(host).await?;
            }
        }

        if self.plan.masterless {
            self.converge(&install_hosts, Phase::AgentConverge, false).await?;
        } else {
            self.converge(&install_hosts, Phase::AgentConverge, true).await?;
            self.service_wait(&install_hosts).await?;
            self.converge(&install_hosts, Phase::Finalizing, true).await?;
        }
        self.run_log().completed();
        Ok(())
    }

    async fn fetch(&self) -> Result<(), OrchestrationError> {
        self.run_log().phase_started(Phase::Fetching);
        let fetcher =
            ArtifactFetcher::new(&self.log, &*self.collaborators().artifacts);
        for host in self.resolved {
            if host.mode().skips_fetch() {
                self.run_log().host_step(
                    Phase::Fetching,
                    host.name(),
                    StepOutcome::Skipped {
                        reason: "installs without a fetched artifact",
                    },
                );
                continue;
            }
            let command = fetcher
                .fetch_command(host, self.plan.fetch_local_then_push)
                .await?;
            self.runner.run(host.host(), &command).await?;
            self.run_log().host_step(
                Phase::Fetching,
                host.name(),
                StepOutcome::Completed,
            );
        }
        Ok(())
    }

    async fn stage(
        &self,
        host: &ResolvedHost,
    ) -> Result<(), OrchestrationError> {
        self.run_log().phase_started(Phase::Staging);
        let mut staged = false;
        if let Some(command) = gpg_key_repair_command(host) {
            self.runner.shell(host.host(), &command).await?;
            staged = true;
        }
        if host.mode() == InstallMode::LegacyInstaller {
            let set_console_password = self.console().is_some()
                && console_password_needed(
                    self.plan,
                    self.console().and_then(ResolvedHost::previous_version),
                );
            ConfigPayloadCoordinator::new(
                &self.log,
                &*self.collaborators().payloads,
                &*self.collaborators().executor,
            )
            .stage(self.plan, host, self.all_hosts, set_console_password)
            .await?;
            staged = true;
        }
        let outcome = if staged {
            StepOutcome::Completed
        } else {
            StepOutcome::Skipped { reason: "nothing to stage" }
        };
        self.run_log().host_step(Phase::Staging, host.name(), outcome);
        Ok(())
    }

    async fn install(
        &self,
        host: &ResolvedHost,
    ) -> Result<(), OrchestrationError> {
        self.run_log().phase_started(Phase::Executing);
        if host.mode() == InstallMode::Frictionless {
            if let Some(primary) = self.topology.primary() {
                if primary.platform != host.host().platform {
                    self.register_package_class(host, primary).await?;
                }
            }
        }
        let ctx = BuildContext { plan: self.plan, topology: self.topology };
        let command = install_command(&ctx, host)?;
        info!(
            self.log,
            "installing";
            "host" => host.name(),
            "mode" => %host.mode(),
            "version" => %host.version(),
        );
        self.runner.run(host.host(), &command).await?;
        self.run_log().host_step(
            Phase::Executing,
            host.name(),
            StepOutcome::Completed,
        );
        Ok(())
    }

    /// Makes the primary serve packages for `host`'s platform.
    async fn register_package_class(
        &self,
        host: &ResolvedHost,
        primary: &Host,
    ) -> Result<(), OrchestrationError> {
        let class = package_class_name(host.host());
        let mut registered = self.orchestrator.registered_classes.lock().await;
        if registered.contains(&class) {
            debug!(
                self.log,
                "package class already registered";
                "class" => &class,
            );
            return Ok(());
        }

        if host.version() < &MODERN_REGISTRATION {
            let target = self.topology.console().unwrap_or(primary);
            for command in legacy_registration_commands(&class, &primary.name) {
                self.runner.shell(target, &command).await?;
            }
        } else {
            let registrar = self.collaborators().registrar.as_ref().ok_or(
                DependencyUnavailableError {
                    capability: "package class registrar",
                    remediation: "configure a node classification client to \
                                  install frictionless agents",
                },
            )?;
            let existing = registrar
                .node_group(FRICTIONLESS_NODE_GROUP)
                .await
                .map_err(|error| {
                    ExecutionError::transport(
                        &primary.name,
                        "read node group",
                        error,
                    )
                })?;
            let mut group = existing.unwrap_or_else(|| NodeGroup {
                name: FRICTIONLESS_NODE_GROUP.to_owned(),
                rule: serde_json::json!(["and", ["=", "name", primary.name]]),
                classes: BTreeMap::new(),
            });
            if group.classes.contains_key(&class) {
                debug!(
                    self.log,
                    "node group already has class";
                    "class" => &class,
                );
                registered.insert(class);
                return Ok(());
            }
            group.classes.insert(class.clone(), serde_json::json!({}));
            registrar.save_node_group(&group).await.map_err(|error| {
                ExecutionError::transport(
                    &primary.name,
                    "save node group",
                    error,
                )
            })?;
        }
        self.runner.shell(primary, &converge_command()).await?;
        info!(
            self.log,
            "registered package class";
            "class" => &class,
            "for_host" => host.name(),
        );
        registered.insert(class);
        Ok(())
    }

    async fn certify(
        &self,
        host: &ResolvedHost,
    ) -> Result<(), OrchestrationError> {
        self.run_log().phase_started(Phase::Certifying);
        let name = host.name();
        let signed_by_installer = self.topology.is_core(name)
            && uses_structured_config(Some(host.version()));
        if !signed_by_installer {
            self.collaborators()
                .lifecycle
                .sign_certificate(host.host())
                .await
                .map_err(|error| {
                    ExecutionError::transport(name, "sign certificate", error)
                })?;
        }
        self.stop_agent(host).await?;
        let outcome = if signed_by_installer {
            StepOutcome::Skipped {
                reason: "certificate signed by the installer",
            }
        } else {
            StepOutcome::Completed
        };
        self.run_log().host_step(Phase::Certifying, name, outcome);
        Ok(())
    }

    /// Stops the agent service. Runs for every installed host, masterless
    /// or not.
    async fn stop_agent(
        &self,
        host: &ResolvedHost,
    ) -> Result<(), OrchestrationError> {
        self.collaborators().lifecycle.stop_agent(host.host()).await.map_err(
            |error| ExecutionError::transport(host.name(), "stop agent", error),
        )?;
        Ok(())
    }

    /// One convergence pass. With `checkpoints`, waits for the data tier
    /// before starting and after converging it, and for the console after
    /// converging it.
    async fn converge(
        &self,
        hosts: &[&ResolvedHost],
        phase: Phase,
        checkpoints: bool,
    ) -> Result<(), OrchestrationError> {
        self.run_log().phase_started(phase);
        let database = self
            .database()
            .filter(|_| checkpoints && !self.legacy_data_tier());
        let console = self.console().filter(|_| checkpoints);
        let poller =
            ReadinessPoller::new(&self.log, &*self.collaborators().executor);

        if phase == Phase::AgentConverge {
            if let Some(db) = database {
                let outcome = poller.data_tier(db).await?;
                self.record_checkpoint(Checkpoint::DataTier, db, outcome);
            }
        }

        for host in hosts {
            self.runner.shell(host.host(), &converge_command()).await?;

            if database.is_some_and(|db| db.name() == host.name()) {
                let outcome = poller.data_tier(host).await?;
                self.record_checkpoint(Checkpoint::DataTier, host, outcome);
            }
            if console.is_some_and(|c| c.name() == host.name()) {
                let outcome = poller
                    .console(host, self.plan.console_status_attempts)
                    .await?;
                self.record_checkpoint(Checkpoint::Console, host, outcome);
            }
            if phase == Phase::AgentConverge
                && host.host().platform.family() == OsFamily::Windows
                && host.host().is_frictionless()
            {
                self.remove_client_datadir(host).await?;
            }
            self.run_log().host_step(
                phase,
                host.name(),
                StepOutcome::Completed,
            );
        }
        Ok(())
    }

    fn record_checkpoint(
        &self,
        checkpoint: Checkpoint,
        host: &ResolvedHost,
        outcome: CheckpointOutcome,
    ) {
        self.run_log().checkpoint(checkpoint, host.name(), outcome);
    }

    async fn remove_client_datadir(
        &self,
        host: &ResolvedHost,
    ) -> Result<(), OrchestrationError> {
        let datadir = self
            .collaborators()
            .lifecycle
            .agent_setting(host.host(), "client_datadir")
            .await
            .map_err(|error| {
                ExecutionError::transport(
                    host.name(),
                    "read client_datadir",
                    error,
                )
            })?;
        let command = command_builder::remove_client_datadir_command(&datadir);
        self.runner.shell(host.host(), &command).await?;
        Ok(())
    }

    async fn service_wait(
        &self,
        hosts: &[&ResolvedHost],
    ) -> Result<(), OrchestrationError> {
        self.run_log().phase_started(Phase::ServiceWait);
        let lifecycle = &self.collaborators().lifecycle;
        for host in hosts {
            lifecycle.wait_for_host_in_console(host.host()).await.map_err(
                |error| {
                    ExecutionError::transport(
                        host.name(),
                        "wait for host in console",
                        error,
                    )
                },
            )?;
            self.run_log().host_step(
                Phase::ServiceWait,
                host.name(),
                StepOutcome::Completed,
            );
        }

        let Some(primary) = self.primary() else {
            return Ok(());
        };
        if primary.version() < &LIGHTWEIGHT_AGENT {
            let command = command_builder::bootstrap_task_command(
                self.database().map(ResolvedHost::version),
            );
            let target = self.console().unwrap_or(primary);
            info!(
                self.log,
                "running cluster bootstrap task";
                "host" => target.name(),
            );
            self.runner.shell(target.host(), &command).await?;
        }
        Ok(())
    }
}

/// Renders the steps a run would execute for each host, without running
/// them. Used by the CLI.
pub fn describe_install(
    plan: &InstallPlan,
    topology: &Topology,
    hosts: &[ResolvedHost],
) -> Result<Vec<(String, Vec<String>)>, OrchestrationError> {
    let ctx = BuildContext { plan, topology };
    hosts
        .iter()
        .map(|host| {
            let command = install_command(&ctx, host)?;
            let steps =
                command.steps.iter().map(ToString::to_string).collect();
            Ok((host.name().to_owned(), steps))
        })
        .collect()
}
