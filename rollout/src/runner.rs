// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hands resolved steps to the collaborator that performs them.

use crate::collaborators::{Collaborators, CommandOutput};
use crate::errors::ExecutionError;
use crate::steps::{CommandStep, InstallCommand, ShellCommand};
use rollout_common::Host;
use slog::{debug, o, Logger};

pub struct StepRunner<'a> {
    log: Logger,
    collaborators: &'a Collaborators,
}

impl<'a> StepRunner<'a> {
    pub fn new(log: &Logger, collaborators: &'a Collaborators) -> Self {
        Self { log: log.new(o!("component" => "StepRunner")), collaborators }
    }

    /// Runs one shell command and checks its exit code.
    pub async fn shell(
        &self,
        host: &Host,
        command: &ShellCommand,
    ) -> Result<CommandOutput, ExecutionError> {
        debug!(
            self.log,
            "running";
            "host" => &host.name,
            "command" => %command,
        );
        let output = self
            .collaborators
            .executor
            .execute(host, command)
            .await
            .map_err(|error| {
                ExecutionError::transport(&host.name, &command.text, error)
            })?;
        command.check(&host.name, output)
    }

    /// Runs every step in order, stopping at the first failure.
    pub async fn run(
        &self,
        host: &Host,
        command: &InstallCommand,
    ) -> Result<(), ExecutionError> {
        for step in &command.steps {
            self.step(host, step).await?;
        }
        Ok(())
    }

    async fn step(
        &self,
        host: &Host,
        step: &CommandStep,
    ) -> Result<(), ExecutionError> {
        let executor = &self.collaborators.executor;
        let lifecycle = &self.collaborators.lifecycle;
        let result = match step {
            CommandStep::Shell(command) => {
                return self.shell(host, command).await.map(drop);
            }
            CommandStep::CopyToHost { local, remote } => {
                executor.copy_to(host, local, remote).await
            }
            CommandStep::FetchToControl { base_url, file_name, local_dir } => {
                self.collaborators
                    .artifacts
                    .fetch_to_local(base_url, file_name, local_dir)
                    .await
                    .map(drop)
            }
            CommandStep::FetchRemoteFile { url } => {
                executor.fetch_remote_file(host, url).await
            }
            CommandStep::DeviceInstall { file } => {
                executor.install_from_file(host, file).await
            }
            CommandStep::MsiInstall { msi_path, debug } => {
                lifecycle.install_msi(host, msi_path, *debug).await
            }
            CommandStep::AgentPackageInstall(request) => {
                lifecycle.install_agent_package(host, request).await
            }
            CommandStep::ConfigureTypeDefaults => {
                lifecycle.configure_type_defaults(host).await
            }
        };
        debug!(
            self.log,
            "step finished";
            "host" => &host.name,
            "step" => %step,
        );
        result.map_err(|error| {
            ExecutionError::transport(&host.name, step.to_string(), error)
        })
    }
}
