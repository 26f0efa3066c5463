// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolved, host-specific command sequences.
//!
//! Everything here is plain data: the command builder produces it and the
//! orchestrator hands each step to a collaborator.

use crate::collaborators::CommandOutput;
use crate::errors::ExecutionError;
use camino::Utf8PathBuf;
use itertools::Itertools;
use std::collections::BTreeSet;
use std::fmt;

/// Exit codes a command may return without failing the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitCodes {
    Only(BTreeSet<i32>),
    Any,
}

impl ExitCodes {
    pub fn only(codes: impl IntoIterator<Item = i32>) -> Self {
        Self::Only(codes.into_iter().collect())
    }

    pub fn accepts(&self, code: i32) -> bool {
        match self {
            Self::Only(codes) => codes.contains(&code),
            Self::Any => true,
        }
    }
}

impl Default for ExitCodes {
    fn default() -> Self {
        Self::only([0])
    }
}

impl fmt::Display for ExitCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Only(codes) => write!(f, "[{}]", codes.iter().join(", ")),
            Self::Any => f.write_str("any"),
        }
    }
}

/// A shell command line plus the exit codes it may return.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellCommand {
    pub text: String,
    pub acceptable: ExitCodes,
    /// The command drops the connection (e.g. it restarts networking); the
    /// executor should reconnect rather than fail.
    pub expect_connection_failure: bool,
}

impl ShellCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            acceptable: ExitCodes::default(),
            expect_connection_failure: false,
        }
    }

    pub fn accepting(mut self, acceptable: ExitCodes) -> Self {
        self.acceptable = acceptable;
        self
    }

    /// Fails if `output` carries an exit code outside the acceptable set.
    pub fn check(
        &self,
        host: &str,
        output: CommandOutput,
    ) -> Result<CommandOutput, ExecutionError> {
        if self.acceptable.accepts(output.exit_code) {
            Ok(output)
        } else {
            Err(ExecutionError::UnacceptableExitCode {
                host: host.to_owned(),
                command: self.text.clone(),
                exit_code: output.exit_code,
                acceptable: self.acceptable.clone(),
                stdout: output.stdout,
            })
        }
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Parameters for installing the lightweight agent from the promoted
/// package repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentPackageRequest {
    pub distribution_version: String,
    pub agent_version: Option<String>,
    pub agent_sha: Option<String>,
    pub collection: Option<String>,
}

/// One unit of work on (or for) a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandStep {
    Shell(ShellCommand),
    /// Copy a file from the control process to the host.
    CopyToHost { local: Utf8PathBuf, remote: Utf8PathBuf },
    /// Download `<base_url>/<file_name>` into `local_dir` on the control
    /// process.
    FetchToControl {
        base_url: String,
        file_name: String,
        local_dir: Utf8PathBuf,
    },
    /// Have a network appliance retrieve a file through its own CLI.
    FetchRemoteFile { url: String },
    /// Install a package already present on a network appliance.
    DeviceInstall { file: String },
    MsiInstall { msi_path: String, debug: bool },
    AgentPackageInstall(AgentPackageRequest),
    /// Apply the agent's per-platform default settings.
    ConfigureTypeDefaults,
}

impl CommandStep {
    pub fn shell(text: impl Into<String>) -> Self {
        Self::Shell(ShellCommand::new(text))
    }

    pub fn shell_accepting(
        text: impl Into<String>,
        acceptable: ExitCodes,
    ) -> Self {
        Self::Shell(ShellCommand::new(text).accepting(acceptable))
    }
}

impl fmt::Display for CommandStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(command) => {
                if command.acceptable == ExitCodes::default() {
                    write!(f, "{command}")
                } else {
                    write!(f, "{command} (exit codes {})", command.acceptable)
                }
            }
            Self::CopyToHost { local, remote } => {
                write!(f, "copy {local} -> {remote}")
            }
            Self::FetchToControl { base_url, file_name, local_dir } => {
                write!(f, "download {base_url}/{file_name} -> {local_dir}")
            }
            Self::FetchRemoteFile { url } => write!(f, "device fetch {url}"),
            Self::DeviceInstall { file } => write!(f, "device install {file}"),
            Self::MsiInstall { msi_path, debug } => {
                write!(f, "msi install {msi_path}")?;
                if *debug {
                    f.write_str(" (debug)")?;
                }
                Ok(())
            }
            Self::AgentPackageInstall(request) => write!(
                f,
                "agent package install for {}",
                request.distribution_version
            ),
            Self::ConfigureTypeDefaults => {
                f.write_str("configure type defaults")
            }
        }
    }
}

/// A resolved sequence of steps for one host and one phase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstallCommand {
    pub steps: Vec<CommandStep>,
}

impl InstallCommand {
    pub fn new(steps: Vec<CommandStep>) -> Self {
        Self { steps }
    }

    pub fn push(&mut self, step: CommandStep) {
        self.steps.push(step);
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The shell command lines, in order.
    pub fn shell_texts(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|step| match step {
            CommandStep::Shell(command) => Some(command.text.as_str()),
            _ => None,
        })
    }
}

impl Extend<CommandStep> for InstallCommand {
    fn extend<T: IntoIterator<Item = CommandStep>>(&mut self, iter: T) {
        self.steps.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_exit_codes() {
        let codes = ExitCodes::only([0, 2]);
        assert!(codes.accepts(0));
        assert!(codes.accepts(2));
        assert!(!codes.accepts(1));
        assert!(ExitCodes::Any.accepts(255));
        assert_eq!(codes.to_string(), "[0, 2]");
        assert_eq!(ExitCodes::default().to_string(), "[0]");
    }

    #[test]
    fn test_check_reports_command_verbatim() {
        let command = ShellCommand::new("puppet agent -t")
            .accepting(ExitCodes::only([0, 2]));
        let ok = CommandOutput { stdout: "applied".to_owned(), exit_code: 2 };
        assert_eq!(command.check("agent1", ok.clone()).unwrap(), ok);

        let err = command
            .check(
                "agent1",
                CommandOutput { stdout: "boom".to_owned(), exit_code: 4 },
            )
            .unwrap_err();
        assert_matches!(
            &err,
            ExecutionError::UnacceptableExitCode {
                host,
                command,
                exit_code: 4,
                stdout,
                ..
            } if host == "agent1"
                && command == "puppet agent -t"
                && stdout == "boom"
        );
        assert_eq!(
            err.to_string(),
            "command on agent1 exited with 4 (acceptable: [0, 2]): \
             puppet agent -t"
        );
    }

    #[test]
    fn test_step_display() {
        let step = CommandStep::shell_accepting(
            "puppet agent -t",
            ExitCodes::only([0, 2]),
        );
        assert_eq!(step.to_string(), "puppet agent -t (exit codes [0, 2])");
        assert_eq!(CommandStep::shell("true").to_string(), "true");
    }
}
