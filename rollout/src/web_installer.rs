// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Starts the browser-driven installer on a single host and waits until it
//! asks for the browser.

use crate::artifact_name::ArtifactName;
use crate::classify::{
    working_dir_name, Classification, ResolvedHost, DEFAULT_INSTALLER,
};
use crate::collaborators::Collaborators;
use crate::command_builder::{
    web_installer_launch_command, web_installer_log_command,
};
use crate::errors::{ConfigurationError, ExecutionError, OrchestrationError};
use crate::fetch::ArtifactFetcher;
use crate::install_mode::InstallMode;
use crate::readiness::{Checkpoint, CheckpointOutcome, ReadinessPoller};
use crate::retry::RetryPolicy;
use crate::runner::StepRunner;
use regex::Regex;
use rollout_common::thresholds::WEB_INSTALLER_PROMPT;
use rollout_common::{Host, InstallPlan, OsFamily, Version};
use slog::{info, o, Logger};
use std::sync::LazyLock;
use std::time::Duration;

const LOG_ATTEMPTS: usize = 10;

/// True if the installer log shows the browser prompt, as worded before
/// [`WEB_INSTALLER_PROMPT`].
pub fn legacy_prompt_shown(log: &str) -> bool {
    static PROMPT: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(concat!(
            r"(?s)Please\s+go\s+to\s+https://.*\s+in\s+your\s+browser",
            r"\s+to\s+continue\s+installation",
        ))
        .expect("web installer prompt regex should be valid")
    });
    PROMPT.is_match(log)
}

/// True if the installer log shows the browser prompt. Later releases
/// reworded the start of the sentence, so only the tail is matched.
pub fn prompt_shown(log: &str) -> bool {
    static PROMPT: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(concat!(
            r"(?s)o\s+to\s+https://.*\s+in\s+your\s+browser",
            r"\s+to\s+continue\s+installation",
        ))
        .expect("web installer prompt regex should be valid")
    });
    PROMPT.is_match(log)
}

/// A web installer waiting for its browser session.
#[derive(Debug)]
pub struct WebInstallerLaunch {
    pub host: ResolvedHost,
    /// Installer output, relative to the unpacked artifact.
    pub log_file: String,
    pub attempts: usize,
}

pub struct WebInstaller<'a> {
    log: Logger,
    collaborators: &'a Collaborators,
}

impl<'a> WebInstaller<'a> {
    pub fn new(log: &Logger, collaborators: &'a Collaborators) -> Self {
        Self { log: log.new(o!("component" => "WebInstaller")), collaborators }
    }

    pub async fn kick_off(
        &self,
        host: &Host,
        plan: &InstallPlan,
    ) -> Result<WebInstallerLaunch, OrchestrationError> {
        if matches!(
            host.platform.family(),
            OsFamily::MacOs | OsFamily::Windows
        ) {
            return Err(ConfigurationError::UnsupportedPlatform {
                host: host.name.clone(),
                platform: host.platform.to_string(),
                operation: "web installation",
            }
            .into());
        }

        let source =
            host.overrides.source.clone().or_else(|| plan.source.clone());
        let version = self.version(host, plan, source.as_deref()).await?;
        let classification = Classification {
            artifact: ArtifactName::unix(host, &version, plan.use_all_tar),
            host: host.clone(),
            previous_version: None,
            source,
            mode: InstallMode::LegacyInstaller,
            installer: host
                .overrides
                .installer
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTALLER.to_owned()),
            version,
        };
        let working_dir = self
            .collaborators
            .executor
            .create_tmpdir(host, &working_dir_name())
            .await
            .map_err(|error| {
                ExecutionError::transport(
                    &host.name,
                    "create working directory",
                    error,
                )
            })?;
        let resolved = ResolvedHost::new(classification, working_dir);

        let runner = StepRunner::new(&self.log, self.collaborators);
        let fetch =
            ArtifactFetcher::new(&self.log, &*self.collaborators.artifacts)
                .fetch_command(&resolved, plan.fetch_local_then_push)
                .await?;
        runner.run(host, &fetch).await?;

        let log_file = format!(
            "higgs_{}.log",
            resolved.working_dir().file_name().unwrap_or("install")
        );
        let launch = web_installer_launch_command(&resolved, &log_file);
        runner.shell(host, &launch).await?;
        info!(
            self.log,
            "web installer launched";
            "host" => &host.name,
            "version" => %resolved.version(),
            "log_file" => &log_file,
        );

        let ready: fn(&str) -> bool =
            if resolved.version() < &WEB_INSTALLER_PROMPT {
                legacy_prompt_shown
            } else {
                prompt_shown
            };
        let policy = RetryPolicy::fibonacci_with_attempts(
            Duration::from_secs(1),
            LOG_ATTEMPTS,
        );
        let outcome =
            ReadinessPoller::new(&self.log, &*self.collaborators.executor)
                .wait(
                    Checkpoint::WebInstaller,
                    host,
                    &policy,
                    &web_installer_log_command(&resolved, &log_file),
                    ready,
                )
                .await?;
        let attempts = match outcome {
            CheckpointOutcome::Ready { attempts } => attempts,
            CheckpointOutcome::Skipped { .. } => 0,
        };
        Ok(WebInstallerLaunch { host: resolved, log_file, attempts })
    }

    async fn version(
        &self,
        host: &Host,
        plan: &InstallPlan,
        source: Option<&str>,
    ) -> Result<Version, ConfigurationError> {
        if let Some(version) =
            host.overrides.version.as_ref().or(plan.version.as_ref())
        {
            return Ok(version.clone());
        }
        let source = source.ok_or_else(|| ConfigurationError::MissingSource {
            host: host.name.clone(),
        })?;
        self.collaborators
            .artifacts
            .load_version(source, &plan.version_file)
            .await
            .map_err(|error| ConfigurationError::UnresolvedVersion {
                host: host.name.clone(),
                error,
            })
    }
}
