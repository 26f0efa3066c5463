// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Which installer configuration a host needs, and where it goes.
//!
//! Text generation belongs to the [`ConfigPayloadGenerator`] collaborator;
//! this module only decides the format, the location, and whether an
//! existing on-host configuration can be reused instead.

use crate::classify::ResolvedHost;
use crate::collaborators::{ConfigPayloadGenerator, HostExecutor};
use crate::errors::ExecutionError;
use camino::{Utf8Path, Utf8PathBuf};
use rollout_common::thresholds::{uses_structured_config, CONSOLE_PASSWORD};
use rollout_common::{version_is_less, Host, InstallPlan, Version};
use slog::{debug, info, o, Logger};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Structured configuration (`pe.conf`).
    Hiera,
    /// Flat answer file.
    Bash,
}

/// Hints handed to the payload generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadHints {
    pub format: PayloadFormat,
    /// Upgrading from a flat-answers release; the generator must carry over
    /// that release's data-store defaults.
    pub include_legacy_database_defaults: bool,
    pub set_console_password: bool,
}

impl PayloadHints {
    pub fn for_host(
        plan: &InstallPlan,
        host: &ResolvedHost,
        set_console_password: bool,
    ) -> Self {
        let format = if uses_structured_config(Some(host.version())) {
            PayloadFormat::Hiera
        } else {
            PayloadFormat::Bash
        };
        Self {
            format,
            include_legacy_database_defaults: plan.is_upgrade()
                && !uses_structured_config(host.previous_version()),
            set_console_password,
        }
    }
}

/// Upgrades from before [`CONSOLE_PASSWORD`] (or from an unknown console
/// version) must set the console password.
pub fn console_password_needed(
    plan: &InstallPlan,
    console_previous_version: Option<&Version>,
) -> bool {
    plan.is_upgrade()
        && version_is_less(console_previous_version, &CONSOLE_PASSWORD)
}

/// Where the installer configuration lives and the flag that passes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigFileSetting {
    pub path: Utf8PathBuf,
    pub flag: &'static str,
}

impl ConfigFileSetting {
    pub fn for_version(working_dir: &Utf8Path, version: &Version) -> Self {
        if uses_structured_config(Some(version)) {
            Self { path: working_dir.join("pe.conf"), flag: "-c" }
        } else {
            Self { path: working_dir.join("answers"), flag: "-a" }
        }
    }
}

impl fmt::Display for ConfigFileSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.flag, self.path)
    }
}

/// True if the installer should reuse the configuration already on the
/// host: an upgrade from a structured-config release with no answer
/// overrides.
pub fn reuses_existing_config(plan: &InstallPlan, host: &ResolvedHost) -> bool {
    plan.is_upgrade()
        && !plan.has_answer_overrides()
        && uses_structured_config(host.previous_version())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadOutcome {
    Reused,
    Written(Utf8PathBuf),
}

/// Generates and writes installer configuration for legacy-installer hosts.
pub struct ConfigPayloadCoordinator<'a> {
    log: Logger,
    generator: &'a dyn ConfigPayloadGenerator,
    executor: &'a dyn HostExecutor,
}

impl<'a> ConfigPayloadCoordinator<'a> {
    pub fn new(
        log: &Logger,
        generator: &'a dyn ConfigPayloadGenerator,
        executor: &'a dyn HostExecutor,
    ) -> Self {
        Self {
            log: log.new(o!("component" => "ConfigPayloadCoordinator")),
            generator,
            executor,
        }
    }

    pub async fn stage(
        &self,
        plan: &InstallPlan,
        host: &ResolvedHost,
        all_hosts: &[Host],
        set_console_password: bool,
    ) -> Result<PayloadOutcome, ExecutionError> {
        if reuses_existing_config(plan, host) {
            info!(
                self.log,
                "reusing on-host configuration";
                "host" => host.name(),
            );
            return Ok(PayloadOutcome::Reused);
        }

        let setting =
            ConfigFileSetting::for_version(host.working_dir(), host.version());
        let hints = PayloadHints::for_host(plan, host, set_console_password);
        let contents = self
            .generator
            .generate(host.version(), all_hosts, host.host(), &hints)
            .await
            .map_err(|error| {
                ExecutionError::transport(
                    host.name(),
                    "generate configuration",
                    error,
                )
            })?;
        debug!(
            self.log,
            "generated configuration";
            "host" => host.name(),
            "path" => %setting.path,
            "contents" => &contents,
        );
        self.executor
            .create_remote_file(host.host(), &setting.path, &contents)
            .await
            .map_err(|error| {
                ExecutionError::transport(
                    host.name(),
                    "write configuration",
                    error,
                )
            })?;
        Ok(PayloadOutcome::Written(setting.path))
    }
}
