// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster-wide settings for one orchestration run.

use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The default number of console status checks before giving up.
pub const DEFAULT_CONSOLE_STATUS_ATTEMPTS: usize = 9;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    #[default]
    Install,
    Upgrade,
}

/// Cluster-wide defaults for a run. Every value here can be overridden per
/// host through [`crate::host::HostOverrides`] where a matching field
/// exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InstallPlan {
    pub version: Option<Version>,
    /// Version used for Windows hosts that don't set their own.
    pub windows_version: Option<Version>,
    pub upgrade_version: Option<Version>,
    /// Directory or URL holding the install artifacts.
    pub source: Option<String>,
    pub run_type: RunType,
    pub masterless: bool,
    /// Download artifacts to the control process and push them to each
    /// host, rather than having each host fetch them.
    pub fetch_local_then_push: bool,
    /// Use the platform-independent `all` tarball.
    pub use_all_tar: bool,
    pub install_32: Option<bool>,
    pub debug: bool,
    /// Answer overrides handed to the configuration payload generator.
    pub answers: Option<BTreeMap<String, String>>,
    pub custom_answers: Option<BTreeMap<String, String>>,
    /// File under the artifact source naming the latest build.
    pub version_file: String,
    pub windows_version_file: String,
    pub console_status_attempts: usize,
    pub agent_version: Option<String>,
    pub agent_sha: Option<String>,
    pub agent_collection: Option<String>,
    /// Set once an upgrade pass has completed successfully.
    #[serde(skip)]
    pub upgraded: bool,
}

impl Default for InstallPlan {
    fn default() -> Self {
        Self {
            version: None,
            windows_version: None,
            upgrade_version: None,
            source: None,
            run_type: RunType::Install,
            masterless: false,
            fetch_local_then_push: false,
            use_all_tar: false,
            install_32: None,
            debug: false,
            answers: None,
            custom_answers: None,
            version_file: "LATEST".to_owned(),
            windows_version_file: "LATEST-win".to_owned(),
            console_status_attempts: DEFAULT_CONSOLE_STATUS_ATTEMPTS,
            agent_version: None,
            agent_sha: None,
            agent_collection: None,
            upgraded: false,
        }
    }
}

impl InstallPlan {
    pub fn is_upgrade(&self) -> bool {
        self.run_type == RunType::Upgrade
    }

    /// True if the caller supplied any answer overrides.
    pub fn has_answer_overrides(&self) -> bool {
        self.answers.is_some() || self.custom_answers.is_some()
    }
}
