// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Managed hosts as described by the inventory.

use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

/// One managed machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Host {
    pub name: String,
    pub platform: Platform,
    #[serde(default)]
    pub roles: BTreeSet<Role>,
    #[serde(default)]
    pub overrides: HostOverrides,
}

impl Host {
    pub fn new(
        name: impl Into<String>,
        platform: &str,
        roles: impl IntoIterator<Item = Role>,
    ) -> Self {
        Self {
            name: name.into(),
            platform: Platform::new(platform),
            roles: roles.into_iter().collect(),
            overrides: HostOverrides::default(),
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    pub fn is_frictionless(&self) -> bool {
        self.has_role(&Role::Frictionless)
    }

    /// True if the host holds none of the roles that need the full
    /// installer (primary, data tier, console, frictionless).
    pub fn is_plain_agent(&self) -> bool {
        !self.roles.iter().any(Role::needs_full_installer)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl AsRef<Host> for Host {
    fn as_ref(&self) -> &Host {
        self
    }
}

/// Per-host settings that take precedence over the cluster-wide plan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostOverrides {
    pub version: Option<Version>,
    pub upgrade_version: Option<Version>,
    /// Directory or URL holding this host's install artifacts.
    pub source: Option<String>,
    pub upgrade_source: Option<String>,
    /// Name of the installer binary inside the unpacked artifact.
    pub installer: Option<String>,
    pub debug: Option<bool>,
    pub install_32: Option<bool>,
    /// Architecture of the agent runtime; `x86` forces 32-bit packages.
    pub agent_arch: Option<String>,
    /// Image template the host was provisioned from.
    pub template: Option<String>,
    /// Windows host reached through cygwin rather than native PowerShell.
    #[serde(default)]
    pub cygwin: bool,
    /// `section -> key -> value` settings passed to the frictionless script.
    #[serde(default)]
    pub frictionless_options: BTreeMap<String, BTreeMap<String, String>>,
    pub agent_version: Option<String>,
    pub agent_sha: Option<String>,
    pub agent_collection: Option<String>,
}

/// Operating system family, derived from the platform string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OsFamily {
    Windows,
    MacOs,
    /// Network appliances that install packages through the device CLI.
    Eos,
    Aix,
    Debian,
    Ubuntu,
    Other,
}

/// A platform string such as `el-7-x86_64` or `windows-2012r2-64`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Platform {
    raw: String,
    family: OsFamily,
}

impl Platform {
    pub fn new(raw: &str) -> Self {
        let family = if raw.contains("windows") {
            OsFamily::Windows
        } else if raw.contains("osx") {
            OsFamily::MacOs
        } else if raw.contains("eos") {
            OsFamily::Eos
        } else if raw.contains("aix") {
            OsFamily::Aix
        } else if raw.contains("debian") {
            OsFamily::Debian
        } else if raw.contains("ubuntu") {
            OsFamily::Ubuntu
        } else {
            OsFamily::Other
        };
        Self { raw: raw.to_owned(), family }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn family(&self) -> OsFamily {
        self.family
    }

    pub fn is_windows(&self) -> bool {
        self.family == OsFamily::Windows
    }

    /// True if the platform string advertises a 64-bit x86 machine.
    pub fn is_x86_64(&self) -> bool {
        ["x86_64", "amd64", "-64"].iter().any(|arch| self.raw.ends_with(arch))
    }

    /// True for platforms that receive tarballs rather than OS packages.
    pub fn is_unix_like(&self) -> bool {
        !matches!(self.family, OsFamily::Windows | OsFamily::MacOs)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<String> for Platform {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<Platform> for String {
    fn from(platform: Platform) -> Self {
        platform.raw
    }
}

/// A role a host plays in the cluster.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Coordinates configuration distribution (`master` in inventories).
    Primary,
    /// Runs the backing data store.
    Database,
    /// Serves the management UI (`dashboard` in inventories).
    Console,
    Agent,
    /// Pulls its package from the primary instead of receiving an artifact.
    Frictionless,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Primary => "master",
            Role::Database => "database",
            Role::Console => "dashboard",
            Role::Agent => "agent",
            Role::Frictionless => "frictionless",
            Role::Other(other) => other,
        }
    }

    fn needs_full_installer(&self) -> bool {
        matches!(
            self,
            Role::Primary | Role::Database | Role::Console | Role::Frictionless
        )
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "master" | "primary" => Role::Primary,
            "database" => Role::Database,
            "dashboard" | "console" => Role::Console,
            "agent" => Role::Agent,
            "frictionless" => Role::Frictionless,
            _ => Role::Other(s),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_owned()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
