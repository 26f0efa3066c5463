// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Canonical install artifact names.

use rollout_common::thresholds::{LIGHTWEIGHT_AGENT, WINDOWS_64BIT_DEFAULT};
use rollout_common::{Host, InstallPlan, OsFamily, Version};
use std::fmt;

/// File extension of an install artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extension {
    TarGz,
    Tar,
    Dmg,
    Msi,
    Swix,
}

impl Extension {
    pub fn as_str(self) -> &'static str {
        match self {
            Extension::TarGz => ".tar.gz",
            Extension::Tar => ".tar",
            Extension::Dmg => ".dmg",
            Extension::Msi => ".msi",
            Extension::Swix => ".swix",
        }
    }

    pub fn is_gzipped(self) -> bool {
        self == Extension::TarGz
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bitness {
    X86,
    X64,
}

/// Which level of the override chain picked a Windows package's bitness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitnessSource {
    /// `install_32` or `agent_arch` on the host itself.
    HostOverride,
    /// `install_32` on the plan.
    PlanOverride,
    /// The platform string doesn't advertise a 64-bit machine.
    Capability,
    /// 64-bit from [`WINDOWS_64BIT_DEFAULT`] onwards, 32-bit before.
    VersionDefault,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitnessDecision {
    pub bitness: Bitness,
    pub decided_by: BitnessSource,
}

/// Decides whether a Windows host gets a 32- or 64-bit package.
///
/// Levels are checked in order and the first one with an opinion wins:
/// per-host override, plan override, platform capability, version default.
pub fn windows_bitness(
    host: &Host,
    version: &Version,
    plan: &InstallPlan,
) -> BitnessDecision {
    let host_override = match host.overrides.install_32 {
        Some(install_32) => Some(install_32),
        None if host.overrides.agent_arch.as_deref() == Some("x86") => {
            Some(true)
        }
        None => None,
    };
    let (install_32, decided_by) = if let Some(install_32) = host_override {
        (install_32, BitnessSource::HostOverride)
    } else if let Some(install_32) = plan.install_32 {
        (install_32, BitnessSource::PlanOverride)
    } else if !host.platform.is_x86_64() {
        (true, BitnessSource::Capability)
    } else {
        (version < &WINDOWS_64BIT_DEFAULT, BitnessSource::VersionDefault)
    };
    let bitness = if install_32 { Bitness::X86 } else { Bitness::X64 };
    BitnessDecision { bitness, decided_by }
}

/// The base name (no extension) of the artifact to fetch for a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactName {
    pub base: String,
    /// Set for Windows hosts only.
    pub bitness: Option<BitnessDecision>,
}

impl ArtifactName {
    pub fn for_host(
        host: &Host,
        version: &Version,
        plan: &InstallPlan,
    ) -> Self {
        match host.platform.family() {
            OsFamily::Windows => {
                let decision = windows_bitness(host, version, plan);
                let lightweight = version >= &LIGHTWEIGHT_AGENT;
                let base = match (lightweight, decision.bitness) {
                    (true, Bitness::X64) => {
                        format!("puppet-agent-{version}-x64")
                    }
                    (true, Bitness::X86) => {
                        format!("puppet-agent-{version}-x86")
                    }
                    (false, Bitness::X64) => {
                        format!("puppet-enterprise-{version}-x64")
                    }
                    (false, Bitness::X86) => {
                        format!("puppet-enterprise-{version}")
                    }
                };
                Self { base, bitness: Some(decision) }
            }
            OsFamily::MacOs => Self {
                base: format!("puppet-enterprise-{version}-{}", host.platform),
                bitness: None,
            },
            _ => Self::unix(host, version, plan.use_all_tar),
        }
    }

    /// The tarball name for Unix-like hosts; `all` replaces the platform
    /// when the platform-independent tarball is requested.
    pub fn unix(host: &Host, version: &Version, use_all_tar: bool) -> Self {
        let platform = if use_all_tar { "all" } else { host.platform.as_str() };
        Self {
            base: format!("puppet-enterprise-{version}-{platform}"),
            bitness: None,
        }
    }

    pub fn with_extension(&self, extension: Extension) -> String {
        format!("{}{extension}", self.base)
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)
    }
}

/// The package a network appliance installs from.
pub fn device_package_name(host: &Host, version: &Version) -> String {
    format!("puppet-enterprise-{version}-{}{}", host.platform, Extension::Swix)
}
