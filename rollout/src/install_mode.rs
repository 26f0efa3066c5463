// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-host choice of install mechanism.

use rollout_common::thresholds::{
    FRICTIONLESS_SUPPORT, LIGHTWEIGHT_AGENT, WINDOWS_MSI_WINDOW_END,
};
use rollout_common::{Host, OsFamily, Version};
use std::fmt;

/// How a host gets its software. Decided once per run in
/// [`InstallMode::resolve`] and never recomputed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstallMode {
    /// Agent package from the promoted repository.
    LightweightAgent,
    /// The host pulls an install script from the primary.
    Frictionless,
    /// MSI, disk image, or device package.
    OsNativePackage,
    /// The full installer from an unpacked tarball.
    LegacyInstaller,
    /// Lightweight agent on a cluster with no primary.
    MasterlessLightweight,
}

impl InstallMode {
    pub fn resolve(host: &Host, version: &Version, masterless: bool) -> Self {
        let lightweight = if masterless {
            InstallMode::MasterlessLightweight
        } else {
            InstallMode::LightweightAgent
        };

        // A plain agent below the lightweight-agent release is deliberately
        // left to the platform rules below.
        if host.is_plain_agent() && version >= &LIGHTWEIGHT_AGENT {
            return lightweight;
        }

        let family = host.platform.family();
        if family == OsFamily::Windows
            && version >= &LIGHTWEIGHT_AGENT
            && version < &WINDOWS_MSI_WINDOW_END
        {
            return lightweight;
        }
        if family == OsFamily::Windows && !host.is_frictionless() {
            return InstallMode::OsNativePackage;
        }
        if host.is_frictionless() && version >= &FRICTIONLESS_SUPPORT {
            return InstallMode::Frictionless;
        }
        if matches!(family, OsFamily::MacOs | OsFamily::Eos) {
            return InstallMode::OsNativePackage;
        }
        InstallMode::LegacyInstaller
    }

    /// True for modes that install without a fetched artifact.
    pub fn skips_fetch(self) -> bool {
        matches!(
            self,
            InstallMode::LightweightAgent
                | InstallMode::MasterlessLightweight
                | InstallMode::Frictionless
        )
    }

    /// False for modes that install from a package repository and never
    /// stage files on the host.
    pub fn needs_working_dir(self) -> bool {
        !matches!(
            self,
            InstallMode::LightweightAgent | InstallMode::MasterlessLightweight
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstallMode::LightweightAgent => "lightweight-agent",
            InstallMode::Frictionless => "frictionless",
            InstallMode::OsNativePackage => "os-native-package",
            InstallMode::LegacyInstaller => "legacy-installer",
            InstallMode::MasterlessLightweight => "masterless-lightweight",
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_common::Role;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_plain_agent_threshold_boundary() {
        let agent = Host::new("agent", "el-7-x86_64", [Role::Agent]);
        // One release below the threshold falls through to the platform
        // default, not to any agent-only path.
        assert_eq!(
            InstallMode::resolve(&agent, &v("3.98"), false),
            InstallMode::LegacyInstaller
        );
        assert_eq!(
            InstallMode::resolve(&agent, &v("3.99"), false),
            InstallMode::LightweightAgent
        );
        assert_eq!(
            InstallMode::resolve(&agent, &v("3.99"), true),
            InstallMode::MasterlessLightweight
        );

        let mac = Host::new("mac", "osx-10.10-x86_64", [Role::Agent]);
        assert_eq!(
            InstallMode::resolve(&mac, &v("3.8.0"), false),
            InstallMode::OsNativePackage
        );
    }

    #[test]
    fn test_role_bearing_hosts_never_lightweight() {
        let primary =
            Host::new("p", "el-7-x86_64", [Role::Primary, Role::Agent]);
        assert_eq!(
            InstallMode::resolve(&primary, &v("2016.4.0"), false),
            InstallMode::LegacyInstaller
        );
    }

    #[test]
    fn test_windows_msi_window() {
        let frictionless = Host::new(
            "w",
            "windows-2012r2-64",
            [Role::Agent, Role::Frictionless],
        );
        assert_eq!(
            InstallMode::resolve(&frictionless, &v("2016.1.2"), false),
            InstallMode::LightweightAgent
        );
        assert_eq!(
            InstallMode::resolve(&frictionless, &v("2016.3.0"), false),
            InstallMode::Frictionless
        );
        assert_eq!(
            InstallMode::resolve(&frictionless, &v("3.8.0"), false),
            InstallMode::Frictionless
        );

        let msi = Host::new("w", "windows-2012r2-64", [Role::Console]);
        assert_eq!(
            InstallMode::resolve(&msi, &v("3.8.0"), false),
            InstallMode::OsNativePackage
        );
    }

    #[test]
    fn test_frictionless_threshold_and_fallbacks() {
        let host =
            Host::new("f", "el-7-x86_64", [Role::Agent, Role::Frictionless]);
        assert_eq!(
            InstallMode::resolve(&host, &v("3.2.0"), false),
            InstallMode::Frictionless
        );
        assert_eq!(
            InstallMode::resolve(&host, &v("3.1.3"), false),
            InstallMode::LegacyInstaller
        );
        let eos =
            Host::new("sw", "eos-4-i386", [Role::Agent, Role::Frictionless]);
        assert_eq!(
            InstallMode::resolve(&eos, &v("3.1.0"), false),
            InstallMode::OsNativePackage
        );
        assert!(InstallMode::Frictionless.skips_fetch());
        assert!(!InstallMode::OsNativePackage.skips_fetch());
    }

    #[test]
    fn test_repository_modes_need_no_working_dir() {
        assert!(!InstallMode::LightweightAgent.needs_working_dir());
        assert!(!InstallMode::MasterlessLightweight.needs_working_dir());
        // The install script is downloaded into the working directory.
        assert!(InstallMode::Frictionless.needs_working_dir());
        assert!(InstallMode::OsNativePackage.needs_working_dir());
        assert!(InstallMode::LegacyInstaller.needs_working_dir());
    }
}
