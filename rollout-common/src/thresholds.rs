// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Release thresholds that gate installer behavior by era.

use crate::version::Version;

/// Data-tier hosts older than this are handled by the legacy layout.
pub const LEGACY_DATA_TIER: Version = Version::from_static("3.0");

/// Upgrades to releases before this one use the separate upgrader binary.
pub const SEPARATE_UPGRADER: Version = Version::from_static("3.0");

/// First release whose agents can pull their package from the primary.
pub const FRICTIONLESS_SUPPORT: Version = Version::from_static("3.2.0");

/// First release whose frictionless script accepts `section:key=value`
/// settings.
pub const FRICTIONLESS_OPTIONS: Version = Version::from_static("3.4.0");

/// First release that ships 64-bit Windows packages.
pub const WINDOWS_64BIT_DEFAULT: Version = Version::from_static("3.4");

/// Upgrades from releases before this one must set the console password.
pub const CONSOLE_PASSWORD: Version = Version::from_static("3.4.0");

/// First release that registers package classes via the console API rather
/// than dashboard rake tasks.
pub const MODERN_REGISTRATION: Version = Version::from_static("3.8");

/// General availability of the lightweight agent packages.
pub const LIGHTWEIGHT_AGENT: Version = Version::from_static("3.99");

/// Deb repositories signed before this release need the extended GPG key.
pub const GPG_KEY_EXTENDED_LEGACY: Version = Version::from_static("3.8.5");

/// Start of the second affected range for the expired GPG key.
pub const GPG_KEY_EXPIRED_START: Version = Version::from_static("2015.2.0");

/// End (exclusive) of the second affected range for the expired GPG key.
pub const GPG_KEY_EXPIRED_END: Version = Version::from_static("2016.1.2");

/// First release whose console exposes the services status endpoint.
pub const CONSOLE_STATUS: Version = Version::from_static("2015.2.0");

/// First release whose data tier exposes the version report endpoint.
pub const DATA_TIER_STATUS: Version = Version::from_static("2016.1.0");

/// The switch from the flat answer-file installer to the structured
/// configuration installer.
pub const STRUCTURED_CONFIG_CUTOVER: Version = Version::from_static("2016.2.0");

/// First release whose installer supports "assume yes" (`-y`).
pub const ASSUME_YES: Version = Version::from_static("2016.2.1");

/// Windows agents between [`LIGHTWEIGHT_AGENT`] and this release can only be
/// installed as lightweight agents.
pub const WINDOWS_MSI_WINDOW_END: Version = Version::from_static("2016.3.0");

/// First release whose web installer prints the shortened browser prompt.
pub const WEB_INSTALLER_PROMPT: Version = Version::from_static("2016.3");

/// True if `version` uses the structured configuration installer.
pub fn uses_structured_config(version: Option<&Version>) -> bool {
    !crate::version::version_is_less(version, &STRUCTURED_CONFIG_CUTOVER)
}
