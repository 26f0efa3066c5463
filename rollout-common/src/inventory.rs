// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inventory files: the run plan plus the hosts it applies to.

use crate::host::Host;
use crate::plan::InstallPlan;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Inventory {
    #[serde(default)]
    pub plan: InstallPlan,
    pub hosts: Vec<Host>,
}

impl Inventory {
    /// Load an `Inventory` from the given TOML file
    pub fn from_file<P: AsRef<Utf8Path>>(
        path: P,
    ) -> Result<Inventory, InventoryError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|error| {
            InventoryError::Io { error, path: path.to_owned() }
        })?;
        let inventory: Inventory =
            toml::from_str(&data).map_err(|error| InventoryError::Parse {
                error,
                path: path.to_owned(),
            })?;
        if inventory.hosts.is_empty() {
            return Err(InventoryError::NoHosts { path: path.to_owned() });
        }
        Ok(inventory)
    }
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Failed to read inventory file: {path}")]
    Io {
        #[source]
        error: std::io::Error,
        path: Utf8PathBuf,
    },
    #[error("Failed to parse inventory file: {path}")]
    Parse {
        #[source]
        error: toml::de::Error,
        path: Utf8PathBuf,
    },
    #[error("inventory file lists no hosts: {path}")]
    NoHosts { path: Utf8PathBuf },
}
