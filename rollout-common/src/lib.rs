// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared by the rollout engine and its callers: versions, hosts, run
//! plans, and inventory files.

pub mod host;
pub mod inventory;
pub mod plan;
pub mod thresholds;
pub mod version;

pub use host::{Host, HostOverrides, OsFamily, Platform, Role};
pub use inventory::{Inventory, InventoryError};
pub use plan::{InstallPlan, RunType};
pub use version::{version_is_less, Version, VersionParseError};
