// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drives a multi-host software install or upgrade: classifies hosts,
//! fetches artifacts, runs installers in dependency order, and waits for
//! services to come up between tiers.

pub mod artifact_name;
pub mod classify;
pub mod collaborators;
pub mod command_builder;
pub mod config_payload;
mod dispatch;
pub mod errors;
pub mod fetch;
pub mod install_mode;
pub mod local_store;
pub mod orchestrator;
pub mod readiness;
pub mod retry;
pub mod run_log;
pub mod runner;
pub mod steps;
#[cfg(test)]
mod test_helpers;
pub mod topology;
pub mod web_installer;

pub use classify::{Classification, Classifier, ResolvedHost};
pub use collaborators::{
    AgentLifecycle, ArtifactStore, Collaborators, ConfigPayloadGenerator,
    HostExecutor, PackageClassRegistrar,
};
pub use dispatch::RolloutApp;
pub use errors::{
    ConfigurationError, DependencyUnavailableError, ExecutionError,
    OrchestrationError, ReadinessTimeoutError,
};
pub use orchestrator::Orchestrator;
pub use run_log::{Phase, RunLog};
pub use topology::Topology;
pub use web_installer::WebInstaller;
