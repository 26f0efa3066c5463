// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `Fetching` phase: find each host's artifact and get it onto the host.

use crate::artifact_name::Extension;
use crate::classify::ResolvedHost;
use crate::collaborators::ArtifactStore;
use crate::command_builder::{self, ArtifactLocation, LocatedArtifact};
use crate::errors::{ConfigurationError, ExecutionError, OrchestrationError};
use crate::steps::InstallCommand;
use camino::Utf8PathBuf;
use rollout_common::OsFamily;
use slog::{debug, info, o, Logger};

/// Extensions to look for, most preferred first.
fn candidate_extensions(
    family: OsFamily,
    location: &ArtifactLocation,
) -> &'static [Extension] {
    match (family, location) {
        (OsFamily::Windows, _) => &[Extension::Msi],
        (OsFamily::MacOs, _) => &[Extension::Dmg],
        (OsFamily::Eos, ArtifactLocation::Remote(_)) => &[Extension::Swix],
        _ => &[Extension::TarGz, Extension::Tar],
    }
}

pub struct ArtifactFetcher<'a> {
    log: Logger,
    artifacts: &'a dyn ArtifactStore,
}

impl<'a> ArtifactFetcher<'a> {
    pub fn new(log: &Logger, artifacts: &'a dyn ArtifactStore) -> Self {
        Self { log: log.new(o!("component" => "ArtifactFetcher")), artifacts }
    }

    /// Finds the artifact for `host`, failing with
    /// [`ConfigurationError::MissingArtifact`] if no candidate exists.
    pub async fn locate(
        &self,
        host: &ResolvedHost,
    ) -> Result<LocatedArtifact, OrchestrationError> {
        let source =
            host.source().ok_or_else(|| ConfigurationError::MissingSource {
                host: host.name().to_owned(),
            })?;
        let location = if self.artifacts.is_local_dir(source).await {
            ArtifactLocation::Local(Utf8PathBuf::from(source))
        } else {
            ArtifactLocation::Remote(source.trim_end_matches('/').to_owned())
        };
        let candidates =
            candidate_extensions(host.host().platform.family(), &location);

        let mut last_path = String::new();
        for extension in candidates {
            let candidate = LocatedArtifact {
                location: location.clone(),
                base: host.artifact().base.clone(),
                extension: *extension,
            };
            last_path = candidate.path();
            if self.exists(host, &candidate).await? {
                info!(
                    self.log,
                    "located artifact";
                    "host" => host.name(),
                    "artifact" => &last_path,
                );
                return Ok(candidate);
            }
            debug!(
                self.log,
                "artifact candidate missing";
                "path" => &last_path,
            );
        }
        Err(ConfigurationError::MissingArtifact {
            host: host.name().to_owned(),
            path: last_path,
        }
        .into())
    }

    async fn exists(
        &self,
        host: &ResolvedHost,
        candidate: &LocatedArtifact,
    ) -> Result<bool, ExecutionError> {
        match &candidate.location {
            ArtifactLocation::Local(dir) => {
                let path = dir.join(candidate.file_name());
                Ok(self.artifacts.local_file_exists(&path).await)
            }
            ArtifactLocation::Remote(_) => {
                let url = candidate.path();
                self.artifacts.remote_link_exists(&url).await.map_err(|error| {
                    ExecutionError::transport(
                        host.name(),
                        format!("check {url}"),
                        error,
                    )
                })
            }
        }
    }

    /// Locates the artifact and builds the steps that deliver it.
    pub async fn fetch_command(
        &self,
        host: &ResolvedHost,
        push: bool,
    ) -> Result<InstallCommand, OrchestrationError> {
        let artifact = self.locate(host).await?;
        Ok(command_builder::fetch_command(host, &artifact, push))
    }
}
