// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An [`ArtifactStore`] backed by the control process's filesystem.

use crate::collaborators::ArtifactStore;
use crate::errors::DependencyUnavailableError;
use anyhow::Context;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use rollout_common::Version;

/// Serves artifact sources that are local directories. URL sources need an
/// HTTP-capable store.
#[derive(Clone, Debug, Default)]
pub struct FsArtifactStore;

fn remote_unavailable() -> anyhow::Error {
    DependencyUnavailableError {
        capability: "remote artifact access",
        remediation: "use a local directory as the artifact source",
    }
    .into()
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn is_local_dir(&self, source: &str) -> bool {
        tokio::fs::metadata(source).await.is_ok_and(|m| m.is_dir())
    }

    async fn local_file_exists(&self, path: &Utf8Path) -> bool {
        tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
    }

    async fn remote_link_exists(&self, _url: &str) -> anyhow::Result<bool> {
        Err(remote_unavailable())
    }

    async fn fetch_to_local(
        &self,
        _base_url: &str,
        _file_name: &str,
        _local_dir: &Utf8Path,
    ) -> anyhow::Result<Utf8PathBuf> {
        Err(remote_unavailable())
    }

    async fn load_version(
        &self,
        source: &str,
        version_file: &str,
    ) -> anyhow::Result<Version> {
        if !self.is_local_dir(source).await {
            return Err(remote_unavailable());
        }
        let path = Utf8Path::new(source).join(version_file);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {path}"))?;
        let version = Version::parse(contents.trim())
            .with_context(|| format!("parsing version in {path}"))?;
        Ok(version)
    }
}
