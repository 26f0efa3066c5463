// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use rollout_common::{Inventory, RunType};
use slog::Drain;

use crate::classify::{Classifier, ResolvedHost};
use crate::local_store::FsArtifactStore;
use crate::orchestrator::describe_install;
use crate::topology::Topology;

/// Stands in for the per-run directory when nothing runs on the hosts.
const PLACEHOLDER_WORKING_DIR: &str = "$WORKDIR";

/// Inspect how a rollout would proceed for an inventory.
#[derive(Debug, Parser)]
#[command(version)]
pub struct RolloutApp {
    #[clap(subcommand)]
    subcommand: RolloutCommand,
}

impl RolloutApp {
    /// Executes the app.
    pub async fn exec(self, log: &slog::Logger) -> Result<()> {
        match self.subcommand {
            RolloutCommand::Plan(opts) => opts.exec(log).await,
            RolloutCommand::Sort(opts) => opts.exec(log),
        }
    }

    pub fn setup_log() -> slog::Logger {
        let drain = stderr_env_drain("RUST_LOG");
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog::o!())
    }
}

#[derive(Debug, Subcommand)]
enum RolloutCommand {
    /// Classify every host and print the steps an install would run.
    Plan(PlanOpts),
    /// Print the hosts in installation order.
    Sort(SortOpts),
}

#[derive(Debug, Args)]
struct PlanOpts {
    /// Path to the inventory TOML file
    inventory: Utf8PathBuf,

    /// Plan an upgrade, with this directory as the default artifact source
    #[clap(long)]
    upgrade: Option<String>,
}

impl PlanOpts {
    async fn exec(self, log: &slog::Logger) -> Result<()> {
        let Inventory { mut plan, hosts } =
            Inventory::from_file(&self.inventory)?;
        if self.upgrade.is_some() {
            plan.run_type = RunType::Upgrade;
        }
        let topology = Topology::from_hosts(&hosts, plan.masterless)
            .context("resolving roles")?;
        let store = FsArtifactStore;
        let classified = Classifier::new(log, &store, &plan, &topology)
            .classify(&hosts, self.upgrade.as_deref())
            .await
            .context("classifying hosts")?;
        let resolved: Vec<_> = classified
            .into_iter()
            .map(|c| {
                if c.mode.needs_working_dir() {
                    ResolvedHost::new(c, PLACEHOLDER_WORKING_DIR.into())
                } else {
                    ResolvedHost::without_working_dir(c)
                }
            })
            .collect();

        let steps = describe_install(&plan, &topology, &resolved)
            .context("building install commands")?;
        for (host, (_, host_steps)) in resolved.iter().zip(steps) {
            println!(
                "{} ({}, {} via {})",
                host.name(),
                host.version(),
                host.artifact(),
                host.mode(),
            );
            for step in host_steps {
                println!("    {step}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
struct SortOpts {
    /// Path to the inventory TOML file
    inventory: Utf8PathBuf,
}

impl SortOpts {
    fn exec(self, log: &slog::Logger) -> Result<()> {
        let Inventory { plan, hosts } = Inventory::from_file(&self.inventory)?;
        let topology = Topology::from_hosts(&hosts, plan.masterless)
            .context("resolving roles")?;
        slog::debug!(log, "sorting"; "hosts" => hosts.len());
        for host in topology.sort(&hosts) {
            println!("{host}");
        }
        Ok(())
    }
}

fn stderr_env_drain(
    env_var: &str,
) -> impl Drain<Ok = (), Err = slog::Never> {
    let stderr_decorator = slog_term::TermDecorator::new().build();
    let stderr_drain =
        slog_term::FullFormat::new(stderr_decorator).build().fuse();
    let mut builder = slog_envlogger::LogBuilder::new(stderr_drain);
    if let Ok(s) = std::env::var(env_var) {
        builder = builder.parse(&s);
    } else {
        builder = builder.filter(None, slog::FilterLevel::Info);
    }
    builder.build()
}
