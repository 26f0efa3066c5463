// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command synthesis.
//!
//! Nothing here executes anything: every function turns a classified host
//! into [`ShellCommand`]s or an [`InstallCommand`] for the orchestrator to
//! dispatch.

use crate::artifact_name::Extension;
use crate::classify::ResolvedHost;
use crate::config_payload::{reuses_existing_config, ConfigFileSetting};
use crate::errors::ConfigurationError;
use crate::install_mode::InstallMode;
use crate::steps::{
    AgentPackageRequest, CommandStep, ExitCodes, InstallCommand, ShellCommand,
};
use crate::topology::Topology;
use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use rollout_common::thresholds::{
    ASSUME_YES, FRICTIONLESS_OPTIONS, GPG_KEY_EXPIRED_END,
    GPG_KEY_EXPIRED_START, GPG_KEY_EXTENDED_LEGACY, LEGACY_DATA_TIER,
};
use rollout_common::{Host, InstallPlan, OsFamily, Role, Version};

/// Where artifacts are staged on the control process before being pushed.
pub const LOCAL_STAGING_DIR: &str = "tmp/pe";

const DASHBOARD_DIR: &str = "/opt/puppet/share/puppet-dashboard";

/// A convergence run: `2` means changes were applied.
pub fn converge_command() -> ShellCommand {
    ShellCommand::new("puppet agent -t").accepting(ExitCodes::only([0, 2]))
}

/// Where an artifact was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactLocation {
    /// A directory visible to the control process.
    Local(Utf8PathBuf),
    /// A URL prefix.
    Remote(String),
}

/// An artifact that is known to exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocatedArtifact {
    pub location: ArtifactLocation,
    pub base: String,
    pub extension: Extension,
}

impl LocatedArtifact {
    pub fn file_name(&self) -> String {
        format!("{}{}", self.base, self.extension)
    }

    /// Full path or URL, for error messages.
    pub fn path(&self) -> String {
        let prefix = match &self.location {
            ArtifactLocation::Local(dir) => dir.as_str(),
            ArtifactLocation::Remote(url) => url.as_str(),
        };
        format!("{prefix}/{}", self.file_name())
    }
}

/// Steps that put the artifact on the host (and unpack it where needed).
pub fn fetch_command(
    host: &ResolvedHost,
    artifact: &LocatedArtifact,
    push: bool,
) -> InstallCommand {
    let wd = host.working_dir();
    let file_name = artifact.file_name();
    let mut command = InstallCommand::default();

    let url = match &artifact.location {
        ArtifactLocation::Local(dir) => {
            command.push(CommandStep::CopyToHost {
                local: dir.join(&file_name),
                remote: wd.join(&file_name),
            });
            if matches!(artifact.extension, Extension::TarGz | Extension::Tar) {
                if artifact.extension.is_gzipped() {
                    command.push(CommandStep::shell(format!(
                        "cd {wd}; gunzip {file_name}"
                    )));
                }
                command.push(CommandStep::shell(format!(
                    "cd {wd}; tar -xvf {}.tar",
                    artifact.base
                )));
            }
            return command;
        }
        ArtifactLocation::Remote(url) => url,
    };

    let push_steps = || {
        [
            CommandStep::FetchToControl {
                base_url: url.clone(),
                file_name: file_name.clone(),
                local_dir: Utf8PathBuf::from(LOCAL_STAGING_DIR),
            },
            CommandStep::CopyToHost {
                local: Utf8Path::new(LOCAL_STAGING_DIR).join(&file_name),
                remote: wd.join(&file_name),
            },
        ]
    };

    let host_ref = host.host();
    match host_ref.platform.family() {
        OsFamily::Windows => {
            if push {
                command.extend(push_steps());
                command.push(CommandStep::shell(format!(
                    "cd {wd}; chmod 644 {file_name}"
                )));
            } else if host_ref.overrides.cygwin {
                command.push(CommandStep::shell(format!(
                    "cd {wd}; curl -O {url}/{file_name}"
                )));
            } else {
                command.push(CommandStep::shell(format!(
                    "powershell -c \"$webclient = New-Object \
                     System.Net.WebClient;  $webclient.DownloadFile(\
                     '{url}/{file_name}','{wd}\\{file_name}')\""
                )));
            }
        }
        OsFamily::MacOs => {
            if push {
                command.extend(push_steps());
            } else {
                command.push(CommandStep::shell(format!(
                    "cd {wd}; curl -O {url}/{file_name}"
                )));
            }
        }
        OsFamily::Eos => {
            command.push(CommandStep::FetchRemoteFile {
                url: format!("{url}/{file_name}"),
            });
        }
        _ => {
            let unpack = if artifact.extension.is_gzipped() {
                "gunzip | tar -xvf -"
            } else {
                "tar -xvf -"
            };
            let source = if push {
                command.extend(push_steps());
                "cat ".to_owned()
            } else {
                format!("curl {url}/")
            };
            command.push(CommandStep::shell(format!(
                "cd {wd}; {source}{file_name} | {unpack}"
            )));
        }
    }
    command
}

/// Read-only inputs shared by every install builder.
#[derive(Clone, Copy, Debug)]
pub struct BuildContext<'a> {
    pub plan: &'a InstallPlan,
    pub topology: &'a Topology,
}

impl BuildContext<'_> {
    fn primary_name(&self) -> Result<&str, ConfigurationError> {
        self.topology
            .primary()
            .map(|host| host.name.as_str())
            .ok_or(ConfigurationError::MissingRole { role: Role::Primary })
    }

    fn debug(&self, host: &Host) -> bool {
        host.overrides.debug.unwrap_or(self.plan.debug)
    }
}

type InstallBuilder = fn(
    &BuildContext<'_>,
    &ResolvedHost,
) -> Result<InstallCommand, ConfigurationError>;

fn builder_for(mode: InstallMode) -> InstallBuilder {
    match mode {
        InstallMode::LightweightAgent => lightweight_agent,
        InstallMode::MasterlessLightweight => masterless_lightweight,
        InstallMode::Frictionless => frictionless,
        InstallMode::OsNativePackage => os_native_package,
        InstallMode::LegacyInstaller => legacy_installer,
    }
}

/// The `Executing` steps for a host, chosen by its install mode.
pub fn install_command(
    ctx: &BuildContext<'_>,
    host: &ResolvedHost,
) -> Result<InstallCommand, ConfigurationError> {
    builder_for(host.mode())(ctx, host)
}

fn agent_package_request(
    ctx: &BuildContext<'_>,
    host: &ResolvedHost,
) -> AgentPackageRequest {
    let overrides = &host.host().overrides;
    AgentPackageRequest {
        distribution_version: host.version().to_string(),
        agent_version: overrides
            .agent_version
            .clone()
            .or_else(|| ctx.plan.agent_version.clone()),
        agent_sha: overrides
            .agent_sha
            .clone()
            .or_else(|| ctx.plan.agent_sha.clone()),
        collection: overrides
            .agent_collection
            .clone()
            .or_else(|| ctx.plan.agent_collection.clone()),
    }
}

/// Applies type defaults, points the agent at the primary, and runs it once
/// to request a certificate. Without a primary the agent just runs.
fn agent_setup(
    ctx: &BuildContext<'_>,
    host: &ResolvedHost,
    acceptable: ExitCodes,
) -> Vec<CommandStep> {
    let run = CommandStep::shell_accepting("puppet agent -t", acceptable);
    match ctx.topology.primary() {
        Some(primary) => vec![
            CommandStep::ConfigureTypeDefaults,
            CommandStep::shell(format!(
                "puppet config set server {}",
                primary.name
            )),
            CommandStep::shell(format!(
                "puppet config set certname {}",
                host.name()
            )),
            run,
        ],
        None => vec![CommandStep::ConfigureTypeDefaults, run],
    }
}

fn lightweight_agent(
    ctx: &BuildContext<'_>,
    host: &ResolvedHost,
) -> Result<InstallCommand, ConfigurationError> {
    // 1: no certificate yet and waitforcert is disabled.
    let mut codes = vec![0, 1];
    if ctx.plan.is_upgrade() {
        codes.push(2);
    }
    let mut command = InstallCommand::new(vec![
        CommandStep::AgentPackageInstall(agent_package_request(ctx, host)),
    ]);
    command.extend(agent_setup(ctx, host, ExitCodes::only(codes)));
    Ok(command)
}

fn masterless_lightweight(
    ctx: &BuildContext<'_>,
    host: &ResolvedHost,
) -> Result<InstallCommand, ConfigurationError> {
    Ok(InstallCommand::new(vec![
        CommandStep::AgentPackageInstall(agent_package_request(ctx, host)),
        CommandStep::ConfigureTypeDefaults,
    ]))
}

fn frictionless(
    ctx: &BuildContext<'_>,
    host: &ResolvedHost,
) -> Result<InstallCommand, ConfigurationError> {
    Ok(InstallCommand::new(vec![
        CommandStep::Shell(frictionless_install_command(ctx, host)?),
        CommandStep::ConfigureTypeDefaults,
    ]))
}

/// Only chosen for Windows, macOS and network appliances.
fn os_native_package(
    ctx: &BuildContext<'_>,
    host: &ResolvedHost,
) -> Result<InstallCommand, ConfigurationError> {
    let h = host.host();
    let mut command = InstallCommand::default();
    let acceptable = match h.platform.family() {
        OsFamily::Windows => {
            command.push(CommandStep::MsiInstall {
                msi_path: format!(
                    "{}\\{}",
                    host.working_dir(),
                    host.artifact().with_extension(Extension::Msi)
                ),
                debug: ctx.debug(h),
            });
            ExitCodes::only([1])
        }
        OsFamily::MacOs => {
            command.push(CommandStep::Shell(mac_install_command(ctx, host)));
            ExitCodes::only([1])
        }
        _ => {
            command.push(CommandStep::DeviceInstall {
                file: crate::artifact_name::device_package_name(
                    h,
                    host.version(),
                ),
            });
            ExitCodes::only([0, 1])
        }
    };
    command.extend(agent_setup(ctx, host, acceptable));
    Ok(command)
}

fn legacy_installer(
    ctx: &BuildContext<'_>,
    host: &ResolvedHost,
) -> Result<InstallCommand, ConfigurationError> {
    Ok(InstallCommand::new(vec![
        CommandStep::Shell(legacy_installer_command(ctx, host)),
        CommandStep::ConfigureTypeDefaults,
    ]))
}

/// Runs the full installer from the unpacked tarball.
///
/// The configuration flag is left off when the installer should reuse the
/// configuration already on the host.
pub fn legacy_installer_command(
    ctx: &BuildContext<'_>,
    host: &ResolvedHost,
) -> ShellCommand {
    let wd = host.working_dir();
    let debug = if ctx.debug(host.host()) { " -D" } else { "" };
    let mut text = format!(
        "cd {wd}/{} && ./{}{debug}",
        host.artifact(),
        host.installer()
    );
    if host.version() >= &ASSUME_YES {
        text.push_str(" -y");
    }
    if !reuses_existing_config(ctx.plan, host) {
        let setting = ConfigFileSetting::for_version(wd, host.version());
        text.push(' ');
        text.push_str(&setting.to_string());
    }
    ShellCommand::new(text)
}

/// Downloads and runs the install script the primary serves.
pub fn frictionless_install_command(
    ctx: &BuildContext<'_>,
    host: &ResolvedHost,
) -> Result<ShellCommand, ConfigurationError> {
    let primary = ctx.primary_name()?;
    let h = host.host();
    let version = host.version();
    let wd = host.working_dir();
    let options = if version >= &FRICTIONLESS_OPTIONS {
        h.overrides
            .frictionless_options
            .iter()
            .flat_map(|(section, settings)| {
                settings
                    .iter()
                    .map(move |(key, value)| format!("{section}:{key}={value}"))
            })
            .join(" ")
    } else {
        String::new()
    };
    let debug = if ctx.debug(h) { " -x" } else { "" };

    let text = match h.platform.family() {
        OsFamily::Windows => format!(
            "powershell -c \"cd {wd};\
             [Net.ServicePointManager]::\
             ServerCertificateValidationCallback = {{\\$true}};\
             \\$webClient = New-Object System.Net.WebClient;\
             \\$webClient.DownloadFile(\
             'https://{primary}:8140/packages/{version}/install.ps1', \
             '{wd}/install.ps1');\
             {wd}/install.ps1 -verbose {options}\""
        ),
        family => {
            let curl_opts = if family == OsFamily::Aix {
                "--tlsv1 -O"
            } else {
                "--tlsv1 -kO"
            };
            format!(
                "cd {wd} && curl {curl_opts} \
                 https://{primary}:8140/packages/{version}/install.bash \
                 && bash{debug} install.bash {options}"
            )
            .trim()
            .to_owned()
        }
    };
    Ok(ShellCommand::new(text))
}

fn mac_install_command(
    ctx: &BuildContext<'_>,
    host: &ResolvedHost,
) -> ShellCommand {
    let version = host.version();
    let debug = if ctx.debug(host.host()) { " -verboseR" } else { "" };
    ShellCommand::new(format!(
        "cd {} && hdiutil attach {}.dmg && installer{debug} -pkg \
         /Volumes/puppet-enterprise-{version}/\
         puppet-enterprise-installer-{version}.pkg -target /",
        host.working_dir(),
        host.artifact(),
    ))
}

/// Installs the extended repository signing key on deb hosts whose bundled
/// key has expired.
pub fn gpg_key_repair_command(host: &ResolvedHost) -> Option<ShellCommand> {
    let family = host.host().platform.family();
    if !matches!(family, OsFamily::Debian | OsFamily::Ubuntu) {
        return None;
    }
    let version = host.version();
    let affected = version < &GPG_KEY_EXTENDED_LEGACY
        || (version >= &GPG_KEY_EXPIRED_START
            && version < &GPG_KEY_EXPIRED_END);
    affected.then(|| {
        ShellCommand::new(
            "curl http://apt.puppetlabs.com/DEB-GPG-KEY-puppetlabs \
             | apt-key add -",
        )
    })
}

/// The `pe_repo` class that serves packages for `host`'s platform.
pub fn package_class_name(host: &Host) -> String {
    if host.platform.is_windows() {
        let i386 = host
            .overrides
            .template
            .as_deref()
            .is_some_and(|t| t.contains("i386"));
        if i386 {
            "pe_repo::platform::windows_i386".to_owned()
        } else {
            "pe_repo::platform::windows_x86_64".to_owned()
        }
    } else {
        let platform =
            host.platform.as_str().replace('-', "_").replace('.', "");
        format!("pe_repo::platform::{platform}")
    }
}

fn dashboard_rake(task: &str) -> ShellCommand {
    ShellCommand::new(format!(
        "cd {DASHBOARD_DIR} && /opt/puppet/bin/bundle exec \
         /opt/puppet/bin/rake {task}"
    ))
}

/// Registers `class` on the primary through the dashboard's rake tasks.
/// These run on the console host.
pub fn legacy_registration_commands(
    class: &str,
    primary: &str,
) -> Vec<ShellCommand> {
    vec![
        dashboard_rake(&format!("nodeclass:add[{class},skip]")),
        dashboard_rake(&format!("node:add[{primary},,,skip]")),
        dashboard_rake(&format!("node:addclass[{primary},{class}]")),
    ]
}

/// The one-time cluster bootstrap task for releases before the lightweight
/// agent. The variant depends on whether the data tier predates
/// [`LEGACY_DATA_TIER`].
pub fn bootstrap_task_command(
    data_tier_version: Option<&Version>,
) -> ShellCommand {
    let task = if rollout_common::version_is_less(
        data_tier_version,
        &LEGACY_DATA_TIER,
    ) {
        "nodegroup:add_all_nodes group=default"
    } else {
        "defaultgroup:ensure_default_group"
    };
    ShellCommand::new(format!(
        "/opt/puppet/bin/rake -sf {DASHBOARD_DIR}/Rakefile {task} \
         RAILS_ENV=production"
    ))
}

/// Removes the agent's client data directory after a Windows frictionless
/// install's first run.
pub fn remove_client_datadir_command(client_datadir: &str) -> ShellCommand {
    ShellCommand::new(format!(
        "puppet resource file \"{client_datadir}\" ensure=absent force=true"
    ))
}

pub fn data_tier_status_command() -> ShellCommand {
    ShellCommand::new("curl -s http://localhost:8080/pdb/meta/v1/version")
        .accepting(ExitCodes::Any)
}

pub fn console_status_command(host: &str) -> ShellCommand {
    ShellCommand::new(format!(
        "curl -s -k https://localhost:4433/status/v1/services \
         --cert /etc/puppetlabs/puppet/ssl/certs/{host}.pem \
         --key /etc/puppetlabs/puppet/ssl/private_keys/{host}.pem \
         --cacert /etc/puppetlabs/puppet/ssl/certs/ca.pem"
    ))
    .accepting(ExitCodes::Any)
}

/// Starts the installer in the background, answering its first prompt so it
/// serves the browser-driven installer.
pub fn web_installer_launch_command(
    host: &ResolvedHost,
    log_file: &str,
) -> ShellCommand {
    let structured = rollout_common::thresholds::uses_structured_config(Some(
        host.version(),
    ));
    let answer = if structured { "1" } else { "Y" };
    ShellCommand::new(format!(
        "cd {}/{} ; nohup ./{} <<<{answer} > {log_file} 2>&1 &",
        host.working_dir(),
        host.artifact(),
        host.installer(),
    ))
}

pub fn web_installer_log_command(
    host: &ResolvedHost,
    log_file: &str,
) -> ShellCommand {
    ShellCommand::new(format!(
        "cd {}/{} && cat {log_file}",
        host.working_dir(),
        host.artifact()
    ))
    .accepting(ExitCodes::Any)
}
