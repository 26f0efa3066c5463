// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Which host fills each cluster role, and the install order that follows
//! from it.

use crate::errors::ConfigurationError;
use itertools::Itertools;
use rollout_common::{Host, Role};

/// The role-bearing hosts of one cluster, resolved once per run.
///
/// Hosts are identified by name; one host may fill several roles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    primary: Option<Host>,
    database: Option<Host>,
    console: Option<Host>,
}

impl Topology {
    /// Resolves the role holders among `hosts`.
    ///
    /// A clustered run (`masterless == false`) must have a primary. The data
    /// tier and console are optional.
    pub fn from_hosts(
        hosts: &[Host],
        masterless: bool,
    ) -> Result<Self, ConfigurationError> {
        let primary = single_holder(hosts, Role::Primary)?;
        if primary.is_none() && !masterless {
            return Err(ConfigurationError::MissingRole { role: Role::Primary });
        }
        Ok(Self {
            primary,
            database: single_holder(hosts, Role::Database)?,
            console: single_holder(hosts, Role::Console)?,
        })
    }

    pub fn primary(&self) -> Option<&Host> {
        self.primary.as_ref()
    }

    pub fn database(&self) -> Option<&Host> {
        self.database.as_ref()
    }

    pub fn console(&self) -> Option<&Host> {
        self.console.as_ref()
    }

    pub fn is_primary(&self, name: &str) -> bool {
        holds(&self.primary, name)
    }

    pub fn is_database(&self, name: &str) -> bool {
        holds(&self.database, name)
    }

    pub fn is_console(&self, name: &str) -> bool {
        holds(&self.console, name)
    }

    /// True if `name` is the primary, data tier, or console host.
    pub fn is_core(&self, name: &str) -> bool {
        self.is_primary(name) || self.is_database(name) || self.is_console(name)
    }

    /// Orders `subset` for installation: primary, then data tier, then
    /// console (each listed once, and only if present in `subset`), then
    /// every other host in its original relative order.
    pub fn sort<T: AsRef<Host>>(
        &self,
        subset: impl IntoIterator<Item = T>,
    ) -> Vec<T> {
        let mut rest: Vec<T> = subset.into_iter().collect();
        let mut sorted = Vec::with_capacity(rest.len());
        let special = [&self.primary, &self.database, &self.console]
            .into_iter()
            .flatten()
            .map(|host| host.name.as_str())
            .unique();
        for name in special {
            if let Some(index) =
                rest.iter().position(|host| host.as_ref().name == name)
            {
                sorted.push(rest.remove(index));
            }
        }
        sorted.extend(rest);
        sorted
    }
}

fn holds(holder: &Option<Host>, name: &str) -> bool {
    holder.as_ref().is_some_and(|host| host.name == name)
}

fn single_holder(
    hosts: &[Host],
    role: Role,
) -> Result<Option<Host>, ConfigurationError> {
    let holders: Vec<&Host> =
        hosts.iter().filter(|host| host.has_role(&role)).collect();
    match holders.as_slice() {
        [] => Ok(None),
        [host] => Ok(Some((*host).clone())),
        _ => Err(ConfigurationError::DuplicateRole {
            hosts: holders.iter().map(|host| host.name.as_str()).join(", "),
            role,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn names<T: AsRef<Host>>(hosts: &[T]) -> Vec<&str> {
        hosts.iter().map(|host| host.as_ref().name.as_str()).collect()
    }

    fn cluster() -> Vec<Host> {
        vec![
            Host::new("agent1", "el-7-x86_64", [Role::Agent]),
            Host::new("console", "el-7-x86_64", [Role::Console, Role::Agent]),
            Host::new("agent2", "ubuntu-16.04-amd64", [Role::Agent]),
            Host::new("db", "el-7-x86_64", [Role::Database, Role::Agent]),
            Host::new("primary", "el-7-x86_64", [Role::Primary, Role::Agent]),
        ]
    }

    #[test]
    fn test_role_holders_first() {
        let hosts = cluster();
        let topology = Topology::from_hosts(&hosts, false).unwrap();
        let sorted = topology.sort(&hosts);
        assert_eq!(
            names(&sorted),
            ["primary", "db", "console", "agent1", "agent2"]
        );
    }

    #[test]
    fn test_combined_roles_listed_once() {
        let hosts = vec![
            Host::new("agent", "el-7-x86_64", [Role::Agent]),
            Host::new(
                "mono",
                "el-7-x86_64",
                [Role::Primary, Role::Database, Role::Console],
            ),
        ];
        let topology = Topology::from_hosts(&hosts, false).unwrap();
        assert_eq!(names(&topology.sort(&hosts)), ["mono", "agent"]);
        assert!(topology.is_core("mono"));
        assert!(!topology.is_core("agent"));
    }

    #[test]
    fn test_sort_subset_omits_absent_role_holders() {
        let hosts = cluster();
        let topology = Topology::from_hosts(&hosts, false).unwrap();
        let subset: Vec<&Host> = hosts
            .iter()
            .filter(|host| host.name != "db" && host.name != "agent1")
            .collect();
        assert_eq!(
            names(&topology.sort(subset)),
            ["primary", "console", "agent2"]
        );
    }

    #[test]
    fn test_duplicate_and_missing_roles() {
        let hosts = vec![
            Host::new("p1", "el-7-x86_64", [Role::Primary]),
            Host::new("p2", "el-7-x86_64", [Role::Primary]),
        ];
        assert_matches!(
            Topology::from_hosts(&hosts, false),
            Err(ConfigurationError::DuplicateRole {
                role: Role::Primary,
                hosts,
            }) if hosts == "p1, p2"
        );

        let agents = vec![Host::new("a", "el-7-x86_64", [Role::Agent])];
        assert_matches!(
            Topology::from_hosts(&agents, false),
            Err(ConfigurationError::MissingRole { role: Role::Primary })
        );
        let topology = Topology::from_hosts(&agents, true).unwrap();
        assert!(topology.primary().is_none());
        assert_eq!(names(&topology.sort(&agents)), ["a"]);
    }

    fn arb_hosts() -> impl Strategy<Value = Vec<Host>> {
        // Up to eight hosts; each role-bearing role goes to at most one host.
        (1usize..8, any::<[u8; 3]>()).prop_map(|(count, picks)| {
            let mut hosts: Vec<Host> = (0..count)
                .map(|i| {
                    Host::new(format!("host{i}"), "el-7-x86_64", [Role::Agent])
                })
                .collect();
            let roles = [Role::Primary, Role::Database, Role::Console];
            for (role, pick) in roles.into_iter().zip(picks) {
                let index = usize::from(pick) % count;
                hosts[index].roles.insert(role);
            }
            hosts
        })
    }

    proptest! {
        #[test]
        fn proptest_sort_idempotent_and_primary_first(
            hosts in arb_hosts(),
            rotation in 0usize..8,
        ) {
            let mut shuffled = hosts.clone();
            let len = shuffled.len();
            shuffled.rotate_left(rotation % len);

            let topology = Topology::from_hosts(&shuffled, false).unwrap();
            let once = topology.sort(shuffled.clone());
            let twice = topology.sort(once.clone());
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(once.len(), len);
            prop_assert!(topology.is_primary(&once[0].name));
        }
    }
}
