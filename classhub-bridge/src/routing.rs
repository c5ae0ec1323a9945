//! Routing table compiled from the account declarations.
//!
//! Two indexes are derived once at startup and never change:
//!
//! - local topic → ordered [`RouteRule`]s (device status going up)
//! - (account, variable) → [`WriteBinding`] (cloud writes coming down)

use std::collections::BTreeMap;

use classhub_common::{Direction, TopicConvention, VariableType};

use crate::config::Account;
use crate::error::ConfigIssue;

/// One inbound mapping from a local topic to a cloud variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub account: String,
    pub variable: String,
    pub var_type: VariableType,
}

/// Where a cloud write to a variable is published locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBinding {
    pub topic: String,
    pub var_type: VariableType,
}

/// Read-only routing indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: BTreeMap<String, Vec<RouteRule>>,
    bindings: BTreeMap<(String, String), WriteBinding>,
    accounts: Vec<String>,
}

impl RoutingTable {
    /// Build the table from validated accounts.
    ///
    /// Disabled accounts contribute nothing. Rules keep declaration order.
    /// A second binding for the same (account, variable) is reported and the
    /// first one kept.
    pub fn build(accounts: &[Account], topics: &TopicConvention) -> (Self, Vec<ConfigIssue>) {
        let mut table = Self::default();
        let mut issues = Vec::new();

        for account in accounts.iter().filter(|a| a.enabled) {
            table.accounts.push(account.name.clone());

            for variable in &account.variables {
                let inbound = match variable.direction {
                    Direction::ToCloud => Some(variable.topic.clone()),
                    Direction::Bidirectional => Some(topics.status_topic(&variable.topic)),
                    Direction::FromCloud => None,
                };

                if let Some(topic) = inbound {
                    table.routes.entry(topic).or_default().push(RouteRule {
                        account: account.name.clone(),
                        variable: variable.name.clone(),
                        var_type: variable.var_type,
                    });
                }

                if variable.direction.receives_from_cloud() {
                    let key = (account.name.clone(), variable.name.clone());
                    let topic = topics.command_topic(&variable.topic);

                    if table.bindings.contains_key(&key) {
                        issues.push(ConfigIssue::DuplicateBinding {
                            account: account.name.clone(),
                            variable: variable.name.clone(),
                            topic,
                        });
                        continue;
                    }

                    table.bindings.insert(
                        key,
                        WriteBinding {
                            topic,
                            var_type: variable.var_type,
                        },
                    );
                }
            }
        }

        (table, issues)
    }

    /// Rules for a local topic, in declaration order. Exact match only.
    pub fn rules(&self, topic: &str) -> &[RouteRule] {
        self.routes.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Write binding of an account variable.
    pub fn binding(&self, account: &str, variable: &str) -> Option<&WriteBinding> {
        self.bindings
            .get(&(account.to_string(), variable.to_string()))
    }

    /// Every distinct local topic to subscribe.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Enabled accounts, in declaration order.
    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    /// All routes, ordered by topic.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &[RouteRule])> {
        self.routes
            .iter()
            .map(|(topic, rules)| (topic.as_str(), rules.as_slice()))
    }

    /// All write bindings, ordered by (account, variable).
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str, &WriteBinding)> {
        self.bindings
            .iter()
            .map(|((account, variable), binding)| (account.as_str(), variable.as_str(), binding))
    }

    pub fn route_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Variable;

    fn var(name: &str, var_type: VariableType, direction: Direction, topic: &str) -> Variable {
        Variable {
            name: name.to_string(),
            var_type,
            direction,
            topic: topic.to_string(),
        }
    }

    fn account(name: &str, enabled: bool, variables: Vec<Variable>) -> Account {
        Account {
            name: name.to_string(),
            enabled,
            device_id: format!("{}-device", name),
            secret_key: "secret".to_string(),
            variables,
        }
    }

    #[test]
    fn test_suffix_convention() {
        let accounts = vec![account(
            "room1",
            true,
            vec![
                var("curtain", VariableType::Boolean, Direction::Bidirectional, "classroom/curtain"),
                var("temperature", VariableType::Float, Direction::ToCloud, "classroom/env/status"),
                var("lights", VariableType::Color, Direction::FromCloud, "classroom/lighting"),
            ],
        )];

        let (table, issues) = RoutingTable::build(&accounts, &TopicConvention::default());
        assert!(issues.is_empty());

        let topics: Vec<_> = table.topics().collect();
        assert_eq!(topics, vec!["classroom/curtain/status", "classroom/env/status"]);
        assert!(table.rules("classroom/curtain").is_empty());
        assert!(table.rules("classroom/lighting").is_empty());

        let curtain = table.binding("room1", "curtain").unwrap();
        assert_eq!(curtain.topic, "classroom/curtain/command");
        let lights = table.binding("room1", "lights").unwrap();
        assert_eq!(lights.topic, "classroom/lighting/command");
        assert_eq!(lights.var_type, VariableType::Color);
        assert!(table.binding("room1", "temperature").is_none());

        assert_eq!(table.route_count(), 2);
        assert_eq!(table.binding_count(), 2);
    }

    #[test]
    fn test_fan_out_keeps_declaration_order() {
        let accounts = vec![
            account(
                "room1",
                true,
                vec![
                    var("temperature", VariableType::Float, Direction::ToCloud, "classroom/env/status"),
                    var("humidity", VariableType::Integer, Direction::ToCloud, "classroom/env/status"),
                ],
            ),
            account(
                "room2",
                true,
                vec![var("temperature", VariableType::Float, Direction::ToCloud, "classroom/env/status")],
            ),
        ];

        let (table, _) = RoutingTable::build(&accounts, &TopicConvention::default());
        let rules: Vec<_> = table
            .rules("classroom/env/status")
            .iter()
            .map(|r| (r.account.as_str(), r.variable.as_str()))
            .collect();
        assert_eq!(
            rules,
            vec![
                ("room1", "temperature"),
                ("room1", "humidity"),
                ("room2", "temperature")
            ]
        );
        assert_eq!(table.topics().count(), 1);
    }

    #[test]
    fn test_disabled_account_contributes_nothing() {
        let accounts = vec![account(
            "spare",
            false,
            vec![var("curtain", VariableType::Boolean, Direction::Bidirectional, "classroom/curtain")],
        )];

        let (table, issues) = RoutingTable::build(&accounts, &TopicConvention::default());
        assert!(issues.is_empty());
        assert!(table.is_empty());
        assert!(table.accounts().is_empty());
    }

    #[test]
    fn test_duplicate_binding_first_wins() {
        let accounts = vec![account(
            "room1",
            true,
            vec![
                var("door", VariableType::Boolean, Direction::FromCloud, "classroom/door"),
                var("door", VariableType::String, Direction::FromCloud, "classroom/door2"),
            ],
        )];

        let (table, issues) = RoutingTable::build(&accounts, &TopicConvention::default());
        assert_eq!(table.binding("room1", "door").unwrap().topic, "classroom/door/command");
        assert_eq!(
            issues,
            vec![ConfigIssue::DuplicateBinding {
                account: "room1".to_string(),
                variable: "door".to_string(),
                topic: "classroom/door2/command".to_string(),
            }]
        );
    }

    #[test]
    fn test_empty_suffix_uses_base_topic() {
        let topics = TopicConvention {
            status_suffix: String::new(),
            command_suffix: "/set".to_string(),
        };
        let accounts = vec![account(
            "room1",
            true,
            vec![var("fan", VariableType::Integer, Direction::Bidirectional, "classroom/fan")],
        )];

        let (table, _) = RoutingTable::build(&accounts, &topics);
        assert_eq!(table.rules("classroom/fan").len(), 1);
        assert_eq!(table.binding("room1", "fan").unwrap().topic, "classroom/fan/set");
    }

    #[test]
    fn test_build_is_idempotent() {
        let accounts = vec![account(
            "room1",
            true,
            vec![
                var("curtain", VariableType::Boolean, Direction::Bidirectional, "classroom/curtain"),
                var("lights", VariableType::Color, Direction::FromCloud, "classroom/lighting"),
            ],
        )];
        let topics = TopicConvention::default();

        let (first, first_issues) = RoutingTable::build(&accounts, &topics);
        let (second, second_issues) = RoutingTable::build(&accounts, &topics);
        assert_eq!(first, second);
        assert_eq!(first_issues, second_issues);
    }
}
