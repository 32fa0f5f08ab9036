//! Prioritized message routing.

use crate::error::{DspError, Result};
use crate::message::Message;

/// The sentinel condition that matches any message.
pub const MATCH_EVERYTHING: (&str, &str) = ("*", "*");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    Exact,
}

/// One routing rule. Immutable after construction.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub priority: i32,
    /// Property key and expected value.
    pub condition: (String, String),
    pub action: Action,
    pub matcher: Matcher,
    /// Subject written into emitted copies.
    pub subject: String,
}

/// Turns one inbound message into zero or more outbound messages, rewriting
/// the subject per matching rule.
#[derive(Debug, Clone)]
pub struct Router {
    rules: Vec<Rule>,
}

impl Router {
    /// Build a router. Rules are sorted by ascending priority; priorities
    /// must be unique.
    pub fn new(mut rules: Vec<Rule>) -> Result<Self> {
        rules.sort_by_key(|rule| rule.priority);
        for pair in rules.windows(2) {
            if pair[0].priority == pair[1].priority {
                return Err(DspError::DuplicateRulePriority {
                    priority: pair[0].priority,
                });
            }
        }
        Ok(Self { rules })
    }

    /// Evaluate every rule against `msg` in priority order.
    ///
    /// An empty return means the message is dropped.
    pub fn route(&self, msg: &Message) -> Vec<Message> {
        let mut out = Vec::new();

        for rule in &self.rules {
            let is_wildcard = (rule.condition.0.as_str(), rule.condition.1.as_str())
                == MATCH_EVERYTHING;
            let matched = if is_wildcard {
                true
            } else {
                match msg.properties.get(&rule.condition.0) {
                    Some(value) => Self::matches(value, rule),
                    None => Self::default_match(rule),
                }
            };

            if matched {
                let mut copy = msg.clone();
                copy.subject = rule.subject.clone();
                out.push(copy);
            }
        }

        out
    }

    fn matches(value: &str, rule: &Rule) -> bool {
        let Matcher::Exact = rule.matcher;
        match rule.action {
            Action::Allow => value == rule.condition.1,
            Action::Deny => value != rule.condition.1,
        }
    }

    /// Default when the conditioned property is absent.
    ///
    /// A message without the property is not needed by an allow rule and is
    /// passed by a deny rule.
    fn default_match(rule: &Rule) -> bool {
        rule.action == Action::Deny
    }
}

impl Default for Router {
    /// Heartbeats go to `heartbeats`; everything else falls through to
    /// `dev-test`.
    fn default() -> Self {
        Self {
            rules: vec![
                Rule {
                    name: String::new(),
                    priority: 1,
                    condition: ("type".to_string(), "heartbeat".to_string()),
                    action: Action::Allow,
                    matcher: Matcher::Exact,
                    subject: "heartbeats".to_string(),
                },
                Rule {
                    name: String::new(),
                    priority: 2,
                    condition: ("type".to_string(), "heartbeat".to_string()),
                    action: Action::Deny,
                    matcher: Matcher::Exact,
                    subject: "dev-test".to_string(),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Properties;

    fn message_with_type(value: &str) -> Message {
        Message::new("", b"x".to_vec()).with_property("type", value)
    }

    fn rule(priority: i32, action: Action, subject: &str) -> Rule {
        Rule {
            name: String::new(),
            priority,
            condition: ("type".to_string(), "heartbeat".to_string()),
            action,
            matcher: Matcher::Exact,
            subject: subject.to_string(),
        }
    }

    #[test]
    fn test_default_rules_route_heartbeat() {
        let router = Router::default();
        let out = router.route(&message_with_type("heartbeat"));

        assert_eq!(out.len(), 1, "heartbeat matches only the allow rule");
        assert_eq!(out[0].subject, "heartbeats");
    }

    #[test]
    fn test_absent_property_satisfies_deny_rule() {
        let router = Router::default();
        let msg = Message {
            key: Vec::new(),
            subject: String::new(),
            properties: Properties::new(),
            payload: b"x".to_vec(),
        };
        let out = router.route(&msg);

        assert_eq!(out.len(), 1, "absence satisfies the deny rule only");
        assert_eq!(out[0].subject, "dev-test");
    }

    #[test]
    fn test_non_matching_value_falls_to_deny() {
        let router = Router::default();
        let out = router.route(&message_with_type("metrics"));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].subject, "dev-test");
    }

    #[test]
    fn test_outputs_follow_priority_order() {
        let router = Router::new(vec![
            rule(7, Action::Allow, "third"),
            rule(1, Action::Allow, "first"),
            rule(3, Action::Allow, "second"),
        ])
        .unwrap();

        let out = router.route(&message_with_type("heartbeat"));
        let subjects: Vec<&str> = out.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, ["first", "second", "third"]);
    }

    #[test]
    fn test_duplicate_priorities_rejected() {
        let result = Router::new(vec![
            rule(1, Action::Allow, "a"),
            rule(1, Action::Deny, "b"),
        ]);
        assert!(matches!(
            result,
            Err(DspError::DuplicateRulePriority { priority: 1 })
        ));
    }

    #[test]
    fn test_wildcard_condition_matches_anything() {
        let router = Router::new(vec![Rule {
            name: String::new(),
            priority: 1,
            condition: ("*".to_string(), "*".to_string()),
            action: Action::Allow,
            matcher: Matcher::Exact,
            subject: "mirror".to_string(),
        }])
        .unwrap();

        let out = router.route(&message_with_type("anything"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].subject, "mirror");
    }

    #[test]
    fn test_emitted_copies_keep_key_and_payload() {
        let router = Router::default();
        let msg = message_with_type("heartbeat").with_key(b"42".to_vec());
        let out = router.route(&msg);

        assert_eq!(out[0].key, b"42");
        assert_eq!(out[0].payload, msg.payload);
    }

    #[test]
    fn test_matched_deny_rule_drops_message() {
        let router = Router::new(vec![rule(1, Action::Deny, "fallback")]).unwrap();
        let out = router.route(&message_with_type("heartbeat"));
        assert!(out.is_empty(), "deny rule matched by value emits nothing");
    }
}
