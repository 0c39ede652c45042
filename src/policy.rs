use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::classifier::Classified;
use crate::packet::MacAddr;

/// A static forwarding policy for traffic from `eth_src` to `eth_dst`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicyRule {
    /// Higher values win when several rules apply to the same packet.
    pub priority: u16,
    pub eth_src: MacAddr,
    pub eth_dst: MacAddr,
    /// Restricts the rule to TCP traffic to this destination port. Non-TCP
    /// traffic between the two hosts is not restricted by it.
    #[serde(default)]
    pub tcp_port: Option<u16>,
    /// Queue on the output port that matched traffic is placed in.
    #[serde(default)]
    pub queue: Option<u32>,
    #[serde(default)]
    pub drop: bool,
}

impl PolicyRule {
    pub fn applies_to(&self, pkt: &Classified) -> bool {
        if self.eth_src != pkt.dl_src || self.eth_dst != pkt.dl_dst {
            return false;
        }
        match self.tcp_port {
            Some(port) if pkt.tcp_ipv4 => pkt.tcp_dst == Some(port),
            _ => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("could not read policy {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid policy: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("rules {first} and {second} both cover {src} > {dst} at priority {priority}")]
    PriorityTie {
        first: usize,
        second: usize,
        src: MacAddr,
        dst: MacAddr,
        priority: u16,
    },

    #[error("rule {index} ({src} > {dst}) both drops and enqueues")]
    DropWithQueue {
        index: usize,
        src: MacAddr,
        dst: MacAddr,
    },
}

/// The validated, read-only set of policy rules.
///
/// Matching picks the highest-priority applicable rule; the order rules were
/// declared in plays no part.
#[derive(Clone, Debug, Default)]
pub struct PolicyRuleSet {
    rules: Vec<PolicyRule>,
}

impl PolicyRuleSet {
    /// Build a rule set, rejecting priority ties within an Ethernet pair and
    /// drop rules that also name a queue.
    pub fn new(rules: Vec<PolicyRule>) -> Result<PolicyRuleSet, PolicyError> {
        let mut seen = HashMap::new();
        for (index, rule) in rules.iter().enumerate() {
            if rule.drop && rule.queue.is_some() {
                return Err(PolicyError::DropWithQueue {
                    index,
                    src: rule.eth_src,
                    dst: rule.eth_dst,
                });
            }
            if let Some(first) = seen.insert((rule.eth_src, rule.eth_dst, rule.priority), index) {
                return Err(PolicyError::PriorityTie {
                    first,
                    second: index,
                    src: rule.eth_src,
                    dst: rule.eth_dst,
                    priority: rule.priority,
                });
            }
        }
        Ok(PolicyRuleSet { rules })
    }

    /// Parse a JSON array of rules.
    pub fn from_json(json: &str) -> Result<PolicyRuleSet, PolicyError> {
        let rules: Vec<PolicyRule> = serde_json::from_str(json)?;
        PolicyRuleSet::new(rules)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<PolicyRuleSet, PolicyError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| PolicyError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let rules = PolicyRuleSet::from_json(&json)?;
        info!("loaded {} policy rules from {}", rules.len(), path.display());
        Ok(rules)
    }

    /// The highest-priority rule that applies to `pkt`, if any.
    pub fn best_match(&self, pkt: &Classified) -> Option<&PolicyRule> {
        self.rules.iter().filter(|rule| rule.applies_to(pkt)).max_by_key(|rule| rule.priority)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
