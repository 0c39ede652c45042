use std::sync::Arc;

use tracing::debug;

use crate::classifier::Classified;
use crate::openflow0x01::{Pattern, Timeout};
use crate::packet::{EthTyp, IpProto};
use crate::policy::{PolicyRule, PolicyRuleSet};

/// Hard timeout of installed flows, in seconds, unless configured otherwise.
pub const DEFAULT_HARD_TIMEOUT: u16 = 40;

/// A flow-table entry to install: what it matches, at which priority, and for how long.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowEntry {
    pub pattern: Pattern,
    pub priority: u16,
    pub hard_timeout: Timeout,
}

/// Why a packet was left to the switch's buffer instead of being acted on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unresolved {
    /// No port is known for the destination yet.
    UnknownDestination,
    /// No policy rule covers this traffic.
    NoMatchingRule,
    /// The packet could not be decoded.
    Unclassifiable,
}

/// What to do with a first packet and the flow it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Send the packet out every port and install nothing.
    Flood,
    InstallAndForward { flow: FlowEntry, port: u16 },
    InstallAndEnqueue {
        flow: FlowEntry,
        port: u16,
        queue: u32,
    },
    /// Install an entry without actions and release nothing.
    InstallAndDrop { flow: FlowEntry },
    /// Do nothing.
    Buffer(Unresolved),
}

/// Chooses a `Decision` for each classified first packet from the policy rules
/// and what has been learned about the destination.
#[derive(Clone, Debug)]
pub struct FlowDecisionEngine {
    rules: Arc<PolicyRuleSet>,
    hard_timeout: u16,
}

impl FlowDecisionEngine {
    pub fn new(rules: Arc<PolicyRuleSet>, hard_timeout: u16) -> FlowDecisionEngine {
        FlowDecisionEngine {
            rules,
            hard_timeout,
        }
    }

    pub fn decide(&self, pkt: &Classified, learned_port: Option<u16>) -> Decision {
        if learned_port.is_none() && pkt.arp_broadcast {
            return Decision::Flood;
        }
        let rule = match self.rules.best_match(pkt) {
            Some(rule) => rule,
            None => {
                debug!("no rule for {} > {}", pkt.dl_src, pkt.dl_dst);
                return Decision::Buffer(Unresolved::NoMatchingRule);
            }
        };
        let flow = self.flow_entry(pkt, rule);
        if rule.drop {
            return Decision::InstallAndDrop { flow };
        }
        let port = match learned_port {
            Some(port) => port,
            None => {
                debug!("no port learned for {} yet", pkt.dl_dst);
                return Decision::Buffer(Unresolved::UnknownDestination);
            }
        };
        match rule.queue {
            Some(queue) => Decision::InstallAndEnqueue { flow, port, queue },
            None => Decision::InstallAndForward { flow, port },
        }
    }

    /// The entry covering `pkt`'s flow under `rule`. TCP flows are matched on
    /// IPv4/TCP as well, plus the destination port when the rule names one.
    fn flow_entry(&self, pkt: &Classified, rule: &PolicyRule) -> FlowEntry {
        let mut pattern = Pattern::match_all();
        pattern.dl_src = Some(pkt.dl_src);
        pattern.dl_dst = Some(pkt.dl_dst);
        if pkt.tcp_ipv4 {
            pattern.dl_typ = Some(EthTyp::EthTypIP as u16);
            pattern.nw_proto = Some(IpProto::IpTCP as u8);
            pattern.tp_dst = rule.tcp_port;
        }
        FlowEntry {
            pattern,
            priority: rule.priority,
            hard_timeout: match self.hard_timeout {
                0 => Timeout::Permanent,
                secs => Timeout::ExpiresAfter(secs),
            },
        }
    }
}
