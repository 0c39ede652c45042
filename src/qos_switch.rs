use std::sync::MutexGuard;

use tracing::{debug, info};

use crate::classifier::classify;
use crate::decision::{Decision, FlowDecisionEngine, Unresolved};
use crate::error::Result;
use crate::learning::{LearningTable, SharedLearningTable};
use crate::ofp_controller::openflow0x01::OF0x01Controller;
use crate::openflow0x01::message::parse_payload;
use crate::openflow0x01::{PacketIn, SwitchFeatures};
use crate::programmer::{self, SwitchChannel};

/// Policy-driven L2 switching with per-flow rate limiting.
///
/// Each first packet a switch sends up teaches the controller where its source
/// host lives. The packet is then matched against the policy rules: a matching
/// rule to a learned destination installs a flow that forwards (through a
/// queue, if the rule names one) or drops the rest of the flow in the switch.
/// ARP broadcasts for unknown destinations are flooded. Anything else is left
/// alone.
///
/// One `QosSwitch` serves one connection, but what it learns goes into the
/// table shared by the whole controller and is kept after the switch goes away.
pub struct QosSwitch {
    engine: FlowDecisionEngine,
    known_hosts: SharedLearningTable,
}

impl QosSwitch {
    pub fn new(engine: FlowDecisionEngine, known_hosts: SharedLearningTable) -> QosSwitch {
        QosSwitch {
            engine,
            known_hosts,
        }
    }

    pub fn known_hosts(&self) -> MutexGuard<'_, LearningTable> {
        self.known_hosts.lock()
    }

    /// Learn from `pkt`, then decide what to do with it.
    pub fn decide(&mut self, sw: u64, pkt: &PacketIn) -> Decision {
        let parsed = match parse_payload(&pkt.input_payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("cannot classify packet from port {}: {}", pkt.port, e);
                return Decision::Buffer(Unresolved::Unclassifiable);
            }
        };
        debug!("switch {:#x} port {} packet {}", sw, pkt.port, parsed);
        let classified = classify(&parsed);
        let out_port = {
            let mut known_hosts = self.known_hosts.lock();
            known_hosts.record(sw, parsed.dl_src, pkt.port);
            known_hosts.lookup(sw, classified.dl_dst)
        };
        self.engine.decide(&classified, out_port)
    }
}

impl OF0x01Controller for QosSwitch {
    fn switch_connected(&mut self,
                        sw: u64,
                        _: SwitchFeatures,
                        channel: &mut dyn SwitchChannel)
                        -> Result<()> {
        info!("clearing flows of switch {:#x}", sw);
        channel.clear_flows(sw)
    }

    fn switch_disconnected(&mut self, sw: u64) {
        debug!("keeping {} learned hosts after switch {:#x} left", self.known_hosts().len(), sw);
    }

    fn packet_in(&mut self,
                 sw: u64,
                 _: u32,
                 pkt: PacketIn,
                 channel: &mut dyn SwitchChannel)
                 -> Result<()> {
        let decision = self.decide(sw, &pkt);
        programmer::apply(channel, sw, &decision, &pkt)
    }
}
