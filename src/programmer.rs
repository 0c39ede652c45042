use tracing::{debug, info};

use crate::decision::{Decision, FlowEntry};
use crate::error::Result;
use crate::openflow0x01::{Action, PacketIn, PseudoPort};

/// What the controller may ask of a connected switch.
pub trait SwitchChannel {
    /// Install `flow` with `actions`; no actions means matching packets are dropped.
    fn install_flow(&mut self, sw: u64, flow: &FlowEntry, actions: Vec<Action>) -> Result<()>;
    /// Send the packet behind `pkt` through `actions`.
    fn release_packet(&mut self, sw: u64, pkt: &PacketIn, actions: Vec<Action>) -> Result<()>;
    /// Send the packet behind `pkt` out every port except the one it came in on.
    fn flood_packet(&mut self, sw: u64, pkt: &PacketIn) -> Result<()>;
    /// Remove every entry from the switch's flow table.
    fn clear_flows(&mut self, sw: u64) -> Result<()>;
}

/// Carry out `decision` for the first packet `pkt` on switch `sw`.
///
/// Flows are installed before the packet is released so that it is not sent
/// back to the controller.
pub fn apply<C: SwitchChannel + ?Sized>(channel: &mut C,
                                        sw: u64,
                                        decision: &Decision,
                                        pkt: &PacketIn)
                                        -> Result<()> {
    match *decision {
        Decision::Flood => {
            debug!("flooding packet from port {} on switch {:#x}", pkt.port, sw);
            channel.flood_packet(sw, pkt)
        }
        Decision::InstallAndForward { ref flow, port } => {
            info!("installing {:?} at priority {} to port {}", flow.pattern, flow.priority, port);
            channel.install_flow(sw, flow, vec![output(port)])?;
            channel.release_packet(sw, pkt, vec![output(port)])
        }
        Decision::InstallAndEnqueue { ref flow, port, queue } => {
            info!("installing {:?} at priority {} to port {} queue {}",
                  flow.pattern,
                  flow.priority,
                  port,
                  queue);
            let enqueue = Action::Enqueue(PseudoPort::PhysicalPort(port), queue);
            channel.install_flow(sw, flow, vec![enqueue])?;
            channel.release_packet(sw, pkt, vec![output(port)])
        }
        Decision::InstallAndDrop { ref flow } => {
            info!("installing drop {:?} at priority {}", flow.pattern, flow.priority);
            channel.install_flow(sw, flow, vec![])
        }
        Decision::Buffer(reason) => {
            debug!("leaving packet from port {} buffered: {:?}", pkt.port, reason);
            Ok(())
        }
    }
}

fn output(port: u16) -> Action {
    Action::Output(PseudoPort::PhysicalPort(port))
}
