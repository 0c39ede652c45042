use std::io::{ErrorKind, Read, Write};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ofp_header::OfpHeader;
use crate::ofp_message::OfpMessage;

/// OpenFlow Controller
///
/// Version-agnostic API for implementing an OpenFlow controller.
pub trait OfpController {
    /// OpenFlow message type supporting the same protocol version as the controller.
    type Message: OfpMessage;

    /// Send a message to the node associated with the given stream.
    fn send_message<W: Write>(xid: u32, msg: Self::Message, stream: &mut W) -> Result<()>;
    /// Perform handshake and begin loop reading incoming messages from client stream.
    /// Returns once the switch closes the connection.
    fn handle_client_connected<S: Read + Write>(&mut self, stream: &mut S) -> Result<()>;
}

/// Read one whole message, or `None` if the stream ended cleanly between messages.
fn read_message<R: Read>(stream: &mut R) -> Result<Option<(OfpHeader, Vec<u8>)>> {
    let mut buf = [0u8; 8];
    match stream.read_exact(&mut buf) {
        Ok(()) => (),
        Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = OfpHeader::parse(&buf)?;
    let mut body = vec![0; header.length() - OfpHeader::size()];
    stream.read_exact(&mut body)?;
    Ok(Some((header, body)))
}

pub mod openflow0x01 {
    use super::*;
    use crate::decision::FlowEntry;
    use crate::openflow0x01::message::{add_flow, delete_all_flows, Message};
    use crate::openflow0x01::{Action, MsgCode, PacketIn, PacketOut, PseudoPort, SwitchFeatures};
    use crate::programmer::SwitchChannel;

    /// OpenFlow 1.0 messages to one switch, written to its connection.
    pub struct OfpChannel<'a, S> {
        stream: &'a mut S,
        next_xid: u32,
    }

    impl<'a, S: Write> OfpChannel<'a, S> {
        pub fn new(stream: &'a mut S) -> OfpChannel<'a, S> {
            OfpChannel {
                stream,
                next_xid: 1,
            }
        }

        fn send(&mut self, msg: Message) -> Result<()> {
            let xid = self.next_xid;
            self.next_xid = self.next_xid.wrapping_add(1);
            self.reply(xid, msg)
        }

        fn reply(&mut self, xid: u32, msg: Message) -> Result<()> {
            self.stream.write_all(&Message::marshal(xid, msg))?;
            Ok(())
        }
    }

    impl<'a, S: Write> SwitchChannel for OfpChannel<'a, S> {
        fn install_flow(&mut self, sw: u64, flow: &FlowEntry, actions: Vec<Action>) -> Result<()> {
            debug!("flow mod to switch {:#x}", sw);
            let flow_mod = add_flow(flow.priority, flow.pattern.clone(), flow.hard_timeout, actions);
            self.send(Message::FlowMod(flow_mod))
        }

        fn release_packet(&mut self, sw: u64, pkt: &PacketIn, actions: Vec<Action>) -> Result<()> {
            debug!("packet out to switch {:#x}", sw);
            let pkt_out = PacketOut {
                output_payload: pkt.input_payload.clone(),
                port_id: Some(pkt.port),
                apply_actions: actions,
            };
            self.send(Message::PacketOut(pkt_out))
        }

        fn flood_packet(&mut self, sw: u64, pkt: &PacketIn) -> Result<()> {
            self.release_packet(sw, pkt, vec![Action::Output(PseudoPort::AllPorts)])
        }

        fn clear_flows(&mut self, sw: u64) -> Result<()> {
            debug!("clearing flow table of switch {:#x}", sw);
            self.send(Message::FlowMod(delete_all_flows()))
        }
    }

    /// OpenFlow 1.0 controller applications. The handshake, echo replies and
    /// message framing are taken care of; applications see switches come and
    /// go and the packets sent to the controller.
    pub trait OF0x01Controller {
        fn switch_connected(&mut self,
                            sw: u64,
                            features: SwitchFeatures,
                            channel: &mut dyn SwitchChannel)
                            -> Result<()>;

        fn switch_disconnected(&mut self, sw: u64);

        fn packet_in(&mut self,
                     sw: u64,
                     xid: u32,
                     pkt: PacketIn,
                     channel: &mut dyn SwitchChannel)
                     -> Result<()>;
    }

    impl<T: OF0x01Controller> OfpController for T {
        type Message = Message;

        fn send_message<W: Write>(xid: u32, msg: Message, stream: &mut W) -> Result<()> {
            stream.write_all(&Message::marshal(xid, msg))?;
            Ok(())
        }

        fn handle_client_connected<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
            let mut sw = None;
            let result = serve(self, stream, &mut sw);
            if let Some(sw) = sw {
                info!("switch {:#x} disconnected", sw);
                self.switch_disconnected(sw);
            }
            result
        }
    }

    fn serve<T, S>(ctl: &mut T, stream: &mut S, sw: &mut Option<u64>) -> Result<()>
        where T: OF0x01Controller,
              S: Read + Write
    {
        let mut channel = OfpChannel::new(stream);
        channel.send(Message::Hello)?;
        loop {
            let (header, body) = match read_message(&mut *channel.stream)? {
                Some(msg) => msg,
                None => return Ok(()),
            };
            // whatever version the switch greets with, we have offered 1.0
            if let Ok(MsgCode::Hello) = header.type_code() {
                channel.send(Message::FeaturesReq)?;
                continue;
            }
            let (xid, msg) = match Message::parse(&header, &body) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("skipping message from switch: {}", e);
                    continue;
                }
            };
            match msg {
                Message::EchoRequest(buf) => channel.reply(xid, Message::EchoReply(buf))?,
                Message::FeaturesReply(features) => {
                    let id = features.datapath_id;
                    info!("switch {:#x} connected with {} ports", id, features.ports.len());
                    if !features.supported_actions.enqueue {
                        warn!("switch {:#x} does not support enqueue; queued flows will be rejected",
                              id);
                    }
                    *sw = Some(id);
                    ctl.switch_connected(id, features, &mut channel)?;
                }
                Message::PacketIn(pkt) => {
                    match *sw {
                        Some(id) => ctl.packet_in(id, xid, pkt, &mut channel)?,
                        None => warn!("packet in before features reply, ignoring"),
                    }
                }
                Message::Error(err) => {
                    warn!("switch reported error type {} code {}", err.typ, err.code)
                }
                Message::EchoReply(_) | Message::BarrierReply => (),
                other => debug!("ignoring {:?}", other),
            }
        }
    }
}
