use std::io::{BufRead, Cursor, Read};
use std::mem::size_of;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{bit, test_bit};
use crate::error::{ensure_len, Error, Result};
use crate::packet::MacAddr;

/// OpenFlow 1.0 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Vendor,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    PortMod,
    StatsReq,
    StatsResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
}

impl MsgCode {
    pub fn of_int(code: u8) -> Option<MsgCode> {
        let msg_code = match code {
            0 => MsgCode::Hello,
            1 => MsgCode::Error,
            2 => MsgCode::EchoReq,
            3 => MsgCode::EchoResp,
            4 => MsgCode::Vendor,
            5 => MsgCode::FeaturesReq,
            6 => MsgCode::FeaturesResp,
            7 => MsgCode::GetConfigReq,
            8 => MsgCode::GetConfigResp,
            9 => MsgCode::SetConfig,
            10 => MsgCode::PacketIn,
            11 => MsgCode::FlowRemoved,
            12 => MsgCode::PortStatus,
            13 => MsgCode::PacketOut,
            14 => MsgCode::FlowMod,
            15 => MsgCode::PortMod,
            16 => MsgCode::StatsReq,
            17 => MsgCode::StatsResp,
            18 => MsgCode::BarrierReq,
            19 => MsgCode::BarrierResp,
            20 => MsgCode::QueueGetConfigReq,
            21 => MsgCode::QueueGetConfigResp,
            _ => return None,
        };
        Some(msg_code)
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message.
    fn size_of(msg: &Self) -> usize;
    /// Parse a buffer into a message.
    fn parse(buf: &[u8]) -> Result<Self>;
    /// Marshal a message into a `u8` buffer.
    fn marshal(msg: Self, bytes: &mut Vec<u8>);
}

mod wildcard {
    pub const IN_PORT: u32 = 0;
    pub const DL_VLAN: u32 = 1;
    pub const DL_SRC: u32 = 2;
    pub const DL_DST: u32 = 3;
    pub const DL_TYPE: u32 = 4;
    pub const NW_PROTO: u32 = 5;
    pub const TP_SRC: u32 = 6;
    pub const TP_DST: u32 = 7;
    pub const NW_SRC_SHIFT: u32 = 8;
    pub const NW_DST_SHIFT: u32 = 14;
    pub const NW_ADDR_MASK: u32 = 0x3f;
    pub const NW_ADDR_ALL: u32 = 32;
    pub const DL_VLAN_PCP: u32 = 20;
    pub const NW_TOS: u32 = 21;
}

/// Fields to match against flows. `None` fields are wildcarded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub in_port: Option<u16>,
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub dl_typ: Option<u16>,
    pub nw_proto: Option<u8>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

#[repr(packed)]
struct OfpMatch(u32, u16, [u8; 6], [u8; 6], u16, u8, u8, u16, u8, u8, u16, u32, u32, u16, u16);

impl Pattern {
    /// A pattern matching every packet.
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    pub fn size_of() -> usize {
        size_of::<OfpMatch>()
    }

    fn wildcards(p: &Pattern) -> u32 {
        let nw_addr = |a: Option<Ipv4Addr>| if a.is_some() { 0 } else { wildcard::NW_ADDR_ALL };
        let mut w = 0;
        w = bit(wildcard::IN_PORT, w, p.in_port.is_none());
        w = bit(wildcard::DL_VLAN, w, true);
        w = bit(wildcard::DL_SRC, w, p.dl_src.is_none());
        w = bit(wildcard::DL_DST, w, p.dl_dst.is_none());
        w = bit(wildcard::DL_TYPE, w, p.dl_typ.is_none());
        w = bit(wildcard::NW_PROTO, w, p.nw_proto.is_none());
        w = bit(wildcard::TP_SRC, w, p.tp_src.is_none());
        w = bit(wildcard::TP_DST, w, p.tp_dst.is_none());
        w |= nw_addr(p.nw_src) << wildcard::NW_SRC_SHIFT;
        w |= nw_addr(p.nw_dst) << wildcard::NW_DST_SHIFT;
        w = bit(wildcard::DL_VLAN_PCP, w, true);
        bit(wildcard::NW_TOS, w, true)
    }

    pub fn marshal(p: &Pattern, bytes: &mut Vec<u8>) {
        bytes.write_u32::<BigEndian>(Pattern::wildcards(p)).unwrap();
        bytes.write_u16::<BigEndian>(p.in_port.unwrap_or(0)).unwrap();
        bytes.extend_from_slice(&p.dl_src.unwrap_or_default().octets());
        bytes.extend_from_slice(&p.dl_dst.unwrap_or_default().octets());
        // dl_vlan, dl_vlan_pcp, pad
        bytes.write_u16::<BigEndian>(0).unwrap();
        bytes.write_u16::<BigEndian>(0).unwrap();
        bytes.write_u16::<BigEndian>(p.dl_typ.unwrap_or(0)).unwrap();
        // nw_tos
        bytes.write_u8(0).unwrap();
        bytes.write_u8(p.nw_proto.unwrap_or(0)).unwrap();
        bytes.write_u16::<BigEndian>(0).unwrap();
        bytes.write_u32::<BigEndian>(p.nw_src.map_or(0, u32::from)).unwrap();
        bytes.write_u32::<BigEndian>(p.nw_dst.map_or(0, u32::from)).unwrap();
        bytes.write_u16::<BigEndian>(p.tp_src.unwrap_or(0)).unwrap();
        bytes.write_u16::<BigEndian>(p.tp_dst.unwrap_or(0)).unwrap();
    }

    pub fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Pattern> {
        let w = bytes.read_u32::<BigEndian>()?;
        let exact = |b: u32| !test_bit(b, w);
        let exact_nw = |shift: u32| (w >> shift) & wildcard::NW_ADDR_MASK == 0;
        let in_port = bytes.read_u16::<BigEndian>()?;
        let mut dl_src = [0; 6];
        bytes.read_exact(&mut dl_src)?;
        let mut dl_dst = [0; 6];
        bytes.read_exact(&mut dl_dst)?;
        bytes.consume(4);
        let dl_typ = bytes.read_u16::<BigEndian>()?;
        bytes.consume(1);
        let nw_proto = bytes.read_u8()?;
        bytes.consume(2);
        let nw_src = bytes.read_u32::<BigEndian>()?;
        let nw_dst = bytes.read_u32::<BigEndian>()?;
        let tp_src = bytes.read_u16::<BigEndian>()?;
        let tp_dst = bytes.read_u16::<BigEndian>()?;
        Ok(Pattern {
            in_port: Some(in_port).filter(|_| exact(wildcard::IN_PORT)),
            dl_src: Some(MacAddr(dl_src)).filter(|_| exact(wildcard::DL_SRC)),
            dl_dst: Some(MacAddr(dl_dst)).filter(|_| exact(wildcard::DL_DST)),
            dl_typ: Some(dl_typ).filter(|_| exact(wildcard::DL_TYPE)),
            nw_proto: Some(nw_proto).filter(|_| exact(wildcard::NW_PROTO)),
            nw_src: Some(Ipv4Addr::from(nw_src)).filter(|_| exact_nw(wildcard::NW_SRC_SHIFT)),
            nw_dst: Some(Ipv4Addr::from(nw_dst)).filter(|_| exact_nw(wildcard::NW_DST_SHIFT)),
            tp_src: Some(tp_src).filter(|_| exact(wildcard::TP_SRC)),
            tp_dst: Some(tp_dst).filter(|_| exact(wildcard::TP_DST)),
        })
    }
}

/// Port behavior.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u16),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    Controller(u64),
    Local,
}

#[repr(u16)]
enum OfpPort {
    OFPPMax = 0xff00,
    OFPPInPort = 0xfff8,
    OFPPTable = 0xfff9,
    OFPPNormal = 0xfffa,
    OFPPFlood = 0xfffb,
    OFPPAll = 0xfffc,
    OFPPController = 0xfffd,
    OFPPLocal = 0xfffe,
    OFPPNone = 0xffff,
}

impl PseudoPort {
    fn of_int(p: u16) -> Result<Option<PseudoPort>> {
        if (OfpPort::OFPPNone as u16) == p {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    fn make(p: u16, len: u64) -> Result<PseudoPort> {
        match p {
            p if p == (OfpPort::OFPPInPort as u16) => Ok(PseudoPort::InPort),
            p if p == (OfpPort::OFPPTable as u16) => Ok(PseudoPort::Table),
            p if p == (OfpPort::OFPPNormal as u16) => Ok(PseudoPort::Normal),
            p if p == (OfpPort::OFPPFlood as u16) => Ok(PseudoPort::Flood),
            p if p == (OfpPort::OFPPAll as u16) => Ok(PseudoPort::AllPorts),
            p if p == (OfpPort::OFPPController as u16) => Ok(PseudoPort::Controller(len)),
            p if p == (OfpPort::OFPPLocal as u16) => Ok(PseudoPort::Local),
            p if p <= (OfpPort::OFPPMax as u16) => Ok(PseudoPort::PhysicalPort(p)),
            _ => Err(Error::Malformed("port number")),
        }
    }

    fn to_int(pp: PseudoPort) -> u16 {
        match pp {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => OfpPort::OFPPInPort as u16,
            PseudoPort::Table => OfpPort::OFPPTable as u16,
            PseudoPort::Normal => OfpPort::OFPPNormal as u16,
            PseudoPort::Flood => OfpPort::OFPPFlood as u16,
            PseudoPort::AllPorts => OfpPort::OFPPAll as u16,
            PseudoPort::Controller(_) => OfpPort::OFPPController as u16,
            PseudoPort::Local => OfpPort::OFPPLocal as u16,
        }
    }

    fn marshal(pp: PseudoPort, bytes: &mut Vec<u8>) {
        bytes.write_u16::<BigEndian>(PseudoPort::to_int(pp)).unwrap()
    }
}

/// Actions associated with flows and packets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
    /// Output through the given queue of a port.
    Enqueue(PseudoPort, u32),
}

#[repr(packed)]
struct OfpActionHeader(u16, u16);

#[repr(packed)]
struct OfpActionOutput(u16, u16);

#[repr(packed)]
struct OfpActionEnqueue(u16, [u8; 6], u32);

#[repr(u16)]
enum OfpActionType {
    OFPATOutput = 0,
    OFPATEnqueue = 11,
}

impl Action {
    fn type_code(a: &Action) -> OfpActionType {
        match *a {
            Action::Output(_) => OfpActionType::OFPATOutput,
            Action::Enqueue(..) => OfpActionType::OFPATEnqueue,
        }
    }

    fn size_of(a: &Action) -> usize {
        let h = size_of::<OfpActionHeader>();
        let body = match *a {
            Action::Output(_) => size_of::<OfpActionOutput>(),
            Action::Enqueue(..) => size_of::<OfpActionEnqueue>(),
        };
        h + body
    }

    pub fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().map(Action::size_of).sum()
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Action> {
        let action_code = bytes.read_u16::<BigEndian>()?;
        let _len = bytes.read_u16::<BigEndian>()?;
        match action_code {
            t if t == (OfpActionType::OFPATOutput as u16) => {
                let port_code = bytes.read_u16::<BigEndian>()?;
                let max_len = bytes.read_u16::<BigEndian>()?;
                Ok(Action::Output(PseudoPort::make(port_code, max_len as u64)?))
            }
            t if t == (OfpActionType::OFPATEnqueue as u16) => {
                let port_code = bytes.read_u16::<BigEndian>()?;
                bytes.consume(6);
                let queue_id = bytes.read_u32::<BigEndian>()?;
                Ok(Action::Enqueue(PseudoPort::make(port_code, 0)?, queue_id))
            }
            _ => Err(Error::Malformed("unsupported action")),
        }
    }

    pub fn parse_sequence(bytes: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<Action>> {
        let end = bytes.position() + len as u64;
        let mut v = vec![];
        while bytes.position() < end {
            v.push(Action::parse(bytes)?);
        }
        Ok(v)
    }

    fn move_controller_last(acts: Vec<Action>) -> Vec<Action> {
        let (mut to_ctrl, mut not_to_ctrl): (Vec<Action>, Vec<Action>) = acts.into_iter()
            .partition(|act| match *act {
                Action::Output(PseudoPort::Controller(_)) => true,
                _ => false,
            });
        not_to_ctrl.append(&mut to_ctrl);
        not_to_ctrl
    }

    fn marshal(act: Action, bytes: &mut Vec<u8>) {
        bytes.write_u16::<BigEndian>(Action::type_code(&act) as u16).unwrap();
        bytes.write_u16::<BigEndian>(Action::size_of(&act) as u16).unwrap();
        match act {
            Action::Output(pp) => {
                PseudoPort::marshal(pp, bytes);
                bytes.write_u16::<BigEndian>(match pp {
                        PseudoPort::Controller(w) => w as u16,
                        _ => 0,
                    })
                    .unwrap()
            }
            Action::Enqueue(pp, queue_id) => {
                PseudoPort::marshal(pp, bytes);
                bytes.extend_from_slice(&[0; 6]);
                bytes.write_u32::<BigEndian>(queue_id).unwrap()
            }
        }
    }
}

/// How long before a flow entry expires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Actions supported by the datapath, as far as this controller cares.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SupportedActions {
    pub output: bool,
    pub enqueue: bool,
}

/// Switch features.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub supported_actions: SupportedActions,
    /// Numbers of the physical ports the switch reported.
    pub ports: Vec<u16>,
}

#[repr(packed)]
struct OfpSwitchFeatures(u64, u32, u8, [u8; 3], u32, u32);

#[repr(packed)]
struct OfpPhyPort(u16, [u8; 6], [u8; 16], u32, u32, u32, u32, u32, u32);

impl MessageType for SwitchFeatures {
    fn size_of(sf: &SwitchFeatures) -> usize {
        size_of::<OfpSwitchFeatures>() + sf.ports.len() * size_of::<OfpPhyPort>()
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures> {
        ensure_len("features reply", buf, size_of::<OfpSwitchFeatures>())?;
        let mut bytes = Cursor::new(buf);
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        bytes.consume(3);
        // capabilities
        bytes.consume(4);
        let supported_actions = {
            let d = bytes.read_u32::<BigEndian>()?;
            SupportedActions {
                output: test_bit(0, d),
                enqueue: test_bit(11, d),
            }
        };
        let num_ports = (buf.len() - size_of::<OfpSwitchFeatures>()) / size_of::<OfpPhyPort>();
        let mut ports = Vec::with_capacity(num_ports);
        for _ in 0..num_ports {
            ports.push(bytes.read_u16::<BigEndian>()?);
            bytes.consume(size_of::<OfpPhyPort>() - 2);
        }
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            supported_actions,
            ports,
        })
    }

    fn marshal(sf: SwitchFeatures, bytes: &mut Vec<u8>) {
        bytes.write_u64::<BigEndian>(sf.datapath_id).unwrap();
        bytes.write_u32::<BigEndian>(sf.num_buffers).unwrap();
        bytes.write_u8(sf.num_tables).unwrap();
        bytes.extend_from_slice(&[0; 3]);
        bytes.write_u32::<BigEndian>(0).unwrap();
        let mut actions = bit(0, 0, sf.supported_actions.output);
        actions = bit(11, actions, sf.supported_actions.enqueue);
        bytes.write_u32::<BigEndian>(actions).unwrap();
        for port_no in sf.ports {
            bytes.write_u16::<BigEndian>(port_no).unwrap();
            bytes.extend_from_slice(&[0; 46]);
        }
    }
}

/// Type of modification to perform on a flow table.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl FlowModCmd {
    fn of_int(cmd: u16) -> Result<FlowModCmd> {
        match cmd {
            0 => Ok(FlowModCmd::AddFlow),
            1 => Ok(FlowModCmd::ModFlow),
            2 => Ok(FlowModCmd::ModStrictFlow),
            3 => Ok(FlowModCmd::DeleteFlow),
            4 => Ok(FlowModCmd::DeleteStrictFlow),
            _ => Err(Error::Malformed("flow mod command")),
        }
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
}

#[repr(packed)]
struct OfpFlowMod(u64, u16, u16, u16, u16, u32, u16, u16);

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        (if check_overlap { 1 << 1 } else { 0 }) | (if notify_when_removed { 1 << 0 } else { 0 })
    }

    fn check_overlap_of_flags(flags: u16) -> bool {
        2 & flags != 0
    }

    fn notify_when_removed_of_flags(flags: u16) -> bool {
        1 & flags != 0
    }
}

impl MessageType for FlowMod {
    fn size_of(msg: &FlowMod) -> usize {
        Pattern::size_of() + size_of::<OfpFlowMod>() + Action::size_of_sequence(&msg.actions)
    }

    fn parse(buf: &[u8]) -> Result<FlowMod> {
        let fixed = Pattern::size_of() + size_of::<OfpFlowMod>();
        ensure_len("flow mod", buf, fixed)?;
        let mut bytes = Cursor::new(buf);
        let pattern = Pattern::parse(&mut bytes)?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let command = FlowModCmd::of_int(bytes.read_u16::<BigEndian>()?)?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let prio = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_i32::<BigEndian>()?;
        let out_port = PseudoPort::of_int(bytes.read_u16::<BigEndian>()?)?;
        let flags = bytes.read_u16::<BigEndian>()?;
        let actions = Action::parse_sequence(&mut bytes, buf.len() - fixed)?;
        Ok(FlowMod {
            command,
            pattern,
            priority: prio,
            actions,
            cookie,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: FlowMod::notify_when_removed_of_flags(flags),
            apply_to_packet: match buffer_id {
                -1 => None,
                n => Some(n as u32),
            },
            out_port,
            check_overlap: FlowMod::check_overlap_of_flags(flags),
        })
    }

    fn marshal(fm: FlowMod, bytes: &mut Vec<u8>) {
        Pattern::marshal(&fm.pattern, bytes);
        bytes.write_u64::<BigEndian>(fm.cookie).unwrap();
        bytes.write_u16::<BigEndian>(fm.command as u16).unwrap();
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.idle_timeout)).unwrap();
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.hard_timeout)).unwrap();
        bytes.write_u16::<BigEndian>(fm.priority).unwrap();
        bytes.write_i32::<BigEndian>(match fm.apply_to_packet {
                None => -1,
                Some(buf_id) => buf_id as i32,
            })
            .unwrap();
        match fm.out_port {
            None => bytes.write_u16::<BigEndian>(OfpPort::OFPPNone as u16).unwrap(),
            Some(x) => PseudoPort::marshal(x, bytes),
        }
        bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(fm.check_overlap,
                                                          fm.notify_when_removed))
            .unwrap();
        for act in Action::move_controller_last(fm.actions) {
            // OFPP_TABLE is only meaningful in a packet out
            if act == Action::Output(PseudoPort::Table) {
                continue;
            }
            Action::marshal(act, bytes)
        }
    }
}

/// The data associated with a packet received by the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        Payload::bytes(payload).len()
    }

    /// The packet bytes carried with the message, whether or not the switch buffered it.
    pub fn bytes(payload: &Payload) -> &[u8] {
        match *payload {
            Payload::Buffered(_, ref buf) |
            Payload::NotBuffered(ref buf) => buf,
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch,
    ExplicitSend,
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub port: u16,
    pub reason: PacketInReason,
}

#[repr(packed)]
struct OfpPacketIn(i32, u16, u16, u8, u8);

impl MessageType for PacketIn {
    fn size_of(pi: &PacketIn) -> usize {
        size_of::<OfpPacketIn>() + Payload::size_of(&pi.input_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketIn> {
        ensure_len("packet in", buf, size_of::<OfpPacketIn>())?;
        let mut bytes = Cursor::new(buf);
        let buf_id = match bytes.read_i32::<BigEndian>()? {
            -1 => None,
            n => Some(n as u32),
        };
        let total_len = bytes.read_u16::<BigEndian>()?;
        let port = bytes.read_u16::<BigEndian>()?;
        let reason = match bytes.read_u8()? {
            0 => PacketInReason::NoMatch,
            1 => PacketInReason::ExplicitSend,
            _ => return Err(Error::Malformed("packet in reason")),
        };
        bytes.consume(1);
        let data = buf[size_of::<OfpPacketIn>()..].to_vec();
        let payload = match buf_id {
            None => Payload::NotBuffered(data),
            Some(n) => Payload::Buffered(n, data),
        };
        Ok(PacketIn {
            input_payload: payload,
            total_len,
            port,
            reason,
        })
    }

    fn marshal(pi: PacketIn, bytes: &mut Vec<u8>) {
        let buf_id = match pi.input_payload {
            Payload::Buffered(n, _) => n as i32,
            Payload::NotBuffered(_) => -1,
        };
        bytes.write_i32::<BigEndian>(buf_id).unwrap();
        bytes.write_u16::<BigEndian>(pi.total_len).unwrap();
        bytes.write_u16::<BigEndian>(pi.port).unwrap();
        bytes.write_u8(pi.reason as u8).unwrap();
        bytes.write_u8(0).unwrap();
        bytes.extend_from_slice(Payload::bytes(&pi.input_payload));
    }
}

/// Represents packets sent from the controller out through the datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: Payload,
    pub port_id: Option<u16>,
    pub apply_actions: Vec<Action>,
}

#[repr(packed)]
struct OfpPacketOut(u32, u16, u16);

impl MessageType for PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        let data = match po.output_payload {
            // the switch already holds buffered packets
            Payload::Buffered(..) => 0,
            Payload::NotBuffered(ref buf) => buf.len(),
        };
        size_of::<OfpPacketOut>() + Action::size_of_sequence(&po.apply_actions) + data
    }

    fn parse(buf: &[u8]) -> Result<PacketOut> {
        ensure_len("packet out", buf, size_of::<OfpPacketOut>())?;
        let mut bytes = Cursor::new(buf);
        let buf_id = bytes.read_i32::<BigEndian>()?;
        let port_id = match bytes.read_u16::<BigEndian>()? {
            p if p == OfpPort::OFPPNone as u16 => None,
            p => Some(p),
        };
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        ensure_len("packet out actions", buf, size_of::<OfpPacketOut>() + actions_len)?;
        let apply_actions = Action::parse_sequence(&mut bytes, actions_len)?;
        let data = buf[size_of::<OfpPacketOut>() + actions_len..].to_vec();
        let output_payload = match buf_id {
            -1 => Payload::NotBuffered(data),
            n => Payload::Buffered(n as u32, data),
        };
        Ok(PacketOut {
            output_payload,
            port_id,
            apply_actions,
        })
    }

    fn marshal(po: PacketOut, bytes: &mut Vec<u8>) {
        bytes.write_i32::<BigEndian>(match po.output_payload {
                Payload::Buffered(n, _) => n as i32,
                Payload::NotBuffered(_) => -1,
            })
            .unwrap();
        bytes.write_u16::<BigEndian>(po.port_id.unwrap_or(OfpPort::OFPPNone as u16)).unwrap();
        bytes.write_u16::<BigEndian>(Action::size_of_sequence(&po.apply_actions) as u16).unwrap();
        for act in Action::move_controller_last(po.apply_actions) {
            Action::marshal(act, bytes);
        }
        if let Payload::NotBuffered(buf) = po.output_payload {
            bytes.extend_from_slice(&buf);
        }
    }
}

/// An error reported by the switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMsg {
    pub typ: u16,
    pub code: u16,
    /// At least the first 64 bytes of the failed request.
    pub data: Vec<u8>,
}

impl MessageType for ErrorMsg {
    fn size_of(err: &ErrorMsg) -> usize {
        4 + err.data.len()
    }

    fn parse(buf: &[u8]) -> Result<ErrorMsg> {
        ensure_len("error", buf, 4)?;
        let mut bytes = Cursor::new(buf);
        let typ = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u16::<BigEndian>()?;
        Ok(ErrorMsg {
            typ,
            code,
            data: buf[4..].to_vec(),
        })
    }

    fn marshal(err: ErrorMsg, bytes: &mut Vec<u8>) {
        bytes.write_u16::<BigEndian>(err.typ).unwrap();
        bytes.write_u16::<BigEndian>(err.code).unwrap();
        bytes.extend_from_slice(&err.data);
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;
    use crate::packet::Packet;

    /// The OpenFlow version byte this module speaks.
    pub const VERSION: u8 = 0x01;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Message {
        Hello,
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        PacketOut(PacketOut),
        BarrierRequest,
        BarrierReply,
        /// A message this controller does not interpret.
        Unhandled(MsgCode),
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
        fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::BarrierRequest => MsgCode::BarrierReq,
                Message::BarrierReply => MsgCode::BarrierResp,
                Message::Unhandled(code) => code,
            }
        }

        /// Marshal the OpenFlow message `msg`.
        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) {
            match msg {
                Message::Hello |
                Message::FeaturesReq |
                Message::BarrierRequest |
                Message::BarrierReply |
                Message::Unhandled(_) => (),
                Message::Error(err) => ErrorMsg::marshal(err, bytes),
                Message::EchoRequest(buf) |
                Message::EchoReply(buf) => bytes.extend_from_slice(&buf),
                Message::FeaturesReply(sf) => SwitchFeatures::marshal(sf, bytes),
                Message::FlowMod(flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::PacketOut(po) => PacketOut::marshal(po, bytes),
            }
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            OfpHeader::size() +
            match *msg {
                Message::Hello |
                Message::FeaturesReq |
                Message::BarrierRequest |
                Message::BarrierReply |
                Message::Unhandled(_) => 0,
                Message::Error(ref err) => ErrorMsg::size_of(err),
                Message::EchoRequest(ref buf) |
                Message::EchoReply(ref buf) => buf.len(),
                Message::FeaturesReply(ref sf) => SwitchFeatures::size_of(sf),
                Message::FlowMod(ref flow_mod) => FlowMod::size_of(flow_mod),
                Message::PacketIn(ref packet_in) => PacketIn::size_of(packet_in),
                Message::PacketOut(ref po) => PacketOut::size_of(po),
            }
        }

        fn header_of(xid: u32, msg: &Message) -> OfpHeader {
            let sizeof_buf = Self::size_of(msg);
            OfpHeader::new(VERSION,
                           Self::msg_code_of_message(msg) as u8,
                           sizeof_buf as u16,
                           xid)
        }

        fn marshal(xid: u32, msg: Message) -> Vec<u8> {
            let hdr = Self::header_of(xid, &msg);
            let mut bytes = Vec::with_capacity(hdr.length());
            OfpHeader::marshal(&mut bytes, hdr);
            Message::marshal_body(msg, &mut bytes);
            bytes
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message)> {
            if header.version() != VERSION {
                return Err(Error::UnsupportedVersion(header.version()));
            }
            let msg = match header.type_code()? {
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => Message::Error(ErrorMsg::parse(buf)?),
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::PacketOut => Message::PacketOut(PacketOut::parse(buf)?),
                MsgCode::BarrierReq => Message::BarrierRequest,
                MsgCode::BarrierResp => Message::BarrierReply,
                code => Message::Unhandled(code),
            };
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a flow parameterized by the given `priority`, `pattern`,
    /// `hard_timeout` and `actions`. An empty `actions` drops matching packets.
    pub fn add_flow(prio: u16,
                    pattern: Pattern,
                    hard_timeout: Timeout,
                    actions: Vec<Action>)
                    -> FlowMod {
        FlowMod {
            command: FlowModCmd::AddFlow,
            pattern,
            priority: prio,
            actions,
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout,
            notify_when_removed: false,
            out_port: None,
            apply_to_packet: None,
            check_overlap: false,
        }
    }

    /// Return a `FlowMod` removing every entry of the flow table.
    pub fn delete_all_flows() -> FlowMod {
        FlowMod {
            command: FlowModCmd::DeleteFlow,
            pattern: Pattern::match_all(),
            priority: 0,
            actions: vec![],
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            out_port: None,
            apply_to_packet: None,
            check_overlap: false,
        }
    }

    /// Decode the Ethernet frame carried by a packet-in.
    pub fn parse_payload(payload: &Payload) -> Result<Packet> {
        Packet::parse(Payload::bytes(payload))
    }
}
