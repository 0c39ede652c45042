use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use qos_ofp::decision::{FlowDecisionEngine, DEFAULT_HARD_TIMEOUT};
use qos_ofp::learning::SharedLearningTable;
use qos_ofp::ofp_controller::OfpController;
use qos_ofp::ofp_header::OfpHeader;
use qos_ofp::ofp_message::OfpMessage;
use qos_ofp::openflow0x01::message::Message;
use qos_ofp::openflow0x01::{Action, FlowModCmd, PacketIn, PacketInReason, Pattern, Payload,
                            PseudoPort, SupportedActions, SwitchFeatures, Timeout};
use qos_ofp::packet::MacAddr;
use qos_ofp::policy::{PolicyError, PolicyRuleSet};
use qos_ofp::qos_switch::QosSwitch;
use qos_ofp::Error;

const DPID: u64 = 0x0000_0000_0000_0001;

/// Plays the switch side of one connection from a script of messages.
struct FakeSwitch {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl FakeSwitch {
    fn new(script: Vec<(u32, Message)>) -> FakeSwitch {
        let mut input = vec![];
        for (xid, msg) in script {
            input.extend(Message::marshal(xid, msg));
        }
        FakeSwitch {
            input: Cursor::new(input),
            output: vec![],
        }
    }

    /// Everything the controller sent, parsed back into messages.
    fn received(&self) -> Vec<(u32, Message)> {
        let mut msgs = vec![];
        let mut rest = &self.output[..];
        while !rest.is_empty() {
            let header = OfpHeader::parse(rest).unwrap();
            let (msg, tail) = rest.split_at(header.length());
            msgs.push(Message::parse(&header, &msg[OfpHeader::size()..]).unwrap());
            rest = tail;
        }
        msgs
    }
}

impl Read for FakeSwitch {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for FakeSwitch {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn mac(last: u8) -> MacAddr {
    MacAddr([0, 0, 0, 0, 0, last])
}

fn eth(dst: MacAddr, src: MacAddr, typ: u16) -> Vec<u8> {
    let mut v = vec![];
    v.extend_from_slice(&dst.octets());
    v.extend_from_slice(&src.octets());
    v.extend_from_slice(&typ.to_be_bytes());
    v
}

fn arp_broadcast(src: MacAddr) -> Vec<u8> {
    let mut v = eth(MacAddr::BROADCAST, src, 0x0806);
    v.extend_from_slice(&[0, 1, 0x08, 0, 6, 4, 0, 1]);
    v.extend_from_slice(&src.octets());
    v.extend_from_slice(&[10, 0, 0, src.octets()[5]]);
    v.extend_from_slice(&[0; 6]);
    v.extend_from_slice(&[10, 0, 0, 99]);
    v
}

fn tcp(src: MacAddr, dst: MacAddr, dst_port: u16) -> Vec<u8> {
    let mut v = eth(dst, src, 0x0800);
    v.extend_from_slice(&[0x45, 0, 0, 40, 0, 0, 0x40, 0, 64, 6, 0, 0]);
    v.extend_from_slice(&[10, 0, 0, src.octets()[5]]);
    v.extend_from_slice(&[10, 0, 0, dst.octets()[5]]);
    v.extend_from_slice(&51000u16.to_be_bytes());
    v.extend_from_slice(&dst_port.to_be_bytes());
    v.extend_from_slice(&[0; 16]);
    v
}

fn packet_in(buffer_id: Option<u32>, port: u16, frame: Vec<u8>) -> Message {
    Message::PacketIn(PacketIn {
        total_len: frame.len() as u16,
        input_payload: match buffer_id {
            Some(id) => Payload::Buffered(id, frame),
            None => Payload::NotBuffered(frame),
        },
        port,
        reason: PacketInReason::NoMatch,
    })
}

fn features() -> Message {
    Message::FeaturesReply(SwitchFeatures {
        datapath_id: DPID,
        num_buffers: 256,
        num_tables: 1,
        supported_actions: SupportedActions {
            output: true,
            enqueue: true,
        },
        ports: vec![1, 2, 3, 4],
    })
}

fn reference_controller() -> QosSwitch {
    controller_sharing(&SharedLearningTable::new())
}

fn controller_sharing(known_hosts: &SharedLearningTable) -> QosSwitch {
    let rules = PolicyRuleSet::load("policies/reference.json").unwrap();
    QosSwitch::new(FlowDecisionEngine::new(Arc::new(rules), DEFAULT_HARD_TIMEOUT),
                   known_hosts.clone())
}

fn run(script: Vec<(u32, Message)>) -> (qos_ofp::Result<()>, Vec<(u32, Message)>) {
    let mut switch = FakeSwitch::new(script);
    let result = reference_controller().handle_client_connected(&mut switch);
    (result, switch.received())
}

#[test]
fn handshake_clears_table_and_answers_echo() {
    let (result, received) = run(vec![(1, Message::Hello),
                                      (2, features()),
                                      (77, Message::EchoRequest(vec![1, 2, 3]))]);
    assert!(result.is_ok());
    let msgs: Vec<Message> = received.iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(msgs[0], Message::Hello);
    assert_eq!(msgs[1], Message::FeaturesReq);
    match msgs[2] {
        Message::FlowMod(ref fm) => {
            assert_eq!(fm.command, FlowModCmd::DeleteFlow);
            assert_eq!(fm.pattern, Pattern::match_all());
        }
        ref other => panic!("expected delete, got {:?}", other),
    }
    assert_eq!(received[3], (77, Message::EchoReply(vec![1, 2, 3])));
    assert_eq!(received.len(), 4);
}

#[test]
fn rate_limited_flow_end_to_end() {
    let (result, received) = run(vec![(1, Message::Hello),
                                      (2, features()),
                                      (3, packet_in(Some(10), 3, arp_broadcast(mac(3)))),
                                      (4, packet_in(Some(11), 1, tcp(mac(1), mac(3), 40)))]);
    assert!(result.is_ok());
    let msgs: Vec<Message> = received.into_iter().skip(3).map(|(_, m)| m).collect();
    assert_eq!(msgs.len(), 3);

    // ARP broadcast from h3 is flooded from its buffer, nothing installed
    match msgs[0] {
        Message::PacketOut(ref po) => {
            assert_eq!(po.output_payload, Payload::Buffered(10, vec![]));
            assert_eq!(po.port_id, Some(3));
            assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::AllPorts)]);
        }
        ref other => panic!("expected flood, got {:?}", other),
    }

    // h1 -> h3:40 is queued on port 3
    match msgs[1] {
        Message::FlowMod(ref fm) => {
            assert_eq!(fm.command, FlowModCmd::AddFlow);
            assert_eq!(fm.priority, 100);
            assert_eq!(fm.hard_timeout, Timeout::ExpiresAfter(40));
            assert_eq!(fm.idle_timeout, Timeout::Permanent);
            assert_eq!(fm.pattern.dl_src, Some(mac(1)));
            assert_eq!(fm.pattern.dl_dst, Some(mac(3)));
            assert_eq!(fm.pattern.dl_typ, Some(0x0800));
            assert_eq!(fm.pattern.nw_proto, Some(6));
            assert_eq!(fm.pattern.tp_dst, Some(40));
            assert_eq!(fm.pattern.in_port, None);
            assert_eq!(fm.actions, vec![Action::Enqueue(PseudoPort::PhysicalPort(3), 0)]);
            assert_eq!(fm.apply_to_packet, None);
        }
        ref other => panic!("expected flow mod, got {:?}", other),
    }
    match msgs[2] {
        Message::PacketOut(ref po) => {
            assert_eq!(po.output_payload, Payload::Buffered(11, vec![]));
            assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::PhysicalPort(3))]);
        }
        ref other => panic!("expected packet out, got {:?}", other),
    }
}

#[test]
fn blocked_pair_installs_actionless_flow() {
    let (_, received) = run(vec![(1, Message::Hello),
                                 (2, features()),
                                 (3, packet_in(None, 4, arp_broadcast(mac(4)))),
                                 (4, packet_in(None, 3, tcp(mac(3), mac(4), 22)))]);
    let msgs: Vec<Message> = received.into_iter().skip(4).map(|(_, m)| m).collect();
    match msgs.as_slice() {
        [Message::FlowMod(fm)] => {
            assert_eq!(fm.priority, 60);
            assert!(fm.actions.is_empty());
            assert_eq!(fm.hard_timeout, Timeout::ExpiresAfter(40));
        }
        other => panic!("expected a single drop flow, got {:?}", other),
    }
}

#[test]
fn unbuffered_packets_are_released_with_their_data() {
    let frame = tcp(mac(4), mac(1), 80);
    let (_, received) = run(vec![(1, Message::Hello),
                                 (2, features()),
                                 (3, packet_in(None, 1, arp_broadcast(mac(1)))),
                                 (4, packet_in(None, 4, frame.clone()))]);
    match received.last() {
        Some((_, Message::PacketOut(po))) => {
            assert_eq!(po.output_payload, Payload::NotBuffered(frame));
            assert_eq!(po.port_id, Some(4));
            assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::PhysicalPort(1))]);
        }
        other => panic!("expected packet out, got {:?}", other),
    }
}

#[test]
fn hosts_learned_before_a_reconnect_still_resolve() {
    let known_hosts = SharedLearningTable::new();
    let mut first = FakeSwitch::new(vec![(1, Message::Hello),
                                         (2, features()),
                                         (3, packet_in(Some(10), 3, arp_broadcast(mac(3))))]);
    controller_sharing(&known_hosts).handle_client_connected(&mut first).unwrap();
    assert_eq!(known_hosts.lock().lookup(DPID, mac(3)), Some(3));

    // same datapath, new control connection, h3 has been silent since
    let mut second = FakeSwitch::new(vec![(1, Message::Hello),
                                          (2, features()),
                                          (3, packet_in(Some(11), 1, tcp(mac(1), mac(3), 40)))]);
    controller_sharing(&known_hosts).handle_client_connected(&mut second).unwrap();
    let msgs: Vec<Message> = second.received().into_iter().skip(3).map(|(_, m)| m).collect();
    match msgs.as_slice() {
        [Message::FlowMod(fm), Message::PacketOut(po)] => {
            assert_eq!(fm.actions, vec![Action::Enqueue(PseudoPort::PhysicalPort(3), 0)]);
            assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::PhysicalPort(3))]);
        }
        other => panic!("expected flow mod and packet out, got {:?}", other),
    }
}

#[test]
fn bad_messages_are_skipped() {
    let mut switch = FakeSwitch::new(vec![(1, Message::Hello), (2, features())]);
    let mut input = switch.input.get_ref().clone();
    // a message of unknown type, then a packet in with a bogus reason
    input.extend_from_slice(&[0x01, 0xee, 0x00, 0x0a, 0, 0, 0, 5, 0xaa, 0xbb]);
    let mut bogus = Message::marshal(6, packet_in(None, 1, arp_broadcast(mac(1))));
    bogus[8 + 8] = 7;
    input.extend(bogus);
    input.extend(Message::marshal(7, Message::EchoRequest(vec![])));
    switch.input = Cursor::new(input);

    let result = reference_controller().handle_client_connected(&mut switch);
    assert!(result.is_ok());
    assert_eq!(switch.received().last(), Some(&(7, Message::EchoReply(vec![]))));
}

#[test]
fn connection_dropped_mid_message_is_an_error() {
    let mut switch = FakeSwitch::new(vec![(1, Message::Hello)]);
    let mut input = switch.input.get_ref().clone();
    input.extend_from_slice(&[0x01, 0x06, 0x00, 0x40, 0, 0, 0, 2, 1, 2]);
    switch.input = Cursor::new(input);
    match reference_controller().handle_client_connected(&mut switch) {
        Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
        other => panic!("expected eof error, got {:?}", other),
    }
}

#[test]
fn missing_policy_file_is_reported() {
    match PolicyRuleSet::load("policies/does-not-exist.json") {
        Err(PolicyError::Read { path, .. }) => {
            assert!(path.ends_with("does-not-exist.json"))
        }
        other => panic!("expected read error, got {:?}", other),
    }
}
