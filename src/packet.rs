use std::fmt;
use std::io::{BufRead, Cursor, Read};
use std::mem::size_of;
use std::net::Ipv4Addr;
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt};
use serde::{de, Deserialize, Deserializer};

use crate::error::{ensure_len, Error, Result};

/// An Ethernet (MAC) address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The all-ones broadcast address.
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> MacAddr {
        MacAddr(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let o = self.0;
        write!(f,
               "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
               o[0],
               o[1],
               o[2],
               o[3],
               o[4],
               o[5])
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Error parsing a textual MAC address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address {0:?}")]
pub struct ParseMacError(String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    /// Accepts six hex octets separated by `:` or `-`.
    fn from_str(s: &str) -> std::result::Result<MacAddr, ParseMacError> {
        let err = || ParseMacError(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(err)?;
            if part.is_empty() || part.len() > 2 {
                return Err(err());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(MacAddr(octets))
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<MacAddr, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// TCP frame of a packet.
pub struct Tcp {
    pub src: u16,
    pub dst: u16,
    pub seq: u32,
    pub ack: u32,
}

#[repr(packed)]
struct TcpNet(u16, u16, u32, u32, u16, u16, u16, u16);

impl Tcp {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Option<Tcp> {
        if remaining(bytes) < size_of::<TcpNet>() {
            return None;
        }
        let src = bytes.read_u16::<BigEndian>().ok()?;
        let dst = bytes.read_u16::<BigEndian>().ok()?;
        let seq = bytes.read_u32::<BigEndian>().ok()?;
        let ack = bytes.read_u32::<BigEndian>().ok()?;
        Some(Tcp { src, dst, seq, ack })
    }
}

/// UDP frame of a packet.
pub struct Udp {
    pub src: u16,
    pub dst: u16,
}

impl Udp {
    fn size_of() -> usize {
        8
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Option<Udp> {
        if remaining(bytes) < Self::size_of() {
            return None;
        }
        let src = bytes.read_u16::<BigEndian>().ok()?;
        let dst = bytes.read_u16::<BigEndian>().ok()?;
        Some(Udp { src, dst })
    }
}

/// Represents packets at the transport protocol level, which are encapsulated
/// within the IPv4 payload. Only TCP and UDP are decoded; otherwise the IPv4
/// protocol number is kept.
pub enum Tp {
    Tcp(Tcp),
    Udp(Udp),
    Unparsable(u8),
}

/// IPv4 frame of a packet.
pub struct Ip {
    pub tos: u8,
    pub ttl: u8,
    pub proto: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub tp: Tp,
}

/// IPv4 protocol numbers the controller looks at.
#[repr(u8)]
pub enum IpProto {
    IpTCP = 0x06,
    IpUDP = 0x11,
}

#[repr(packed)]
struct IpNet(u8, u8, u16, u16, u16, u8, u8, u16, u32, u32);

impl Ip {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Option<Ip> {
        if remaining(bytes) < size_of::<IpNet>() {
            return None;
        }
        let vhl = bytes.read_u8().ok()?;
        if (vhl >> 4) != 4 {
            return None;
        }
        let ihl = (vhl & 0x0f) as usize;
        let tos = bytes.read_u8().ok()?;
        // total length, ident, flags and fragment offset
        bytes.consume(6);
        let ttl = bytes.read_u8().ok()?;
        let proto = bytes.read_u8().ok()?;
        bytes.consume(2);
        let src = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        let dst = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        let options_len = (ihl * 4).checked_sub(size_of::<IpNet>())?;
        if remaining(bytes) < options_len {
            return None;
        }
        bytes.consume(options_len);
        let tp = match proto {
            t if t == (IpProto::IpTCP as u8) => Tcp::parse(bytes).map_or(Tp::Unparsable(proto), Tp::Tcp),
            t if t == (IpProto::IpUDP as u8) => Udp::parse(bytes).map_or(Tp::Unparsable(proto), Tp::Udp),
            _ => Tp::Unparsable(proto),
        };
        Some(Ip {
            tos,
            ttl,
            proto,
            src,
            dst,
            tp,
        })
    }
}

/// Address resolution protocol (ARP) packet payload.
pub enum Arp {
    Query(MacAddr, Ipv4Addr, Ipv4Addr),
    Reply(MacAddr, Ipv4Addr, MacAddr, Ipv4Addr),
}

#[repr(packed)]
struct ArpNet(u16, u16, u8, u8, u16, [u8; 6], u32, [u8; 6], u32);

impl Arp {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Option<Arp> {
        if remaining(bytes) < size_of::<ArpNet>() {
            return None;
        }
        bytes.consume(6);
        let oper = bytes.read_u16::<BigEndian>().ok()?;
        let sha = read_mac(bytes).ok()?;
        let spa = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        let tha = read_mac(bytes).ok()?;
        let tpa = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        match oper {
            0x0001 => Some(Arp::Query(sha, spa, tpa)),
            0x0002 => Some(Arp::Reply(sha, spa, tha, tpa)),
            _ => None,
        }
    }
}

/// Represents a packet at the network protocol level.
pub enum Nw {
    Ip(Ip),
    Arp(Arp),
    Unparsable(u16),
}

/// Represents a packet at the ethernet protocol level.
pub struct Packet {
    pub dl_src: MacAddr,
    pub dl_dst: MacAddr,
    pub dl_vlan: Option<u16>,
    pub dl_typ: u16,
    pub nw: Nw,
}

/// Ethernet types the controller looks at.
#[repr(u16)]
pub enum EthTyp {
    EthTypIP = 0x0800,
    EthTypARP = 0x0806,
    EthTypVLAN = 0x8100,
}

const ETH_HEADER_LEN: usize = 14;

impl Packet {
    /// Decode an Ethernet frame. Fails only when the Ethernet header itself is
    /// missing; anything deeper that does not decode is kept as `Unparsable`.
    pub fn parse(buf: &[u8]) -> Result<Packet> {
        ensure_len("ethernet frame", buf, ETH_HEADER_LEN)?;
        let mut bytes = Cursor::new(buf);
        let dst = read_mac(&mut bytes)?;
        let src = read_mac(&mut bytes)?;
        let typ = bytes.read_u16::<BigEndian>()?;
        let (tag, typ) = if typ == EthTyp::EthTypVLAN as u16 {
            ensure_len("802.1Q tag", buf, ETH_HEADER_LEN + 4)?;
            let tag_and_pcp = bytes.read_u16::<BigEndian>()?;
            let typ = bytes.read_u16::<BigEndian>()?;
            (Some(tag_and_pcp & 0xfff), typ)
        } else {
            (None, typ)
        };
        let nw = match typ {
            t if t == (EthTyp::EthTypIP as u16) => Ip::parse(&mut bytes).map_or(Nw::Unparsable(typ), Nw::Ip),
            t if t == (EthTyp::EthTypARP as u16) => Arp::parse(&mut bytes).map_or(Nw::Unparsable(typ), Nw::Arp),
            _ => Nw::Unparsable(typ),
        };
        Ok(Packet {
            dl_src: src,
            dl_dst: dst,
            dl_vlan: tag,
            dl_typ: typ,
            nw,
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} > {}", self.dl_src, self.dl_dst)?;
        if let Some(vlan) = self.dl_vlan {
            write!(f, " vlan {}", vlan)?;
        }
        match self.nw {
            Nw::Arp(Arp::Query(_, spa, tpa)) => write!(f, " arp who-has {} tell {}", tpa, spa),
            Nw::Arp(Arp::Reply(_, spa, _, _)) => write!(f, " arp reply {}", spa),
            Nw::Ip(ref ip) => match ip.tp {
                Tp::Tcp(ref tcp) => write!(f, " tcp {}:{} > {}:{}", ip.src, tcp.src, ip.dst, tcp.dst),
                Tp::Udp(ref udp) => write!(f, " udp {}:{} > {}:{}", ip.src, udp.src, ip.dst, udp.dst),
                Tp::Unparsable(proto) => write!(f, " ip proto {} {} > {}", proto, ip.src, ip.dst),
            },
            Nw::Unparsable(typ) => write!(f, " ethertype {:#06x}", typ),
        }
    }
}

fn remaining(bytes: &Cursor<&[u8]>) -> usize {
    let len = bytes.get_ref().len() as u64;
    len.saturating_sub(bytes.position()) as usize
}

fn read_mac(bytes: &mut Cursor<&[u8]>) -> Result<MacAddr> {
    let mut mac = [0u8; 6];
    bytes.read_exact(&mut mac).map_err(|_| Error::Malformed("ethernet address"))?;
    Ok(MacAddr(mac))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn mac(last: u8) -> MacAddr {
        MacAddr([0, 0, 0, 0, 0, last])
    }

    fn eth(dst: MacAddr, src: MacAddr, typ: u16) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&dst.0);
        v.extend_from_slice(&src.0);
        v.extend_from_slice(&typ.to_be_bytes());
        v
    }

    /// An ARP who-has frame.
    pub fn arp_frame(src: MacAddr, dst: MacAddr) -> Vec<u8> {
        let mut v = eth(dst, src, 0x0806);
        v.extend_from_slice(&[0, 1, 0x08, 0, 6, 4, 0, 1]);
        v.extend_from_slice(&src.0);
        v.extend_from_slice(&[10, 0, 0, 1]);
        v.extend_from_slice(&[0; 6]);
        v.extend_from_slice(&[10, 0, 0, 3]);
        v
    }

    /// An IPv4 frame carrying `proto`, with a 20-byte transport stub whose
    /// first four bytes are the source and destination ports.
    pub fn ipv4_frame(src: MacAddr, dst: MacAddr, proto: u8, dst_port: u16) -> Vec<u8> {
        let mut v = eth(dst, src, 0x0800);
        v.extend_from_slice(&[0x45, 0, 0, 40, 0, 1, 0x40, 0, 64, proto, 0, 0]);
        v.extend_from_slice(&[10, 0, 0, 1]);
        v.extend_from_slice(&[10, 0, 0, 3]);
        v.extend_from_slice(&40000u16.to_be_bytes());
        v.extend_from_slice(&dst_port.to_be_bytes());
        v.extend_from_slice(&[0; 16]);
        v
    }

    pub fn tcp_frame(src: MacAddr, dst: MacAddr, dst_port: u16) -> Vec<u8> {
        ipv4_frame(src, dst, IpProto::IpTCP as u8, dst_port)
    }

    /// `frame` with an 802.1Q tag for `vid` inserted after the MAC addresses.
    pub fn vlan_tagged(frame: &[u8], vid: u16) -> Vec<u8> {
        let mut tagged = frame[..12].to_vec();
        tagged.extend_from_slice(&(EthTyp::EthTypVLAN as u16).to_be_bytes());
        tagged.extend_from_slice(&vid.to_be_bytes());
        tagged.extend_from_slice(&frame[12..]);
        tagged
    }

    #[test]
    fn mac_text_forms() {
        let m: MacAddr = "00:00:00:00:00:0a".parse().unwrap();
        assert_eq!(m, mac(10));
        assert_eq!("00-00-00-00-00-0A".parse::<MacAddr>().unwrap(), mac(10));
        assert_eq!(m.to_string(), "00:00:00:00:00:0a");
        assert!("00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("00:00:00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("00:00:00:00:00:zz".parse::<MacAddr>().is_err());
        assert!("ff:ff:ff:ff:ff:ff".parse::<MacAddr>().unwrap().is_broadcast());
    }

    #[test]
    fn parses_tcp_over_ipv4() {
        let pkt = Packet::parse(&tcp_frame(mac(1), mac(3), 40)).unwrap();
        assert_eq!(pkt.dl_src, mac(1));
        assert_eq!(pkt.dl_dst, mac(3));
        match pkt.nw {
            Nw::Ip(Ip { tp: Tp::Tcp(ref tcp), proto, .. }) => {
                assert_eq!(proto, 6);
                assert_eq!(tcp.src, 40000);
                assert_eq!(tcp.dst, 40);
            }
            _ => panic!("expected tcp"),
        }
        assert_eq!(pkt.to_string(), "00:00:00:00:00:01 > 00:00:00:00:00:03 tcp 10.0.0.1:40000 > 10.0.0.3:40");
    }

    #[test]
    fn parses_arp_query() {
        let pkt = Packet::parse(&arp_frame(mac(1), MacAddr::BROADCAST)).unwrap();
        assert_eq!(pkt.dl_typ, EthTyp::EthTypARP as u16);
        assert!(matches!(pkt.nw, Nw::Arp(Arp::Query(sha, _, _)) if sha == mac(1)));
    }

    #[test]
    fn looks_through_vlan_tag() {
        let tagged = vlan_tagged(&tcp_frame(mac(1), mac(3), 80), 7);
        let pkt = Packet::parse(&tagged).unwrap();
        assert_eq!(pkt.dl_vlan, Some(7));
        assert_eq!(pkt.dl_typ, 0x0800);
        assert!(matches!(pkt.nw, Nw::Ip(Ip { tp: Tp::Tcp(_), .. })));
    }

    #[test]
    fn truncated_layers_are_unparsable() {
        let frame = tcp_frame(mac(1), mac(3), 40);
        // IPv4 header intact, TCP header cut short
        let pkt = Packet::parse(&frame[..14 + 20 + 6]).unwrap();
        assert!(matches!(pkt.nw, Nw::Ip(Ip { tp: Tp::Unparsable(6), .. })));
        // IPv4 header cut short
        let pkt = Packet::parse(&frame[..20]).unwrap();
        assert!(matches!(pkt.nw, Nw::Unparsable(0x0800)));
        assert!(matches!(Packet::parse(&frame[..10]), Err(Error::Truncated { .. })));
    }
}
