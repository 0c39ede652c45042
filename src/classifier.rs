use crate::packet::{EthTyp, IpProto, MacAddr, Nw, Packet, Tp};

/// The fields of a first packet that flow decisions are made on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classified {
    pub dl_src: MacAddr,
    pub dl_dst: MacAddr,
    /// ARP sent to the broadcast address.
    pub arp_broadcast: bool,
    /// IPv4 carrying TCP.
    pub tcp_ipv4: bool,
    /// TCP destination port. Only set when `tcp_ipv4` is and the TCP header was intact.
    pub tcp_dst: Option<u16>,
}

#[cfg(test)]
impl Classified {
    pub(crate) fn tcp(dl_src: MacAddr, dl_dst: MacAddr, tcp_dst: u16) -> Classified {
        Classified {
            dl_src,
            dl_dst,
            arp_broadcast: false,
            tcp_ipv4: true,
            tcp_dst: Some(tcp_dst),
        }
    }

    pub(crate) fn other(dl_src: MacAddr, dl_dst: MacAddr) -> Classified {
        Classified {
            dl_src,
            dl_dst,
            arp_broadcast: false,
            tcp_ipv4: false,
            tcp_dst: None,
        }
    }

    pub(crate) fn arp_broadcast(dl_src: MacAddr) -> Classified {
        Classified {
            arp_broadcast: true,
            ..Classified::other(dl_src, MacAddr::BROADCAST)
        }
    }
}

/// Reduce a decoded packet to its `Classified` fields.
///
/// ARP is recognized by Ethernet type alone, so an ARP body the parser could not
/// decode still counts.
pub fn classify(pkt: &Packet) -> Classified {
    let arp_broadcast = pkt.dl_typ == EthTyp::EthTypARP as u16 && pkt.dl_dst.is_broadcast();
    let (tcp_ipv4, tcp_dst) = match pkt.nw {
        Nw::Ip(ref ip) if ip.proto == IpProto::IpTCP as u8 => {
            match ip.tp {
                Tp::Tcp(ref tcp) => (true, Some(tcp.dst)),
                _ => (true, None),
            }
        }
        _ => (false, None),
    };
    Classified {
        dl_src: pkt.dl_src,
        dl_dst: pkt.dl_dst,
        arp_broadcast,
        tcp_ipv4,
        tcp_dst,
    }
}
