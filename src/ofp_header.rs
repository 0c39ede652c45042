use std::io::Cursor;
use std::mem::size_of;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ensure_len, Error, Result};
use crate::openflow0x01::MsgCode;

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be properly handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OfpHeader {
    version: u8,
    typ: u8,
    length: u16,
    xid: u32,
}

#[repr(packed)]
struct OfpHeaderNet(u8, u8, u16, u32);

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: u8, length: u16, xid: u32) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader`.
    pub fn size() -> usize {
        size_of::<OfpHeaderNet>()
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal(bytes: &mut Vec<u8>, header: OfpHeader) {
        bytes.write_u8(header.version).unwrap();
        bytes.write_u8(header.typ).unwrap();
        bytes.write_u16::<BigEndian>(header.length).unwrap();
        bytes.write_u32::<BigEndian>(header.xid).unwrap();
    }

    /// Takes a message buffer (at least sized for an `OfpHeader`) and returns an `OfpHeader`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        ensure_len("OpenFlow header", buf, Self::size())?;
        let mut bytes = Cursor::new(buf);
        let header = OfpHeader {
            version: bytes.read_u8()?,
            typ: bytes.read_u8()?,
            length: bytes.read_u16::<BigEndian>()?,
            xid: bytes.read_u32::<BigEndian>()?,
        };
        if header.length() < Self::size() {
            return Err(Error::Malformed("OpenFlow header length"));
        }
        Ok(header)
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the OpenFlow message type code of a header.
    pub fn type_code(&self) -> Result<MsgCode> {
        MsgCode::of_int(self.typ).ok_or(Error::UnknownMessageType(self.typ))
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    /// Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> u32 {
        self.xid
    }
}
