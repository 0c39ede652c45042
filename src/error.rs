use std::io;

use thiserror::Error;

/// Errors raised while talking OpenFlow to a switch or decoding what it sends.
#[derive(Debug, Error)]
pub enum Error {
    #[error("switch connection: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported OpenFlow version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("unknown OpenFlow message type {0}")]
    UnknownMessageType(u8),

    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("malformed {0}")]
    Malformed(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fail with `Error::Truncated` unless `buf` holds at least `need` bytes.
pub(crate) fn ensure_len(what: &'static str, buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        Err(Error::Truncated {
            what,
            need,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}
