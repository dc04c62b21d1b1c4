use crate::config::ConfigError;
use std::io;
use std::result;
use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

/// Everything that can go wrong while proxying.
///
/// The low-level primitives return these without deciding anything; the
/// event loop picks the policy (drop, cooldown, exit) in exactly one
/// place.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no such interface: {0}")]
    NoSuchInterface(String),
    #[error("{op} on {iface}: {source}")]
    Sock {
        iface: String,
        op: &'static str,
        source: io::Error,
    },
    /// Shorter than the minimum Ethernet frame; dropped, not fatal.
    #[error("runt frame ({0} bytes)")]
    Runt(usize),
    /// The frame on the wire was longer than the receive buffer.
    #[error("giant frame ({0} bytes)")]
    Giant(usize),
    #[error("sent {sent} of {len} bytes on {iface}")]
    ShortSend {
        iface: String,
        sent: usize,
        len: usize,
    },
    #[error("MAC address change on {0} did not stick")]
    MacReadback(String),
    /// The expected error event after a MAC mutation cycled the link.
    #[error("link cycled on {0} after MAC change")]
    LinkCycled(String),
    #[error("unexpected socket event on {0}")]
    SpuriousEvent(String),
    #[error("another instance is already running as PID {0}")]
    AlreadyRunning(i32),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Runt and giant frames are expected on a live network; everything
    /// else coming out of the receive path means the socket is suspect.
    pub fn is_drop(&self) -> bool {
        matches!(self, Error::Runt(_) | Error::Giant(_))
    }
}
