use bytes::Buf;
use thiserror::Error;

pub(crate) trait FromBytes: Sized {
    fn parse<T: Buf>(buf: T) -> Result<Self, PduError>;
}

/// The PDU is corrupt.  The frame is still proxied; only classification
/// and scripting degrade.
#[derive(Debug, Error)]
pub enum PduError {
    #[error("not enough bytes")]
    Truncated,
}

macro_rules! ensure_remaining {
    ($buf:expr, $len:expr) => {
        if $buf.remaining() < $len {
            return Err(PduError::Truncated);
        }
    };
}
pub(crate) use ensure_remaining;
