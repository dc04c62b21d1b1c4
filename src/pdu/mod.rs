/*! EAPOL PDU definitions.

One file per wire structure: the outer EAPOL header, the EAP header it
may carry, and the EAPOL-Key descriptor.  Everything here is read-only
classification; the proxy never rewrites any of these bytes.
*/

mod eap;
mod eapol;
mod key;
mod util;

pub use self::eap::*;
pub use self::eapol::*;
pub use self::key::*;
pub use self::util::PduError;
use self::util::*;

use bytes::Buf;
use std::fmt;

/// A classified EAPOL PDU: the outer header plus whichever inner
/// structure the packet type calls for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EapolPdu {
    pub header: EapolHeader,
    /// Present iff `header.packet_type` is [`EapolType::Eap`].
    pub eap: Option<EapHeader>,
    /// Present iff `header.packet_type` is [`EapolType::Key`] and the
    /// body was long enough to carry a descriptor.
    pub key: Option<KeyDescriptor>,
}

impl EapolPdu {
    /// Parse a PDU starting at the EAPOL version octet (i.e. just past
    /// the 0x888E EtherType).
    pub fn parse(mut pdu: &[u8]) -> Result<EapolPdu, PduError> {
        let header = EapolHeader::parse(&mut pdu)?;
        // The body may be padded out to the Ethernet minimum; trust
        // body_len, not the buffer, for where the body ends.
        let body_len = usize::from(header.body_len).min(pdu.remaining());
        let body = &pdu[..body_len];
        // A lying body only degrades classification and scripting; the
        // frame is proxied either way.
        let eap = match header.packet_type {
            EapolType::Eap => EapHeader::parse(body).ok(),
            _ => None,
        };
        let key = match header.packet_type {
            EapolType::Key => KeyDescriptor::parse(body).ok(),
            _ => None,
        };
        Ok(EapolPdu { header, eap, key })
    }
}

impl fmt::Display for EapolPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header.packet_type.description())?;
        if let Some(eap) = self.eap {
            write!(f, " {} (id {})", eap.code.description(), eap.id)?;
            if let Some(method) = eap.method {
                write!(f, " {}", method_description(method))?;
            }
        }
        if let Some(key) = self.key {
            write!(f, " {} descriptor", key.description())?;
        }
        Ok(())
    }
}
