use crate::pdu::{EapCode, EapolType};
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Tag Control Information: the last 16 bits of an 802.1Q tag.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Tci {
    /// Priority Code Point, 0..=7.
    pub pcp: u8,
    /// Drop Eligible Indicator, 0 or 1.
    pub dei: u8,
    /// VLAN Identifier, 0..=4094.
    pub vid: u16,
}

impl Tci {
    pub fn from_u16(raw: u16) -> Tci {
        Tci {
            pcp: (raw >> 13) as u8,
            dei: (raw >> 12 & 1) as u8,
            vid: raw & 0x0fff,
        }
    }

    pub fn to_u16(self) -> u16 {
        u16::from(self.pcp) << 13 | u16::from(self.dei) << 12 | self.vid & 0x0fff
    }
}

/// The EAP fields we hang on to when the packet type is EAP-Packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EapInfo {
    pub code: EapCode,
    pub id: u8,
    /// Method Type; only present for Request/Response.
    pub method: Option<u8>,
}

/// One received frame, as seen by the policy and egress stages.
///
/// The `orig_*` fields are frozen at receive time.  The current fields
/// start out equal to them and are mutated by the per-egress 802.1Q
/// rewrite, always on a by-value copy of the record, so the pristine
/// view survives for the next egress interface.  The frame bytes
/// themselves live in the [`FrameBuf`](crate::buffer::FrameBuf); a `Pkt`
/// only carries the header fields needed to rebuild the prefix.
#[derive(Clone, Copy, Debug)]
pub struct Pkt {
    /// Receive time, from `SIOCGSTAMP` or the wall clock.
    pub timestamp: Duration,
    /// Position of the ingress interface in the table.
    pub ingress: usize,
    /// Position of the interface currently being considered.
    pub current: usize,
    /// Logical frame length, including a tag if `vlan` is set.
    pub len: usize,
    pub orig_len: usize,
    pub dst: [u8; 6],
    pub src: [u8; 6],
    /// The current 802.1Q tag, if any.
    pub vlan: Option<Tci>,
    /// The tag the frame arrived with, if any.
    pub vlan_orig: Option<Tci>,
    pub eapol_type: EapolType,
    /// Only valid when `eapol_type` is EAP-Packet.
    pub eap: Option<EapInfo>,
}

/// Render a MAC address the way `ip link` does.
pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

impl Display for Pkt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}.{:06}] {} > {}, {} bytes, {}",
            self.timestamp.as_secs(),
            self.timestamp.subsec_micros(),
            format_mac(&self.src),
            format_mac(&self.dst),
            self.len,
            self.eapol_type.description(),
        )?;
        if let Some(eap) = self.eap {
            write!(f, " {} (id {})", eap.code.description(), eap.id)?;
        }
        if let Some(tci) = self.vlan {
            write!(f, ", tagged {:#06x}", tci.to_u16())?;
        }
        Ok(())
    }
}
