use crate::pdu::util::*;
use bytes::Buf;

/// The one-byte Packet Type of the EAPOL header.
///
/// Values 0..=8 are standardised by IEEE 802.1X-2010 §11.3.2.  Unknown
/// values are carried so that unrecognised frames can still be proxied.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EapolType {
    /// The body is an EAP packet.
    Eap,
    /// Supplicant wants to authenticate; no body.
    Start,
    /// Supplicant is done; no body.
    Logoff,
    /// The body is a key descriptor.
    Key,
    /// Encapsulated ASF alert.
    EncapsulatedAsfAlert,
    /// MACsec Key Agreement.
    Mka,
    /// Generic announcement.
    AnnouncementGeneric,
    /// Specific announcement.
    AnnouncementSpecific,
    /// Announcement request.
    AnnouncementReq,
    /// A packet type we didn't recognise.
    Unknown(u8),
}

/// How many standardised packet types there are; sizes the policy tables.
pub const EAPOL_TYPE_COUNT: usize = 9;

impl EapolType {
    pub fn from_u8(i: u8) -> EapolType {
        match i {
            0 => EapolType::Eap,
            1 => EapolType::Start,
            2 => EapolType::Logoff,
            3 => EapolType::Key,
            4 => EapolType::EncapsulatedAsfAlert,
            5 => EapolType::Mka,
            6 => EapolType::AnnouncementGeneric,
            7 => EapolType::AnnouncementSpecific,
            8 => EapolType::AnnouncementReq,
            x => EapolType::Unknown(x),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            EapolType::Eap => 0,
            EapolType::Start => 1,
            EapolType::Logoff => 2,
            EapolType::Key => 3,
            EapolType::EncapsulatedAsfAlert => 4,
            EapolType::Mka => 5,
            EapolType::AnnouncementGeneric => 6,
            EapolType::AnnouncementSpecific => 7,
            EapolType::AnnouncementReq => 8,
            EapolType::Unknown(x) => x,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            EapolType::Eap => "EAP-Packet",
            EapolType::Start => "EAPOL-Start",
            EapolType::Logoff => "EAPOL-Logoff",
            EapolType::Key => "EAPOL-Key",
            EapolType::EncapsulatedAsfAlert => "EAPOL-Encapsulated-ASF-Alert",
            EapolType::Mka => "EAPOL-MKA",
            EapolType::AnnouncementGeneric => "EAPOL-Announcement (Generic)",
            EapolType::AnnouncementSpecific => "EAPOL-Announcement (Specific)",
            EapolType::AnnouncementReq => "EAPOL-Announcement-Req",
            EapolType::Unknown(_) => "Unknown",
        }
    }
}

/// The fixed EAPOL header that opens every 0x888E PDU.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EapolHeader {
    /// Protocol version.  1 (802.1X-2001), 2 (-2004) and 3 (-2010) are
    /// all seen in the wild; the proxy does not care.
    pub version: u8,
    pub packet_type: EapolType,
    /// Length of the body in octets, excluding this header.
    pub body_len: u16,
}

impl FromBytes for EapolHeader {
    fn parse<T: Buf>(mut buf: T) -> Result<EapolHeader, PduError> {
        ensure_remaining!(buf, 4);
        let version = buf.get_u8();
        let packet_type = EapolType::from_u8(buf.get_u8());
        let body_len = buf.get_u16();
        Ok(EapolHeader {
            version,
            packet_type,
            body_len,
        })
    }
}
