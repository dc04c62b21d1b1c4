use crate::pdu::util::*;
use bytes::Buf;

/// The one-byte Code of an EAP packet (RFC 3748 §4).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EapCode {
    Request,
    Response,
    Success,
    Failure,
    /// A code we didn't recognise.
    Unknown(u8),
}

/// Codes run 1..=4; index 0 of the policy tables stays unused.
pub const EAP_CODE_COUNT: usize = 5;

impl EapCode {
    pub fn from_u8(i: u8) -> EapCode {
        match i {
            1 => EapCode::Request,
            2 => EapCode::Response,
            3 => EapCode::Success,
            4 => EapCode::Failure,
            x => EapCode::Unknown(x),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            EapCode::Request => 1,
            EapCode::Response => 2,
            EapCode::Success => 3,
            EapCode::Failure => 4,
            EapCode::Unknown(x) => x,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            EapCode::Request => "Request",
            EapCode::Response => "Response",
            EapCode::Success => "Success",
            EapCode::Failure => "Failure",
            EapCode::Unknown(_) => "Unknown",
        }
    }
}

/// Text name for an EAP Request/Response Type (the IANA method registry).
pub fn method_description(ty: u8) -> &'static str {
    match ty {
        1 => "Identity",
        2 => "Notification",
        3 => "Legacy Nak",
        4 => "MD5-Challenge",
        5 => "One-Time Password",
        6 => "Generic Token Card",
        13 => "EAP-TLS",
        18 => "EAP-SIM",
        21 => "EAP-TTLS",
        23 => "EAP-AKA",
        25 => "PEAP",
        26 => "EAP-MSCHAP-V2",
        43 => "EAP-FAST",
        52 => "EAP-PWD",
        254 => "Expanded Types",
        255 => "Experimental",
        _ => "Unknown",
    }
}

/// The EAP header carried in the body of an EAPOL EAP-Packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EapHeader {
    pub code: EapCode,
    /// Matches responses to requests.
    pub id: u8,
    /// Length of the whole EAP packet including this header.
    pub length: u16,
    /// The method Type; only present for Request and Response.
    pub method: Option<u8>,
}

impl FromBytes for EapHeader {
    fn parse<T: Buf>(mut buf: T) -> Result<EapHeader, PduError> {
        ensure_remaining!(buf, 4);
        let code = EapCode::from_u8(buf.get_u8());
        let id = buf.get_u8();
        let length = buf.get_u16();
        let method = match code {
            EapCode::Request | EapCode::Response => {
                ensure_remaining!(buf, 1);
                Some(buf.get_u8())
            }
            _ => None,
        };
        Ok(EapHeader {
            code,
            id,
            length,
            method,
        })
    }
}
