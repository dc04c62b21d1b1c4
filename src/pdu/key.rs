use crate::pdu::util::*;
use bytes::Buf;

/// The leading fields of an EAPOL-Key descriptor, decoded for the log
/// line only.  The proxy never interprets or modifies key material.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KeyDescriptor {
    pub descriptor_type: u8,
    /// Key Information, present in the IEEE 802.11 descriptor.
    pub key_info: Option<u16>,
    pub key_len: Option<u16>,
}

impl KeyDescriptor {
    pub fn description(&self) -> &'static str {
        match self.descriptor_type {
            1 => "RC4",
            2 => "IEEE 802.11",
            x if x >= 128 => "Vendor-specific",
            _ => "Unknown",
        }
    }
}

impl FromBytes for KeyDescriptor {
    fn parse<T: Buf>(mut buf: T) -> Result<KeyDescriptor, PduError> {
        ensure_remaining!(buf, 1);
        let descriptor_type = buf.get_u8();
        let (key_info, key_len) = if descriptor_type == 2 && buf.remaining() >= 4 {
            (Some(buf.get_u16()), Some(buf.get_u16()))
        } else {
            (None, None)
        };
        Ok(KeyDescriptor {
            descriptor_type,
            key_info,
            key_len,
        })
    }
}
