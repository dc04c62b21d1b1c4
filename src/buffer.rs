use crate::packet::Pkt;
use byteorder::{BigEndian, ByteOrder};

pub const ETH_ALEN: usize = 6;
/// Minimum Ethernet frame length, excluding the FCS.
pub const ETH_MIN_FRAME: usize = 60;
pub const ETHERTYPE_EAPOL: u16 = 0x888e;
pub const TPID_8021Q: u16 = 0x8100;
/// Length of an 802.1Q tag (TPID + TCI).
pub const VLAN_HLEN: usize = 4;

/// Offset of the PDU region: 12 bytes of MAC scratch + 4 of tag scratch.
const PDU_OFFSET: usize = 2 * ETH_ALEN + VLAN_HLEN;

/// The one scratch region every frame passes through.
///
/// Layout:
///
/// ```text
/// [0 ..12)   scratch for the reconstructed destination+source MAC
/// [12..16)   scratch for the reconstructed 802.1Q tag
/// [16..18)   EtherType 0x888E, as received
/// [18.. )    EAPOL PDU, as received
/// ```
///
/// The receive path scatter-reads the MAC pair straight into the packet
/// view and the rest of the frame into `[16..)`; the kernel has already
/// stripped any 802.1Q tag by then.  [`frame`](FrameBuf::frame) rebuilds
/// only the first 12 or 16 bytes per egress interface, so the same PDU
/// bytes can be shipped out with different tag decisions and no copying.
pub struct FrameBuf {
    buf: Vec<u8>,
}

impl FrameBuf {
    /// Allocate for the given MTU: room for the Ethernet header, a tag,
    /// and a full-sized payload.  Sized once per session, for the
    /// largest MTU in the table.
    pub fn new(max_mtu: usize) -> FrameBuf {
        FrameBuf {
            buf: vec![0; PDU_OFFSET + 2 + max_mtu],
        }
    }

    /// The region the receive scatter-vector fills: EtherType + payload.
    pub fn pdu_mut(&mut self) -> &mut [u8] {
        &mut self.buf[PDU_OFFSET..]
    }

    /// The EAPOL PDU as received, starting at the version octet.
    pub fn pdu(&self) -> &[u8] {
        &self.buf[PDU_OFFSET + 2..]
    }

    /// Rebuild the frame prefix from the packet view and return the
    /// complete wire image, ready for a single send.
    ///
    /// With `use_original` the original addresses-and-tag view is
    /// rebuilt instead of the current one; the PDU bytes are the same
    /// either way.
    pub fn frame(&mut self, pkt: &Pkt, use_original: bool) -> &[u8] {
        let (len, vlan) = if use_original {
            (pkt.orig_len, pkt.vlan_orig)
        } else {
            (pkt.len, pkt.vlan)
        };
        // An untagged frame starts 4 bytes in, leaving the tag scratch
        // unused; a tagged one uses the whole prefix.
        let start = match vlan {
            Some(_) => 0,
            None => VLAN_HLEN,
        };
        self.buf[start..start + ETH_ALEN].copy_from_slice(&pkt.dst);
        self.buf[start + ETH_ALEN..start + 2 * ETH_ALEN].copy_from_slice(&pkt.src);
        if let Some(tci) = vlan {
            BigEndian::write_u16(&mut self.buf[12..14], TPID_8021Q);
            BigEndian::write_u16(&mut self.buf[14..16], tci.to_u16());
        }
        &self.buf[start..start + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Tci;
    use crate::pdu::EapolType;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const DST: [u8; 6] = [0x01, 0x80, 0xc2, 0x00, 0x00, 0x03];
    const SRC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

    /// Simulate the receive path: PDU bytes land at offset 16, the MACs
    /// and any tag only exist in the view.
    fn receive(buf: &mut FrameBuf, body: &[u8], vlan: Option<Tci>) -> Pkt {
        let pdu = buf.pdu_mut();
        BigEndian::write_u16(&mut pdu[0..2], ETHERTYPE_EAPOL);
        pdu[2..2 + body.len()].copy_from_slice(body);
        let len = 2 * ETH_ALEN + 2 + body.len() + vlan.map_or(0, |_| VLAN_HLEN);
        Pkt {
            timestamp: Duration::ZERO,
            ingress: 0,
            current: 0,
            len,
            orig_len: len,
            dst: DST,
            src: SRC,
            vlan,
            vlan_orig: vlan,
            eapol_type: EapolType::Start,
            eap: None,
        }
    }

    #[test]
    fn untagged_round_trip() {
        let mut buf = FrameBuf::new(1500);
        let pkt = receive(&mut buf, &[0x02, 0x01, 0x00, 0x00], None);
        let frame = buf.frame(&pkt, false);
        let mut expect = Vec::new();
        expect.extend_from_slice(&DST);
        expect.extend_from_slice(&SRC);
        expect.extend_from_slice(&[0x88, 0x8e, 0x02, 0x01, 0x00, 0x00]);
        assert_eq!(frame, &expect[..]);
        assert_eq!(frame.len(), 18);
    }

    #[test]
    fn tag_injection() {
        let mut buf = FrameBuf::new(1500);
        let mut pkt = receive(&mut buf, &[0x02, 0x01, 0x00, 0x00], None);
        pkt.vlan = Some(Tci {
            pcp: 5,
            dei: 0,
            vid: 10,
        });
        pkt.len += VLAN_HLEN;
        let frame = buf.frame(&pkt, false);
        let mut expect = Vec::new();
        expect.extend_from_slice(&DST);
        expect.extend_from_slice(&SRC);
        expect.extend_from_slice(&[0x81, 0x00, 0xa0, 0x0a]);
        expect.extend_from_slice(&[0x88, 0x8e, 0x02, 0x01, 0x00, 0x00]);
        assert_eq!(frame, &expect[..]);
        assert_eq!(frame.len(), 22);
    }

    #[test]
    fn tag_preserved() {
        let tci = Tci {
            pcp: 3,
            dei: 0,
            vid: 100,
        };
        let mut buf = FrameBuf::new(1500);
        let pkt = receive(&mut buf, &[0x01, 0x02, 0x00, 0x00], Some(tci));
        let frame = buf.frame(&pkt, false);
        assert_eq!(&frame[12..16], &[0x81, 0x00, 0x60, 0x64]);
        assert_eq!(frame.len(), 22);
    }

    #[test]
    fn original_view_survives_rewrite() {
        let tci = Tci {
            pcp: 3,
            dei: 0,
            vid: 100,
        };
        let mut buf = FrameBuf::new(1500);
        let mut pkt = receive(&mut buf, &[0x02, 0x02, 0x00, 0x00], Some(tci));
        // Strip the tag for this egress interface...
        pkt.vlan = None;
        pkt.len -= VLAN_HLEN;
        let current_len = buf.frame(&pkt, false).len();
        assert_eq!(current_len, 18);
        // ...and the original image still reconstructs, tag included.
        let orig = buf.frame(&pkt, true);
        assert_eq!(orig.len(), 22);
        assert_eq!(&orig[12..16], &[0x81, 0x00, 0x60, 0x64]);
    }

    #[test]
    fn same_pdu_multiple_egress_decisions() {
        let mut buf = FrameBuf::new(1500);
        let pristine = receive(&mut buf, &[0x02, 0x01, 0x00, 0x00], None);
        let mut tagged = pristine;
        tagged.vlan = Some(Tci {
            pcp: 7,
            dei: 1,
            vid: 4094,
        });
        tagged.len += VLAN_HLEN;
        assert_eq!(buf.frame(&tagged, false).len(), 22);
        // The untagged decision on the next interface is unaffected.
        let frame = buf.frame(&pristine, false);
        assert_eq!(frame.len(), 18);
        assert_eq!(&frame[12..14], &[0x88, 0x8e]);
    }
}
