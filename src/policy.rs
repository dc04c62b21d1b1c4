/*! Per-interface policy: filters, script actions, 802.1Q rewrite. */

use crate::buffer::VLAN_HLEN;
use crate::packet::{Pkt, Tci};
use crate::pdu::{EapCode, EapolType, EAPOL_TYPE_COUNT, EAP_CODE_COUNT};
use std::path::{Path, PathBuf};

/// Which classifications to drop, as two bitsets indexed by the wire
/// values: one by EAPOL packet type, one by EAP code.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct FilterMask {
    types: u16,
    codes: u8,
}

impl FilterMask {
    /// Drop the given EAPOL packet type.
    pub fn add_type(&mut self, ty: EapolType) {
        self.types |= 1 << ty.as_u8();
    }

    /// Drop every standardised EAPOL packet type (the `all` token).
    pub fn add_all_types(&mut self) {
        self.types |= (1 << EAPOL_TYPE_COUNT) - 1;
    }

    /// Drop EAP-Packets carrying the given code.
    pub fn add_code(&mut self, code: EapCode) {
        self.codes |= 1 << code.as_u8();
    }

    pub fn is_empty(&self) -> bool {
        self.types == 0 && self.codes == 0
    }

    /// Drop iff the type bit is set, or the frame is an EAP-Packet and
    /// its code bit is set.  Types outside the standardised range have
    /// no bit and are never dropped.
    pub fn drops(&self, ty: EapolType, code: Option<EapCode>) -> bool {
        let ty_idx = ty.as_u8();
        if usize::from(ty_idx) < EAPOL_TYPE_COUNT && self.types & 1 << ty_idx != 0 {
            return true;
        }
        if ty == EapolType::Eap {
            if let Some(code) = code {
                let code_idx = code.as_u8();
                if usize::from(code_idx) < EAP_CODE_COUNT && self.codes & 1 << code_idx != 0 {
                    return true;
                }
            }
        }
        false
    }
}

/// Scripts to run per classification.  The type entry wins over the
/// code entry when both match.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct ActionTable {
    by_type: [Option<PathBuf>; EAPOL_TYPE_COUNT],
    by_code: [Option<PathBuf>; EAP_CODE_COUNT],
}

impl ActionTable {
    /// Returns false if an entry for this type was already present.
    pub fn set_type(&mut self, ty: EapolType, script: PathBuf) -> bool {
        let slot = &mut self.by_type[usize::from(ty.as_u8())];
        if slot.is_some() {
            return false;
        }
        *slot = Some(script);
        true
    }

    pub fn set_code(&mut self, code: EapCode, script: PathBuf) -> bool {
        let slot = &mut self.by_code[usize::from(code.as_u8())];
        if slot.is_some() {
            return false;
        }
        *slot = Some(script);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.iter().all(Option::is_none) && self.by_code.iter().all(Option::is_none)
    }

    pub fn scripts(&self) -> impl Iterator<Item = &Path> {
        self.by_type
            .iter()
            .chain(self.by_code.iter())
            .filter_map(|s| s.as_deref())
    }

    pub fn select(&self, ty: EapolType, code: Option<EapCode>) -> Option<&Path> {
        let ty_idx = usize::from(ty.as_u8());
        if ty_idx < EAPOL_TYPE_COUNT {
            if let Some(script) = &self.by_type[ty_idx] {
                return Some(script);
            }
        }
        if ty == EapolType::Eap {
            if let Some(code) = code {
                let code_idx = usize::from(code.as_u8());
                if code_idx < EAP_CODE_COUNT {
                    return self.by_code[code_idx].as_deref();
                }
            }
        }
        None
    }
}

/// What to do to the 802.1Q tag on one egress interface.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TciDirective {
    /// `no dot1q;`: remove any tag.
    Strip,
    /// `dot1q { ... };`: make sure there is a tag, overriding the
    /// given fields and preserving the rest from the original (zero if
    /// the original was untagged).
    Rewrite {
        pcp: Option<u8>,
        dei: Option<u8>,
        vid: Option<u16>,
    },
}

/// Recompute the packet's current tag and length for one egress
/// interface, always starting from the original view.
pub fn apply_dot1q(pkt: &mut Pkt, directive: Option<&TciDirective>) {
    pkt.vlan = match directive {
        None => pkt.vlan_orig,
        Some(TciDirective::Strip) => None,
        Some(TciDirective::Rewrite { pcp, dei, vid }) => {
            let base = pkt.vlan_orig.unwrap_or_default();
            Some(Tci {
                pcp: pcp.unwrap_or(base.pcp),
                dei: dei.unwrap_or(base.dei),
                vid: vid.unwrap_or(base.vid),
            })
        }
    };
    pkt.len = match (pkt.vlan_orig.is_some(), pkt.vlan.is_some()) {
        (false, true) => pkt.orig_len + VLAN_HLEN,
        (true, false) => pkt.orig_len - VLAN_HLEN,
        _ => pkt.orig_len,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::EapolType;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn pkt(vlan: Option<Tci>) -> Pkt {
        let orig_len = 18 + vlan.map_or(0, |_| VLAN_HLEN);
        Pkt {
            timestamp: Duration::ZERO,
            ingress: 0,
            current: 1,
            len: orig_len,
            orig_len,
            dst: [0; 6],
            src: [0; 6],
            vlan,
            vlan_orig: vlan,
            eapol_type: EapolType::Start,
            eap: None,
        }
    }

    #[test]
    fn no_directive_preserves() {
        let tci = Tci {
            pcp: 3,
            dei: 0,
            vid: 100,
        };
        let mut p = pkt(Some(tci));
        apply_dot1q(&mut p, None);
        assert_eq!(p.vlan, Some(tci));
        assert_eq!(p.len, p.orig_len);
    }

    #[test]
    fn strip_is_idempotent() {
        let mut tagged = pkt(Some(Tci {
            pcp: 3,
            dei: 0,
            vid: 100,
        }));
        apply_dot1q(&mut tagged, Some(&TciDirective::Strip));
        assert_eq!(tagged.vlan, None);
        assert_eq!(tagged.len, tagged.orig_len - VLAN_HLEN);

        let mut untagged = pkt(None);
        apply_dot1q(&mut untagged, Some(&TciDirective::Strip));
        assert_eq!(untagged.vlan, None);
        assert_eq!(untagged.len, untagged.orig_len);
    }

    #[test]
    fn rewrite_overrides_pointwise() {
        let directive = TciDirective::Rewrite {
            pcp: Some(7),
            dei: None,
            vid: None,
        };
        // Tagged input: untouched fields come from the original tag.
        let mut p = pkt(Some(Tci {
            pcp: 3,
            dei: 0,
            vid: 100,
        }));
        apply_dot1q(&mut p, Some(&directive));
        assert_eq!(
            p.vlan,
            Some(Tci {
                pcp: 7,
                dei: 0,
                vid: 100
            })
        );
        assert_eq!(p.len, p.orig_len);

        // Untagged input: untouched fields default to zero.
        let mut p = pkt(None);
        apply_dot1q(&mut p, Some(&directive));
        assert_eq!(
            p.vlan,
            Some(Tci {
                pcp: 7,
                dei: 0,
                vid: 0
            })
        );
        assert_eq!(p.len, p.orig_len + VLAN_HLEN);
    }

    #[test]
    fn rewrite_is_recomputed_from_originals() {
        // Two egress interfaces with different directives must not see
        // each other's mutations; each starts from the original view.
        let tci = Tci {
            pcp: 3,
            dei: 0,
            vid: 100,
        };
        let pristine = pkt(Some(tci));

        let mut first = pristine;
        apply_dot1q(&mut first, Some(&TciDirective::Strip));
        assert_eq!(first.vlan, None);

        let mut second = pristine;
        apply_dot1q(
            &mut second,
            Some(&TciDirective::Rewrite {
                pcp: None,
                dei: None,
                vid: Some(42),
            }),
        );
        assert_eq!(
            second.vlan,
            Some(Tci {
                pcp: 3,
                dei: 0,
                vid: 42
            })
        );
    }

    #[test]
    fn filter_by_type_and_code() {
        let mut mask = FilterMask::default();
        mask.add_type(EapolType::Logoff);
        mask.add_code(EapCode::Failure);
        assert!(mask.drops(EapolType::Logoff, None));
        assert!(!mask.drops(EapolType::Start, None));
        assert!(mask.drops(EapolType::Eap, Some(EapCode::Failure)));
        assert!(!mask.drops(EapolType::Eap, Some(EapCode::Success)));
        // Code bits only apply to EAP-Packets.
        assert!(!mask.drops(EapolType::Key, Some(EapCode::Failure)));
    }

    #[test]
    fn filter_all_types() {
        let mut mask = FilterMask::default();
        mask.add_all_types();
        for ty in 0..9 {
            assert!(mask.drops(EapolType::from_u8(ty), None));
        }
        // `all` covers the standardised types, not arbitrary ones.
        assert!(!mask.drops(EapolType::Unknown(0x77), None));
    }

    #[test]
    fn action_priority_type_over_code() {
        let mut table = ActionTable::default();
        assert!(table.set_type(EapolType::Eap, PathBuf::from("/opt/by-type.sh")));
        assert!(table.set_code(EapCode::Success, PathBuf::from("/opt/by-code.sh")));
        assert_eq!(
            table.select(EapolType::Eap, Some(EapCode::Success)),
            Some(Path::new("/opt/by-type.sh"))
        );
    }

    #[test]
    fn action_falls_back_to_code() {
        let mut table = ActionTable::default();
        assert!(table.set_code(EapCode::Success, PathBuf::from("/opt/s.sh")));
        assert_eq!(
            table.select(EapolType::Eap, Some(EapCode::Success)),
            Some(Path::new("/opt/s.sh"))
        );
        assert_eq!(table.select(EapolType::Eap, Some(EapCode::Failure)), None);
        // Codes never select for non-EAP types.
        assert_eq!(table.select(EapolType::Start, Some(EapCode::Success)), None);
    }

    #[test]
    fn action_rejects_duplicates() {
        let mut table = ActionTable::default();
        assert!(table.set_type(EapolType::Start, PathBuf::from("/a")));
        assert!(!table.set_type(EapolType::Start, PathBuf::from("/b")));
    }
}
