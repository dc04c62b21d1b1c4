/*! The table of configured interfaces and their per-session state. */

use crate::config::{EgressConfig, IfaceConfig, IngressConfig};
use crate::sock::RawSock;
use std::fmt;

/// One configured interface.
///
/// `index` and `mtu` are discovered from the kernel when the proxy
/// initialises; the socket is opened then too and closed on any restart.
/// `static_mac` and `learn_mac_from` are oneshot fields, consumed the
/// first time they fire and never again.
pub struct Iface {
    pub name: String,
    /// Kernel interface index; 0 until initialised.
    pub index: u32,
    pub mtu: usize,
    pub sock: Option<RawSock>,
    /// Frames received on this interface this session.
    pub recvd: u64,
    /// Frames sent out of this interface this session.
    pub sent: u64,
    pub ingress: Option<IngressConfig>,
    pub egress: Option<EgressConfig>,
    pub promiscuous: bool,
    /// MAC to assign at startup.
    pub static_mac: Option<[u8; 6]>,
    /// Table position of the interface whose first frame's source MAC
    /// we copy.
    pub learn_mac_from: Option<usize>,
}

impl Iface {
    fn from_config(config: &IfaceConfig) -> Iface {
        Iface {
            name: config.name.clone(),
            index: 0,
            mtu: 0,
            sock: None,
            recvd: 0,
            sent: 0,
            ingress: config.ingress.clone(),
            egress: config.egress.clone(),
            promiscuous: config.promiscuous,
            static_mac: config.set_mac,
            learn_mac_from: config.set_mac_from,
        }
    }
}

impl fmt::Display for Iface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (index {}, MTU {})", self.name, self.index, self.mtu)?;
        if self.promiscuous {
            write!(f, ", promiscuous")?;
        }
        if self.ingress.is_some() {
            write!(f, ", ingress policy")?;
        }
        if self.egress.is_some() {
            write!(f, ", egress policy")?;
        }
        write!(f, ", {} in / {} out", self.recvd, self.sent)
    }
}

/// The ordered interface table.  Owned by the event loop for the length
/// of one proxy session; positions are stable for that whole session.
pub struct IfaceTable {
    ifaces: Vec<Iface>,
}

impl IfaceTable {
    /// The config layer has already validated the invariants (two or
    /// more records, unique names, resolvable learn targets).
    pub fn from_config(configs: &[IfaceConfig]) -> IfaceTable {
        IfaceTable {
            ifaces: configs.iter().map(Iface::from_config).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ifaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ifaces.is_empty()
    }

    pub fn get(&self, pos: usize) -> &Iface {
        &self.ifaces[pos]
    }

    pub fn get_mut(&mut self, pos: usize) -> &mut Iface {
        &mut self.ifaces[pos]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Iface> {
        self.ifaces.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Iface> {
        self.ifaces.iter_mut()
    }

    /// Sizes the frame buffer; valid once every interface has its MTU.
    pub fn max_mtu(&self) -> usize {
        self.ifaces.iter().map(|i| i.mtu).max().unwrap_or(0)
    }

    /// Consume the `learn_mac_from` oneshots that point at `pos`,
    /// returning the positions of the interfaces that should now take
    /// on the learned MAC.  A second call for the same source finds the
    /// fields already cleared and returns nothing.
    pub fn take_learners(&mut self, pos: usize) -> Vec<usize> {
        let mut learners = Vec::new();
        for (i, iface) in self.ifaces.iter_mut().enumerate() {
            if i != pos && iface.learn_mac_from == Some(pos) {
                iface.learn_mac_from = None;
                learners.push(i);
            }
        }
        learners
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use pretty_assertions::assert_eq;

    fn table(text: &str) -> IfaceTable {
        IfaceTable::from_config(&config::parse(text).unwrap())
    }

    #[test]
    fn carries_config_over() {
        let t = table(
            r#"iface a { promiscuous; set-mac "02:00:00:00:00:01"; };
               iface b { set-mac-from a; };"#,
        );
        assert_eq!(t.len(), 2);
        assert!(t.get(0).promiscuous);
        assert_eq!(t.get(0).static_mac, Some([2, 0, 0, 0, 0, 1]));
        assert_eq!(t.get(1).learn_mac_from, Some(0));
        assert_eq!(t.get(0).recvd, 0);
    }

    #[test]
    fn learner_consumption_is_oneshot() {
        let mut t = table("iface a { }; iface b { set-mac-from a; }; iface c { set-mac-from a; };");
        let learners = t.take_learners(0);
        assert_eq!(learners, vec![1, 2]);
        // The oneshot fields are now spent.
        assert_eq!(t.take_learners(0), Vec::<usize>::new());
        assert_eq!(t.get(1).learn_mac_from, None);
    }

    #[test]
    fn learners_of_other_sources_survive() {
        let mut t = table("iface a { }; iface b { set-mac-from c; }; iface c { };");
        assert_eq!(t.take_learners(0), Vec::<usize>::new());
        assert_eq!(t.get(1).learn_mac_from, Some(2));
        assert_eq!(t.take_learners(2), vec![1]);
    }

    #[test]
    fn max_mtu_over_table() {
        let mut t = table("iface a { }; iface b { };");
        t.get_mut(0).mtu = 1500;
        t.get_mut(1).mtu = 9000;
        assert_eq!(t.max_mtu(), 9000);
    }
}
