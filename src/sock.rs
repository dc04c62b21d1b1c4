/*! Raw link-layer sockets and the ioctls around them.

One [`RawSock`] per configured interface: an `AF_PACKET`/`SOCK_RAW`
socket bound to the interface, with a classic BPF program that drops
everything except EtherType 0x888E in the kernel, auxiliary data enabled
so the stripped 802.1Q tag can be recovered on receive, and either the
three 802.1X group addresses joined or promiscuous membership requested.

The module also owns the `ifreq` ioctls: interface index and MTU
discovery, and MAC reads and writes.  Writing a MAC requires cycling the
interface down and up, which invalidates any socket bound to it; the
event loop knows to expect an error event afterwards.
*/

use crate::buffer::{FrameBuf, ETH_ALEN, ETH_MIN_FRAME, TPID_8021Q, VLAN_HLEN};
use crate::error::{Error, Result};
use crate::packet::Tci;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::*;

/// The group addresses an 802.1X PAE listens on: Bridge, PAE and MRP.
pub const PAE_GROUP_ADDRS: [[u8; 6]; 3] = [
    [0x01, 0x80, 0xc2, 0x00, 0x00, 0x00],
    [0x01, 0x80, 0xc2, 0x00, 0x00, 0x03],
    [0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e],
];

// Not all of these make it into every libc build, and they are fixed by
// the kernel ABI, so they live here.
const PACKET_AUXDATA: libc::c_int = 8;
const PACKET_ADD_MEMBERSHIP: libc::c_int = 1;
const PACKET_MR_MULTICAST: libc::c_ushort = 0;
const PACKET_MR_PROMISC: libc::c_ushort = 1;
const TP_STATUS_VLAN_VALID: u32 = 1 << 4;
const TP_STATUS_VLAN_TPID_VALID: u32 = 1 << 6;
const SIOCGIFINDEX: libc::c_ulong = 0x8933;
const SIOCGIFMTU: libc::c_ulong = 0x8921;
const SIOCGIFFLAGS: libc::c_ulong = 0x8913;
const SIOCSIFFLAGS: libc::c_ulong = 0x8914;
const SIOCGIFHWADDR: libc::c_ulong = 0x8927;
const SIOCSIFHWADDR: libc::c_ulong = 0x8924;
const SIOCGSTAMP: libc::c_ulong = 0x8906;
const ARPHRD_ETHER: libc::sa_family_t = 1;

/// Accept iff the halfword at offset 12 of the post-strip frame is
/// 0x888E.  The kernel runs the filter after removing any 802.1Q tag,
/// so offset 12 is the EtherType whether the frame was tagged or not.
static BPF_EAPOL_ONLY: [libc::sock_filter; 4] = [
    // ldh [12]
    libc::sock_filter {
        code: 0x28,
        jt: 0,
        jf: 0,
        k: 12,
    },
    // jeq #0x888e, accept, drop
    libc::sock_filter {
        code: 0x15,
        jt: 0,
        jf: 1,
        k: 0x888e,
    },
    // accept: ret #262144
    libc::sock_filter {
        code: 0x06,
        jt: 0,
        jf: 0,
        k: 0x0004_0000,
    },
    // drop: ret #0
    libc::sock_filter {
        code: 0x06,
        jt: 0,
        jf: 0,
        k: 0,
    },
];

fn os_err(iface: &str, op: &'static str) -> Error {
    Error::Sock {
        iface: iface.to_owned(),
        op,
        source: io::Error::last_os_error(),
    }
}

/// An `ifreq` as the ioctls below use it.  The libc crate's own
/// rendition of the union is awkward to fill; this one carries just the
/// arms we touch.
#[repr(C)]
union IfReqData {
    index: libc::c_int,
    mtu: libc::c_int,
    flags: libc::c_short,
    addr: libc::sockaddr,
}

#[repr(C)]
struct IfReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    data: IfReqData,
}

impl IfReq {
    fn new(iface: &str) -> Result<IfReq> {
        let bytes = iface.as_bytes();
        if bytes.is_empty() || bytes.len() >= libc::IFNAMSIZ {
            return Err(Error::NoSuchInterface(iface.to_owned()));
        }
        let mut req: IfReq = unsafe { mem::zeroed() };
        for (dst, src) in req.name.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }
        Ok(req)
    }
}

/// The ifreq ioctls work on any socket; a throwaway datagram socket
/// avoids touching the packet sockets mid-session.
fn ctl_socket(iface: &str) -> Result<OwnedFd> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(os_err(iface, "socket"));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn ifreq_ioctl(
    iface: &str,
    op: &'static str,
    request: libc::c_ulong,
    req: &mut IfReq,
) -> Result<()> {
    let sock = ctl_socket(iface)?;
    if unsafe { libc::ioctl(sock.as_raw_fd(), request, req as *mut IfReq) } < 0 {
        let source = io::Error::last_os_error();
        if source.raw_os_error() == Some(libc::ENODEV) {
            return Err(Error::NoSuchInterface(iface.to_owned()));
        }
        return Err(Error::Sock {
            iface: iface.to_owned(),
            op,
            source,
        });
    }
    Ok(())
}

pub fn ifindex(iface: &str) -> Result<u32> {
    let mut req = IfReq::new(iface)?;
    ifreq_ioctl(iface, "SIOCGIFINDEX", SIOCGIFINDEX, &mut req)?;
    Ok(unsafe { req.data.index } as u32)
}

pub fn mtu(iface: &str) -> Result<usize> {
    let mut req = IfReq::new(iface)?;
    ifreq_ioctl(iface, "SIOCGIFMTU", SIOCGIFMTU, &mut req)?;
    Ok(unsafe { req.data.mtu } as usize)
}

pub fn hwaddr(iface: &str) -> Result<[u8; 6]> {
    let mut req = IfReq::new(iface)?;
    ifreq_ioctl(iface, "SIOCGIFHWADDR", SIOCGIFHWADDR, &mut req)?;
    let mut mac = [0u8; 6];
    let sa_data = unsafe { req.data.addr.sa_data };
    for (dst, src) in mac.iter_mut().zip(sa_data.iter()) {
        *dst = *src as u8;
    }
    Ok(mac)
}

/// Assign `mac` to the interface.  Returns false if it already carried
/// that address and nothing was done.
///
/// The kernel refuses `SIOCSIFHWADDR` on a running interface, so the
/// interface is brought down for the write and back up afterwards; that
/// cycle invalidates any packet socket bound to it, and the caller must
/// expect an error event on such a socket.  The address is read back to
/// confirm the driver really took it.
pub fn set_hwaddr(iface: &str, mac: [u8; 6]) -> Result<bool> {
    if hwaddr(iface)? == mac {
        return Ok(false);
    }

    let mut req = IfReq::new(iface)?;
    ifreq_ioctl(iface, "SIOCGIFFLAGS", SIOCGIFFLAGS, &mut req)?;
    let flags = unsafe { req.data.flags };
    let up = libc::IFF_UP as libc::c_short;
    if flags & up != 0 {
        let mut down = IfReq::new(iface)?;
        down.data.flags = flags & !up;
        ifreq_ioctl(iface, "SIOCSIFFLAGS", SIOCSIFFLAGS, &mut down)?;
    }

    let mut set = IfReq::new(iface)?;
    let mut addr: libc::sockaddr = unsafe { mem::zeroed() };
    addr.sa_family = ARPHRD_ETHER;
    for (dst, src) in addr.sa_data.iter_mut().zip(mac.iter()) {
        *dst = *src as libc::c_char;
    }
    set.data.addr = addr;
    let wrote = ifreq_ioctl(iface, "SIOCSIFHWADDR", SIOCSIFHWADDR, &mut set);

    // Bring the interface back up whether or not the write stuck.
    if flags & up != 0 {
        let mut restore = IfReq::new(iface)?;
        restore.data.flags = flags;
        ifreq_ioctl(iface, "SIOCSIFFLAGS", SIOCSIFFLAGS, &mut restore)?;
    }
    wrote?;

    if hwaddr(iface)? != mac {
        return Err(Error::MacReadback(iface.to_owned()));
    }
    Ok(true)
}

/// What one receive produced: the header fields that never make it into
/// the frame buffer, plus the logical length (tag included, if the
/// kernel had stripped one).
pub struct Recvd {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub len: usize,
    pub vlan: Option<Tci>,
    pub timestamp: Duration,
}

pub struct RawSock {
    fd: OwnedFd,
    iface: String,
}

impl AsRawFd for RawSock {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl RawSock {
    pub fn open(iface: &str, index: u32, promiscuous: bool) -> Result<RawSock> {
        let proto = (libc::ETH_P_ALL as u16).to_be() as libc::c_int;
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW | libc::SOCK_CLOEXEC, proto) };
        if fd < 0 {
            return Err(os_err(iface, "socket"));
        }
        let sock = RawSock {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            iface: iface.to_owned(),
        };
        sock.bind(index)?;
        sock.attach_filter()?;
        sock.setsockopt(libc::SOL_PACKET, PACKET_AUXDATA, &1i32, "PACKET_AUXDATA")?;
        if promiscuous {
            sock.add_membership(index, PACKET_MR_PROMISC, None)?;
            debug!("{iface}: promiscuous membership");
        } else {
            for addr in PAE_GROUP_ADDRS {
                sock.add_membership(index, PACKET_MR_MULTICAST, Some(addr))?;
            }
            debug!("{iface}: joined the 802.1X group addresses");
        }
        Ok(sock)
    }

    fn bind(&self, index: u32) -> Result<()> {
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        addr.sll_ifindex = index as libc::c_int;
        let rc = unsafe {
            libc::bind(
                self.fd.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(os_err(&self.iface, "bind"));
        }
        Ok(())
    }

    fn attach_filter(&self) -> Result<()> {
        let prog = libc::sock_fprog {
            len: BPF_EAPOL_ONLY.len() as libc::c_ushort,
            filter: BPF_EAPOL_ONLY.as_ptr() as *mut libc::sock_filter,
        };
        self.setsockopt(
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            &prog,
            "SO_ATTACH_FILTER",
        )
    }

    fn setsockopt<T>(
        &self,
        level: libc::c_int,
        optname: libc::c_int,
        optval: &T,
        op: &'static str,
    ) -> Result<()> {
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                level,
                optname,
                optval as *const T as *const libc::c_void,
                mem::size_of::<T>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(os_err(&self.iface, op));
        }
        Ok(())
    }

    fn add_membership(
        &self,
        index: u32,
        mr_type: libc::c_ushort,
        addr: Option<[u8; 6]>,
    ) -> Result<()> {
        let mut mreq: libc::packet_mreq = unsafe { mem::zeroed() };
        mreq.mr_ifindex = index as libc::c_int;
        mreq.mr_type = mr_type;
        if let Some(addr) = addr {
            mreq.mr_alen = ETH_ALEN as libc::c_ushort;
            mreq.mr_address[..ETH_ALEN].copy_from_slice(&addr);
        }
        self.setsockopt(
            libc::SOL_PACKET,
            PACKET_ADD_MEMBERSHIP,
            &mreq,
            "PACKET_ADD_MEMBERSHIP",
        )
    }

    /// Scatter-read one frame: the MAC pair lands in the result, the
    /// EtherType and PDU land in the buffer at offset 16, and any
    /// stripped 802.1Q tag is recovered from the auxiliary data.
    pub fn recv(&self, buf: &mut FrameBuf) -> Result<Recvd> {
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        let pdu = buf.pdu_mut();
        let mut iov = [
            libc::iovec {
                iov_base: dst.as_mut_ptr() as *mut libc::c_void,
                iov_len: ETH_ALEN,
            },
            libc::iovec {
                iov_base: src.as_mut_ptr() as *mut libc::c_void,
                iov_len: ETH_ALEN,
            },
            libc::iovec {
                iov_base: pdu.as_mut_ptr() as *mut libc::c_void,
                iov_len: pdu.len(),
            },
        ];
        let mut cmsg_buf = [0u8; 64];
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = iov.as_mut_ptr();
        msg.msg_iovlen = iov.len();
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = cmsg_buf.len();

        let n = unsafe { libc::recvmsg(self.fd.as_raw_fd(), &mut msg, 0) };
        if n < 0 {
            return Err(os_err(&self.iface, "recvmsg"));
        }
        let mut len = n as usize;
        if len < ETH_MIN_FRAME {
            return Err(Error::Runt(len));
        }
        let aux = unsafe { auxdata(&msg) };
        if msg.msg_flags & libc::MSG_TRUNC != 0 {
            let wire = aux.map_or(len, |a| a.tp_len as usize);
            return Err(Error::Giant(wire));
        }
        let vlan = aux.as_ref().and_then(decode_vlan);
        if vlan.is_some() {
            // The kernel stripped the tag before counting.
            len += VLAN_HLEN;
        }
        Ok(Recvd {
            dst,
            src,
            len,
            vlan,
            timestamp: self.timestamp(),
        })
    }

    /// One write ships the whole frame, 802.1Q tag included when the
    /// view carries one.  Writing the tag in-band is the only way the
    /// kernel reliably puts it on the wire for a raw frame.
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        let n = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
            )
        };
        if n < 0 {
            return Err(os_err(&self.iface, "send"));
        }
        let sent = n as usize;
        if sent != frame.len() {
            return Err(Error::ShortSend {
                iface: self.iface.clone(),
                sent,
                len: frame.len(),
            });
        }
        Ok(())
    }

    /// Kernel receive timestamp, or the wall clock if the ioctl fails.
    fn timestamp(&self) -> Duration {
        let mut tv: libc::timeval = unsafe { mem::zeroed() };
        let rc = unsafe { libc::ioctl(self.fd.as_raw_fd(), SIOCGSTAMP, &mut tv) };
        if rc == 0 && tv.tv_sec >= 0 {
            Duration::new(tv.tv_sec as u64, tv.tv_usec as u32 * 1000)
        } else {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
        }
    }
}

unsafe fn auxdata(msg: &libc::msghdr) -> Option<libc::tpacket_auxdata> {
    let mut cmsg = libc::CMSG_FIRSTHDR(msg);
    while !cmsg.is_null() {
        if (*cmsg).cmsg_level == libc::SOL_PACKET && (*cmsg).cmsg_type == PACKET_AUXDATA {
            let data = libc::CMSG_DATA(cmsg) as *const libc::tpacket_auxdata;
            return Some(std::ptr::read_unaligned(data));
        }
        cmsg = libc::CMSG_NXTHDR(msg, cmsg);
    }
    None
}

/// The tag is only trusted when the kernel flags it valid and the TPID
/// (where reported) is the 802.1Q one; anything else proxies untagged.
fn decode_vlan(aux: &libc::tpacket_auxdata) -> Option<Tci> {
    if aux.tp_status & TP_STATUS_VLAN_VALID == 0 {
        return None;
    }
    if aux.tp_status & TP_STATUS_VLAN_TPID_VALID != 0 && aux.tp_vlan_tpid != TPID_8021Q {
        return None;
    }
    Some(Tci::from_u16(aux.tp_vlan_tci))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn aux(status: u32, tci: u16, tpid: u16) -> libc::tpacket_auxdata {
        let mut aux: libc::tpacket_auxdata = unsafe { mem::zeroed() };
        aux.tp_status = status;
        aux.tp_vlan_tci = tci;
        aux.tp_vlan_tpid = tpid;
        aux
    }

    #[test]
    fn vlan_decode_valid() {
        let aux = aux(TP_STATUS_VLAN_VALID | TP_STATUS_VLAN_TPID_VALID, 0xa00a, 0x8100);
        let tci = decode_vlan(&aux).unwrap();
        assert_eq!(tci.pcp, 5);
        assert_eq!(tci.dei, 0);
        assert_eq!(tci.vid, 10);
    }

    #[test]
    fn vlan_decode_absent() {
        assert_eq!(decode_vlan(&aux(0, 0xa00a, 0x8100)), None);
    }

    #[test]
    fn vlan_decode_foreign_tpid() {
        // An S-tag (0x88a8) is not ours to reconstruct.
        let aux = aux(TP_STATUS_VLAN_VALID | TP_STATUS_VLAN_TPID_VALID, 0xa00a, 0x88a8);
        assert_eq!(decode_vlan(&aux), None);
    }

    #[test]
    fn vlan_decode_without_tpid_report() {
        // Older kernels flag the TCI valid without reporting a TPID.
        let tci = decode_vlan(&aux(TP_STATUS_VLAN_VALID, 0x6064, 0)).unwrap();
        assert_eq!(tci.pcp, 3);
        assert_eq!(tci.vid, 100);
    }

    #[test]
    fn bpf_matches_ethertype_at_post_strip_offset() {
        // ldh [12]; jeq 0x888e; ret accept; ret 0
        assert_eq!(BPF_EAPOL_ONLY.len(), 4);
        assert_eq!(BPF_EAPOL_ONLY[0].code, 0x28);
        assert_eq!(BPF_EAPOL_ONLY[0].k, 12);
        assert_eq!(BPF_EAPOL_ONLY[1].code, 0x15);
        assert_eq!(BPF_EAPOL_ONLY[1].k, 0x888e);
        assert_eq!(BPF_EAPOL_ONLY[1].jt, 0);
        assert_eq!(BPF_EAPOL_ONLY[1].jf, 1);
        assert_ne!(BPF_EAPOL_ONLY[2].k, 0);
        assert_eq!(BPF_EAPOL_ONLY[3].k, 0);
    }
}
