/*! Runs user scripts as side effects of recognised packets.

The child shares nothing with the daemon: every descriptor above
standard error is closed, stdio points at the null device, and the
environment is replaced wholesale with a safe PATH plus the `PKT_*`
variable set carrying the packet.  The parent waits synchronously; a
failing script is reported and forgotten, never fatal.
*/

use crate::buffer::FrameBuf;
use crate::iface::IfaceTable;
use crate::packet::{format_mac, Pkt};
use crate::pdu::{method_description, EapCode, EapolType};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use tracing::*;

const SAFE_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// The full environment for one script invocation.  Pure, so the test
/// suite can assert on it without forking.
pub fn build_env(pkt: &Pkt, table: &IfaceTable, buf: &mut FrameBuf) -> Vec<(String, String)> {
    let ingress = table.get(pkt.ingress);
    let current = table.get(pkt.current);
    let orig_b64 = BASE64.encode(buf.frame(pkt, true));
    let cur_b64 = BASE64.encode(buf.frame(pkt, false));

    let mut env = vec![
        ("PATH".to_owned(), SAFE_PATH.to_owned()),
        (
            "PKT_TIME".to_owned(),
            format!("{}.{:06}", pkt.timestamp.as_secs(), pkt.timestamp.subsec_micros()),
        ),
        ("PKT_DEST".to_owned(), format_mac(&pkt.dst)),
        ("PKT_SOURCE".to_owned(), format_mac(&pkt.src)),
        ("PKT_TYPE".to_owned(), pkt.eapol_type.as_u8().to_string()),
        (
            "PKT_TYPE_DESC".to_owned(),
            pkt.eapol_type.description().to_owned(),
        ),
        ("PKT_LENGTH_ORIG".to_owned(), pkt.orig_len.to_string()),
        ("PKT_ORIG".to_owned(), orig_b64),
        ("PKT_IFACE_ORIG".to_owned(), ingress.name.clone()),
        ("PKT_IFACE_MTU_ORIG".to_owned(), ingress.mtu.to_string()),
        ("PKT_LENGTH".to_owned(), pkt.len.to_string()),
        ("PKT".to_owned(), cur_b64),
        ("PKT_IFACE".to_owned(), current.name.clone()),
        ("PKT_IFACE_MTU".to_owned(), current.mtu.to_string()),
    ];
    if pkt.eapol_type == EapolType::Eap {
        if let Some(eap) = pkt.eap {
            env.push(("PKT_CODE".to_owned(), eap.code.as_u8().to_string()));
            env.push(("PKT_CODE_DESC".to_owned(), eap.code.description().to_owned()));
            env.push(("PKT_ID".to_owned(), eap.id.to_string()));
            if matches!(eap.code, EapCode::Request | EapCode::Response) {
                if let Some(method) = eap.method {
                    env.push(("PKT_REQRESP_TYPE".to_owned(), method.to_string()));
                    env.push((
                        "PKT_REQRESP_DESC".to_owned(),
                        method_description(method).to_owned(),
                    ));
                }
            }
        }
    }
    if let Some(tci) = pkt.vlan_orig {
        env.push(("PKT_DOT1Q_TCI_ORIG".to_owned(), format!("{:04x}", tci.to_u16())));
    }
    if let Some(tci) = pkt.vlan {
        env.push(("PKT_DOT1Q_TCI".to_owned(), format!("{:04x}", tci.to_u16())));
    }
    env
}

/// Fork, sanitise, exec, wait.  With `quiet` the outcome report drops
/// from warn to debug.
pub fn run(script: &Path, pkt: &Pkt, table: &IfaceTable, buf: &mut FrameBuf, quiet: bool) {
    // Everything the child touches is prepared before the fork; after
    // it, the child calls nothing but async-signal-safe libc.
    let path = match CString::new(script.as_os_str().as_bytes()) {
        Ok(path) => path,
        Err(_) => {
            warn!("{}: path contains a NUL byte", script.display());
            return;
        }
    };
    let env = build_env(pkt, table, buf);
    let envp: Vec<CString> = env
        .iter()
        .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
        .collect();
    let envp_ptrs: Vec<*const libc::c_char> = envp
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect();
    let argv = [path.as_ptr(), ptr::null()];

    debug!("running {} for {}", script.display(), pkt);
    match unsafe { fork() } {
        Ok(ForkResult::Child) => exec_child(&path, &argv, &envp_ptrs),
        Ok(ForkResult::Parent { child }) => match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, 0)) => debug!("{} exited cleanly", script.display()),
            Ok(WaitStatus::Exited(_, code)) => {
                report(quiet, format_args!("{} exited with status {code}", script.display()))
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                report(quiet, format_args!("{} was killed by {sig}", script.display()))
            }
            Ok(status) => report(
                quiet,
                format_args!("{}: unexpected wait status {status:?}", script.display()),
            ),
            Err(err) => report(quiet, format_args!("waiting for {}: {err}", script.display())),
        },
        Err(err) => warn!("fork for {}: {err}", script.display()),
    }
}

fn report(quiet: bool, msg: std::fmt::Arguments<'_>) {
    if quiet {
        debug!("{msg}");
    } else {
        warn!("{msg}");
    }
}

/// Past this point the daemon's address space is borrowed, not shared:
/// only async-signal-safe calls, then execve or _exit.
fn exec_child(path: &CStr, argv: &[*const libc::c_char; 2], envp: &[*const libc::c_char]) -> ! {
    unsafe {
        libc::closelog();
        let max = libc::sysconf(libc::_SC_OPEN_MAX);
        let max = if max < 0 { 1024 } else { max } as libc::c_int;
        for fd in 3..max {
            libc::close(fd);
        }
        let null = libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_RDWR);
        if null >= 0 {
            libc::dup2(null, 0);
            libc::dup2(null, 1);
            libc::dup2(null, 2);
            if null > 2 {
                libc::close(null);
            }
        }
        libc::execve(path.as_ptr(), argv.as_ptr(), envp.as_ptr());
        libc::_exit(127);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ETHERTYPE_EAPOL, ETH_ALEN};
    use crate::config;
    use crate::packet::{EapInfo, Tci};
    use byteorder::{BigEndian, ByteOrder};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::time::Duration;

    fn table() -> IfaceTable {
        let mut table =
            IfaceTable::from_config(&config::parse("iface ifA { }; iface ifB { };").unwrap());
        table.get_mut(0).mtu = 1500;
        table.get_mut(1).mtu = 1500;
        table
    }

    /// An EAPOL-EAP Response/Identity, id 152, as received on ifA.
    fn response_identity(buf: &mut FrameBuf) -> Pkt {
        let body = [
            0x02, 0x00, 0x00, 0x09, // EAPOL v2, EAP-Packet, body 9
            0x02, 0x98, 0x00, 0x09, 0x01, b'u', b's', b'e', b'r',
        ];
        let pdu = buf.pdu_mut();
        BigEndian::write_u16(&mut pdu[0..2], ETHERTYPE_EAPOL);
        pdu[2..2 + body.len()].copy_from_slice(&body);
        let len = 2 * ETH_ALEN + 2 + body.len();
        Pkt {
            timestamp: Duration::new(12, 345_000),
            ingress: 0,
            current: 1,
            len,
            orig_len: len,
            dst: [0x01, 0x80, 0xc2, 0x00, 0x00, 0x03],
            src: [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
            vlan: None,
            vlan_orig: None,
            eapol_type: EapolType::Eap,
            eap: Some(EapInfo {
                code: EapCode::Response,
                id: 152,
                method: Some(1),
            }),
        }
    }

    fn env_map(env: Vec<(String, String)>) -> HashMap<String, String> {
        env.into_iter().collect()
    }

    #[test]
    fn response_identity_environment() {
        let mut table = table();
        let mut buf = FrameBuf::new(1500);
        let pkt = response_identity(&mut buf);
        let env = env_map(build_env(&pkt, &mut table, &mut buf));
        assert_eq!(env["PKT_TYPE"], "0");
        assert_eq!(env["PKT_TYPE_DESC"], "EAP-Packet");
        assert_eq!(env["PKT_CODE"], "2");
        assert_eq!(env["PKT_CODE_DESC"], "Response");
        assert_eq!(env["PKT_ID"], "152");
        assert_eq!(env["PKT_REQRESP_TYPE"], "1");
        assert_eq!(env["PKT_REQRESP_DESC"], "Identity");
        assert_eq!(env["PKT_IFACE_ORIG"], "ifA");
        assert_eq!(env["PKT_IFACE"], "ifB");
        assert_eq!(env["PKT_IFACE_MTU"], "1500");
        assert_eq!(env["PKT_SOURCE"], "00:11:22:33:44:55");
        assert_eq!(env["PKT_DEST"], "01:80:c2:00:00:03");
        assert_eq!(env["PKT_TIME"], "12.000345");
        assert_eq!(env["PKT_LENGTH"], pkt.len.to_string());
        assert!(!env.contains_key("PKT_DOT1Q_TCI"));
        // PKT decodes to the exact bytes that will be transmitted.
        let decoded = BASE64.decode(&env["PKT"]).unwrap();
        assert_eq!(decoded, buf.frame(&pkt, false));
    }

    #[test]
    fn tag_variables_track_both_views() {
        let mut table = table();
        let mut buf = FrameBuf::new(1500);
        let mut pkt = response_identity(&mut buf);
        pkt.vlan_orig = Some(Tci {
            pcp: 3,
            dei: 0,
            vid: 100,
        });
        pkt.orig_len += 4;
        pkt.vlan = Some(Tci {
            pcp: 7,
            dei: 0,
            vid: 100,
        });
        pkt.len += 4;
        let env = env_map(build_env(&pkt, &mut table, &mut buf));
        assert_eq!(env["PKT_DOT1Q_TCI_ORIG"], "6064");
        assert_eq!(env["PKT_DOT1Q_TCI"], "e064");
        // The original frame re-encodes with its original tag.
        let orig = BASE64.decode(&env["PKT_ORIG"]).unwrap();
        assert_eq!(&orig[12..16], &[0x81, 0x00, 0x60, 0x64]);
    }

    #[test]
    fn non_eap_frames_omit_eap_variables() {
        let mut table = table();
        let mut buf = FrameBuf::new(1500);
        let mut pkt = response_identity(&mut buf);
        pkt.eapol_type = EapolType::Start;
        pkt.eap = None;
        let env = env_map(build_env(&pkt, &mut table, &mut buf));
        assert_eq!(env["PKT_TYPE"], "1");
        assert!(!env.contains_key("PKT_CODE"));
        assert!(!env.contains_key("PKT_REQRESP_TYPE"));
    }
}
