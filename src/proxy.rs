/*! The event loop.

Single-threaded and cooperative: one `epoll_pwait` over every interface
socket, one frame handled end-to-end before the next is read.  The loop
owns the interface table and the frame buffer for the length of a
session; on a transient error it tears the session down, sleeps ten
seconds, and rebuilds everything from the already-parsed config.
*/

use crate::buffer::FrameBuf;
use crate::config::IfaceConfig;
use crate::error::{Error, Result};
use crate::iface::IfaceTable;
use crate::packet::{format_mac, EapInfo, Pkt};
use crate::pdu::EapolPdu;
use crate::policy::apply_dot1q;
use crate::script;
use crate::signal;
use crate::sock::{self, RawSock};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::process;
use std::time::{Duration, Instant};
use tracing::*;

const COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Default)]
pub struct ProxyOptions {
    /// Exit on the first runtime error instead of restarting.
    pub oneshot: bool,
    /// Report script failures at debug rather than warn.
    pub quiet_script: bool,
}

/// Run the proxy until a clean shutdown (Ok) or, in oneshot mode, the
/// first runtime error.  Startup errors in the very first session are
/// fatal either way.
pub fn run(configs: Vec<IfaceConfig>, opts: ProxyOptions) -> Result<()> {
    signal::install()?;
    let mut proxy = Proxy {
        expected: configs.len(),
        configs,
        opts,
        started: false,
    };
    loop {
        let err = match proxy.init_session() {
            Ok(mut session) => {
                proxy.started = true;
                match proxy.run_session(&mut session) {
                    Ok(()) => {
                        info!("shutting down");
                        return Ok(());
                    }
                    Err(err) => err,
                }
            }
            Err(err) if !proxy.started => return Err(err),
            Err(err) => err,
        };
        if proxy.opts.oneshot {
            return Err(err);
        }
        error!("{err}; restarting in {} seconds", COOLDOWN.as_secs());
        if proxy.cooldown()? {
            info!("shutting down");
            return Ok(());
        }
    }
}

struct Proxy {
    configs: Vec<IfaceConfig>,
    opts: ProxyOptions,
    /// The ready set must stay this size across every restart.
    expected: usize,
    /// Whether any session ever came up; decides startup-fatal.
    started: bool,
}

/// Everything a session owns.  Dropping it closes every socket and the
/// multiplexer.
struct Session {
    table: IfaceTable,
    buf: FrameBuf,
    mux: Multiplexer,
}

impl Proxy {
    fn init_session(&self) -> Result<Session> {
        let mut table = IfaceTable::from_config(&self.configs);
        for iface in table.iter_mut() {
            iface.index = sock::ifindex(&iface.name)?;
            iface.mtu = sock::mtu(&iface.name)?;
            if let Some(mac) = iface.static_mac.take() {
                if sock::set_hwaddr(&iface.name, mac)? {
                    info!("{}: MAC set to {}", iface.name, format_mac(&mac));
                }
            }
            iface.sock = Some(RawSock::open(&iface.name, iface.index, iface.promiscuous)?);
            info!("ready: {}", iface);
        }
        let ready = table.iter().filter(|i| i.sock.is_some()).count();
        if ready != self.expected {
            // The table no longer matches the config we validated
            // against; nothing sensible can continue from here.
            error!("{} interfaces configured but {ready} ready", self.expected);
            process::abort();
        }
        let buf = FrameBuf::new(table.max_mtu());
        let mux = Multiplexer::new()?;
        for (pos, iface) in table.iter().enumerate() {
            if let Some(sock) = &iface.sock {
                mux.add(sock.as_raw_fd(), pos as u64)?;
            }
        }
        Ok(Session { table, buf, mux })
    }

    /// Ok means a shutdown signal; Err means a transient the caller
    /// turns into a cooldown.
    fn run_session(&self, session: &mut Session) -> Result<()> {
        let mut expect_err = false;
        loop {
            match session.mux.wait()? {
                None => {
                    if consume_signals() {
                        return Ok(());
                    }
                }
                Some((token, events)) => {
                    let pos = token as usize;
                    if pos >= session.table.len() {
                        warn!("event for unknown token {token}");
                        continue;
                    }
                    self.handle_event(session, pos, events, &mut expect_err)?;
                }
            }
        }
    }

    /// The single-packet orchestration: receive, count, learn, ingress
    /// action, ingress filter, then rewrite/filter/action/send per
    /// egress interface.
    fn handle_event(
        &self,
        session: &mut Session,
        pos: usize,
        events: u32,
        expect_err: &mut bool,
    ) -> Result<()> {
        let Session { table, buf, .. } = session;
        let iface_name = table.get(pos).name.clone();

        if events & libc::EPOLLIN as u32 == 0 {
            if *expect_err && events & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 {
                // Oneshot: the next error event after a MAC mutation is
                // the link cycling, already paid for.
                *expect_err = false;
                info!("{iface_name}: socket invalidated by the MAC change");
                return Err(Error::LinkCycled(iface_name));
            }
            warn!("{iface_name}: unexpected event 0x{events:x}");
            return Err(Error::SpuriousEvent(iface_name));
        }

        let recvd = {
            let sock = match &table.get(pos).sock {
                Some(sock) => sock,
                None => return Err(Error::SpuriousEvent(iface_name)),
            };
            match sock.recv(buf) {
                Ok(recvd) => recvd,
                Err(err) if err.is_drop() => {
                    warn!("{iface_name}: {err}");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        };

        let pdu = match EapolPdu::parse(buf.pdu()) {
            Ok(pdu) => pdu,
            Err(err) => {
                warn!("{iface_name}: unparseable PDU ({err})");
                return Ok(());
            }
        };
        let pkt = Pkt {
            timestamp: recvd.timestamp,
            ingress: pos,
            current: pos,
            len: recvd.len,
            orig_len: recvd.len,
            dst: recvd.dst,
            src: recvd.src,
            vlan: recvd.vlan,
            vlan_orig: recvd.vlan,
            eapol_type: pdu.header.packet_type,
            eap: pdu.eap.map(|h| EapInfo {
                code: h.code,
                id: h.id,
                method: h.method,
            }),
        };
        debug!("{iface_name}: {pkt} ({pdu})");

        table.get_mut(pos).recvd += 1;
        if table.get(pos).recvd == 1 {
            for learner in table.take_learners(pos) {
                let learner_name = table.get(learner).name.clone();
                info!(
                    "{learner_name}: learning MAC {} from the first frame on {iface_name}",
                    format_mac(&pkt.src),
                );
                if sock::set_hwaddr(&learner_name, pkt.src)? {
                    *expect_err = true;
                }
            }
        }

        let code = pkt.eap.map(|e| e.code);
        let ingress_script = table
            .get(pos)
            .ingress
            .as_ref()
            .and_then(|p| p.exec.select(pkt.eapol_type, code))
            .map(Path::to_owned);
        if let Some(script) = &ingress_script {
            script::run(script, &pkt, table, buf, self.opts.quiet_script);
        }
        let ingress_drop = table
            .get(pos)
            .ingress
            .as_ref()
            .and_then(|p| p.filter)
            .map_or(false, |mask| mask.drops(pkt.eapol_type, code));
        if ingress_drop {
            info!("{iface_name}: ingress filter dropped {pkt}");
            return Ok(());
        }

        for out in 0..table.len() {
            if out == pos {
                continue;
            }
            let mut copy = pkt;
            copy.current = out;
            let out_name = table.get(out).name.clone();

            let dot1q = table
                .get(out)
                .egress
                .as_ref()
                .and_then(|p| p.dot1q.as_ref())
                .copied();
            apply_dot1q(&mut copy, dot1q.as_ref());

            let egress_drop = table
                .get(out)
                .egress
                .as_ref()
                .and_then(|p| p.filter)
                .map_or(false, |mask| mask.drops(copy.eapol_type, code));
            if egress_drop {
                info!("{out_name}: egress filter dropped {copy}");
                continue;
            }

            let egress_script = table
                .get(out)
                .egress
                .as_ref()
                .and_then(|p| p.exec.select(copy.eapol_type, code))
                .map(Path::to_owned);
            if let Some(script) = &egress_script {
                script::run(script, &copy, table, buf, self.opts.quiet_script);
            }

            if let Some(sock) = &table.get(out).sock {
                let frame = buf.frame(&copy, false);
                sock.send(frame)?;
            }
            table.get_mut(out).sent += 1;
            trace!("{out_name}: sent {copy}");
        }
        Ok(())
    }

    /// Ten interruptible seconds.  Returns true if a shutdown signal
    /// arrived mid-sleep.
    fn cooldown(&self) -> Result<bool> {
        let deadline = Instant::now() + COOLDOWN;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let left = deadline - now;
            let ts = libc::timespec {
                tv_sec: left.as_secs() as libc::time_t,
                tv_nsec: libc::c_long::from(left.subsec_nanos()),
            };
            let sigmask = signal::empty_sigset();
            let rc = unsafe { libc::ppoll(std::ptr::null_mut(), 0, &ts, &sigmask) };
            if rc == 0 {
                return Ok(false);
            }
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EINTR) {
                    return Err(err.into());
                }
                if consume_signals() {
                    return Ok(true);
                }
            }
        }
    }
}

/// Drain the signal counters; true means shut down.
fn consume_signals() -> bool {
    let (hup, usr1) = signal::take_benign();
    if hup > 0 {
        info!("ignoring SIGHUP (configuration reload is not supported)");
    }
    if usr1 > 0 {
        info!("SIGUSR1 received");
    }
    signal::take_shutdown()
}

/// A thin epoll wrapper.  The wait supplies an empty signal mask, which
/// is the only window where the blocked signals get delivered.
struct Multiplexer {
    fd: OwnedFd,
}

impl Multiplexer {
    fn new() -> Result<Multiplexer> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Multiplexer {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn add(&self, fd: RawFd, token: u64) -> Result<()> {
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: token,
        };
        let rc = unsafe {
            libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Block for one event.  `None` means the wait was interrupted and
    /// the signal counters should be consumed.
    fn wait(&self) -> Result<Option<(u64, u32)>> {
        let mut event: libc::epoll_event = unsafe { mem::zeroed() };
        let sigmask = signal::empty_sigset();
        let n = unsafe { libc::epoll_pwait(self.fd.as_raw_fd(), &mut event, 1, -1, &sigmask) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(None);
            }
            return Err(err.into());
        }
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(({ event.u64 }, { event.events })))
    }
}
