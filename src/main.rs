use clap::{ArgAction, Parser};
use eapol_proxy::config;
use eapol_proxy::daemon::{self, PidFile};
use eapol_proxy::proxy::{self, ProxyOptions};
use std::ffi::CString;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

const DEFAULT_LOG_PATH: &str = "/var/log/eapol-proxy.log";

/// A transparent bridging and rewriting proxy for IEEE 802.1X EAPOL
/// frames.
#[derive(Parser)]
#[command(name = "eapol-proxy", version, about)]
struct Args {
    /// Fork to the background
    #[arg(short, long)]
    daemon: bool,

    /// PID file path (with -d; default /var/run/eapol-proxy.pid)
    #[arg(short, long, value_name = "FILE")]
    pid_file: Option<PathBuf>,

    /// Config file path
    #[arg(short, long, value_name = "FILE", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Parse the config file, report, and exit
    #[arg(short, long)]
    test_config: bool,

    /// Log to a file instead of standard error
    #[arg(
        short,
        long,
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = DEFAULT_LOG_PATH
    )]
    log: Option<PathBuf>,

    /// Log via syslog
    #[arg(short, long)]
    syslog: bool,

    /// Increase verbosity (repeat up to three times)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only report script failures at debug level
    #[arg(short, long)]
    quiet_script: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Exit instead of restarting after a runtime error
    #[arg(short, long)]
    oneshot: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = init_logging(&args) {
        eprintln!("eapol-proxy: cannot set up logging: {err}");
        return ExitCode::FAILURE;
    }

    let configs = match config::load(&args.config) {
        Ok(configs) => configs,
        Err(err) => {
            eprintln!("eapol-proxy: {}: {err}", args.config.display());
            return ExitCode::FAILURE;
        }
    };
    if args.test_config {
        println!(
            "{}: OK ({} interfaces)",
            args.config.display(),
            configs.len()
        );
        return ExitCode::SUCCESS;
    }

    if args.daemon {
        if let Err(err) = daemon::daemonize() {
            eprintln!("eapol-proxy: cannot daemonize: {err}");
            return ExitCode::FAILURE;
        }
    }
    let pid_path = match (&args.pid_file, args.daemon) {
        (Some(path), _) => Some(path.clone()),
        (None, true) => Some(PathBuf::from(daemon::DEFAULT_PID_PATH)),
        (None, false) => None,
    };
    let _pid_file = match pid_path.as_deref().map(PidFile::take).transpose() {
        Ok(pid_file) => pid_file,
        Err(err) => {
            error!("{err}");
            eprintln!("eapol-proxy: {err}");
            return ExitCode::FAILURE;
        }
    };

    let opts = ProxyOptions {
        oneshot: args.oneshot,
        quiet_script: args.quiet_script,
    };
    match proxy::run(configs, opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Args) -> io::Result<()> {
    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let (writer, ansi) = if args.syslog {
        unsafe {
            libc::openlog(
                b"eapol-proxy\0".as_ptr() as *const libc::c_char,
                libc::LOG_PID,
                libc::LOG_DAEMON,
            );
        }
        (BoxMakeWriter::new(|| SyslogWriter), false)
    } else if let Some(path) = &args.log {
        let file = Arc::new(OpenOptions::new().append(true).create(true).open(path)?);
        (
            BoxMakeWriter::new(move || FileWriter(file.clone())),
            false,
        )
    } else {
        (BoxMakeWriter::new(io::stderr), !args.no_color)
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(ansi)
        .with_target(false)
        .with_writer(writer)
        .init();
    Ok(())
}

/// One shared append-mode handle behind every log line.
struct FileWriter(Arc<std::fs::File>);

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self.0).flush()
    }
}

/// Hands every formatted line to `syslog(3)`; the fmt layer's own
/// timestamp is redundant there but harmless.
struct SyslogWriter;

impl Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let end = buf
            .iter()
            .rposition(|&b| b != b'\n' && b != b'\r')
            .map_or(0, |i| i + 1);
        if let Ok(line) = CString::new(&buf[..end]) {
            unsafe {
                libc::syslog(
                    libc::LOG_INFO,
                    b"%s\0".as_ptr() as *const libc::c_char,
                    line.as_ptr(),
                );
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
