use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use idns::config::{self, DEFAULT_LISTEN_ADDR, DEFAULT_UPSTREAMS};
use idns::proxy::{self, ProxyConfig};

#[derive(Parser)]
#[command(name = "idns")]
#[command(about = "Caching DNS forwarder with DoH routing for listed domains", long_about = None)]
#[command(after_help = "Flags may also be written with a single dash, e.g. -addr :53")]
struct Args {
    /// UDP address to listen on (":port" binds every interface)
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    addr: String,

    /// File listing domains resolved over DNS-over-HTTPS, one per line
    #[arg(long)]
    pac: Option<PathBuf>,

    /// File the record cache is loaded from and saved to
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Comma-separated upstream chain (host:port) for domains not in the pac file
    #[arg(long, default_value = DEFAULT_UPSTREAMS)]
    upstreams: String,
}

const LONG_FLAGS: &[&str] = &["addr", "pac", "cache", "upstreams"];

/// Rewrite `-addr`, `-pac=...` and friends into the double-dash form.
///
/// The argument following a flag is its value and is left alone.
fn normalize_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let Some(text) = arg.to_str() else {
            out.push(arg);
            continue;
        };
        if text == "--" {
            out.push(arg);
            out.extend(args);
            break;
        }

        let flag = text.trim_start_matches('-');
        let dashes = text.len() - flag.len();
        let (name, inline_value) = match flag.split_once('=') {
            Some((name, _)) => (name, true),
            None => (flag, false),
        };
        if !(1..=2).contains(&dashes) || !LONG_FLAGS.contains(&name) {
            out.push(arg);
            continue;
        }

        out.push(OsString::from(format!("--{flag}")));
        if !inline_value {
            out.extend(args.next());
        }
    }
    out
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let args = Args::parse_from(normalize_flags(std::env::args_os()));
    let debug = config::debug_from_env();
    init_logging(debug);

    let listen_addr = match config::parse_listen_addr(&args.addr) {
        Ok(addr) => addr,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = ProxyConfig {
        listen_addr,
        pac_path: args.pac.filter(|p| !p.as_os_str().is_empty()),
        cache_path: args.cache.filter(|p| !p.as_os_str().is_empty()),
        upstreams: config::parse_upstreams(&args.upstreams),
        debug,
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(proxy::run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
