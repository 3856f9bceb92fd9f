// Entry point for one vector-timestamper replica. Takes a single
// positional argument, its own `vt_id`, matching the source's
// `argv[1]`-only CLI; everything else is environment-overlaid config
// (`submerge_admin::Config::from_env`) since there's no CLI-parsing crate
// in this workspace.

use std::net::SocketAddr;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use submerge::{run_forever, StaticMapper, TcpTransport};
use submerge_admin::Config;
use submerge_net::{AddrBook, EndpointId};
use submerge_txn::Timestamper;
use submerge_vers::VtId;

fn usage(program: &str) -> ! {
    eprintln!("usage: {program} <vt_id>");
    process::exit(2);
}

fn main() {
    tracing_subscriber::fmt().with_target(true).init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "submerge".to_string());
    let vt_id = match args.next() {
        Some(raw) => match raw.parse::<u64>() {
            Ok(id) => VtId(id),
            Err(_) => {
                eprintln!("vt_id must be a non-negative integer, got {raw:?}");
                usage(&program);
            }
        },
        None => usage(&program),
    };

    let config = Config::from_env().unwrap_or_else(|e| {
        error!(target: "submerge", error = ?e, "invalid configuration");
        process::exit(1);
    });

    // Matches the source's sigaction handler: SIGINT exits the process
    // outright, there is no graceful-shutdown protocol.
    let sigint_received = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, sigint_received.clone()) {
        error!(target: "submerge", error = ?e, "failed to install SIGINT handler");
    }
    thread::spawn(move || loop {
        if sigint_received.load(Ordering::SeqCst) {
            process::exit(0);
        }
        thread::sleep(Duration::from_millis(50));
    });

    let book = match std::env::var("SUBMERGE_PEERS") {
        Ok(raw) => AddrBook::parse(&raw).unwrap_or_else(|e| {
            error!(target: "submerge", error = ?e, "invalid SUBMERGE_PEERS");
            process::exit(1);
        }),
        Err(_) => AddrBook::new(),
    };

    let listen_addr: SocketAddr = std::env::var("SUBMERGE_LISTEN_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            format!("127.0.0.1:{}", 9000 + vt_id.0)
                .parse()
                .expect("constructed default listen address is always valid")
        });

    let transport = TcpTransport::bind(
        EndpointId(vt_id.0),
        listen_addr,
        book,
        Duration::from_nanos(config.vt_timeout_nano),
    )
    .unwrap_or_else(|e| {
        error!(target: "submerge", error = ?e, %listen_addr, "failed to bind listen address");
        process::exit(1);
    });

    info!(target: "submerge", vt_id = vt_id.0, %listen_addr, "vector timestamper starting");

    let mapper = StaticMapper { n_shards: config.n_shards };
    let vts = Arc::new(Timestamper::new(vt_id, config.clone(), mapper, transport));
    run_forever(vts, config);
}
