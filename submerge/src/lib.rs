// Assembles and runs one vector-timestamper replica: the worker threads
// that drain the transport and the heartbeat thread that drives NOPs and
// clock gossip. Grounded on `main`/`server_loop`/`timer_function` in the
// source.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::error;

use submerge_admin::Config;
use submerge_net::Transport;
use submerge_txn::{NodeMapper, Timestamper};

mod mapper;
mod transport;

pub use mapper::StaticMapper;
pub use transport::TcpTransport;

/// Spawns `config.n_threads` worker threads draining the transport and
/// runs the heartbeat loop on the calling thread forever. Workers are
/// detached, same as the source's `pthread_detach`; this function only
/// returns if the heartbeat loop itself panics.
pub fn run_forever<M, T>(vts: Arc<Timestamper<M, T>>, config: Config) -> !
where
    M: NodeMapper + 'static,
    T: Transport + 'static,
{
    for _ in 0..config.n_threads {
        let vts = vts.clone();
        thread::spawn(move || {
            if let Err(e) = vts.worker_loop() {
                error!(target: "submerge", error = ?e, "worker thread exited");
            }
        });
    }

    thread::sleep(Duration::from_nanos(config.vt_initial_timeout_nano));
    loop {
        thread::sleep(Duration::from_nanos(config.vt_timeout_nano));
        vts.heartbeat_tick();
    }
}
