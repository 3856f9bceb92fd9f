// Admin, config, and system policy surface for the vector timestamper.
//
// Every tunable named in the external-interfaces section of the protocol
// spec lives on `Config`. Defaults mirror the source's compile-time
// constants; `Config::from_env` lets an operator override any of them
// without a recompile, which is as far as "admission control / query
// planning" (explicitly out of scope) need ever go for this component.

use serde::{Deserialize, Serialize};
use submerge_base::{err, Error};
use tracing::warn;

#[cfg(test)]
mod test;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Number of vector-timestamper replicas.
    pub n_vt: u64,
    /// Number of shards.
    pub n_shards: u64,
    /// Number of symmetric worker threads competing on the recv endpoint.
    pub n_threads: u64,
    /// Heartbeat period, in nanoseconds.
    pub vt_timeout_nano: u64,
    /// Startup grace period before the heartbeat loop begins, in nanoseconds.
    pub vt_initial_timeout_nano: u64,
    /// First transport endpoint id assigned to shard 0.
    pub shard_id_incr: u64,
    /// Endpoint id of the fixed migration coordinator.
    pub start_migr_id: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            n_vt: 1,
            n_shards: 1,
            n_threads: 4,
            vt_timeout_nano: 50_000_000,
            vt_initial_timeout_nano: 1_000_000_000,
            shard_id_incr: 1 << 16,
            start_migr_id: (1 << 16) - 1,
        }
    }
}

macro_rules! overlay_env {
    ($cfg:expr, $field:ident, $var:literal) => {
        if let Ok(raw) = std::env::var($var) {
            $cfg.$field = raw
                .parse()
                .map_err(|_| err(format!("{} must be an integer, got {:?}", $var, raw)))?;
        }
    };
}

impl Config {
    /// Starts from [`Config::default`] and overlays any of the
    /// `SUBMERGE_*` environment variables that are set.
    pub fn from_env() -> Result<Config, Error> {
        let mut cfg = Config::default();
        overlay_env!(cfg, n_vt, "SUBMERGE_N_VT");
        overlay_env!(cfg, n_shards, "SUBMERGE_N_SHARDS");
        overlay_env!(cfg, n_threads, "SUBMERGE_N_THREADS");
        overlay_env!(cfg, vt_timeout_nano, "SUBMERGE_VT_TIMEOUT_NANO");
        overlay_env!(cfg, vt_initial_timeout_nano, "SUBMERGE_VT_INITIAL_TIMEOUT_NANO");
        overlay_env!(cfg, shard_id_incr, "SUBMERGE_SHARD_ID_INCR");
        overlay_env!(cfg, start_migr_id, "SUBMERGE_START_MIGR_ID");
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.n_vt == 0 {
            return Err(err("n_vt must be at least 1"));
        }
        if self.n_shards == 0 {
            return Err(err("n_shards must be at least 1"));
        }
        if self.n_threads == 0 {
            warn!(target: "submerge", "n_threads is 0, no worker will ever drain the recv endpoint");
        }
        if self.shard_id_incr < self.n_vt {
            warn!(
                target: "submerge",
                shard_id_incr = self.shard_id_incr,
                n_vt = self.n_vt,
                "shard_id_incr overlaps the VT endpoint range"
            );
        }
        Ok(())
    }
}
