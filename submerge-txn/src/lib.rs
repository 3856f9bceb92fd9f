// The vector-timestamper: the single-writer-per-shard coordination layer
// that assigns every graph write a global order and fans it out to shards,
// tracks outstanding node-program requests, and advances a cluster-wide
// "everything up to here has completed" watermark. Grounded on
// `coordinator/timestamper.cc`.
//
// A timestamper replica owns no graph data itself; it only orders requests
// and forwards them. Actual mutation and node-program execution happen on
// shards, which are out of scope for this crate.

mod mapper;
mod message;
mod timestamper;
mod watermark;

pub use mapper::NodeMapper;
pub use message::{ClientUpdate, PendingUpdate, ProgType, PropValue, UpdateOp, WireMessage};
pub use timestamper::Timestamper;

#[cfg(test)]
mod test;
