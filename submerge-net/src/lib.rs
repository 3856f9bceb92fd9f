// Client-server and server-server networking for the vector timestamper.
//
// The actual transport (reliable in-order point-to-point delivery to an
// integer endpoint id) is an external collaborator: a real deployment might
// back it with TCP, a message bus, or an RDMA fabric. This crate only
// specifies the interface the timestamper needs from it, the address-space
// partitioning convention shared by every endpoint kind, and the generic
// envelope codec used to turn a typed message into bytes and back.

use serde::{de::DeserializeOwned, Serialize};
use submerge_base::{err, Error};
use submerge_vers::{ShardId, VtId};
use tracing::debug;

mod addrbook;

pub use addrbook::AddrBook;

#[cfg(test)]
mod test;

/// A raw transport-level address. Timestampers, shards, and clients all
/// share one address space, partitioned by range: see [`Addressing`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, serde::Deserialize)]
pub struct EndpointId(pub u64);

/// A client-level opaque handle to a node or edge. `GLOBAL` is the sentinel
/// meaning "every shard", used by node programs that have no single starting
/// node (e.g. a whole-graph scan).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, serde::Deserialize)]
pub struct NodeHandle(pub u64);

impl NodeHandle {
    pub const GLOBAL: NodeHandle = NodeHandle(u64::MAX);

    pub fn is_global(self) -> bool {
        self == NodeHandle::GLOBAL
    }
}

/// Maps timestamper, shard, and client logical ids onto the shared transport
/// address space. Timestampers occupy `[0, n_vt)`, shards occupy
/// `[shard_id_incr, shard_id_incr + n_shards)`, clients occupy a disjoint
/// higher range not otherwise interpreted here.
#[derive(Clone, Copy, Debug)]
pub struct Addressing {
    pub shard_id_incr: u64,
}

impl Addressing {
    pub fn vt_endpoint(&self, vt: VtId) -> EndpointId {
        EndpointId(vt.0)
    }

    pub fn shard_endpoint(&self, shard: ShardId) -> EndpointId {
        EndpointId(self.shard_id_incr + shard.0)
    }

    /// Recovers the shard id a message claiming to be "from a shard" should
    /// have, or `None` if the sender is outside the shard range.
    pub fn shard_of(&self, endpoint: EndpointId) -> Option<ShardId> {
        endpoint.0.checked_sub(self.shard_id_incr).map(ShardId)
    }
}

/// Outcome of one `Transport::recv` call, mirroring the source's
/// `SUCCESS` / `TIMEOUT` / other busybee return codes: a timeout is not
/// an error, it's a normal "nothing arrived within the poll interval".
#[derive(Debug)]
pub enum RecvOutcome {
    Message { src: EndpointId, buf: Vec<u8> },
    Timeout,
}

/// The external messaging transport. Implementations are expected to
/// provide reliable, in-order delivery per `(src, dst)` pair; the
/// timestamper relies on that guarantee for per-shard FIFO ordering.
pub trait Transport: Send + Sync {
    fn send(&self, dest: EndpointId, buf: Vec<u8>) -> Result<(), Error>;
    fn recv(&self) -> Result<RecvOutcome, Error>;
}

/// Serializes `msg` with the same encoding discipline as the rest of the
/// workspace (`rmp_serde`, as in the original `submerge_net::Node::send_msg`).
pub fn encode_payload<T: Serialize>(msg: &T) -> Result<Vec<u8>, Error> {
    Ok(rmp_serde::to_vec(msg)?)
}

/// Decodes a payload previously produced by [`encode_payload`]. Errors here
/// are always programmer or wire-compatibility errors; callers should treat
/// them like any other malformed-message condition.
pub fn decode_payload<T: DeserializeOwned>(buf: &[u8]) -> Result<T, Error> {
    rmp_serde::from_slice(buf).map_err(Error::from)
}

/// Sends a typed message to `dest`, logging and swallowing transport errors.
/// Send is best-effort: a dropped NOP is recovered by the next heartbeat
/// tick, so there is nothing a caller could usefully do with a send failure
/// beyond noting it.
pub fn send_best_effort<T: Serialize>(transport: &dyn Transport, dest: EndpointId, msg: &T) {
    match encode_payload(msg) {
        Ok(buf) => {
            if let Err(e) = transport.send(dest, buf) {
                debug!(target: "submerge", dest = dest.0, error = ?e, "send failed, relying on transport to self-recover");
            }
        }
        Err(e) => {
            debug!(target: "submerge", dest = dest.0, error = ?e, "failed to encode outgoing message");
        }
    }
}

pub fn bad_mapping(handle: NodeHandle) -> Error {
    err(format!("no shard mapping for handle {}", handle.0))
}
