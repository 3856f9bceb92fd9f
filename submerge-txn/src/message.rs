// Wire protocol spoken between clients, vector timestampers, and shards.
//
// This is the one place in the workspace that owns the full message
// catalogue; `submerge-net` only knows about bytes and endpoints. A
// `WireMessage` is always `rmp_serde`-encoded before it touches the
// transport (see `submerge_net::{encode,decode}_payload`).

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use submerge_net::NodeHandle;
use submerge_vers::{QueueTimestamp, RequestId, ShardId, VectorClock, VtId};

/// Which node-program implementation a batch is running. The coordinator
/// never looks inside the opaque parameter/state blobs that go with one of
/// these; it only needs the tag to route `NODE_PROG_RETURN` back to the
/// right client-side decoder.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ProgType {
    Reachability,
    ShortestPath,
    NGram,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    I64(i64),
    F64(OrderedFloat<f64>),
    Str(String),
    Bool(bool),
}

/// One graph mutation within a transaction, as the client expressed it:
/// targeted at a node handle the coordinator still has to resolve to a
/// shard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum UpdateOp {
    NodeCreate,
    NodeDelete,
    EdgeCreate { to: NodeHandle },
    EdgeDelete { to: NodeHandle },
    SetProperty { key: String, val: PropValue },
}

/// A client-submitted write before shard resolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientUpdate {
    pub handle: NodeHandle,
    pub op: UpdateOp,
}

/// A write after shard resolution (`loc1`), and after it has been stamped
/// with the qts vector it was assigned at `begin_transaction` time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub loc1: ShardId,
    pub handle: NodeHandle,
    pub op: UpdateOp,
    pub qts: Option<QueueTimestamp>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WireMessage {
    // client <-> vt
    ClientTxInit { writes: Vec<ClientUpdate> },
    ClientTxFail,
    ClientTxDone,
    ClientNodeProgReq { prog_type: ProgType, initial_args: Vec<(NodeHandle, Vec<u8>)> },
    ClientMsgCount,

    // vt <-> shard
    TxInit {
        vt_id: VtId,
        timestamp: VectorClock,
        tx_id: RequestId,
        writes: Vec<PendingUpdate>,
    },
    TxDone { tx_id: RequestId },
    NodeProg {
        prog_type: ProgType,
        global: bool,
        vt_id: VtId,
        timestamp: VectorClock,
        req_id: RequestId,
        batch: Vec<(NodeHandle, Vec<u8>)>,
    },
    NodeProgReturn { prog_type: ProgType, req_id: RequestId, payload: Vec<u8> },
    VtNop {
        vt_id: VtId,
        vclk: VectorClock,
        qts: QueueTimestamp,
        req_id: RequestId,
        done_reqs: Vec<(RequestId, ProgType)>,
        max_done_id: RequestId,
        max_done_clk: VectorClock,
        shard_node_count: Vec<u64>,
    },
    VtNopAck { shard_node_count: u64 },
    LoadedGraph { load_time_nanos: u64 },
    MsgCountReq { vt_id: VtId },
    MsgCount { shard: ShardId, msg_count: u64 },

    // migration
    StartMigr,
    OneStreamMigr,
    MigrationToken { hops: u64, vt_id: VtId },
    DoneMigr,

    // vt <-> vt
    VtClockUpdate { vt_id: VtId, value: u64 },
    VtClockUpdateAck,
}
