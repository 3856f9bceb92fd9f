// The vector-timestamper replica itself: transaction ordering, node-program
// dispatch, the heartbeat/NOP driver, and the message multiplexer. Grounded
// directly on `coordinator/timestamper.cc`'s `begin_transaction`,
// `end_transaction`, `unpack_and_start_coord`, `mark_req_finished`,
// `timer_function`, and `server_loop`.
//
// State is split into two mutex-guarded groups exactly as the source splits
// `vts->mutex` from `vts->periodic_update_mutex`: `principal` covers
// everything touched by a client or shard request, `periodic` covers the
// heartbeat bookkeeping. Whenever both are needed the periodic lock is
// always acquired first, never the reverse.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use submerge_admin::Config;
use submerge_base::{err, Bitmap256, Error};
use submerge_net::{self, Addressing, EndpointId, NodeHandle, Transport};
use submerge_vers::{IdGenerator, QueueTimestamp, RequestId, ShardId, VectorClock, VtId};

use crate::mapper::NodeMapper;
use crate::message::{ClientUpdate, PendingUpdate, ProgType, WireMessage};
use crate::watermark::Watermark;

struct TxReply {
    client_id: EndpointId,
    outstanding_shards: u64,
}

struct PrincipalState {
    vclk: VectorClock,
    qts: QueueTimestamp,
    ids: IdGenerator,
    tx_replies: BTreeMap<RequestId, TxReply>,
    outstanding_node_progs: BTreeMap<RequestId, EndpointId>,
    watermark: Watermark,
    /// Per node-program type, the set of shards that still need to see a
    /// completed request id go by on a NOP before it can be forgotten.
    done_reqs: BTreeMap<ProgType, BTreeMap<RequestId, Bitmap256>>,
    migr_client: Option<EndpointId>,
    msg_count: u64,
    msg_count_acks: u64,
    max_load_time_nanos: u64,
    load_acks: u64,
}

struct PeriodicState {
    /// Shards due a NOP on the next heartbeat tick (set by `VT_NOP_ACK`,
    /// cleared once the NOP batch is sent).
    to_nop: Bitmap256,
    shard_node_count: Vec<u64>,
    clock_update_acks: u64,
}

/// One vector-timestamper replica. Generic over the node-to-shard mapping
/// service and the transport so tests can swap in in-memory fakes
/// (`submerge-test`) without touching this module.
pub struct Timestamper<M, T> {
    pub vt_id: VtId,
    config: Config,
    addressing: Addressing,
    mapper: M,
    pub(crate) transport: T,
    principal: Mutex<PrincipalState>,
    periodic: Mutex<PeriodicState>,
}

impl<M: NodeMapper, T: Transport> Timestamper<M, T> {
    pub fn new(vt_id: VtId, config: Config, mapper: M, transport: T) -> Self {
        assert!(
            config.n_shards <= 256,
            "Bitmap256-backed done-request tracking supports at most 256 shards"
        );
        let n_vt = config.n_vt as usize;
        let n_shards = config.n_shards as usize;
        Timestamper {
            vt_id,
            addressing: Addressing { shard_id_incr: config.shard_id_incr },
            principal: Mutex::new(PrincipalState {
                vclk: VectorClock::new(vt_id, n_vt),
                qts: QueueTimestamp::new(n_shards),
                ids: IdGenerator::new(),
                tx_replies: BTreeMap::new(),
                outstanding_node_progs: BTreeMap::new(),
                watermark: Watermark::new(vt_id, n_vt),
                done_reqs: BTreeMap::new(),
                migr_client: None,
                msg_count: 0,
                msg_count_acks: 0,
                max_load_time_nanos: 0,
                load_acks: 0,
            }),
            periodic: Mutex::new(PeriodicState {
                to_nop: Bitmap256::new(),
                shard_node_count: vec![0; n_shards],
                clock_update_acks: 0,
            }),
            config,
            mapper,
            transport,
        }
    }

    fn lock_principal(&self) -> std::sync::MutexGuard<'_, PrincipalState> {
        self.principal.lock().expect("principal mutex poisoned")
    }

    fn lock_periodic(&self) -> std::sync::MutexGuard<'_, PeriodicState> {
        self.periodic.lock().expect("periodic mutex poisoned")
    }

    /// Resolves every write's target node to a shard. A client-facing
    /// operation: failures here are reported back as `ClientTxFail`, not
    /// treated as a programmer error.
    fn unpack_tx(&self, writes: Vec<ClientUpdate>) -> Result<Vec<PendingUpdate>, Error> {
        writes
            .into_iter()
            .map(|w| {
                let loc1 = self.mapper.resolve(w.handle)?;
                Ok(PendingUpdate { loc1, handle: w.handle, op: w.op, qts: None })
            })
            .collect()
    }

    /// `begin_transaction`: assigns a global timestamp and a
    /// per-shard qts to every write, partitions by shard, and fans out
    /// `TX_INIT`. The send loop runs after the lock is released, same as
    /// the source.
    fn begin_transaction(&self, client_id: EndpointId, writes: Vec<PendingUpdate>) {
        let n_shards = self.config.n_shards as usize;
        let mut partitions: Vec<Vec<PendingUpdate>> = (0..n_shards).map(|_| Vec::new()).collect();
        let timestamp;
        let tx_id;
        {
            let mut state = self.lock_principal();
            for mut u in writes {
                let shard = u.loc1;
                state.qts.increment(shard);
                u.qts = Some(state.qts.clone());
                partitions[shard.0 as usize].push(u);
            }
            timestamp = state.vclk.increment();
            tx_id = state.ids.generate();
            let outstanding_shards = partitions.iter().filter(|p| !p.is_empty()).count() as u64;
            state.tx_replies.insert(tx_id, TxReply { client_id, outstanding_shards });
        }
        for (idx, writes) in partitions.into_iter().enumerate() {
            if writes.is_empty() {
                continue;
            }
            let shard = ShardId(idx as u64);
            let msg = WireMessage::TxInit { vt_id: self.vt_id, timestamp: timestamp.clone(), tx_id, writes };
            submerge_net::send_best_effort(&self.transport, self.addressing.shard_endpoint(shard), &msg);
        }
    }

    /// `end_transaction`: one `TX_DONE` per shard that took part;
    /// the last one to arrive triggers `ClientTxDone`.
    fn end_transaction(&self, tx_id: RequestId) {
        let finished_client = {
            let mut state = self.lock_principal();
            match state.tx_replies.get_mut(&tx_id) {
                Some(reply) => {
                    reply.outstanding_shards -= 1;
                    if reply.outstanding_shards == 0 {
                        let client_id = reply.client_id;
                        state.tx_replies.remove(&tx_id);
                        Some(client_id)
                    } else {
                        None
                    }
                }
                None => {
                    debug!(target: "submerge", tx_id = tx_id.0, "TX_DONE for unknown or already-finished tx_id");
                    None
                }
            }
        };
        if let Some(client_id) = finished_client {
            submerge_net::send_best_effort(&self.transport, client_id, &WireMessage::ClientTxDone);
        }
    }

    /// `unpack_and_start_coord`: resolves the initial node set (or
    /// detects the `NodeHandle::GLOBAL` sentinel and fans out to every
    /// shard), stamps the request, and sends one `NODE_PROG` per shard
    /// touched.
    fn start_node_prog(
        &self,
        prog_type: ProgType,
        initial_args: Vec<(NodeHandle, Vec<u8>)>,
        client_id: EndpointId,
    ) -> Result<(), Error> {
        let global = initial_args.len() == 1 && initial_args[0].0.is_global();
        if !global && initial_args.iter().any(|(h, _)| h.is_global()) {
            return Err(err("global handle sentinel mixed with concrete node handles"));
        }

        let mut batches: BTreeMap<ShardId, Vec<(NodeHandle, Vec<u8>)>> = BTreeMap::new();
        if global {
            let (handle, params) = initial_args.into_iter().next().unwrap();
            for s in 0..self.config.n_shards {
                batches.entry(ShardId(s)).or_default().push((handle, params.clone()));
            }
        } else {
            let handles: Vec<NodeHandle> = initial_args.iter().map(|(h, _)| *h).collect();
            let resolved = self.mapper.resolve_batch(&handles)?;
            for ((handle, params), (resolved_handle, shard)) in initial_args.into_iter().zip(resolved) {
                debug_assert_eq!(handle, resolved_handle, "resolve_batch must preserve input order");
                batches.entry(shard).or_default().push((handle, params));
            }
        }

        let timestamp;
        let req_id;
        {
            let mut state = self.lock_principal();
            timestamp = state.vclk.increment();
            req_id = state.ids.generate();
            state.outstanding_node_progs.insert(req_id, client_id);
            state.watermark.track(req_id, timestamp.clone());
        }

        for (shard, batch) in batches {
            let msg = WireMessage::NodeProg {
                prog_type,
                global,
                vt_id: self.vt_id,
                timestamp: timestamp.clone(),
                req_id,
                batch,
            };
            submerge_net::send_best_effort(&self.transport, self.addressing.shard_endpoint(shard), &msg);
        }
        Ok(())
    }

    /// A node program has fully returned from the shard(s)
    /// currently responsible for it. Records it as pending acknowledgement
    /// by every shard (for the `VT_NOP` done-request piggyback), forwards
    /// the result to the client, and folds it into the watermark.
    fn on_node_prog_return(&self, prog_type: ProgType, req_id: RequestId, payload: Vec<u8>) {
        let client_id = {
            let mut state = self.lock_principal();
            let client_id = match state.outstanding_node_progs.remove(&req_id) {
                Some(c) => c,
                None => {
                    debug!(target: "submerge", req_id = req_id.0, "NODE_PROG_RETURN for unknown or already-finished req_id");
                    return;
                }
            };
            state.done_reqs.entry(prog_type).or_default().insert(req_id, Bitmap256::new());
            state.watermark.finish(req_id);
            client_id
        };
        let msg = WireMessage::NodeProgReturn { prog_type, req_id, payload };
        submerge_net::send_best_effort(&self.transport, client_id, &msg);
    }

    /// `timer_function`: the NOP phase (advance qts on every shard
    /// due a heartbeat, piggyback completed request ids, advance the
    /// watermark snapshot) followed by the clock-broadcast phase, gated on
    /// every peer having acked the previous broadcast.
    pub fn heartbeat_tick(&self) {
        let mut periodic = self.lock_periodic();

        let mut broadcast_clock = None;
        if periodic.to_nop.any() {
            let n_shards = self.config.n_shards;
            let mut per_shard_done: Vec<Vec<(RequestId, ProgType)>> =
                (0..n_shards).map(|_| Vec::new()).collect();
            let vclk;
            let req_id;
            let qts;
            let max_done_id;
            let max_done_clk;
            {
                let mut state = self.lock_principal();
                for s in 0..n_shards {
                    if periodic.to_nop.get(s as u8) {
                        state.qts.increment(ShardId(s));
                    }
                }
                qts = state.qts.clone();
                vclk = state.vclk.increment();
                req_id = state.ids.generate();
                let (done_id, done_clk) = state.watermark.max_done();
                max_done_id = done_id;
                max_done_clk = done_clk.clone();

                let mut emptied = Vec::new();
                for (&prog_type, reqs) in state.done_reqs.iter_mut() {
                    for (&req_id, bitset) in reqs.iter_mut() {
                        let mut all_acked = true;
                        for s in 0..n_shards {
                            if periodic.to_nop.get(s as u8) {
                                bitset.set(s as u8, true);
                                per_shard_done[s as usize].push((req_id, prog_type));
                            }
                            all_acked &= bitset.get(s as u8);
                        }
                        if all_acked {
                            emptied.push((prog_type, req_id));
                        }
                    }
                }
                for (prog_type, req_id) in emptied {
                    state.done_reqs.get_mut(&prog_type).unwrap().remove(&req_id);
                }
            }
            for s in 0..n_shards {
                if periodic.to_nop.get(s as u8) {
                    let msg = WireMessage::VtNop {
                        vt_id: self.vt_id,
                        vclk: vclk.clone(),
                        qts: qts.clone(),
                        req_id,
                        done_reqs: per_shard_done[s as usize].clone(),
                        max_done_id,
                        max_done_clk: max_done_clk.clone(),
                        shard_node_count: periodic.shard_node_count.clone(),
                    };
                    submerge_net::send_best_effort(&self.transport, self.addressing.shard_endpoint(ShardId(s)), &msg);
                }
            }
            periodic.to_nop.clear_all();
            broadcast_clock = Some(vclk);
        }

        if self.config.n_vt > 1 && periodic.clock_update_acks == self.config.n_vt - 1 {
            periodic.clock_update_acks = 0;
            let vclk = match broadcast_clock {
                Some(v) => v,
                None => self.lock_principal().vclk.clone(),
            };
            for i in 0..self.config.n_vt {
                if i == self.vt_id.0 {
                    continue;
                }
                let msg = WireMessage::VtClockUpdate { vt_id: self.vt_id, value: vclk.clock[self.vt_id.0 as usize] };
                submerge_net::send_best_effort(&self.transport, self.addressing.vt_endpoint(VtId(i)), &msg);
            }
        }
    }

    /// `server_loop`: the message multiplexer run by every worker
    /// thread.
    pub fn dispatch(&self, src: EndpointId, msg: WireMessage) {
        match msg {
            WireMessage::ClientTxInit { writes } => match self.unpack_tx(writes) {
                Ok(resolved) => self.begin_transaction(src, resolved),
                Err(e) => {
                    debug!(target: "submerge", error = ?e, "CLIENT_TX_INIT failed to resolve a node handle");
                    submerge_net::send_best_effort(&self.transport, src, &WireMessage::ClientTxFail);
                }
            },
            WireMessage::ClientNodeProgReq { prog_type, initial_args } => {
                if let Err(e) = self.start_node_prog(prog_type, initial_args, src) {
                    debug!(target: "submerge", error = ?e, "CLIENT_NODE_PROG_REQ rejected");
                }
            }
            WireMessage::VtClockUpdate { vt_id, value } => {
                {
                    let mut state = self.lock_principal();
                    state.vclk.update(vt_id, value);
                }
                submerge_net::send_best_effort(&self.transport, self.addressing.vt_endpoint(vt_id), &WireMessage::VtClockUpdateAck);
            }
            WireMessage::VtClockUpdateAck => {
                let mut periodic = self.lock_periodic();
                periodic.clock_update_acks += 1;
                debug_assert!(periodic.clock_update_acks < self.config.n_vt);
            }
            WireMessage::VtNopAck { shard_node_count } => {
                let shard = match self.addressing.shard_of(src) {
                    Some(s) => s,
                    None => {
                        warn!(target: "submerge", src = src.0, "VT_NOP_ACK from an endpoint outside the shard range");
                        return;
                    }
                };
                let mut periodic = self.lock_periodic();
                if let Some(slot) = periodic.shard_node_count.get_mut(shard.0 as usize) {
                    *slot = shard_node_count;
                }
                periodic.to_nop.set(shard.0 as u8, true);
            }
            WireMessage::TxDone { tx_id } => self.end_transaction(tx_id),
            WireMessage::NodeProgReturn { prog_type, req_id, payload } => {
                self.on_node_prog_return(prog_type, req_id, payload)
            }
            WireMessage::LoadedGraph { load_time_nanos } => {
                let mut state = self.lock_principal();
                if load_time_nanos > state.max_load_time_nanos {
                    state.max_load_time_nanos = load_time_nanos;
                }
                state.load_acks += 1;
                if state.load_acks == self.config.n_shards {
                    info!(target: "submerge", max_load_time_nanos = state.max_load_time_nanos, "all shards finished loading");
                }
            }
            WireMessage::StartMigr => {
                let msg = WireMessage::MigrationToken { hops: u64::MAX, vt_id: self.vt_id };
                submerge_net::send_best_effort(&self.transport, EndpointId(self.config.start_migr_id), &msg);
            }
            WireMessage::OneStreamMigr => {
                {
                    let mut state = self.lock_principal();
                    state.migr_client = Some(src);
                }
                let msg = WireMessage::MigrationToken { hops: self.config.n_shards, vt_id: self.vt_id };
                submerge_net::send_best_effort(&self.transport, EndpointId(self.config.start_migr_id), &msg);
            }
            WireMessage::MigrationToken { .. } => {
                let client = self.lock_principal().migr_client;
                match client {
                    Some(c) => submerge_net::send_best_effort(&self.transport, c, &WireMessage::DoneMigr),
                    None => warn!(target: "submerge", "MIGRATION_TOKEN arrived with no migration client registered"),
                }
            }
            WireMessage::ClientMsgCount => {
                {
                    let mut state = self.lock_principal();
                    state.msg_count = 0;
                    state.msg_count_acks = 0;
                }
                for s in 0..self.config.n_shards {
                    let msg = WireMessage::MsgCountReq { vt_id: self.vt_id };
                    submerge_net::send_best_effort(&self.transport, self.addressing.shard_endpoint(ShardId(s)), &msg);
                }
            }
            WireMessage::MsgCount { msg_count, .. } => {
                let total = {
                    let mut state = self.lock_principal();
                    state.msg_count += msg_count;
                    state.msg_count_acks += 1;
                    if state.msg_count_acks == self.config.n_shards {
                        state.msg_count_acks = 0;
                        Some(state.msg_count)
                    } else {
                        None
                    }
                };
                if let Some(total) = total {
                    info!(target: "submerge", msg_count = total, "cluster-wide message count settled");
                }
            }
            other @ (WireMessage::ClientTxFail
            | WireMessage::ClientTxDone
            | WireMessage::TxInit { .. }
            | WireMessage::NodeProg { .. }
            | WireMessage::VtNop { .. }
            | WireMessage::DoneMigr
            | WireMessage::MsgCountReq { .. }) => {
                warn!(target: "submerge", src = src.0, msg = ?other, "message kind never expected at a timestamper");
            }
        }
    }

    /// Runs `dispatch` against whatever the transport hands back, in a
    /// loop, until `recv` errors. One or more worker threads run this
    /// concurrently against the same `Timestamper`.
    pub fn worker_loop(&self) -> Result<(), Error> {
        loop {
            match self.transport.recv()? {
                submerge_net::RecvOutcome::Message { src, buf } => {
                    let msg: WireMessage = submerge_net::decode_payload(&buf)?;
                    self.dispatch(src, msg);
                }
                submerge_net::RecvOutcome::Timeout => continue,
            }
        }
    }
}
