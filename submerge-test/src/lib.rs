// In-memory test harness for the vector timestamper: a `Router` standing in
// for the real transport, plus a trivial node mapper and tiny shard/client
// stand-ins, so `submerge-txn`'s scenarios can be driven end to end without
// a real shard process on the other end. Only used from `dev-dependencies`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use submerge_base::Error;
use submerge_net::{EndpointId, NodeHandle, RecvOutcome, Transport};
use submerge_txn::NodeMapper;
use submerge_vers::ShardId;

/// A fully-connected in-process message bus. Every registered endpoint gets
/// its own inbox; `send` never blocks and never fails.
pub struct Router {
    inboxes: Mutex<HashMap<EndpointId, VecDeque<(EndpointId, Vec<u8>)>>>,
}

impl Router {
    pub fn new() -> Arc<Router> {
        Arc::new(Router { inboxes: Mutex::new(HashMap::new()) })
    }

    /// Pops every message currently queued for `endpoint`, decoded. Meant
    /// for tests playing the role of a shard or client: no `Endpoint`
    /// needed on that side, just inspect what arrived.
    pub fn drain<Msg: serde::de::DeserializeOwned>(&self, endpoint: EndpointId) -> Vec<(EndpointId, Msg)> {
        let mut inboxes = self.inboxes.lock().unwrap();
        inboxes
            .entry(endpoint)
            .or_default()
            .drain(..)
            .map(|(src, buf)| (src, submerge_net::decode_payload(&buf).expect("test harness: malformed message")))
            .collect()
    }

    /// Delivers a message to `dest` as if `src` had sent it, bypassing any
    /// `Endpoint`. Used by tests to play a shard or peer VT directly.
    pub fn deliver<Msg: serde::Serialize>(&self, src: EndpointId, dest: EndpointId, msg: &Msg) {
        let buf = submerge_net::encode_payload(msg).expect("test harness: failed to encode message");
        self.inboxes.lock().unwrap().entry(dest).or_default().push_back((src, buf));
    }
}

/// One endpoint's view of a [`Router`]: a [`Transport`] a `Timestamper` can
/// be built with directly.
pub struct Endpoint {
    id: EndpointId,
    router: Arc<Router>,
}

impl Endpoint {
    pub fn new(id: EndpointId, router: &Arc<Router>) -> Endpoint {
        Endpoint { id, router: router.clone() }
    }
}

impl Transport for Endpoint {
    fn send(&self, dest: EndpointId, buf: Vec<u8>) -> Result<(), Error> {
        self.router.inboxes.lock().unwrap().entry(dest).or_default().push_back((self.id, buf));
        Ok(())
    }

    fn recv(&self) -> Result<RecvOutcome, Error> {
        let mut inboxes = self.router.inboxes.lock().unwrap();
        match inboxes.entry(self.id).or_default().pop_front() {
            Some((src, buf)) => Ok(RecvOutcome::Message { src, buf }),
            None => Ok(RecvOutcome::Timeout),
        }
    }
}

/// Resolves every handle to a shard by `handle % n_shards`. Stands in for
/// the real node-to-shard directory service in every scenario test: this
/// crate is only concerned with ordering and dispatch, not graph layout.
pub struct FixedMapper {
    pub n_shards: u64,
}

impl NodeMapper for FixedMapper {
    fn resolve(&self, handle: NodeHandle) -> Result<ShardId, Error> {
        Ok(ShardId(handle.0 % self.n_shards))
    }
}
