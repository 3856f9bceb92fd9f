// A placeholder node-to-shard directory. The real mapping service (the
// source's `nmap_client`, backed by its own directory of node placements)
// is an external collaborator out of scope for this workspace; this is
// just enough of one to run a standalone cluster.

use submerge_base::Error;
use submerge_net::NodeHandle;
use submerge_txn::NodeMapper;
use submerge_vers::ShardId;

pub struct StaticMapper {
    pub n_shards: u64,
}

impl NodeMapper for StaticMapper {
    fn resolve(&self, handle: NodeHandle) -> Result<ShardId, Error> {
        Ok(ShardId(handle.0 % self.n_shards))
    }
}
