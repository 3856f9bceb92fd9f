// Node-to-shard resolution. The timestamper never stores the mapping
// itself; it asks a collaborator, mirroring the source's `nmap_client`.

use submerge_base::Error;
use submerge_net::NodeHandle;
use submerge_vers::ShardId;

pub trait NodeMapper: Send + Sync {
    fn resolve(&self, handle: NodeHandle) -> Result<ShardId, Error>;

    /// Batch form. The default just calls `resolve` per handle; a real
    /// mapping service backed by a remote directory should override this
    /// with one round trip instead of one per handle.
    fn resolve_batch(&self, handles: &[NodeHandle]) -> Result<Vec<(NodeHandle, ShardId)>, Error> {
        handles
            .iter()
            .map(|&h| self.resolve(h).map(|s| (h, s)))
            .collect()
    }
}
