// Resolves endpoint ids to socket addresses for a real transport. Kept
// separate from `Addressing` (which only knows about the vt/shard/client
// range convention): this is where an actual deployment's connection
// information lives, grounding the source's `weaver_mapper` lookup used by
// `comm_wrapper`.

use std::collections::HashMap;
use std::net::SocketAddr;

use submerge_base::{err, Error};

use crate::EndpointId;

#[derive(Clone, Debug, Default)]
pub struct AddrBook {
    addrs: HashMap<EndpointId, SocketAddr>,
}

impl AddrBook {
    pub fn new() -> AddrBook {
        AddrBook::default()
    }

    pub fn insert(&mut self, id: EndpointId, addr: SocketAddr) {
        self.addrs.insert(id, addr);
    }

    pub fn get(&self, id: EndpointId) -> Option<SocketAddr> {
        self.addrs.get(&id).copied()
    }

    /// Parses `id=host:port,id=host:port,...`, the format expected in the
    /// `SUBMERGE_PEERS` environment variable.
    pub fn parse(spec: &str) -> Result<AddrBook, Error> {
        let mut book = AddrBook::new();
        for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (id, addr) = entry
                .split_once('=')
                .ok_or_else(|| err(format!("malformed peer entry {:?}, expected id=host:port", entry)))?;
            let id: u64 = id
                .parse()
                .map_err(|_| err(format!("malformed endpoint id {:?} in peer entry", id)))?;
            let addr: SocketAddr = addr
                .parse()
                .map_err(|_| err(format!("malformed socket address {:?} in peer entry", addr)))?;
            book.insert(EndpointId(id), addr);
        }
        Ok(book)
    }
}
