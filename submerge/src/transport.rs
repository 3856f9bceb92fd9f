// A minimal blocking TCP `Transport`. The source talks to shards and peer
// timestampers over busybee, a custom low-latency messaging layer not
// available to this workspace; this is a plain `std::net` stand-in with the
// same contract (reliable, in-order, point-to-point), framed as a one-shot
// sender-id handshake followed by a stream of length-prefixed messages.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tracing::warn;

use submerge_base::{err, Error};
use submerge_net::{AddrBook, EndpointId, RecvOutcome, Transport};

type Inbox = Arc<(Mutex<VecDeque<(EndpointId, Vec<u8>)>>, Condvar)>;

pub struct TcpTransport {
    self_id: EndpointId,
    book: AddrBook,
    outbound: Mutex<HashMap<EndpointId, TcpStream>>,
    inbox: Inbox,
    poll_timeout: Duration,
}

impl TcpTransport {
    /// Binds `listen_addr` and spawns the accept loop. Every accepted
    /// connection gets its own reader thread; all of them feed the same
    /// inbox, so `recv` sees messages from every peer in arrival order.
    pub fn bind(
        self_id: EndpointId,
        listen_addr: SocketAddr,
        book: AddrBook,
        poll_timeout: Duration,
    ) -> Result<TcpTransport, Error> {
        let listener = TcpListener::bind(listen_addr)?;
        let inbox: Inbox = Arc::new((Mutex::new(VecDeque::new()), Condvar::new()));
        let accept_inbox = inbox.clone();
        thread::spawn(move || Self::accept_loop(listener, accept_inbox));
        Ok(TcpTransport { self_id, book, outbound: Mutex::new(HashMap::new()), inbox, poll_timeout })
    }

    fn accept_loop(listener: TcpListener, inbox: Inbox) {
        for conn in listener.incoming() {
            match conn {
                Ok(stream) => {
                    let inbox = inbox.clone();
                    thread::spawn(move || Self::read_loop(stream, inbox));
                }
                Err(e) => {
                    warn!(target: "submerge", error = ?e, "failed to accept an incoming connection");
                }
            }
        }
    }

    fn read_loop(mut stream: TcpStream, inbox: Inbox) {
        let mut id_buf = [0u8; 8];
        if stream.read_exact(&mut id_buf).is_err() {
            return;
        }
        let src = EndpointId(u64::from_be_bytes(id_buf));
        loop {
            let mut len_buf = [0u8; 4];
            if stream.read_exact(&mut len_buf).is_err() {
                break;
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            if stream.read_exact(&mut buf).is_err() {
                break;
            }
            let (lock, cvar) = &*inbox;
            lock.lock().unwrap().push_back((src, buf));
            cvar.notify_one();
        }
        warn!(target: "submerge", src = src.0, "connection closed");
    }

    fn dial(&self, dest: EndpointId) -> Result<TcpStream, Error> {
        let addr = self
            .book
            .get(dest)
            .ok_or_else(|| err(format!("no address book entry for endpoint {}", dest.0)))?;
        let mut stream = TcpStream::connect(addr)?;
        stream.write_all(&self.self_id.0.to_be_bytes())?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    fn send(&self, dest: EndpointId, buf: Vec<u8>) -> Result<(), Error> {
        let mut outbound = self.outbound.lock().unwrap();
        if !outbound.contains_key(&dest) {
            outbound.insert(dest, self.dial(dest)?);
        }
        let stream = outbound.get_mut(&dest).unwrap();
        let len = (buf.len() as u32).to_be_bytes();
        let write_result = stream.write_all(&len).and_then(|_| stream.write_all(&buf));
        if write_result.is_err() {
            outbound.remove(&dest);
            return Err(err(format!("write to endpoint {} failed, connection dropped", dest.0)));
        }
        Ok(())
    }

    fn recv(&self) -> Result<RecvOutcome, Error> {
        let (lock, cvar) = &*self.inbox;
        let mut queue = lock.lock().unwrap();
        if queue.is_empty() {
            let (guard, _timeout) = cvar.wait_timeout(queue, self.poll_timeout).unwrap();
            queue = guard;
        }
        match queue.pop_front() {
            Some((src, buf)) => Ok(RecvOutcome::Message { src, buf }),
            None => Ok(RecvOutcome::Timeout),
        }
    }
}
