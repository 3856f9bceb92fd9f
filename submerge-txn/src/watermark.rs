// The max-completed-request watermark engine: `mark_req_finished` in the
// source. Requests can finish out of id order (a later node program can
// return before an earlier one); this collapses the out-of-order tail back
// into a single monotonic `(max_done_id, max_done_clk)` pair as soon as the
// gap closes, without ever blocking a finish on the ones still outstanding.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use submerge_vers::{RequestId, VtId, VectorClock};

pub struct Watermark {
    outstanding: BinaryHeap<Reverse<RequestId>>,
    done: BinaryHeap<Reverse<RequestId>>,
    id_to_clk: BTreeMap<RequestId, VectorClock>,
    max_done_id: RequestId,
    max_done_clk: VectorClock,
}

impl Watermark {
    pub fn new(vt_id: VtId, n_vt: usize) -> Self {
        Watermark {
            outstanding: BinaryHeap::new(),
            done: BinaryHeap::new(),
            id_to_clk: BTreeMap::new(),
            max_done_id: RequestId(0),
            max_done_clk: VectorClock::new(vt_id, n_vt),
        }
    }

    /// Registers a newly-issued request as outstanding, carrying the clock
    /// it will contribute to `max_done_clk` once it finishes.
    pub fn track(&mut self, req_id: RequestId, clk: VectorClock) {
        self.outstanding.push(Reverse(req_id));
        self.id_to_clk.insert(req_id, clk);
    }

    /// True while `req_id` is tracked and hasn't yet been folded into the
    /// watermark (covers both "still outstanding" and "done but not yet the
    /// smallest outstanding id").
    pub fn is_tracked(&self, req_id: RequestId) -> bool {
        self.id_to_clk.contains_key(&req_id)
    }

    pub fn max_done(&self) -> (RequestId, &VectorClock) {
        (self.max_done_id, &self.max_done_clk)
    }

    /// Marks `req_id` finished. If it is the smallest outstanding id, the
    /// watermark advances past it and then keeps advancing past any run of
    /// ids already marked done out of order.
    pub fn finish(&mut self, req_id: RequestId) {
        let top = self.outstanding.peek().map(|Reverse(id)| *id);
        if top != Some(req_id) {
            self.done.push(Reverse(req_id));
            return;
        }
        self.outstanding.pop();
        self.advance(req_id);
        loop {
            let o = self.outstanding.peek().map(|Reverse(id)| *id);
            let d = self.done.peek().map(|Reverse(id)| *id);
            match (o, d) {
                (Some(o), Some(d)) if o == d => {
                    self.outstanding.pop();
                    self.done.pop();
                    self.advance(o);
                }
                _ => break,
            }
        }
    }

    fn advance(&mut self, id: RequestId) {
        let clk = self
            .id_to_clk
            .remove(&id)
            .expect("watermark: advancing past a request with no tracked clock");
        debug_assert!(id.0 > self.max_done_id.0, "watermark went backwards");
        self.max_done_id = id;
        self.max_done_clk = clk;
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::Watermark;
    use submerge_vers::{RequestId, VectorClock, VtId};

    fn clk(n: u64) -> VectorClock {
        let mut c = VectorClock::new(VtId(0), 1);
        for _ in 0..n {
            c.increment();
        }
        c
    }

    #[test]
    fn in_order_completion_advances_immediately() {
        let mut w = Watermark::new(VtId(0), 1);
        w.track(RequestId(1), clk(1));
        w.track(RequestId(2), clk(2));
        w.finish(RequestId(1));
        assert_eq!(w.max_done().0, RequestId(1));
        w.finish(RequestId(2));
        assert_eq!(w.max_done().0, RequestId(2));
    }

    #[test]
    fn out_of_order_completion_waits_then_collapses() {
        let mut w = Watermark::new(VtId(0), 1);
        w.track(RequestId(1), clk(1));
        w.track(RequestId(2), clk(2));
        w.track(RequestId(3), clk(3));

        w.finish(RequestId(3));
        assert_eq!(w.max_done().0, RequestId(0), "3 can't advance past missing 1,2");
        assert!(w.is_tracked(RequestId(3)));

        w.finish(RequestId(2));
        assert_eq!(w.max_done().0, RequestId(0), "2 can't advance past missing 1");

        w.finish(RequestId(1));
        assert_eq!(w.max_done().0, RequestId(3), "1 closes the gap and collapses 1,2,3");
        assert!(!w.is_tracked(RequestId(1)));
        assert!(!w.is_tracked(RequestId(2)));
        assert!(!w.is_tracked(RequestId(3)));
    }

    #[test]
    fn max_done_clk_is_the_clock_of_the_last_collapsed_id() {
        let mut w = Watermark::new(VtId(0), 1);
        w.track(RequestId(1), clk(1));
        w.track(RequestId(2), clk(2));
        w.finish(RequestId(2));
        w.finish(RequestId(1));
        assert_eq!(w.max_done().1, &clk(2));
    }
}
