//! router.rs
//! In-process delivery between named threads.
//!
//! - `Inbox`: bounded FIFO, non-blocking push that evicts the oldest entry on overflow
//! - `MessageRouter`: concurrent address -> inbox registry
//!
//! Messages from one sender to one recipient stay in order; nothing is promised across senders.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crossbeam_queue::ArrayQueue;
use dashmap::{DashMap, mapref::entry::Entry};

use crate::comms::message::{Message, MessageBody};
use crate::error::RouterError;

pub const DEFAULT_INBOX_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct Inbox {
    queue: Arc<ArrayQueue<Message>>,
    dropped: Arc<AtomicU64>,
}

impl Inbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Never blocks. Returns true if the oldest pending message was evicted.
    #[inline]
    pub fn push(&self, msg: Message) -> bool {
        let evicted = self.queue.force_push(msg).is_some();
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Takes every pending message, oldest first.
    pub fn drain(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.queue.len());
        self.drain_into(&mut out);
        out
    }

    /// Allocation-free variant for the control loops: appends into `buf`.
    #[inline]
    pub fn drain_into(&self, buf: &mut Vec<Message>) -> usize {
        let before = buf.len();
        while let Some(m) = self.queue.pop() {
            buf.push(m);
        }
        buf.len() - before
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new(DEFAULT_INBOX_CAPACITY)
    }
}

#[derive(Default)]
pub struct MessageRouter {
    inboxes: DashMap<String, Inbox>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: &str, inbox: Inbox) -> Result<(), RouterError> {
        match self.inboxes.entry(address.to_string()) {
            Entry::Occupied(_) => Err(RouterError::DuplicateAddress(address.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(inbox);
                Ok(())
            }
        }
    }

    /// Non-blocking enqueue into `to`'s inbox.
    pub fn send(&self, from: &str, to: &str, body: MessageBody) -> Result<(), RouterError> {
        let inbox = self
            .inboxes
            .get(to)
            .ok_or_else(|| RouterError::UnknownAddressee(to.to_string()))?;
        inbox.push(Message::new(from, body));
        Ok(())
    }

    pub fn inbox(&self, address: &str) -> Option<Inbox> {
        self.inboxes.get(address).map(|i| i.clone())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.inboxes.contains_key(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.inboxes.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::message::PeakTorqueMsg;
    use crate::model::side::Side;
    use std::thread;

    fn torque(v: f64) -> MessageBody {
        MessageBody::PeakTorque(PeakTorqueMsg { side: Side::Left, torque_nm: v })
    }

    fn value(m: &Message) -> f64 {
        match m.body {
            MessageBody::PeakTorque(p) => p.torque_nm,
            _ => f64::NAN,
        }
    }

    #[test]
    fn duplicate_and_unknown_addresses() {
        let router = MessageRouter::new();
        router.register("exo_left", Inbox::new(4)).unwrap();
        assert_eq!(
            router.register("exo_left", Inbox::new(4)),
            Err(RouterError::DuplicateAddress("exo_left".into()))
        );
        assert_eq!(
            router.send("remote", "exo_right", torque(1.0)),
            Err(RouterError::UnknownAddressee("exo_right".into()))
        );
    }

    #[test]
    fn overflow_drops_oldest_and_keeps_order() {
        let router = MessageRouter::new();
        let inbox = Inbox::new(3);
        router.register("exo_left", inbox.clone()).unwrap();
        for v in 1..=5 {
            router.send("remote", "exo_left", torque(v as f64)).unwrap();
        }
        let got: Vec<f64> = inbox.drain().iter().map(value).collect();
        assert_eq!(got, vec![3.0, 4.0, 5.0]);
        assert_eq!(inbox.dropped(), 2);
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn per_sender_fifo_under_concurrency() {
        let router = Arc::new(MessageRouter::new());
        let inbox = Inbox::new(4096);
        router.register("exo_right", inbox.clone()).unwrap();

        let senders: Vec<_> = ["gait", "remote"]
            .into_iter()
            .map(|name| {
                let r = router.clone();
                thread::spawn(move || {
                    for v in 0..500 {
                        r.send(name, "exo_right", torque(v as f64)).unwrap();
                    }
                })
            })
            .collect();
        for s in senders {
            s.join().unwrap();
        }

        let all = inbox.drain();
        assert_eq!(all.len(), 1000);
        for name in ["gait", "remote"] {
            let seq: Vec<f64> = all.iter().filter(|m| m.sender == name).map(value).collect();
            assert!(seq.windows(2).all(|w| w[0] < w[1]), "{name} out of order");
        }
    }
}
