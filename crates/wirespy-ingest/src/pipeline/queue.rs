//! Bounded per-kind event queues.
//!
//! Each [`EventKind`] gets its own bounded crossbeam channel. Producers call
//! [`EventQueues::enqueue`], which blocks while the kind's queue is full;
//! that blocking is the pipeline's only backpressure mechanism. The single
//! consumer waits on all queues at once through [`QueueReceivers::next`].
//!
//! # Closing
//!
//! Enqueues hold a read lock on the close gate for the duration of the send,
//! and [`EventQueues::close`] takes the write lock. Every enqueue that
//! returned `Ok` therefore completed before the close, and the consumer's
//! drain sees it. Enqueues after the close fail with [`Error::ClosedQueue`].

use crate::{Error, Result};
use crossbeam_channel::{Receiver, Select, Sender};
use parking_lot::RwLock;
use std::time::Duration;
use wirespy_core::{Event, EventKind};

/// Producer side of the per-kind queues. Shared behind an `Arc`.
pub struct EventQueues {
    senders: Vec<Sender<Event>>,
    closed: RwLock<bool>,
}

/// Consumer side of the per-kind queues. Owned by the ingestion loop.
pub struct QueueReceivers {
    receivers: Vec<Receiver<Event>>,
}

/// Outcome of waiting on the queues.
#[derive(Debug)]
pub enum Polled {
    /// A record was dequeued.
    Event(Event),
    /// The wait timed out with every queue empty.
    Idle,
    /// Shutdown was requested.
    Shutdown,
}

/// Create one bounded queue per event kind.
pub fn event_queues(capacity: usize) -> (EventQueues, QueueReceivers) {
    let (senders, receivers): (Vec<_>, Vec<_>) = EventKind::ALL
        .iter()
        .map(|_| crossbeam_channel::bounded(capacity))
        .unzip();

    (
        EventQueues {
            senders,
            closed: RwLock::new(false),
        },
        QueueReceivers { receivers },
    )
}

impl EventQueues {
    /// Enqueue a record on its kind's queue, blocking while the queue is full.
    pub fn enqueue(&self, event: Event) -> Result<()> {
        let closed = self.closed.read();
        if *closed {
            return Err(Error::ClosedQueue);
        }

        self.senders[event.kind().index()]
            .send(event)
            .map_err(|_| Error::ClosedQueue)
    }

    /// Close all queues to further enqueues.
    ///
    /// Returns `false` if they were already closed.
    pub fn close(&self) -> bool {
        let mut closed = self.closed.write();
        if *closed {
            return false;
        }
        *closed = true;
        true
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Records currently waiting in a kind's queue.
    pub fn len(&self, kind: EventKind) -> usize {
        self.senders[kind.index()].len()
    }
}

impl QueueReceivers {
    /// Block until a record is available on any queue or shutdown is signaled.
    ///
    /// With `wait` set, gives up after that long and returns [`Polled::Idle`].
    /// Among several ready queues the choice is random, so no queue starves.
    /// `shutdown` signals by disconnecting (its sender is dropped).
    pub fn next(&self, shutdown: &Receiver<()>, wait: Option<Duration>) -> Polled {
        let mut select = Select::new();
        for receiver in &self.receivers {
            select.recv(receiver);
        }
        let shutdown_index = select.recv(shutdown);

        let oper = match wait {
            Some(wait) => match select.select_timeout(wait) {
                Ok(oper) => oper,
                Err(_) => return Polled::Idle,
            },
            None => select.select(),
        };

        let index = oper.index();
        if index == shutdown_index {
            let _ = oper.recv(shutdown);
            return Polled::Shutdown;
        }

        match oper.recv(&self.receivers[index]) {
            Ok(event) => Polled::Event(event),
            // All senders gone: nothing more can arrive.
            Err(_) => Polled::Shutdown,
        }
    }

    /// Take every record currently queued, kind by kind, without blocking.
    pub fn drain(&self) -> impl Iterator<Item = Event> + '_ {
        self.receivers.iter().flat_map(|receiver| receiver.try_iter())
    }

    /// Records currently waiting in a kind's queue.
    pub fn len(&self, kind: EventKind) -> usize {
        self.receivers[kind.index()].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use wirespy_core::{MessageCode, PeerSighting, TransactionAnnouncement};

    fn tx(hash: &str) -> Event {
        Event::Transaction(TransactionAnnouncement {
            peer_id: "enode-a".to_string(),
            hash: hash.to_string(),
            code: MessageCode::Transactions,
            observed_at: Utc::now(),
        })
    }

    fn peer(id: &str) -> Event {
        Event::Peer(PeerSighting {
            peer_id: id.to_string(),
            version: 66,
            address: "10.0.0.1:30303".to_string(),
            observed_at: Utc::now(),
        })
    }

    fn hash_of(polled: Polled) -> String {
        match polled {
            Polled::Event(Event::Transaction(tx)) => tx.hash,
            other => panic!("unexpected poll result: {:?}", other),
        }
    }

    #[test]
    fn test_fifo_within_kind() {
        let (queues, receivers) = event_queues(8);
        let (_shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        for hash in ["0x1", "0x2", "0x3"] {
            queues.enqueue(tx(hash)).unwrap();
        }

        assert_eq!(hash_of(receivers.next(&shutdown_rx, None)), "0x1");
        assert_eq!(hash_of(receivers.next(&shutdown_rx, None)), "0x2");
        assert_eq!(hash_of(receivers.next(&shutdown_rx, None)), "0x3");
    }

    #[test]
    fn test_routes_by_kind() {
        let (queues, receivers) = event_queues(8);
        queues.enqueue(tx("0x1")).unwrap();
        queues.enqueue(peer("enode-b")).unwrap();
        queues.enqueue(peer("enode-c")).unwrap();

        assert_eq!(receivers.len(EventKind::Transaction), 1);
        assert_eq!(receivers.len(EventKind::Peer), 2);
        assert_eq!(queues.len(EventKind::Block), 0);
    }

    #[test]
    fn test_idle_when_empty() {
        let (_queues, receivers) = event_queues(8);
        let (_shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let polled = receivers.next(&shutdown_rx, Some(Duration::from_millis(10)));
        assert!(matches!(polled, Polled::Idle));
    }

    #[test]
    fn test_shutdown_wakes_blocked_consumer() {
        let (_queues, receivers) = event_queues(8);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let consumer = thread::spawn(move || receivers.next(&shutdown_rx, None));
        thread::sleep(Duration::from_millis(20));
        drop(shutdown_tx);

        assert!(matches!(consumer.join().unwrap(), Polled::Shutdown));
    }

    #[test]
    fn test_enqueue_after_close_fails() {
        let (queues, _receivers) = event_queues(8);
        assert!(queues.close());
        assert!(queues.is_closed());
        assert!(matches!(queues.enqueue(tx("0x1")), Err(Error::ClosedQueue)));
    }

    #[test]
    fn test_double_close_is_guarded() {
        let (queues, _receivers) = event_queues(8);
        assert!(queues.close());
        assert!(!queues.close());
    }

    #[test]
    fn test_full_queue_blocks_producer() {
        let (queues, receivers) = event_queues(1);
        let queues = Arc::new(queues);
        let done = Arc::new(AtomicBool::new(false));

        queues.enqueue(tx("0x1")).unwrap();

        let producer = {
            let queues = Arc::clone(&queues);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                queues.enqueue(tx("0x2")).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst), "producer should be blocked");

        let (_shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        assert_eq!(hash_of(receivers.next(&shutdown_rx, None)), "0x1");

        producer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(hash_of(receivers.next(&shutdown_rx, None)), "0x2");
    }

    #[test]
    fn test_drain_takes_everything() {
        let (queues, receivers) = event_queues(8);
        queues.enqueue(tx("0x1")).unwrap();
        queues.enqueue(peer("enode-b")).unwrap();
        queues.enqueue(tx("0x2")).unwrap();

        assert_eq!(receivers.drain().count(), 3);
        assert_eq!(receivers.drain().count(), 0);
    }
}
