//! Bounded FIFO of pending requests.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use cocaine_proto::Event;
use tokio::sync::mpsc;

use crate::bridge::ClientUpstream;

/// A queued request, waiting for a slave to attach to.
pub struct Load {
    pub event: Event,
    pub client_upstream: ClientUpstream,
    pub enqueue_time: DateTime<Utc>,
    /// The sender the Overseer uses to hand the chosen slave's channel id
    /// back to the caller of `enqueue`, once dispatched.
    pub dispatched: mpsc::UnboundedSender<u64>,
}

impl Load {
    pub fn new(event: Event, client_upstream: ClientUpstream, dispatched: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            event,
            client_upstream,
            enqueue_time: Utc::now(),
            dispatched,
        }
    }
}

/// Why a `push` was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    QueueOverflow,
}

/// A bounded FIFO of `Load`s, owned exclusively by the Overseer's strand.
pub struct Queue {
    items: VecDeque<Load>,
    limit: usize,
}

impl Queue {
    pub fn new(limit: usize) -> Self {
        Self {
            items: VecDeque::new(),
            limit,
        }
    }

    pub fn push(&mut self, load: Load) -> Result<(), QueueError> {
        if self.items.len() >= self.limit {
            return Err(QueueError::QueueOverflow);
        }
        self.items.push_back(load);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Load> {
        self.items.pop_front()
    }

    /// Pops entries while `pred` holds for the front of the queue, calling
    /// `consume` for each. Stops at the first load `pred` rejects, or when
    /// the queue is empty.
    pub fn drain_while(&mut self, mut pred: impl FnMut(&Load) -> bool, mut consume: impl FnMut(Load)) {
        while let Some(front) = self.items.front() {
            if !pred(front) {
                break;
            }
            let load = self.items.pop_front().expect("front checked above");
            consume(load);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ClientUpstream;

    fn fake_load(name: &str) -> Load {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (upstream, _handle) = ClientUpstream::new_test_pair();
        Load::new(Event::new(name), upstream, tx)
    }

    #[test]
    fn rejects_once_full() {
        let mut queue = Queue::new(1);
        queue.push(fake_load("a")).unwrap();
        assert_eq!(queue.push(fake_load("b")), Err(QueueError::QueueOverflow));
    }

    #[test]
    fn pops_in_fifo_order() {
        let mut queue = Queue::new(10);
        queue.push(fake_load("a")).unwrap();
        queue.push(fake_load("b")).unwrap();
        assert_eq!(queue.pop().unwrap().event.name, "a");
        assert_eq!(queue.pop().unwrap().event.name, "b");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn drain_while_stops_at_first_rejection() {
        let mut queue = Queue::new(10);
        queue.push(fake_load("a")).unwrap();
        queue.push(fake_load("b")).unwrap();
        queue.push(fake_load("c")).unwrap();

        let mut taken = Vec::new();
        let mut capacity = 2;
        queue.drain_while(
            |_| capacity > 0,
            |load| {
                capacity -= 1;
                taken.push(load.event.name.clone());
            },
        );
        assert_eq!(taken, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(queue.len(), 1);
    }
}
