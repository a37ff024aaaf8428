//! In-process broker with the same delivery contract as RabbitMQ.
//!
//! Messages handed to a consumer stay unacknowledged until settled, and a
//! consumer holds at most `prefetch` of them at once (0 means unlimited). A
//! nack with requeue, or dropping an unsettled delivery, puts the message back
//! at the head of its queue flagged as redelivered. Used for single-process
//! runs and for exercising the pipeline in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Notify;
use tracing::debug;

use super::broker::{Acknowledger, Broker, Deliveries, Delivery, OutboundMessage};
use crate::error::BrokerError;

/// Counters for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub unacked: usize,
    pub acked: usize,
    pub requeued: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    stats: QueueStats,
    closed: bool,
}

#[derive(Default)]
struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panicking test thread must not wedge the remaining consumers.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn requeue(&self, mut message: StoredMessage) {
        message.redelivered = true;
        {
            let mut state = self.lock();
            state.stats.unacked = state.stats.unacked.saturating_sub(1);
            state.stats.requeued += 1;
            state.ready.push_front(message);
        }
        self.notify.notify_one();
    }
}

/// Unsettled deliveries held by one consumer.
struct ConsumerCredit {
    outstanding: AtomicUsize,
    limit: usize,
    released: Notify,
}

impl ConsumerCredit {
    fn new(prefetch: u16) -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            limit: if prefetch == 0 { usize::MAX } else { usize::from(prefetch) },
            released: Notify::new(),
        }
    }

    fn available(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) < self.limit
    }

    fn release(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.released.notify_one();
    }
}

/// In-memory [`Broker`].
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    available: AtomicBool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(queues.entry(name.to_string()).or_default())
    }

    /// Simulate an outage: while unavailable every publish fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn stats(&self, queue: &str) -> QueueStats {
        let queue = self.queue(queue);
        let state = queue.lock();
        QueueStats {
            ready: state.ready.len(),
            ..state.stats
        }
    }

    /// Bodies of the messages waiting in `queue`, head first.
    pub fn ready_messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.queue(queue)
            .lock()
            .ready
            .iter()
            .map(|m| m.body.clone())
            .collect()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), BrokerError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable(format!("queue {queue} is unreachable")));
        }

        let target = self.queue(queue);
        {
            let mut state = target.lock();
            if state.closed {
                return Err(BrokerError::Unavailable("broker closed".to_string()));
            }
            state.ready.push_back(StoredMessage {
                message_id: message.message_id,
                body: message.body,
                redelivered: false,
            });
        }
        target.notify.notify_one();

        debug!(queue = queue, "memory_broker_published");
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Deliveries, BrokerError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable(format!("queue {queue} is unreachable")));
        }

        let source = (self.queue(queue), Arc::new(ConsumerCredit::new(prefetch)));
        let stream = futures::stream::unfold(source, |(queue, credit)| async move {
            loop {
                let notified = queue.notify.notified();
                let released = credit.released.notified();
                {
                    let mut state = queue.lock();
                    if state.closed {
                        return None;
                    }
                    if credit.available() {
                        if let Some(message) = state.ready.pop_front() {
                            state.stats.unacked += 1;
                            credit.outstanding.fetch_add(1, Ordering::SeqCst);
                            drop(state);
                            drop(notified);
                            drop(released);

                            let delivery = Delivery::new(
                                message.body.clone(),
                                Some(message.message_id.clone()),
                                message.redelivered,
                                Box::new(MemoryAcker {
                                    queue: Arc::clone(&queue),
                                    credit: Arc::clone(&credit),
                                    message: Mutex::new(Some(message)),
                                }),
                            );
                            return Some((Ok(delivery), (queue, credit)));
                        }
                    }
                }
                tokio::select! {
                    _ = notified => {}
                    _ = released => {}
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn close(&self) {
        let queues: Vec<_> = self
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        for queue in queues {
            queue.lock().closed = true;
            queue.notify.notify_waiters();
        }
    }
}

/// Settles one in-memory delivery. Holds the message until then.
struct MemoryAcker {
    queue: Arc<MemoryQueue>,
    credit: Arc<ConsumerCredit>,
    message: Mutex<Option<StoredMessage>>,
}

impl MemoryAcker {
    fn take(&self) -> Result<StoredMessage, BrokerError> {
        self.message
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| BrokerError::Unavailable("delivery already settled".to_string()))
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.take()?;
        {
            let mut state = self.queue.lock();
            state.stats.unacked = state.stats.unacked.saturating_sub(1);
            state.stats.acked += 1;
        }
        self.credit.release();
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        let message = self.take()?;
        if requeue {
            self.queue.requeue(message);
        } else {
            let mut state = self.queue.lock();
            state.stats.unacked = state.stats.unacked.saturating_sub(1);
            state.stats.rejected += 1;
        }
        self.credit.release();
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        let pending = self
            .message
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(message) = pending {
            self.queue.requeue(message);
            self.credit.release();
        }
    }
}
