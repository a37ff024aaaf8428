//! Generic consumer loop shared by the normalizer and the simulator.
//!
//! A permit is taken before pulling the next delivery and each delivery runs on
//! its own task, so at most `concurrency` deliveries are in flight. On shutdown
//! the stage stops pulling, waits for in-flight handlers to settle their
//! deliveries and returns. A handler error is fatal to the stage.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::BrokerError;
use crate::queue::{Broker, Delivery};

/// Lifecycle of one job through a stage.
///
/// ```text
/// Received → DelayedBeforeOpen → {OpenAttempted|OpenSkipped}
///          → {ClickAttempted|ClickSkipped} → Acknowledged
/// Received → Dropped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    DelayedBeforeOpen,
    OpenAttempted,
    OpenSkipped,
    ClickAttempted,
    ClickSkipped,
    Acknowledged,
    Dropped,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Received => "received",
            JobState::DelayedBeforeOpen => "delayed_before_open",
            JobState::OpenAttempted => "open_attempted",
            JobState::OpenSkipped => "open_skipped",
            JobState::ClickAttempted => "click_attempted",
            JobState::ClickSkipped => "click_skipped",
            JobState::Acknowledged => "acknowledged",
            JobState::Dropped => "dropped",
        }
    }
}

/// Processes and settles one delivery.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Must ack or nack `delivery` before returning `Ok`. An `Err` stops the stage.
    async fn handle(&self, delivery: Delivery) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone)]
pub struct Stage {
    name: &'static str,
    queue: &'static str,
    concurrency: usize,
}

impl Stage {
    pub fn new(name: &'static str, queue: &'static str, concurrency: usize) -> Self {
        Self {
            name,
            queue,
            concurrency: concurrency.max(1),
        }
    }

    /// Consume `queue` until `shutdown` resolves or a fatal broker error occurs.
    pub async fn run<F>(
        &self,
        broker: Arc<dyn Broker>,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: F,
    ) -> Result<(), BrokerError>
    where
        F: Future<Output = ()> + Send,
    {
        let prefetch = Config::prefetch(self.concurrency);
        let mut deliveries = broker.consume(self.queue, prefetch).await?;
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<Result<(), BrokerError>> = JoinSet::new();
        let mut held: Option<OwnedSemaphorePermit> = None;

        info!(
            stage = self.name,
            queue = self.queue,
            concurrency = self.concurrency,
            prefetch = prefetch,
            "stage_started"
        );

        tokio::pin!(shutdown);

        let outcome = loop {
            let next = tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!(stage = self.name, in_flight = tasks.len(), "stage_stopping");
                    break Ok(());
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = self.settled(joined) {
                        break Err(e);
                    }
                    continue;
                }

                permit = semaphore.clone().acquire_owned(), if held.is_none() => {
                    // The semaphore is never closed.
                    held = permit.ok();
                    continue;
                }

                next = deliveries.next(), if held.is_some() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let permit = held.take();
                    let handler = Arc::clone(&handler);
                    tasks.spawn(async move {
                        let _permit = permit;
                        handler.handle(delivery).await
                    });
                }
                Some(Err(e)) => {
                    error!(stage = self.name, queue = self.queue, error = %e, "stage_delivery_error");
                    break Err(e);
                }
                None => {
                    warn!(stage = self.name, queue = self.queue, "stage_consumer_closed");
                    break Err(BrokerError::ConsumerClosed(self.queue.to_string()));
                }
            }
        };

        let mut outcome = outcome;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = self.settled(joined) {
                outcome = outcome.and(Err(e));
            }
        }

        match &outcome {
            Ok(()) => info!(stage = self.name, "stage_stopped"),
            Err(e) => error!(stage = self.name, error = %e, "stage_failed"),
        }
        outcome
    }

    fn settled(&self, joined: Result<Result<(), BrokerError>, JoinError>) -> Result<(), BrokerError> {
        match joined {
            Ok(result) => {
                if let Err(e) = &result {
                    error!(stage = self.name, error = %e, "stage_handler_failed");
                }
                result
            }
            Err(e) => {
                // The delivery was dropped unsettled and goes back to the queue.
                error!(stage = self.name, error = %e, "stage_handler_panicked");
                Ok(())
            }
        }
    }
}
