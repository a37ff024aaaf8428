//! Work-queue handler: decode the job, simulate, dead-letter failures, ack.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::engine::Simulator;
use crate::error::{BrokerError, MalformedPayloadError};
use crate::queue::{DeadLetter, Delivery, Publisher, SimulatorJob, SIMULATOR_QUEUE};
use crate::stage::{DeliveryHandler, JobState};

pub struct SimulationHandler {
    simulator: Arc<Simulator>,
    publisher: Publisher,
}

impl SimulationHandler {
    pub fn new(simulator: Arc<Simulator>, publisher: Publisher) -> Self {
        Self {
            simulator,
            publisher,
        }
    }

    /// Dead letters are informational; failing to write one never blocks the ack.
    async fn dead_letter(&self, letter: DeadLetter) {
        if let Err(e) = self.publisher.publish_dead_letter(&letter).await {
            warn!(
                message_id = %letter.message_id,
                reason = %letter.reason,
                error = %e,
                "dead_letter_publish_failed"
            );
        }
    }
}

fn decode_job(data: &[u8]) -> Result<SimulatorJob, MalformedPayloadError> {
    let job: SimulatorJob = serde_json::from_slice(data)?;
    if job.recipient.trim().is_empty() {
        return Err(MalformedPayloadError::MissingRecipient);
    }
    Ok(job)
}

#[async_trait]
impl DeliveryHandler for SimulationHandler {
    async fn handle(&self, delivery: Delivery) -> Result<(), BrokerError> {
        info!(
            queue = SIMULATOR_QUEUE,
            message_id = %delivery.log_id(),
            redelivered = delivery.redelivered,
            state = JobState::Received.as_str(),
            "rabbitmq_job_received"
        );

        let job = match decode_job(&delivery.data) {
            Ok(job) if !job.message_id.trim().is_empty() => job,
            Ok(job) => {
                error!(recipient = %job.recipient, "rabbitmq_job_missing_message_id");
                return self.drop_undecodable(delivery, "missing_message_id").await;
            }
            Err(e) => {
                error!(
                    message_id = %delivery.log_id(),
                    error = %e,
                    "rabbitmq_job_parse_failed"
                );
                return self.drop_undecodable(delivery, "undecodable_job").await;
            }
        };

        let outcome = self.simulator.simulate(&job).await;

        let failed_urls = outcome.abandoned_urls();
        if !failed_urls.is_empty() {
            self.dead_letter(DeadLetter {
                message_id: job.message_id.clone(),
                reason: "fetch_failed".to_string(),
                failed_urls,
                body: None,
            })
            .await;
        }

        delivery.ack().await?;
        info!(
            queue = SIMULATOR_QUEUE,
            message_id = %job.message_id,
            state = JobState::Acknowledged.as_str(),
            "rabbitmq_job_completed"
        );
        Ok(())
    }
}

impl SimulationHandler {
    async fn drop_undecodable(&self, delivery: Delivery, reason: &str) -> Result<(), BrokerError> {
        self.dead_letter(DeadLetter {
            message_id: delivery.log_id().to_string(),
            reason: reason.to_string(),
            failed_urls: Vec::new(),
            body: Some(String::from_utf8_lossy(&delivery.data).into_owned()),
        })
        .await;

        delivery.ack().await?;
        warn!(
            queue = SIMULATOR_QUEUE,
            message_id = %delivery.log_id(),
            reason = reason,
            state = JobState::Dropped.as_str(),
            "rabbitmq_job_dropped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationSettings;
    use crate::queue::{Broker, MemoryBroker, OutboundMessage, Source, DEAD_LETTER_QUEUE};
    use futures::StreamExt;

    fn handler(broker: Arc<MemoryBroker>) -> SimulationHandler {
        let simulator = Simulator::new(SimulationSettings {
            open_delay_ms: (0, 0),
            click_delay_ms: (0, 0),
            fetch_max_attempts: 1,
            ..Default::default()
        })
        .unwrap();
        SimulationHandler::new(Arc::new(simulator), Publisher::new(broker))
    }

    async fn deliver(broker: &MemoryBroker, body: &[u8]) -> Delivery {
        broker
            .publish(
                SIMULATOR_QUEUE,
                OutboundMessage {
                    message_id: "m-1".to_string(),
                    body: body.to_vec(),
                },
            )
            .await
            .unwrap();
        let mut deliveries = broker.consume(SIMULATOR_QUEUE, 1).await.unwrap();
        deliveries.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_undecodable_job_is_acked_and_dead_lettered() {
        let broker = Arc::new(MemoryBroker::new());
        let delivery = deliver(&broker, b"{not json").await;

        handler(broker.clone()).handle(delivery).await.unwrap();

        let stats = broker.stats(SIMULATOR_QUEUE);
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.ready, 0);

        let letters = broker.ready_messages(DEAD_LETTER_QUEUE);
        assert_eq!(letters.len(), 1);
        let letter: DeadLetter = serde_json::from_slice(&letters[0]).unwrap();
        assert_eq!(letter.message_id, "m-1");
        assert_eq!(letter.reason, "undecodable_job");
        assert_eq!(letter.body.as_deref(), Some("{not json"));
    }

    #[tokio::test]
    async fn test_job_without_html_is_acked() {
        let broker = Arc::new(MemoryBroker::new());
        let job = SimulatorJob::new(
            "msg-9".to_string(),
            "user@example.com".to_string(),
            None,
            Source::Mailgun,
        );
        let delivery = deliver(&broker, &serde_json::to_vec(&job).unwrap()).await;

        handler(broker.clone()).handle(delivery).await.unwrap();

        assert_eq!(broker.stats(SIMULATOR_QUEUE).acked, 1);
        assert!(broker.ready_messages(DEAD_LETTER_QUEUE).is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_outage_still_acks() {
        let broker = Arc::new(MemoryBroker::new());
        let delivery = deliver(&broker, br#"{"message_id":"","recipient":"a@b.c","source":"mailgun"}"#).await;
        broker.set_available(false);

        handler(broker.clone()).handle(delivery).await.unwrap();
        assert_eq!(broker.stats(SIMULATOR_QUEUE).acked, 1);
    }
}
