//! Raw-queue handler: decode, normalize, publish the job, then ack.

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::normalize;
use crate::error::{BrokerError, MalformedPayloadError};
use crate::queue::{Delivery, InboundEnvelope, Publisher, SimulatorJob, INBOUND_QUEUE};
use crate::stage::{DeliveryHandler, JobState};

pub struct NormalizeHandler {
    publisher: Publisher,
}

impl NormalizeHandler {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }
}

fn decode(data: &[u8]) -> Result<SimulatorJob, MalformedPayloadError> {
    let envelope: InboundEnvelope = serde_json::from_slice(data)?;
    normalize(envelope)
}

#[async_trait]
impl DeliveryHandler for NormalizeHandler {
    async fn handle(&self, delivery: Delivery) -> Result<(), BrokerError> {
        info!(
            queue = INBOUND_QUEUE,
            envelope_id = %delivery.log_id(),
            redelivered = delivery.redelivered,
            state = JobState::Received.as_str(),
            "envelope_received"
        );

        let job = match decode(&delivery.data) {
            Ok(job) => job,
            Err(e) => {
                // Nothing retry can fix.
                delivery.ack().await?;
                warn!(
                    queue = INBOUND_QUEUE,
                    envelope_id = %delivery.log_id(),
                    error = %e,
                    state = JobState::Dropped.as_str(),
                    "envelope_dropped"
                );
                return Ok(());
            }
        };

        if let Err(e) = self.publisher.publish_job(&job).await {
            error!(
                envelope_id = %delivery.log_id(),
                message_id = %job.message_id,
                error = %e,
                "job_publish_failed"
            );
            if let Err(nack_err) = delivery.nack(true).await {
                error!(envelope_id = %delivery.log_id(), error = %nack_err, "envelope_nack_failed");
            }
            return Err(e);
        }

        delivery.ack().await?;
        info!(
            queue = INBOUND_QUEUE,
            envelope_id = %delivery.log_id(),
            message_id = %job.message_id,
            state = JobState::Acknowledged.as_str(),
            "envelope_normalized"
        );
        Ok(())
    }
}
