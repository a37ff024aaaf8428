//! Typed publishing on top of a [`Broker`].
//!
//! Cheap to clone; every stage holds one and shares the broker connection
//! underneath.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::broker::{Broker, OutboundMessage};
use super::types::{
    DeadLetter, InboundEnvelope, SimulatorJob, DEAD_LETTER_QUEUE, INBOUND_QUEUE, SIMULATOR_QUEUE,
};
use crate::error::BrokerError;

#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    async fn publish_json<T: Serialize>(
        &self,
        queue: &str,
        message_id: String,
        value: &T,
    ) -> Result<(), BrokerError> {
        let body = serde_json::to_vec(value)?;
        self.broker
            .publish(queue, OutboundMessage { message_id, body })
            .await
    }

    /// Publish a raw envelope to the inbound_webhooks queue.
    pub async fn publish_inbound(&self, envelope: &InboundEnvelope) -> Result<(), BrokerError> {
        let message_id = envelope.envelope_id().to_string();
        self.publish_json(INBOUND_QUEUE, message_id.clone(), envelope)
            .await?;

        info!(
            queue = INBOUND_QUEUE,
            message_id = %message_id,
            source = %envelope.source(),
            "inbound_published"
        );
        Ok(())
    }

    /// Publish a normalized job to the email_simulator queue.
    pub async fn publish_job(&self, job: &SimulatorJob) -> Result<(), BrokerError> {
        self.publish_json(SIMULATOR_QUEUE, job.message_id.clone(), job)
            .await?;

        info!(
            queue = SIMULATOR_QUEUE,
            message_id = %job.message_id,
            source = %job.source,
            "job_published"
        );
        Ok(())
    }

    pub async fn publish_dead_letter(&self, letter: &DeadLetter) -> Result<(), BrokerError> {
        self.publish_json(DEAD_LETTER_QUEUE, letter.message_id.clone(), letter)
            .await?;

        info!(
            queue = DEAD_LETTER_QUEUE,
            message_id = %letter.message_id,
            reason = %letter.reason,
            "dead_letter_published"
        );
        Ok(())
    }
}
