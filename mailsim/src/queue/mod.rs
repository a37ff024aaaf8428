//! Queue layer: message types, the broker contract and its implementations.
//!
//! ## Architecture
//!
//! ```text
//! Ingress → inbound_webhooks → Normalizer → email_simulator → Simulator
//!                                                                 ↓
//!                                                 email_simulator_dead_letter
//! ```

pub mod amqp;
pub mod broker;
pub mod memory;
pub mod publisher;
pub mod types;

pub use amqp::AmqpBroker;
pub use broker::{Acknowledger, Broker, Deliveries, Delivery, OutboundMessage};
pub use memory::{MemoryBroker, QueueStats};
pub use publisher::Publisher;
pub use types::{
    CloudflareRawPayload, DeadLetter, InboundEnvelope, MailgunRawPayload, SimulatorJob, Source,
    DEAD_LETTER_QUEUE, INBOUND_QUEUE, SIMULATOR_QUEUE,
};
