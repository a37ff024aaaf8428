//! mailsim - queue-decoupled email webhook ingestion and open/click simulation.
//!
//! This library provides shared modules for the three binaries:
//! - `mailsim-ingress`: Thin web server for receiving webhooks
//! - `mailsim-normalizer`: Turns raw provider payloads into simulator jobs
//! - `mailsim-worker`: Email simulator for opens and clicks
//!
//! ## Architecture
//!
//! ```text
//! Webhooks → Ingress → inbound_webhooks → Normalizer → email_simulator → Worker
//! ```

pub mod config;
pub mod error;
pub mod html;
pub mod ingress;
pub mod normalize;
pub mod queue;
pub mod shutdown;
pub mod simulate;
pub mod stage;
pub mod telemetry;
pub mod util;

// Re-export commonly used types
pub use config::{Config, SimulationSettings};
pub use error::{AuthError, BrokerError, FetchError, MalformedPayloadError};
pub use ingress::{router, AppState};
pub use normalize::{normalize, NormalizeHandler};
pub use queue::{
    AmqpBroker, Broker, InboundEnvelope, MemoryBroker, Publisher, SimulatorJob, DEAD_LETTER_QUEUE,
    INBOUND_QUEUE, SIMULATOR_QUEUE,
};
pub use simulate::{SimulationHandler, Simulator};
pub use stage::{DeliveryHandler, JobState, Stage};
