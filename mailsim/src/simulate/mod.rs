//! Email simulation module for open and click behavior.

pub mod clicker;
pub mod engine;
pub mod fetch;
pub mod handler;
pub mod opener;
pub mod rates;

pub use clicker::{build_candidates, choose_links_weighted, ClickCandidate, DomainFilter};
pub use engine::{extract_plus_tag, PlannedClick, SimulationOutcome, SimulationPlan, Simulator};
pub use fetch::{FetchKind, FetchReport, Fetcher};
pub use handler::SimulationHandler;
pub use opener::{choose_open_target, OpenSource, OpenTarget};
pub use rates::{clamp_probability, resolve_rates, ResolvedRates};
