//! Email body inspection: images, links, and embedded rate overrides.

pub mod parser;
pub mod types;

pub use parser::{parse_email_html, parse_rate};
pub use types::{EmailHtml, GlobalOverrides, LinkWithRate};
