//! Type definitions for HTML parsing.

/// An anchor target with its optional `data-click-rate` override.
///
/// The override is kept exactly as written; clamping happens when the
/// simulation engine turns it into a weight.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkWithRate {
    pub url: String,
    pub click_rate: Option<f64>,
}

impl LinkWithRate {
    pub fn new(url: impl Into<String>, click_rate: Option<f64>) -> Self {
        Self {
            url: url.into(),
            click_rate,
        }
    }
}

/// Document-wide rates from `data-scope="global"` markers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalOverrides {
    pub open_rate: Option<f64>,
    pub click_rate: Option<f64>,
}

/// Everything the simulation engine needs from one email body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailHtml {
    pub overrides: GlobalOverrides,
    /// Absolute http(s) image sources in document order.
    pub images: Vec<String>,
    /// Absolute http(s) anchor targets, first occurrence of each URL.
    pub links: Vec<LinkWithRate>,
}
