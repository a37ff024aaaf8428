//! Effective open/click probabilities for one email.

use crate::config::SimulationSettings;
use crate::html::GlobalOverrides;

/// Clamp a probability into `[0.0, 1.0]`. NaN never triggers anything.
pub fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Probabilities actually used for a job, after overrides and clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRates {
    pub open: f64,
    pub click: f64,
    pub open_overridden: bool,
    pub click_overridden: bool,
}

/// Prefer the HTML's global markers, fall back to configured defaults.
pub fn resolve_rates(overrides: &GlobalOverrides, settings: &SimulationSettings) -> ResolvedRates {
    ResolvedRates {
        open: clamp_probability(overrides.open_rate.unwrap_or(settings.open_probability)),
        click: clamp_probability(overrides.click_rate.unwrap_or(settings.click_probability)),
        open_overridden: overrides.open_rate.is_some(),
        click_overridden: overrides.click_rate.is_some(),
    }
}
