//! Click simulation: candidate links, domain filtering, weighted selection.

use rand::Rng;
use tracing::{debug, info, warn};
use url::Url;

use super::rates::clamp_probability;
use crate::html::LinkWithRate;

/// Unsubscribe endpoints that are only clicked when explicitly opted in.
const UNSUBSCRIBE_PATTERNS: &[&str] = &["cl.s4.exct.net/unsub_center.aspx"];

/// Whether `url` points at a known unsubscribe endpoint (case-insensitive).
pub fn is_unsubscribe_link(url: &str) -> bool {
    let lower = url.to_lowercase();
    UNSUBSCRIBE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// A link that may be clicked, with its selection weight.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickCandidate {
    pub url: String,
    pub weight: f64,
    /// True when the weight came from the link's own `data-click-rate`.
    pub overridden: bool,
}

/// Domain allow/deny lists.
///
/// An entry matches a host equal to it or any subdomain of it. A host on both
/// lists is denied.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    allow: Option<Vec<String>>,
    deny: Vec<String>,
}

impl DomainFilter {
    pub fn new(allow: Option<&[String]>, deny: Option<&[String]>) -> Self {
        Self {
            allow: allow.map(normalize_domains),
            deny: deny.map(normalize_domains).unwrap_or_default(),
        }
    }

    pub fn permits(&self, url: &str) -> bool {
        let host = match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) {
            Some(host) => host,
            None => return false,
        };

        if self.deny.iter().any(|d| host_matches(&host, d)) {
            return false;
        }

        match &self.allow {
            Some(allow) => allow.iter().any(|a| host_matches(&host, a)),
            None => true,
        }
    }
}

fn normalize_domains(domains: &[String]) -> Vec<String> {
    domains
        .iter()
        .map(|d| d.trim().trim_start_matches('.').to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Turn extracted links into weighted click candidates.
///
/// A per-link override replaces the global click rate for that link. Unsubscribe
/// links without an override are dropped, then the domain lists are applied.
pub fn build_candidates(
    links: &[LinkWithRate],
    global_click_rate: f64,
    filter: &DomainFilter,
) -> Vec<ClickCandidate> {
    links
        .iter()
        .filter_map(|link| {
            if is_unsubscribe_link(&link.url) && link.click_rate.is_none() {
                debug!(url = %link.url, "filtered_unsubscribe_link_no_override");
                return None;
            }

            if !filter.permits(&link.url) {
                debug!(url = %link.url, "filtered_link_domain");
                return None;
            }

            Some(ClickCandidate {
                url: link.url.clone(),
                weight: clamp_probability(link.click_rate.unwrap_or(global_click_rate)),
                overridden: link.click_rate.is_some(),
            })
        })
        .collect()
}

/// Weighted sampling without replacement.
///
/// Each round picks one of the remaining candidates with probability
/// proportional to its weight. Zero-weight candidates are never picked.
pub fn choose_links_weighted<R: Rng + ?Sized>(
    candidates: &[ClickCandidate],
    max_clicks: usize,
    rng: &mut R,
) -> Vec<ClickCandidate> {
    let mut pool: Vec<&ClickCandidate> = candidates.iter().filter(|c| c.weight > 0.0).collect();

    if pool.is_empty() && !candidates.is_empty() {
        warn!(
            total_candidates = candidates.len(),
            "choose_links_weighted_all_zero_weights"
        );
    }

    let mut chosen = Vec::with_capacity(max_clicks.min(pool.len()));

    while chosen.len() < max_clicks && !pool.is_empty() {
        let total: f64 = pool.iter().map(|c| c.weight).sum();
        let mut target = rng.gen::<f64>() * total;

        // Float residue can leave `target` marginally positive after the last
        // subtraction; the last candidate absorbs it.
        let mut picked = pool.len() - 1;
        for (i, candidate) in pool.iter().enumerate() {
            if target < candidate.weight {
                picked = i;
                break;
            }
            target -= candidate.weight;
        }

        chosen.push(pool.swap_remove(picked).clone());
    }

    info!(
        total_candidates = candidates.len(),
        max_clicks = max_clicks,
        chosen_count = chosen.len(),
        chosen_urls = ?chosen.iter().map(|c| &c.url[..c.url.len().min(80)]).collect::<Vec<_>>(),
        "choose_links_weighted_complete"
    );

    chosen
}
