//! HTML parsing utilities for extracting images, links, and rate overrides.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::types::{EmailHtml, GlobalOverrides, LinkWithRate};

const GLOBAL_MARKER: &str = r#"[data-scope="global"]"#;
const OPEN_RATE_ATTR: &str = "data-open-rate";
const CLICK_RATE_ATTR: &str = "data-click-rate";

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("Invalid selector")
}

/// Parse an email body once and pull out everything the simulation needs.
pub fn parse_email_html(html: &str) -> EmailHtml {
    let document = Html::parse_document(html);

    let parsed = EmailHtml {
        overrides: find_global_overrides(&document),
        images: extract_image_sources(&document),
        links: extract_links_with_rates(&document),
    };

    info!(
        html_length = html.len(),
        global_open_rate = ?parsed.overrides.open_rate,
        global_click_rate = ?parsed.overrides.click_rate,
        images_found = parsed.images.len(),
        links_found = parsed.links.len(),
        links_with_individual_rates = parsed.links.iter().filter(|l| l.click_rate.is_some()).count(),
        "html_parsed"
    );

    parsed
}

/// Resolve the global open/click overrides.
///
/// Markers are visited in document order and each attribute is taken from the
/// first marker that carries a usable value for it, so a later marker can
/// still fill in whatever an earlier one left out.
pub fn find_global_overrides(document: &Html) -> GlobalOverrides {
    let mut overrides = GlobalOverrides::default();

    for (idx, marker) in document.select(&selector(GLOBAL_MARKER)).enumerate() {
        if overrides.open_rate.is_none() {
            overrides.open_rate = rate_attr(&marker, OPEN_RATE_ATTR, idx);
        }
        if overrides.click_rate.is_none() {
            overrides.click_rate = rate_attr(&marker, CLICK_RATE_ATTR, idx);
        }
        if overrides.open_rate.is_some() && overrides.click_rate.is_some() {
            break;
        }
    }

    overrides
}

fn rate_attr(element: &ElementRef<'_>, attr: &str, marker_index: usize) -> Option<f64> {
    let raw = element.value().attr(attr)?;
    let rate = parse_rate(raw);
    if rate.is_none() {
        warn!(
            marker_index = marker_index,
            attribute = attr,
            raw_attribute = raw,
            "Invalid global rate value"
        );
    }
    rate
}

/// Parse a rate attribute. Out-of-range values (infinities included) are
/// accepted and clamped later; NaN and non-numbers are not.
pub fn parse_rate(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|rate| !rate.is_nan())
}

/// Resolve `raw` to an absolute http(s) URL.
fn absolute_http_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(url.into()),
        _ => None,
    }
}

/// Extract all absolute image source URLs in document order.
pub fn extract_image_sources(document: &Html) -> Vec<String> {
    let urls: Vec<String> = document
        .select(&selector("img[src]"))
        .filter_map(|img| img.value().attr("src"))
        .filter_map(absolute_http_url)
        .collect();

    debug!(count = urls.len(), "Extracted image sources");
    urls
}

/// Extract anchor targets with their individual click rates.
///
/// Relative and non-http(s) targets are skipped. Each URL appears once; the
/// first anchor pointing at it decides its override.
pub fn extract_links_with_rates(document: &Html) -> Vec<LinkWithRate> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in document.select(&selector("a[href]")) {
        let Some(url) = anchor.value().attr("href").and_then(absolute_http_url) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }

        let click_rate = anchor.value().attr(CLICK_RATE_ATTR).and_then(|raw| {
            let rate = parse_rate(raw);
            if rate.is_none() {
                warn!(
                    url = &url[..url.len().min(100)],
                    raw_attribute = raw,
                    "Invalid link click rate value"
                );
            }
            rate
        });

        links.push(LinkWithRate { url, click_rate });
    }

    debug!(count = links.len(), "Extracted links");
    links
}
