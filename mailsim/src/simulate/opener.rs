//! Open simulation - choosing the single resource fetched to register an open.

use tracing::info;

/// Marketing-platform open pixels, matched case-insensitively.
const OPEN_PIXEL_PATTERNS: &[&str] = &[
    // Salesforce Marketing Cloud (classic ExactTarget)
    "://cl.s4.exct.net/open.aspx",
    // Salesforce Marketing Cloud Advanced
    "tracking.e360.salesforce.com/open",
];

/// Where the open target came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenSource {
    OpenPixel,
    FirstImage,
}

impl OpenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenSource::OpenPixel => "open_pixel",
            OpenSource::FirstImage => "first_image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTarget {
    pub url: String,
    pub source: OpenSource,
}

pub fn is_open_pixel(url: &str) -> bool {
    let lower = url.to_lowercase();
    OPEN_PIXEL_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Pick the one image to fetch: a known open pixel if present, otherwise the
/// first image in the document.
pub fn choose_open_target(images: &[String]) -> Option<OpenTarget> {
    let target = images
        .iter()
        .find(|url| is_open_pixel(url))
        .map(|url| OpenTarget {
            url: url.clone(),
            source: OpenSource::OpenPixel,
        })
        .or_else(|| {
            images.first().map(|url| OpenTarget {
                url: url.clone(),
                source: OpenSource::FirstImage,
            })
        });

    info!(
        images_found = images.len(),
        open_source = target.as_ref().map(|t| t.source.as_str()),
        "open_target_chosen"
    );

    target
}
