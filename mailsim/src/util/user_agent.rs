//! User agent rotation and browser-like request headers.

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, USER_AGENT};
use tracing::warn;

/// Built-in pool used when none is configured.
const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
];

/// Pick one user agent for a job from `pool`, or the built-in browsers.
pub fn pick_user_agent<R: Rng + ?Sized>(pool: Option<&[String]>, rng: &mut R) -> String {
    match pool {
        Some(agents) if !agents.is_empty() => agents
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| agents[0].clone()),
        _ => DEFAULT_USER_AGENTS
            .choose(rng)
            .copied()
            .unwrap_or(DEFAULT_USER_AGENTS[0])
            .to_string(),
    }
}

/// Headers sent with every simulated fetch.
pub fn build_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let ua = HeaderValue::from_str(user_agent).unwrap_or_else(|_| {
        warn!(user_agent = user_agent, "Invalid user agent, using default");
        HeaderValue::from_static(DEFAULT_USER_AGENTS[0])
    });
    headers.insert(USER_AGENT, ua);
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,image/avif,image/webp,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    headers
}
