//! The simulation engine.
//!
//! A job is first turned into a [`SimulationPlan`] (every random draw happens
//! there, synchronously, with the caller's RNG) and then executed: sleep, fetch
//! the open target, sleep and fetch each chosen link. Fetch failures are
//! recorded on the outcome and never abort the remaining steps.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::sleep;
use tracing::info;

use super::clicker::{build_candidates, choose_links_weighted, ClickCandidate, DomainFilter};
use super::fetch::{FetchKind, FetchReport, Fetcher};
use super::opener::{choose_open_target, OpenSource, OpenTarget};
use super::rates::{resolve_rates, ResolvedRates};
use crate::config::SimulationSettings;
use crate::html::parse_email_html;
use crate::queue::{SimulatorJob, Source};
use crate::stage::JobState;
use crate::util::user_agent::{build_headers, pick_user_agent};

/// A link chosen for clicking and the pause before it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedClick {
    pub url: String,
    pub weight: f64,
    pub delay: Duration,
}

/// Everything decided up front for one job.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub rates: ResolvedRates,
    pub user_agent: String,
    pub open_delay: Duration,
    pub open_roll: f64,
    pub will_open: bool,
    pub open_target: Option<OpenTarget>,
    pub click_roll: f64,
    pub will_click: bool,
    /// Eligible links, computed even when the click roll fails.
    pub candidates: Vec<ClickCandidate>,
    pub clicks: Vec<PlannedClick>,
}

/// Per-job record logged at completion.
#[derive(Debug)]
pub struct SimulationOutcome {
    pub message_id: String,
    pub recipient: String,
    pub source: Source,
    pub customer_tag: Option<String>,
    pub rates: ResolvedRates,
    pub open_source: Option<OpenSource>,
    pub open: Option<FetchReport>,
    pub clicks: Vec<FetchReport>,
    pub states: Vec<JobState>,
    pub elapsed: Duration,
}

impl SimulationOutcome {
    pub fn opened(&self) -> bool {
        self.open.as_ref().is_some_and(FetchReport::succeeded)
    }

    pub fn clicked_urls(&self) -> Vec<&str> {
        self.clicks
            .iter()
            .filter(|r| r.succeeded())
            .map(|r| r.url.as_str())
            .collect()
    }

    /// URLs given up on after all attempts.
    pub fn abandoned_urls(&self) -> Vec<String> {
        self.open
            .iter()
            .chain(self.clicks.iter())
            .filter(|r| !r.succeeded())
            .map(|r| r.url.clone())
            .collect()
    }
}

/// Extract plus tag from an email address.
///
/// For "user+tag@example.com", returns Some("tag").
/// For "user@example.com", returns None.
pub fn extract_plus_tag(email: &str) -> Option<String> {
    let (local, _domain) = email.split_once('@')?;
    let (_, tag) = local.split_once('+')?;
    (!tag.is_empty()).then(|| tag.to_string())
}

fn uniform_delay<R: Rng + ?Sized>(rng: &mut R, (min, max): (u64, u64)) -> Duration {
    let ms = if max > min { rng.gen_range(min..=max) } else { min };
    Duration::from_millis(ms)
}

pub struct Simulator {
    settings: SimulationSettings,
    filter: DomainFilter,
    fetcher: Fetcher,
}

impl Simulator {
    pub fn new(settings: SimulationSettings) -> Result<Self, reqwest::Error> {
        let fetcher = Fetcher::new(&settings)?;
        let filter = DomainFilter::new(
            settings.allow_domains.as_deref(),
            settings.deny_domains.as_deref(),
        );

        Ok(Self {
            settings,
            filter,
            fetcher,
        })
    }

    /// Plan and run one job.
    pub async fn simulate(&self, job: &SimulatorJob) -> SimulationOutcome {
        // ThreadRng is not Send; draw everything before the first await.
        let plan = {
            let mut rng = rand::thread_rng();
            self.plan(job, &mut rng)
        };
        self.execute(job, plan).await
    }

    /// Resolve rates and draw every random decision for `job`.
    pub fn plan<R: Rng + ?Sized>(&self, job: &SimulatorJob, rng: &mut R) -> SimulationPlan {
        let html = parse_email_html(job.html.as_deref().unwrap_or(""));
        let rates = resolve_rates(&html.overrides, &self.settings);

        let user_agent = pick_user_agent(self.settings.user_agent_pool.as_deref(), rng);
        let open_delay = uniform_delay(rng, self.settings.open_delay_ms);

        let open_roll: f64 = rng.gen();
        let will_open = open_roll < rates.open;
        let open_target = if will_open {
            choose_open_target(&html.images)
        } else {
            None
        };

        let click_roll: f64 = rng.gen();
        let will_click = click_roll < rates.click;
        let candidates = build_candidates(&html.links, rates.click, &self.filter);

        let clicks = if will_click {
            choose_links_weighted(&candidates, self.settings.max_clicks, rng)
                .into_iter()
                .map(|c| PlannedClick {
                    url: c.url,
                    weight: c.weight,
                    delay: uniform_delay(rng, self.settings.click_delay_ms),
                })
                .collect()
        } else {
            Vec::new()
        };

        info!(
            message_id = %job.message_id,
            open_rate = rates.open,
            open_rate_overridden = rates.open_overridden,
            click_rate = rates.click,
            click_rate_overridden = rates.click_overridden,
            open_roll = open_roll,
            will_open = will_open,
            click_roll = click_roll,
            will_click = will_click,
            click_candidates = candidates.len(),
            clicks_planned = clicks.len(),
            "simulation_planned"
        );

        SimulationPlan {
            rates,
            user_agent,
            open_delay,
            open_roll,
            will_open,
            open_target,
            click_roll,
            will_click,
            candidates,
            clicks,
        }
    }

    /// Carry out a plan. Never fails; fetch errors end up on the outcome.
    pub async fn execute(&self, job: &SimulatorJob, plan: SimulationPlan) -> SimulationOutcome {
        let started = Instant::now();
        let headers = build_headers(&plan.user_agent);
        let mut states = vec![JobState::Received];

        info!(
            message_id = %job.message_id,
            delay_ms = plan.open_delay.as_millis() as u64,
            "worker_delay_start"
        );
        sleep(plan.open_delay).await;
        states.push(JobState::DelayedBeforeOpen);

        let mut open_source = None;
        let open = if plan.will_open {
            states.push(JobState::OpenAttempted);
            match &plan.open_target {
                Some(target) => {
                    open_source = Some(target.source);
                    Some(self.fetcher.fetch(&target.url, &headers, FetchKind::Open).await)
                }
                None => {
                    info!(message_id = %job.message_id, reason = "no_images", "worker_open_nothing_to_fetch");
                    None
                }
            }
        } else {
            info!(
                message_id = %job.message_id,
                reason = "probability_check_failed",
                "worker_open_skipped"
            );
            states.push(JobState::OpenSkipped);
            None
        };

        let mut clicks = Vec::with_capacity(plan.clicks.len());
        if plan.clicks.is_empty() {
            let reason = if !plan.will_click {
                "probability_check_failed"
            } else {
                "no_candidates"
            };
            info!(message_id = %job.message_id, reason = reason, "worker_click_skipped");
            states.push(JobState::ClickSkipped);
        } else {
            states.push(JobState::ClickAttempted);
            for (index, click) in plan.clicks.iter().enumerate() {
                info!(
                    message_id = %job.message_id,
                    click_number = index + 1,
                    delay_ms = click.delay.as_millis() as u64,
                    weight = click.weight,
                    url = %click.url,
                    "worker_click_starting"
                );
                sleep(click.delay).await;
                clicks.push(self.fetcher.fetch(&click.url, &headers, FetchKind::Click).await);
            }
        }

        let outcome = SimulationOutcome {
            message_id: job.message_id.clone(),
            recipient: job.recipient.clone(),
            source: job.source,
            customer_tag: extract_plus_tag(&job.recipient),
            rates: plan.rates,
            open_source,
            open,
            clicks,
            states,
            elapsed: started.elapsed(),
        };

        info!(
            message_id = %outcome.message_id,
            recipient = %outcome.recipient,
            source = %outcome.source,
            customer_tag = ?outcome.customer_tag,
            open_rate = outcome.rates.open,
            click_rate = outcome.rates.click,
            open_attempted = plan.will_open,
            opened = outcome.opened(),
            open_source = outcome.open_source.map(|s| s.as_str()),
            clicked_urls = ?outcome.clicked_urls(),
            failed_urls = ?outcome.abandoned_urls(),
            states = ?outcome.states.iter().map(JobState::as_str).collect::<Vec<_>>(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "simulation_complete"
        );

        outcome
    }
}
