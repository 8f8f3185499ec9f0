//! HTTP search executor
//!
//! Reference [`SearchExecutor`] implementation that submits the registry
//! search form over HTTP. Features:
//! - User-Agent rotation
//! - Rate limiting with governor
//! - Randomized inter-request delay with an occasional longer think-pause
//! - Periodic long pause every N searches

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::{header::USER_AGENT, Client, StatusCode};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::executor::{ExecutorProvider, RawOutcome, RawStatus, SearchExecutor};
use crate::models::PersonFields;
use crate::space::{region_code, Combo};

/// Pool of realistic User-Agent strings for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

/// Timeout applied to the liveness probe, independent of the request timeout
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// HTTP form executor, one per worker
pub struct HttpExecutor {
    config: ExecutorConfig,
    worker_id: usize,
    client: Option<Client>,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    search_count: u64,
}

impl HttpExecutor {
    pub fn new(config: ExecutorConfig, worker_id: usize) -> Self {
        let rate = NonZeroU32::new(config.requests_per_second)
            .unwrap_or_else(|| NonZeroU32::new(1).expect("1 is non-zero"));
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Self {
            config,
            worker_id,
            client: None,
            rate_limiter,
            search_count: 0,
        }
    }

    fn random_user_agent() -> &'static str {
        USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
    }

    /// Randomized delay between searches; 5% of the time an extra 1-2s
    /// think-pause is added
    fn next_delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let mut secs = rng.gen_range(self.config.min_delay_secs..=self.config.max_delay_secs);
        if rng.gen_bool(0.05) {
            secs += rng.gen_range(1.0..=2.0);
        }
        Duration::from_secs_f64(secs)
    }

    fn form_fields(person: &PersonFields, combo: &Combo) -> Vec<(&'static str, String)> {
        vec![
            ("nombre", person.first_name.clone()),
            ("primerApellido", person.last_name_1.clone()),
            ("segundoApellido", person.last_name_2.clone()),
            ("sexo", person.gender.as_code().to_string()),
            ("diaNacimiento", format!("{:02}", combo.day)),
            ("mesNacimiento", format!("{:02}", combo.month)),
            ("selectedYear", combo.year.to_string()),
            (
                "claveEntidad",
                region_code(&combo.region).unwrap_or("NE").to_string(),
            ),
        ]
    }
}

#[async_trait]
impl SearchExecutor for HttpExecutor {
    async fn start(&mut self) -> Result<()> {
        url::Url::parse(&self.config.endpoint)
            .map_err(|e| Error::executor(format!("Invalid endpoint URL: {e}")))?;

        let client = Client::builder()
            .timeout(self.config.request_timeout())
            .gzip(true)
            .cookie_store(true)
            .build()
            .map_err(|e| Error::executor(format!("Failed to build HTTP client: {e}")))?;

        // Warm the session: the form endpoint sets cookies required by the
        // search submission
        let probe = client
            .get(&self.config.endpoint)
            .header(USER_AGENT, Self::random_user_agent())
            .send()
            .await
            .map_err(|e| Error::executor(format!("Endpoint unreachable: {e}")))?;

        if probe.status().is_server_error() {
            return Err(Error::executor(format!(
                "Endpoint returned {}",
                probe.status()
            )));
        }

        self.client = Some(client);
        tracing::debug!(worker_id = self.worker_id, "HTTP executor started");
        Ok(())
    }

    async fn execute(&mut self, person: &PersonFields, combo: &Combo) -> RawOutcome {
        let Some(client) = &self.client else {
            return RawOutcome::crashed();
        };

        self.rate_limiter.until_ready().await;
        tokio::time::sleep(self.next_delay()).await;

        let response = client
            .post(&self.config.endpoint)
            .header(USER_AGENT, Self::random_user_agent())
            .form(&Self::form_fields(person, combo))
            .send()
            .await;

        self.search_count += 1;
        if self.config.pause_every_n > 0 && self.search_count % self.config.pause_every_n == 0 {
            let jitter = rand::thread_rng().gen_range(-2.0..=3.0_f64);
            let pause = (self.config.pause_duration_secs as f64 + jitter).max(1.0);
            tracing::debug!(
                worker_id = self.worker_id,
                searches = self.search_count,
                pause_secs = pause,
                "Periodic executor pause"
            );
            tokio::time::sleep(Duration::from_secs_f64(pause)).await;
        }

        match response {
            Ok(resp) => {
                let status = resp.status();
                let content = resp.text().await.unwrap_or_default();

                if status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::SERVICE_UNAVAILABLE
                {
                    RawOutcome::rate_limited(content)
                } else if status.is_success() {
                    RawOutcome::ok(content)
                } else {
                    tracing::debug!(
                        worker_id = self.worker_id,
                        status = %status,
                        "Unexpected response status"
                    );
                    RawOutcome::error()
                }
            }
            Err(e) if e.is_connect() => {
                tracing::warn!(worker_id = self.worker_id, error = %e, "Connection lost");
                RawOutcome::crashed()
            }
            Err(e) => {
                tracing::debug!(worker_id = self.worker_id, error = %e, "Request failed");
                RawOutcome::error()
            }
        }
    }

    async fn is_alive(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };

        let probe = client
            .head(&self.config.endpoint)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        matches!(probe, Ok(resp) if !resp.status().is_server_error())
    }

    async fn stop(&mut self) {
        self.client = None;
        tracing::debug!(worker_id = self.worker_id, "HTTP executor stopped");
    }
}

/// Provider producing one [`HttpExecutor`] per worker
pub struct HttpExecutorProvider {
    config: ExecutorConfig,
}

impl HttpExecutorProvider {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }
}

impl ExecutorProvider for HttpExecutorProvider {
    fn provide(&self, worker_id: usize) -> Box<dyn SearchExecutor> {
        Box::new(HttpExecutor::new(self.config.clone(), worker_id))
    }
}
