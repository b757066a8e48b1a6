use crate::{
    diagnostics::{DiagnosticEntry, DiagnosticsLog},
    Error, Result,
};
use puosu_types::api::{
    DisputeSweepReport, DistributePrizesRequest, EmergencyStopReport, EmergencyStopRequest,
    Failure, HealthReport, MarketAction, MarketActionReport, PayoutSweepReport,
    PrizeDistributionReport, ResultStatusReport, ReviewResultRequest, SimRunnerRequest,
    SimulationReport, SubmitResultRequest, Success, SweepRequest, TournamentSweepReport,
    TrendingReport, VerifyMatchReport, VerifyMatchRequest, WalletPayoutsRequest,
};
use puosu_types::now_ms;
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Timeout for HTTP requests.
const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Function calls are POSTs; they are only retried when this is set.
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            retry_non_idempotent: false,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Typed client for the automation function endpoints.
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    http: reqwest::Client,
    retry: RetryPolicy,
    diagnostics: Option<Arc<DiagnosticsLog>>,
}

impl Client {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(Error::InvalidScheme(base_url.scheme().to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()?;
        Ok(Self {
            base_url,
            http,
            retry: RetryPolicy::default(),
            diagnostics: None,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticsLog>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn diagnostics(&self) -> Option<&Arc<DiagnosticsLog>> {
        self.diagnostics.as_ref()
    }

    fn function_url(&self, function: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("functions/{function}"))?)
    }

    fn record(
        &self,
        label: &str,
        attempt: usize,
        outcome: &std::result::Result<reqwest::Response, reqwest::Error>,
        started: Instant,
    ) {
        let Some(diagnostics) = &self.diagnostics else {
            return;
        };
        let (status, ok, error) = match outcome {
            Ok(response) => {
                let status = response.status();
                let error = (!status.is_success()).then(|| status.to_string());
                (Some(status.as_u16()), status.is_success(), error)
            }
            Err(err) => (None, false, Some(err.to_string())),
        };
        diagnostics.record(DiagnosticEntry {
            function: label.to_string(),
            attempt: attempt as u32,
            status,
            ok,
            error,
            elapsed_ms: started.elapsed().as_millis() as u64,
            at_ms: now_ms(),
        });
    }

    /// Sends a request, retrying transport errors and retryable statuses per the policy.
    ///
    /// Returns the last response whatever its status; callers decide what a failure means.
    async fn send_with_retry(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        label: &str,
    ) -> Result<reqwest::Response> {
        let idempotent = method == Method::GET;
        let max_attempts = if idempotent || self.retry.retry_non_idempotent {
            self.retry.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self.http.request(method.clone(), url.clone());
            if let Some(body) = &body {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body.clone());
            }
            let started = Instant::now();
            let outcome = request.send().await;
            self.record(label, attempt, &outcome, started);

            let retryable = match &outcome {
                Ok(response) => is_retryable_status(response.status()),
                Err(err) => err.is_connect() || err.is_timeout(),
            };
            if !retryable || attempt >= max_attempts {
                return Ok(outcome?);
            }

            let backoff = self.retry.backoff(attempt);
            warn!(
                %method,
                url = %url,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "retrying request"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    pub async fn get_with_retry(&self, url: Url) -> Result<reqwest::Response> {
        let label = url.path().to_string();
        let response = self
            .send_with_retry(Method::GET, url.clone(), None, &label)
            .await?;
        ensure_success(Method::GET, &url, response).await
    }

    pub async fn post_bytes_with_retry(&self, url: Url, body: Vec<u8>) -> Result<reqwest::Response> {
        let label = url.path().to_string();
        let response = self
            .send_with_retry(Method::POST, url.clone(), Some(body), &label)
            .await?;
        ensure_success(Method::POST, &url, response).await
    }

    /// Invokes a function by name and decodes its success envelope.
    ///
    /// A failure envelope from the server becomes [`Error::Function`] carrying its kind.
    pub async fn invoke<Req, Resp>(&self, function: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = self.function_url(function)?;
        let body = serde_json::to_vec(request).map_err(Error::Encode)?;
        let response = self
            .send_with_retry(Method::POST, url, Some(body), function)
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(match serde_json::from_slice::<Failure>(&bytes) {
                Ok(failure) => Error::Function {
                    status,
                    error: failure.error,
                    kind: failure.kind,
                },
                Err(_) => Error::FailedWithBody {
                    status,
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                },
            });
        }
        let envelope: Success<Resp> = serde_json::from_slice(&bytes).map_err(Error::Decode)?;
        debug!(function, "function invoked");
        Ok(envelope.details)
    }

    pub async fn tournament_automation(
        &self,
        request: &SweepRequest,
    ) -> Result<TournamentSweepReport> {
        self.invoke("tournament-automation", request).await
    }

    pub async fn automated_wallet_payouts(
        &self,
        request: &WalletPayoutsRequest,
    ) -> Result<PayoutSweepReport> {
        self.invoke("automated-wallet-payouts", request).await
    }

    pub async fn distribute_tournament_prizes(
        &self,
        request: &DistributePrizesRequest,
    ) -> Result<PrizeDistributionReport> {
        self.invoke("distribute-tournament-prizes", request).await
    }

    pub async fn resolve_disputes(&self, request: &SweepRequest) -> Result<DisputeSweepReport> {
        self.invoke("resolve-disputes", request).await
    }

    pub async fn emergency_tournament_stop(
        &self,
        request: &EmergencyStopRequest,
    ) -> Result<EmergencyStopReport> {
        self.invoke("emergency-tournament-stop", request).await
    }

    pub async fn sim_runner(&self, request: &SimRunnerRequest) -> Result<SimulationReport> {
        self.invoke("sim-runner", request).await
    }

    pub async fn atomic_market_engine(&self, action: &MarketAction) -> Result<MarketActionReport> {
        self.invoke("atomic-market-engine", action).await
    }

    pub async fn platform_health_monitor(&self, request: &SweepRequest) -> Result<HealthReport> {
        self.invoke("platform-health-monitor", request).await
    }

    pub async fn trending_games_orchestrator(
        &self,
        request: &SweepRequest,
    ) -> Result<TrendingReport> {
        self.invoke("trending-games-orchestrator", request).await
    }

    pub async fn submit_result(&self, request: &SubmitResultRequest) -> Result<ResultStatusReport> {
        self.invoke("submit-result", request).await
    }

    pub async fn review_result(&self, request: &ReviewResultRequest) -> Result<ResultStatusReport> {
        self.invoke("review-result", request).await
    }

    pub async fn verify_match(&self, request: &VerifyMatchRequest) -> Result<VerifyMatchReport> {
        self.invoke("verify-match", request).await
    }

    /// Liveness probe.
    pub async fn healthz(&self) -> Result<bool> {
        #[derive(serde::Deserialize)]
        struct Healthz {
            ok: bool,
        }
        let url = self.base_url.join("healthz")?;
        let response = self.get_with_retry(url).await?;
        let body: Healthz = response.json().await?;
        Ok(body.ok)
    }

    /// Prometheus text exposition; `token` is sent as a bearer token when set.
    pub async fn prometheus_metrics(&self, token: Option<&str>) -> Result<String> {
        let url = self.base_url.join("metrics/prometheus")?;
        let mut request = self.http.get(url.clone());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = ensure_success(Method::GET, &url, request.send().await?).await?;
        Ok(response.text().await?)
    }
}

async fn ensure_success(
    method: Method,
    url: &Url,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::FailedWithBody {
        status,
        body: format!("{method} {url}: {body}"),
    })
}
