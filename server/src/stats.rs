//! Third-party match statistics over HTTP.

use anyhow::Context;
use puosu_execution::{GameStatsSource, StatsError};
use puosu_types::wager::{Challenge, MatchStats};
use puosu_types::UserId;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Fetches `GET {base}/matches/{lobby_id}/players/{user_id}`. Single attempt, no retries.
pub struct HttpStatsSource {
    client: Client,
    base: Option<Url>,
}

impl HttpStatsSource {
    pub fn new(base: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let base = base
            .map(|raw| {
                let mut url = Url::parse(raw).with_context(|| format!("invalid stats url: {raw}"))?;
                if !url.path().ends_with('/') {
                    let path = format!("{}/", url.path());
                    url.set_path(&path);
                }
                Ok::<_, anyhow::Error>(url)
            })
            .transpose()?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build stats http client")?;
        Ok(Self { client, base })
    }

    fn player_url(&self, challenge: &Challenge, user_id: UserId) -> Result<Url, StatsError> {
        let base = self
            .base
            .as_ref()
            .ok_or_else(|| StatsError::Unavailable("no stats api configured".into()))?;
        base.join(&format!("matches/{}/players/{user_id}", challenge.lobby_id))
            .map_err(|err| StatsError::Unavailable(format!("bad stats url: {err}")))
    }
}

impl GameStatsSource for HttpStatsSource {
    async fn fetch_stats(
        &self,
        challenge: &Challenge,
        user_id: UserId,
    ) -> Result<MatchStats, StatsError> {
        let url = self.player_url(challenge, user_id)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| StatsError::Unavailable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StatsError::Unavailable(format!("stats api returned {status}")));
        }
        response
            .json::<MatchStats>()
            .await
            .map_err(|err| StatsError::Invalid(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::routing::get;
    use axum::{Json, Router};
    use puosu_types::wager::ChallengeType;
    use puosu_types::Money;
    use uuid::Uuid;

    fn challenge() -> Challenge {
        Challenge::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ChallengeType::OneVsOne,
            Money::from_units(1),
            2,
            0,
        )
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn test_unconfigured_source_is_unavailable() {
        let source = HttpStatsSource::new(None, Duration::from_secs(1)).unwrap();
        let err = source
            .fetch_stats(&challenge(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StatsError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_fetches_player_stats() {
        let router = Router::new().route(
            "/v1/matches/:lobby/players/:user",
            get(|Path((_lobby, _user)): Path<(String, String)>| async {
                Json(serde_json::json!({ "score": 1200, "kills": 9, "deaths": 2, "assists": 4 }))
            }),
        );
        let base = serve(router).await;
        let source = HttpStatsSource::new(Some(&base), Duration::from_secs(5)).unwrap();
        let stats = source
            .fetch_stats(&challenge(), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(stats.score, 1200);
        assert_eq!(stats.kills, 9);
    }

    #[tokio::test]
    async fn test_error_status_and_bad_payload() {
        let router = Router::new()
            .route(
                "/v1/matches/:lobby/players/:user",
                get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
            );
        let base = serve(router).await;
        let source = HttpStatsSource::new(Some(&base), Duration::from_secs(5)).unwrap();
        let err = source
            .fetch_stats(&challenge(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StatsError::Unavailable(_)));

        let router = Router::new().route(
            "/v1/matches/:lobby/players/:user",
            get(|| async { Json(serde_json::json!({ "kills": -3 })) }),
        );
        let base = serve(router).await;
        let source = HttpStatsSource::new(Some(&base), Duration::from_secs(5)).unwrap();
        let err = source
            .fetch_stats(&challenge(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StatsError::Invalid(_)));
    }
}
