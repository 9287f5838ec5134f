//! SDP rendezvous over HTTP.
//!
//! Both peers read and write SDP at a shared URL per handshake. The server
//! answers 409 while the slot is contended; callers back off (honouring
//! `Retry-After` when present) and retry within a fixed attempt budget.

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use surfline_core::config::NegotiationSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpPayload {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub handshake_id: String,
    pub from_peer: String,
    pub to_peer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Backoff when a 409 carries no usable `Retry-After`.
    pub default_delay: Duration,
    /// Ceiling on any single backoff.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&NegotiationSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &NegotiationSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            default_delay: Duration::from_millis(settings.default_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }

    /// Backoff for a 409 response with the given `Retry-After` value.
    pub fn delay_for(&self, retry_after: Option<&str>) -> Duration {
        retry_after
            .and_then(parse_retry_after)
            .unwrap_or(self.default_delay)
            .min(self.max_delay)
    }
}

/// Seconds, integer or decimal. HTTP-dates are not supported. Values too
/// large for a `Duration` saturate; the caller caps them at `max_delay`.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    } else {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("negotiation server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("sdp slot still contended after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("no sdp posted within {0:?}")]
    Timeout(Duration),
    #[error("invalid negotiation url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Merge `params` into the query of `url`. Keys already present keep their
/// value. With no params the input is returned as is.
pub fn append_params(url: &str, params: Option<&[(&str, &str)]>) -> Result<String, url::ParseError> {
    let Some(params) = params else {
        return Ok(url.to_owned());
    };
    let mut parsed = Url::parse(url)?;
    let existing: Vec<String> = parsed.query_pairs().map(|(k, _)| k.into_owned()).collect();
    {
        let mut query = parsed.query_pairs_mut();
        for (key, value) in params {
            if !existing.iter().any(|k| k == key) {
                query.append_pair(key, value);
            }
        }
    }
    Ok(parsed.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct SdpExchange {
    client: Client,
    policy: RetryPolicy,
}

enum Attempt<T> {
    Done(T),
    Conflict(Option<String>),
}

impl SdpExchange {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            client: Client::new(),
            policy,
        }
    }

    pub fn with_client(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch the SDP at `url`. `None` means nothing has been posted yet.
    pub async fn poll_sdp(
        &self,
        url: &str,
        params: Option<&[(&str, &str)]>,
    ) -> Result<Option<SdpPayload>, NegotiationError> {
        let target = append_params(url, params)?;
        let (client, target) = (&self.client, target.as_str());
        self.with_retry("poll", move || async move {
            let response = client.get(target).send().await?;
            match response.status() {
                StatusCode::OK => Ok(Attempt::Done(Some(response.json::<SdpPayload>().await?))),
                StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(Attempt::Done(None)),
                StatusCode::CONFLICT => Ok(Attempt::Conflict(retry_after(&response))),
                _ => Err(status_error(response).await),
            }
        })
        .await
    }

    /// Publish `payload` at `url`.
    pub async fn post_sdp(
        &self,
        url: &str,
        payload: &SdpPayload,
        params: Option<&[(&str, &str)]>,
    ) -> Result<(), NegotiationError> {
        let target = append_params(url, params)?;
        let (client, target) = (&self.client, target.as_str());
        self.with_retry("post", move || async move {
            let response = client.post(target).json(payload).send().await?;
            let status = response.status();
            if status.is_success() {
                Ok(Attempt::Done(()))
            } else if status == StatusCode::CONFLICT {
                Ok(Attempt::Conflict(retry_after(&response)))
            } else {
                Err(status_error(response).await)
            }
        })
        .await
    }

    /// Poll until the peer's SDP appears or `deadline` passes.
    pub async fn wait_for_sdp(
        &self,
        url: &str,
        params: Option<&[(&str, &str)]>,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Result<SdpPayload, NegotiationError> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(payload) = self.poll_sdp(url, params).await? {
                return Ok(payload);
            }
            if started.elapsed() + poll_interval > deadline {
                return Err(NegotiationError::Timeout(deadline));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut attempt: F) -> Result<T, NegotiationError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Attempt<T>, NegotiationError>>,
    {
        let max = self.policy.max_attempts.max(1);
        for n in 1..=max {
            match attempt().await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Conflict(retry_after) => {
                    if n == max {
                        break;
                    }
                    let delay = self.policy.delay_for(retry_after.as_deref());
                    tracing::debug!(
                        op,
                        attempt = n,
                        delay_ms = delay.as_millis() as u64,
                        "sdp slot contended, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        tracing::warn!(op, attempts = max, "sdp retries exhausted");
        Err(NegotiationError::RetriesExhausted { attempts: max })
    }
}

fn retry_after(response: &Response) -> Option<String> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn status_error(response: Response) -> NegotiationError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    NegotiationError::Status { status, body }
}
