use backon::{ExponentialBuilder, Retryable};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, Request, Response, StatusCode};
use std::fmt;
use tokio::time::Duration;
use tracing::warn;

/// Retry rules applied beneath every upstream request.
///
/// Only idempotent requests are retried. A retry happens when the response
/// status is in `retry_statuses` or the request failed before a response
/// arrived (timeout, refused connection). The wait before retry `n` is
/// `base_delay * backoff_factor^(n - 1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub retry_statuses: Vec<StatusCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(120),
            retry_statuses: vec![
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ],
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status)
    }

    pub fn is_idempotent(method: &Method) -> bool {
        matches!(
            *method,
            Method::GET
                | Method::HEAD
                | Method::OPTIONS
                | Method::PUT
                | Method::DELETE
                | Method::TRACE
        )
    }

    /// Wait before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = secs.max(0.0).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Like [`backoff`](Self::backoff), but a server-provided `Retry-After` wins.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(wait) => wait.min(self.max_delay),
            None => self.backoff(retry),
        }
    }

    /// Backoff schedule handed to `backon`; `retries` excludes the first attempt.
    pub fn backoff_builder(&self, retries: usize) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.backoff_factor as f32)
            .with_max_times(retries)
    }

    /// Executes `request`, retrying under this policy.
    ///
    /// When attempts run out the final response is returned as-is, even if
    /// its status is still retryable; the caller decides what a 5xx means.
    pub async fn send(
        &self,
        client: &Client,
        request: Request,
    ) -> Result<Response, reqwest::Error> {
        let retries = if Self::is_idempotent(request.method()) {
            self.max_attempts.max(1) as usize - 1
        } else {
            0
        };
        let mut retry = 0;

        let outcome = (|| async {
            let Some(this_try) = request.try_clone() else {
                return Err(Attempt::Uncloneable);
            };
            match client.execute(this_try).await {
                Ok(response) if self.should_retry_status(response.status()) => {
                    Err(Attempt::Status(response))
                }
                Ok(response) => Ok(response),
                Err(err) => Err(Attempt::Transport(err)),
            }
        })
        .retry(self.backoff_builder(retries))
        .when(|attempt| match attempt {
            Attempt::Status(_) => true,
            Attempt::Transport(err) => is_transient(err),
            Attempt::Uncloneable => false,
        })
        .adjust(|attempt, next| {
            next?;
            retry += 1;
            let delay = match attempt {
                Attempt::Status(response) => self.delay_for(retry, retry_after(response)),
                _ => self.backoff(retry),
            };
            warn!(
                "{} {} {}, retrying in {:?} (retry {}/{})",
                request.method(),
                request.url().path(),
                attempt,
                delay,
                retry,
                retries
            );
            Some(delay)
        })
        .await;

        match outcome {
            Ok(response) | Err(Attempt::Status(response)) => Ok(response),
            Err(Attempt::Transport(err)) => Err(err),
            Err(Attempt::Uncloneable) => client.execute(request).await,
        }
    }
}

/// Result of one try that did not produce a usable response.
enum Attempt {
    Status(Response),
    Transport(reqwest::Error),
    Uncloneable,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::Status(response) => write!(f, "returned {}", response.status()),
            Attempt::Transport(err) => write!(f, "failed: {}", err),
            Attempt::Uncloneable => f.write_str("cannot be replayed"),
        }
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
