//! Bearer-token JSON calls over `ureq`, retried on HTTP 429.
//!
//! Rate-limited calls back off exponentially with full jitter: the sleep
//! before retry `n` is uniform in `[0, min(cap, base * 2^n)]`. Once the next
//! sleep would carry the call past the give-up budget, the call fails with
//! [`ErrorCode::RateLimited`]. Every other HTTP failure is reported once as
//! [`ErrorCode::CollaboratorRequestFailed`] and left to the dispatch loop.

use anyhow::{Context, Result};
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use shepherd_core::error::{CodedError, ErrorCode};

/// Longest response body quoted in an error message.
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub give_up: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            give_up: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    /// Upper bound of the sleep before retry `attempt` (zero-based).
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// A full-jitter sleep for retry `attempt`.
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let ceiling = u64::try_from(self.ceiling(attempt).as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(0..=ceiling))
    }
}

/// Run `call`, sleeping and retrying while it answers 429.
///
/// A 404 yields `Ok(None)` when `allow_missing` is set.
fn send(
    what: &str,
    backoff: &Backoff,
    allow_missing: bool,
    mut call: impl FnMut() -> Result<ureq::Response, ureq::Error>,
) -> Result<Option<ureq::Response>> {
    let started = Instant::now();
    let mut rng = rand::thread_rng();
    let mut attempt = 0_u32;

    loop {
        match call() {
            Ok(response) => return Ok(Some(response)),
            Err(ureq::Error::Status(404, _)) if allow_missing => return Ok(None),
            Err(ureq::Error::Status(429, _)) => {
                let delay = backoff.delay(attempt, &mut rng);
                if started.elapsed() + delay > backoff.give_up {
                    return Err(CodedError::new(
                        ErrorCode::RateLimited,
                        format!(
                            "{what}: still rate limited after {}s",
                            started.elapsed().as_secs()
                        ),
                    )
                    .into());
                }
                warn!(
                    request = what,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "rate limited, backing off"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(ureq::Error::Status(status, response)) => {
                let mut body = response.into_string().unwrap_or_default();
                if body.len() > ERROR_BODY_LIMIT {
                    let mut end = ERROR_BODY_LIMIT;
                    while !body.is_char_boundary(end) {
                        end -= 1;
                    }
                    body.truncate(end);
                }
                return Err(CodedError::new(
                    ErrorCode::CollaboratorRequestFailed,
                    format!("{what}: HTTP {status}: {body}"),
                )
                .into());
            }
            Err(err) => {
                return Err(CodedError::new(
                    ErrorCode::CollaboratorRequestFailed,
                    format!("{what}: {err}"),
                )
                .into());
            }
        }
    }
}

/// A JSON API rooted at one base URL.
pub struct JsonClient {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
    backoff: Backoff,
}

impl JsonClient {
    #[must_use]
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("shepherd/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
            backoff: Backoff::default(),
        }
    }

    /// `path` under the base URL; absolute URLs pass through.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn request(&self, method: &str, url: &str, query: &[(&str, &str)]) -> ureq::Request {
        let mut request = self
            .agent
            .request(method, url)
            .set("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        for (key, value) in query {
            request = request.query(key, value);
        }
        request
    }

    fn exchange(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        allow_missing: bool,
        send_body: impl Fn(ureq::Request) -> Result<ureq::Response, ureq::Error>,
    ) -> Result<Option<ureq::Response>> {
        let url = self.url(path);
        let what = format!("{method} {url}");
        debug!(request = %what, "calling");
        send(&what, &self.backoff, allow_missing, || {
            send_body(self.request(method, &url, query))
        })
    }

    fn required(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        send_body: impl Fn(ureq::Request) -> Result<ureq::Response, ureq::Error>,
    ) -> Result<ureq::Response> {
        self.exchange(method, path, query, false, send_body)?
            .with_context(|| format!("{method} {path} returned nothing"))
    }

    /// # Errors
    ///
    /// Returns an error if the call fails or the body does not decode.
    pub fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        self.required("GET", path, query, ureq::Request::call)?
            .into_json()
            .with_context(|| format!("decode response of GET {path}"))
    }

    /// Like [`Self::get_json`], but a 404 is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the body does not decode.
    pub fn get_json_opt<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        self.exchange("GET", path, query, true, ureq::Request::call)?
            .map(|response| {
                response
                    .into_json()
                    .with_context(|| format!("decode response of GET {path}"))
            })
            .transpose()
    }

    /// # Errors
    ///
    /// Returns an error if the call fails or the body is not text.
    pub fn get_text(&self, path: &str) -> Result<String> {
        self.required("GET", path, &[], ureq::Request::call)?
            .into_string()
            .with_context(|| format!("read body of GET {path}"))
    }

    /// # Errors
    ///
    /// Returns an error if the call fails or the body does not decode.
    pub fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body).context("encode request body")?;
        self.required("POST", path, &[], |request| request.send_json(&body))?
            .into_json()
            .with_context(|| format!("decode response of POST {path}"))
    }

    /// POST a JSON body and discard the response.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub fn post_json_unit<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let body = serde_json::to_value(body).context("encode request body")?;
        self.required("POST", path, &[], |request| request.send_json(&body))?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub fn put_json<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let body = serde_json::to_value(body).context("encode request body")?;
        self.required("PUT", path, &[], |request| request.send_json(&body))?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<()> {
        self.required("POST", path, &[], |request| request.send_form(form))?;
        Ok(())
    }

    /// POST raw bytes with extra headers.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub fn post_bytes(&self, path: &str, headers: &[(&str, &str)], body: &[u8]) -> Result<()> {
        self.required("POST", path, &[], |request| {
            headers
                .iter()
                .fold(request, |request, (name, value)| request.set(name, value))
                .send_bytes(body)
        })?;
        Ok(())
    }
}

/// A `multipart/form-data` body with one `file` part per entry.
#[must_use]
pub fn multipart_files(boundary: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    for (name, content) in files {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{boundary}--\r\n"));
    body.into_bytes()
}
