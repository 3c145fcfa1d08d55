// src/fetch/mod.rs

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::debug;

pub mod resolve;
pub mod retry;
pub mod sheets;

pub use resolve::{DatasetSource, Origin, Resolved, SourceResolver};
pub use retry::{get_text_with_retry, RetryPolicy};

/// Status and body of a completed HTTP exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The network seam. `Err` means the request never produced a response
/// (DNS, connect, TLS, reset); every HTTP status comes back as `Ok`.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// [`Transport`] over a shared `reqwest::Client`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .with_context(|| format!("reading body from {}", url))?;
        Ok(HttpResponse { status, body })
    }
}

/// Drop a leading UTF-8 byte order mark.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Clone, Debug)]
    pub enum Scripted {
        Status(u16, String),
        NetworkError,
    }

    /// Replays queued responses per URL fragment; the last response for a
    /// fragment repeats once its queue is down to one entry.
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: Mutex<Vec<(String, VecDeque<Scripted>)>>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(self, fragment: &str, responses: Vec<Scripted>) -> Self {
            self.routes
                .lock()
                .unwrap()
                .push((fragment.to_string(), responses.into()));
            self
        }

        pub fn ok(self, fragment: &str, body: &str) -> Self {
            self.route(fragment, vec![Scripted::Status(200, body.to_string())])
        }

        pub fn calls(&self, fragment: &str) -> usize {
            self.calls.lock().unwrap().get(fragment).copied().unwrap_or(0)
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<HttpResponse> {
            let mut routes = self.routes.lock().unwrap();
            let Some((fragment, queue)) = routes.iter_mut().find(|(f, _)| url.contains(f.as_str()))
            else {
                anyhow::bail!("no scripted response for {}", url);
            };
            *self.calls.lock().unwrap().entry(fragment.clone()).or_default() += 1;
            let next = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            match next {
                Some(Scripted::Status(status, body)) => Ok(HttpResponse { status, body }),
                Some(Scripted::NetworkError) => anyhow::bail!("connection reset"),
                None => anyhow::bail!("empty script for {}", url),
            }
        }
    }
}
