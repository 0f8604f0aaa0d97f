//! Blocking HTTP plumbing shared by the catalog clients.
//!
//! Clients talk to [`HttpTransport`] rather than `ureq` directly so access
//! discipline (spacing, retries, ban detection) can be exercised against a
//! scripted transport.

use std::io::Read;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Response with any status code; only transport-level failures are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, String>;
    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<HttpResponse, String>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(20))
            .timeout_write(Duration::from_secs(7))
            .user_agent(USER_AGENT)
            .build();
        Self { agent }
    }

    fn parse_retry_after(response: &ureq::Response) -> Option<Duration> {
        response
            .header("Retry-After")
            .and_then(|value| parse_retry_after_value(value, Utc::now()))
    }

    fn into_http_response(response: ureq::Response) -> Result<HttpResponse, String> {
        let status = response.status();
        let retry_after = Self::parse_retry_after(&response);
        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|error| format!("Failed to read response: {error}"))?;
        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }

    fn settle_call(
        outcome: Result<ureq::Response, ureq::Error>,
    ) -> Result<HttpResponse, String> {
        match outcome {
            Ok(response) => Self::into_http_response(response),
            Err(ureq::Error::Status(_, response)) => Self::into_http_response(response),
            Err(ureq::Error::Transport(transport)) => {
                Err(format!("Request failed: {transport}"))
            }
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport for UreqTransport {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, String> {
        let mut request = self.agent.get(url);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        Self::settle_call(request.call())
    }

    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<HttpResponse, String> {
        let mut request = self.agent.post(url);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        Self::settle_call(request.send_json(body))
    }
}

/// `Retry-After` as delta seconds or an HTTP date. A date already in the past
/// means no wait.
pub fn parse_retry_after_value(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let until = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((until - now).to_std().unwrap_or(Duration::ZERO))
}

/// Uniform random milliseconds in `[min_ms, max_ms]`.
pub fn jitter_ms(min_ms: u64, max_ms: u64) -> u64 {
    if max_ms <= min_ms {
        return min_ms;
    }
    let mut bytes = [0u8; 8];
    let _ = getrandom::fill(&mut bytes);
    let span = max_ms - min_ms + 1;
    min_ms + u64::from_le_bytes(bytes) % span
}

pub fn query_string(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::Value;

    use super::{HttpResponse, HttpTransport};

    struct MockRoute {
        needle: String,
        replies: VecDeque<Result<HttpResponse, String>>,
    }

    /// Scripted transport: the first route whose needle occurs in the request
    /// (URL, then body) answers. A route's last reply repeats once the script runs out.
    #[derive(Default)]
    pub struct MockTransport {
        routes: Mutex<Vec<MockRoute>>,
        requests: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        fn push(&self, needle: &str, reply: Result<HttpResponse, String>) {
            let mut routes = self.routes.lock().expect("routes lock");
            if let Some(route) = routes.iter_mut().find(|route| route.needle == needle) {
                route.replies.push_back(reply);
                return;
            }
            routes.push(MockRoute {
                needle: needle.to_string(),
                replies: VecDeque::from([reply]),
            });
        }

        pub fn reply(&self, needle: &str, status: u16, body: &str) -> &Self {
            self.push(
                needle,
                Ok(HttpResponse {
                    status,
                    body: body.to_string(),
                    retry_after: None,
                }),
            );
            self
        }

        pub fn reply_with_retry_after(
            &self,
            needle: &str,
            status: u16,
            retry_after: Duration,
        ) -> &Self {
            self.push(
                needle,
                Ok(HttpResponse {
                    status,
                    body: String::new(),
                    retry_after: Some(retry_after),
                }),
            );
            self
        }

        pub fn fail(&self, needle: &str, message: &str) -> &Self {
            self.push(needle, Err(message.to_string()));
            self
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().expect("requests lock").len()
        }

        pub fn calls_matching(&self, needle: &str) -> usize {
            self.requests
                .lock()
                .expect("requests lock")
                .iter()
                .filter(|request| request.contains(needle))
                .count()
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().expect("requests lock").clone()
        }

        fn answer(&self, request: String) -> Result<HttpResponse, String> {
            self.requests
                .lock()
                .expect("requests lock")
                .push(request.clone());
            let mut routes = self.routes.lock().expect("routes lock");
            let Some(route) = routes
                .iter_mut()
                .find(|route| request.contains(&route.needle))
            else {
                return Ok(HttpResponse {
                    status: 404,
                    body: String::new(),
                    retry_after: None,
                });
            };
            if route.replies.len() > 1 {
                route.replies.pop_front().expect("reply present")
            } else {
                route.replies.front().cloned().expect("reply present")
            }
        }
    }

    impl HttpTransport for MockTransport {
        fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, String> {
            let header_text = headers
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(";");
            self.answer(format!("GET {url} [{header_text}]"))
        }

        fn post_json(
            &self,
            url: &str,
            _headers: &[(&str, &str)],
            body: &Value,
        ) -> Result<HttpResponse, String> {
            self.answer(format!("POST {url} {body}"))
        }
    }
}
