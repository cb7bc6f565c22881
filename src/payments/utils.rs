use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            PaymentError::GatewayUnavailable {
                provider: provider.to_string(),
                message: format!("failed to initialize HTTP client: {}", e),
            }
        })?;

        Ok(Self {
            client,
            provider,
            timeout,
            max_retries,
            retry_backoff: Duration::from_secs(1),
        })
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Upper bound on how long a single `request_json` call may take,
    /// including retries and backoff.
    pub fn worst_case_duration(&self) -> Duration {
        let attempts = self.max_retries + 1;
        let backoff: Duration = (0..self.max_retries)
            .map(|attempt| self.backoff_for(attempt))
            .sum();
        self.timeout * attempts + backoff
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff * (1u32 << attempt.min(5))
    }

    fn unavailable(&self, message: String) -> PaymentError {
        PaymentError::GatewayUnavailable {
            provider: self.provider.to_string(),
            message,
        }
    }

    /// Sends one provider call authenticated with HTTP basic auth (secret key
    /// as username, empty password).
    ///
    /// Timeouts, network errors and 5xx responses are retried only for
    /// idempotent methods. A `POST` that fails that way may still have
    /// created the resource, so it is reported as unavailable instead of
    /// being sent again. 429 responses are retried for every method.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        secret_key: &str,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let replayable = method.is_idempotent();
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self
                .client
                .request(method.clone(), url)
                .timeout(self.timeout)
                .basic_auth(secret_key, Some(""));
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    self.unavailable(format!("provider request timed out: {}", e))
                } else {
                    self.unavailable(format!("provider request failed: {}", e))
                }
            });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            PaymentError::MalformedResponse {
                                provider: self.provider.to_string(),
                                message: format!("invalid provider JSON response: {}", e),
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(self.backoff_for(attempt)).await;
                            continue;
                        }
                        return Err(PaymentError::RateLimitError {
                            message: format!("{} rate limit exceeded", self.provider),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() {
                        if replayable && attempt < self.max_retries {
                            warn!(
                                provider = self.provider,
                                status = %status,
                                attempt = attempt + 1,
                                "provider server error, retrying"
                            );
                            tokio::time::sleep(self.backoff_for(attempt)).await;
                            continue;
                        }
                        return Err(self.unavailable(format!("HTTP {}: {}", status, text)));
                    }

                    return Err(PaymentError::ProviderError {
                        provider: self.provider.to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        provider_code: Some(status.as_u16().to_string()),
                        retryable: false,
                    });
                }
                Err(e) => {
                    if replayable && attempt < self.max_retries {
                        warn!(
                            provider = self.provider,
                            error = %e,
                            attempt = attempt + 1,
                            "provider request failed, retrying"
                        );
                        last_error = Some(e);
                        tokio::time::sleep(self.backoff_for(attempt)).await;
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| self.unavailable("provider request failed".to_string())))
    }
}

pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> Option<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison for equal-length inputs.
pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Reads a string at a JSON pointer, ignoring non-string values.
pub fn json_str<'a>(value: &'a JsonValue, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .filter(|v| !v.trim().is_empty())
}


#[cfg(test)]
mod tests {
    use super::test_server::{self, Reply};
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_depends_on_secret_and_payload() {
        let payload = br#"{"data":{"id":"evt_1"}}"#;
        let signature = hmac_sha256_hex(payload, "whsk_test").expect("hmac should compute");
        assert_eq!(signature.len(), 64);
        assert_eq!(hmac_sha256_hex(payload, "whsk_test"), Some(signature.clone()));
        assert_ne!(hmac_sha256_hex(payload, "other"), Some(signature.clone()));
        assert_ne!(hmac_sha256_hex(b"{}", "whsk_test"), Some(signature));
    }

    #[test]
    fn json_str_skips_blank_and_non_string_values() {
        let value = serde_json::json!({"a": {"b": "x", "c": "", "d": 3}});
        assert_eq!(json_str(&value, "/a/b"), Some("x"));
        assert_eq!(json_str(&value, "/a/c"), None);
        assert_eq!(json_str(&value, "/a/d"), None);
    }

    #[test]
    fn worst_case_duration_accounts_for_retries() {
        let client = PaymentHttpClient::new("test", Duration::from_secs(2), 2)
            .expect("client should build")
            .with_retry_backoff(Duration::from_millis(100));
        // 3 attempts * 2s + 100ms + 200ms backoff
        assert_eq!(client.worst_case_duration(), Duration::from_millis(6300));
    }

    fn fast_client(max_retries: u32) -> PaymentHttpClient {
        PaymentHttpClient::new("test", Duration::from_millis(300), max_retries)
            .expect("client should build")
            .with_retry_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn get_is_retried_on_server_errors() {
        let server = test_server::spawn(|_| Reply::Status(503, "{}")).await;
        let result: PaymentResult<JsonValue> = fast_client(2)
            .request_json(reqwest::Method::GET, &server.base_url, "sk", None, &[])
            .await;

        assert!(matches!(result, Err(PaymentError::GatewayUnavailable { .. })));
        assert_eq!(server.hits(), 3);
    }

    #[tokio::test]
    async fn post_is_not_replayed_after_a_server_error() {
        let server = test_server::spawn(|_| Reply::Status(502, "{}")).await;
        let body = serde_json::json!({ "external_id": "ORD-1-abc" });
        let result: PaymentResult<JsonValue> = fast_client(2)
            .request_json(reqwest::Method::POST, &server.base_url, "sk", Some(&body), &[])
            .await;

        assert!(matches!(result, Err(PaymentError::GatewayUnavailable { .. })));
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn post_is_not_replayed_after_a_timeout() {
        let server = test_server::spawn(|n| {
            if n == 0 {
                Reply::Stall(Duration::from_secs(2))
            } else {
                Reply::Status(200, r#"{"id":"second"}"#)
            }
        })
        .await;
        let body = serde_json::json!({ "external_id": "ORD-1-abc" });
        let result: PaymentResult<JsonValue> = fast_client(2)
            .request_json(reqwest::Method::POST, &server.base_url, "sk", Some(&body), &[])
            .await;

        assert!(matches!(result, Err(PaymentError::GatewayUnavailable { .. })));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn rate_limited_post_is_retried() {
        let server = test_server::spawn(|n| {
            if n == 0 {
                Reply::Status(429, "{}")
            } else {
                Reply::Status(200, r#"{"id":"inv_1"}"#)
            }
        })
        .await;
        let result: JsonValue = fast_client(1)
            .request_json(reqwest::Method::POST, &server.base_url, "sk", None, &[])
            .await
            .expect("second attempt succeeds");

        assert_eq!(result["id"], "inv_1");
        assert_eq!(server.hits(), 2);
    }
}
