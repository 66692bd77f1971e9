//! voip.ms REST client.
//!
//! Every call is an HTTP GET against a single endpoint with the method name
//! and credentials as query parameters. The inbound API has no push mode, so
//! the poller calls `fetch_messages` on a timer.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

use super::SmsProvider;
use super::types::{ApiResponse, Credentials, Direction, Message, PROVIDER_UTC_OFFSET_HOURS, format_provider_time};
use crate::config::{FetchMethod, ProviderConfig};
use crate::error::ProviderError;

/// Pictographs plus the pieces that build flags, keycaps and skin tones.
/// Bare digits, `#` and `*` do not match.
static EMOJI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[\p{Extended_Pictographic}\p{Regional_Indicator}\p{Emoji_Modifier}\x{20E3}\x{FE0F}]",
    )
    .expect("valid emoji pattern")
});

/// Transport used for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Short-form SMS (`sendSMS`).
    Sms,
    /// Long-form/rich MMS (`sendMMS`).
    Mms,
}

impl SendMode {
    pub fn api_method(self) -> &'static str {
        match self {
            SendMode::Sms => "sendSMS",
            SendMode::Mms => "sendMMS",
        }
    }
}

/// Pick the transport for `body`.
///
/// The SMS channel truncates or rejects long and emoji content, so anything
/// over `threshold` UTF-16 units or containing a pictographic character goes
/// out as MMS.
pub fn select_send_mode(body: &str, threshold: usize) -> SendMode {
    if body.encode_utf16().count() > threshold || EMOJI_PATTERN.is_match(body) {
        SendMode::Mms
    } else {
        SendMode::Sms
    }
}

/// REST client bound to one account's credentials.
pub struct VoipMsClient {
    credentials: Credentials,
    config: ProviderConfig,
    client: reqwest::Client,
}

impl VoipMsClient {
    pub fn new(credentials: Credentials, config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::RequestFailed {
                method: "client".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            credentials,
            config,
            client,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Issue one API call and decode the envelope.
    async fn call(
        &self,
        method: &str,
        extra: &[(&str, String)],
    ) -> Result<ApiResponse, ProviderError> {
        let mut query: Vec<(&str, String)> = vec![
            ("api_username", self.credentials.user.clone()),
            ("api_password", self.credentials.secret().to_string()),
            ("method", method.to_string()),
            ("did", self.credentials.did.clone()),
        ];
        query.extend(extra.iter().cloned());

        let resp = self
            .client
            .get(&self.config.api_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| transport_error(method, e, self.config.request_timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::HttpStatus {
                method: method.to_string(),
                status: status.as_u16(),
            });
        }

        resp.json::<ApiResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                method: method.to_string(),
                reason: e.without_url().to_string(),
            })
    }
}

#[async_trait]
impl SmsProvider for VoipMsClient {
    async fn fetch_messages(
        &self,
        direction: Direction,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, ProviderError> {
        let method = self.config.fetch_method.api_method();
        let mut params = vec![
            ("type", direction.as_param().to_string()),
            ("from", format_provider_time(since)),
            ("timezone", PROVIDER_UTC_OFFSET_HOURS.to_string()),
        ];
        if self.config.fetch_method == FetchMethod::Mms {
            params.push(("all_messages", "1".to_string()));
        }

        let resp = self.call(method, &params).await?;
        if !resp.is_success() {
            debug!(did = %self.credentials.did, status = %resp.status, "No messages returned");
            return Ok(Vec::new());
        }

        let messages: Vec<Message> = resp
            .sms
            .into_iter()
            .filter_map(|record| match Message::try_from(record) {
                Ok(m) => Some(m),
                Err(reason) => {
                    warn!(did = %self.credentials.did, "Skipping malformed message: {reason}");
                    None
                }
            })
            .collect();

        debug!(
            did = %self.credentials.did,
            count = messages.len(),
            since = %since,
            "Fetched messages"
        );
        Ok(messages)
    }

    async fn send_message(&self, counterparty: &str, body: &str) -> Result<(), ProviderError> {
        let mode = select_send_mode(body, self.config.long_message_threshold);
        let method = mode.api_method();
        debug!(did = %self.credentials.did, dst = %counterparty, method, "Sending message");

        let resp = self
            .call(
                method,
                &[("dst", counterparty.to_string()), ("message", body.to_string())],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::Rejected {
                method: method.to_string(),
                status: resp.status,
            });
        }
        Ok(())
    }
}

/// Map a reqwest failure, keeping the credential-bearing URL out of the
/// message.
fn transport_error(method: &str, e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout {
            method: method.to_string(),
            timeout,
        }
    } else {
        ProviderError::RequestFailed {
            method: method.to_string(),
            reason: e.without_url().to_string(),
        }
    }
}
