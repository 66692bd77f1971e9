//! voip.ms provider access.
//!
//! `SmsProvider` is the seam the poller and router talk to; `VoipMsClient`
//! is the REST implementation.

pub mod types;
pub mod voipms;

pub use types::{AccountId, Credentials, Direction, Message, is_valid_did};
pub use voipms::{SendMode, VoipMsClient, select_send_mode};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProviderError;

/// Operations the bridge needs from an SMS provider account.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// All messages of `direction` newer than `since`, newest first.
    ///
    /// A provider-side failure status yields an empty list; only transport
    /// problems are errors.
    async fn fetch_messages(
        &self,
        direction: Direction,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, ProviderError>;

    /// Send `body` to `counterparty`. Not retried.
    async fn send_message(&self, counterparty: &str, body: &str) -> Result<(), ProviderError>;
}
