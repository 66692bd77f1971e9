//! Provider data model: accounts, messages, and the voip.ms wire format.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::error::LinkError;

/// Opaque account (puppet) id assigned by the chat substrate.
pub type AccountId = u64;

/// Wall-clock format voip.ms uses for `from` and `date`.
const PROVIDER_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// voip.ms reports and accepts times in a fixed UTC-5 offset.
pub const PROVIDER_UTC_OFFSET_HOURS: i32 = -5;

static DID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{10}$").expect("valid DID pattern"));

/// Message direction, as the provider's `type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Sent = 0,
    Received = 1,
}

impl Direction {
    pub fn as_param(self) -> u8 {
        self as u8
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Direction::Sent),
            1 => Some(Direction::Received),
            _ => None,
        }
    }
}

/// Credentials of one linked voip.ms account.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub api_secret: SecretString,
    pub did: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, api_secret: impl Into<String>, did: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            api_secret: SecretString::from(api_secret.into()),
            did: did.into(),
        }
    }

    pub(crate) fn secret(&self) -> &str {
        self.api_secret.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("api_secret", &"[REDACTED]")
            .field("did", &self.did)
            .finish()
    }
}

/// Parse a link request: `<user> <api_secret> <did>`.
impl FromStr for Credentials {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let [user, secret, did] = tokens.as_slice() else {
            return Err(LinkError::Usage);
        };
        if !is_valid_did(did) {
            return Err(LinkError::InvalidDid);
        }
        Ok(Credentials::new(*user, *secret, *did))
    }
}

/// A DID is exactly ten ASCII digits.
pub fn is_valid_did(did: &str) -> bool {
    DID_PATTERN.is_match(did)
}

/// One SMS/MMS as seen by the bridge. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub did: String,
    pub counterparty: String,
    pub body: String,
}

/// Fixed offset used on the wire.
pub fn provider_offset() -> FixedOffset {
    FixedOffset::east_opt(PROVIDER_UTC_OFFSET_HOURS * 3600).expect("offset within a day")
}

/// Format an instant the way the `from` query parameter expects it.
pub fn format_provider_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&provider_offset())
        .format(PROVIDER_DATE_FORMAT)
        .to_string()
}

/// Parse a provider `date` field.
pub fn parse_provider_time(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), PROVIDER_DATE_FORMAT).ok()?;
    provider_offset()
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

// ── Wire format ─────────────────────────────────────────────────────

/// Envelope of every voip.ms response.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse {
    pub status: String,
    #[serde(default)]
    pub sms: Vec<SmsRecord>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// One record of the `sms` array.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SmsRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub date: String,
    #[serde(rename = "type", deserialize_with = "string_or_number")]
    pub kind: String,
    #[serde(default)]
    pub did: String,
    pub contact: String,
    #[serde(default)]
    pub message: String,
}

impl TryFrom<SmsRecord> for Message {
    type Error = String;

    fn try_from(record: SmsRecord) -> Result<Self, Self::Error> {
        let timestamp = parse_provider_time(&record.date)
            .ok_or_else(|| format!("unparsable date {:?} on message {}", record.date, record.id))?;
        let direction = record
            .kind
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(Direction::from_code)
            .ok_or_else(|| format!("unknown type {:?} on message {}", record.kind, record.id))?;
        Ok(Message {
            id: record.id,
            timestamp,
            direction,
            did: record.did,
            counterparty: record.contact,
            body: record.message,
        })
    }
}

/// voip.ms sends ids and discriminators as strings, older endpoints as
/// numbers. Accept both.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}
