//! Boundary with the chat substrate.
//!
//! The substrate owns rooms, ghost users and event delivery. The bridge sees
//! it through the `Substrate` trait and answers its hooks via
//! `BridgeAdapter`.

pub mod adapter;
pub mod console;

pub use adapter::BridgeAdapter;
pub use console::ConsoleSubstrate;

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::provider::AccountId;

/// Static description of the bridged protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub id: &'static str,
    pub displayname: &'static str,
    pub external_url: &'static str,
}

pub const VOIPMS_PROTOCOL: ProtocolInfo = ProtocolInfo {
    id: "voipms",
    displayname: "VoipMS",
    external_url: "https://voip.ms",
};

/// A room on the remote side. For SMS the room id is the counterparty's
/// phone number and every room is direct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteRoom {
    pub room_id: String,
    pub puppet_id: AccountId,
    pub is_direct: bool,
}

/// A ghost user on the remote side. The user id is the counterparty's
/// phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteUser {
    pub user_id: String,
    pub puppet_id: AccountId,
}

/// Where an inbound message lands: the room and the ghost that sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveParams {
    pub room: RemoteRoom,
    pub user: RemoteUser,
}

/// Hooks the bridge calls on the chat substrate.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Deliver a message from a remote user into a room.
    async fn send_message(&self, params: &ReceiveParams, body: &str) -> Result<(), BridgeError>;

    /// Post a bridge notice into a room (e.g. a failed outbound delivery).
    async fn send_status(&self, room: &RemoteRoom, text: &str) -> Result<(), BridgeError>;
}
