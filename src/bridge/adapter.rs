//! Bridge adapter: the hooks the chat substrate calls.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{ProtocolInfo, RemoteRoom, RemoteUser, Substrate, VOIPMS_PROTOCOL};
use crate::accounts::AccountManager;
use crate::config::BridgeConfig;
use crate::error::{self, ConfigError, LinkError, ProviderError};
use crate::poller::InboundSms;
use crate::provider::{AccountId, Credentials};
use crate::router::{Outbound, RoomIdentity, Router, spawn_inbound_dispatch};

const BOT_HEADER: &str = "Voip MS Puppet Bridge";

pub struct BridgeAdapter {
    accounts: Arc<AccountManager>,
    router: Arc<Router>,
    dispatch: JoinHandle<()>,
}

impl BridgeAdapter {
    /// Wire the registry's inbound channel through a router into
    /// `substrate`.
    pub fn new(
        accounts: Arc<AccountManager>,
        inbound_rx: mpsc::UnboundedReceiver<InboundSms>,
        substrate: Arc<dyn Substrate>,
    ) -> Self {
        let router = Arc::new(Router::new(Arc::clone(&accounts), substrate));
        let dispatch = spawn_inbound_dispatch(Arc::clone(&router), inbound_rx);
        Self {
            accounts,
            router,
            dispatch,
        }
    }

    /// Adapter backed by the voip.ms REST API.
    pub fn voipms(
        config: &BridgeConfig,
        substrate: Arc<dyn Substrate>,
    ) -> Result<Self, ConfigError> {
        let (accounts, inbound_rx) = AccountManager::voipms(config)?;
        Ok(Self::new(accounts, inbound_rx, substrate))
    }

    pub fn accounts(&self) -> &Arc<AccountManager> {
        &self.accounts
    }

    pub fn protocol(&self) -> ProtocolInfo {
        VOIPMS_PROTOCOL
    }

    // ── Lifecycle hooks ─────────────────────────────────────────────

    /// A puppet was linked (or re-linked) by the substrate.
    pub async fn new_puppet(
        &self,
        account_id: AccountId,
        credentials: Credentials,
    ) -> error::Result<()> {
        self.accounts.create_account(account_id, credentials).await
    }

    /// A puppet was unlinked. Unknown ids are ignored.
    pub async fn delete_puppet(&self, account_id: AccountId) {
        self.accounts.destroy_account(account_id).await;
    }

    // ── Message hooks ───────────────────────────────────────────────

    /// A chat user wrote in a bridged room.
    ///
    /// Send failures are posted back into the room as a notice and returned;
    /// they are not retried.
    pub async fn handle_chat_message(
        &self,
        room: &RemoteRoom,
        body: &str,
    ) -> Result<Outbound, ProviderError> {
        let identity = RoomIdentity::from(room);
        match self.router.route_outbound(&identity, body).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(
                    account_id = identity.account_id,
                    counterparty = %identity.counterparty,
                    "Outbound delivery failed: {e}"
                );
                if let Err(notice_err) = self
                    .router
                    .notify(room, &format!("Failed to deliver message: {e}"))
                    .await
                {
                    warn!(
                        account_id = identity.account_id,
                        "Could not report delivery failure to room: {notice_err}"
                    );
                }
                Err(e)
            }
        }
    }

    // ── Room hooks ──────────────────────────────────────────────────

    pub async fn create_room(&self, room: &RemoteRoom) -> Option<RemoteRoom> {
        self.router.create_room(room).await
    }

    pub async fn get_dm_room_id(&self, user: &RemoteUser) -> Option<String> {
        self.router.get_dm_room_id(user).await
    }

    // ── Descriptive hooks ───────────────────────────────────────────

    /// Display name for a linked puppet.
    pub fn get_description(&self, credentials: &Credentials) -> String {
        format!("VoipMS puppet {} {}", credentials.user, credentials.did)
    }

    /// Parse a link request into credentials.
    pub fn get_data_from_str(&self, s: &str) -> Result<Credentials, LinkError> {
        s.parse()
    }

    pub fn bot_header(&self) -> &'static str {
        BOT_HEADER
    }

    /// Stop every poller and the inbound dispatcher.
    pub async fn shutdown(&self) {
        self.accounts.shutdown().await;
        self.dispatch.abort();
        info!("Bridge shut down");
    }
}
