//! Router: maps phone numbers to rooms and users and forwards messages in
//! both directions.
//!
//! Room ids and user ids are both the counterparty's number, scoped by the
//! account (puppet) id. The router holds no state of its own.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::accounts::AccountManager;
use crate::bridge::{ReceiveParams, RemoteRoom, RemoteUser, Substrate};
use crate::error::{BridgeError, ProviderError};
use crate::poller::InboundSms;
use crate::provider::AccountId;

/// `(account, counterparty)`, one direct room per counterparty per account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomIdentity {
    pub account_id: AccountId,
    pub counterparty: String,
}

impl RoomIdentity {
    pub fn new(account_id: AccountId, counterparty: impl Into<String>) -> Self {
        Self {
            account_id,
            counterparty: counterparty.into(),
        }
    }

    pub fn room(&self) -> RemoteRoom {
        RemoteRoom {
            room_id: self.counterparty.clone(),
            puppet_id: self.account_id,
            is_direct: true,
        }
    }

    pub fn user(&self) -> RemoteUser {
        RemoteUser {
            user_id: self.counterparty.clone(),
            puppet_id: self.account_id,
        }
    }

    pub fn receive_params(&self) -> ReceiveParams {
        ReceiveParams {
            room: self.room(),
            user: self.user(),
        }
    }
}

impl From<&RemoteRoom> for RoomIdentity {
    fn from(room: &RemoteRoom) -> Self {
        RoomIdentity::new(room.puppet_id, room.room_id.clone())
    }
}

/// Result of an outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    Sent,
    /// No live account backs the room; the message was dropped.
    NoAccount,
}

pub struct Router {
    accounts: Arc<AccountManager>,
    substrate: Arc<dyn Substrate>,
}

impl Router {
    pub fn new(accounts: Arc<AccountManager>, substrate: Arc<dyn Substrate>) -> Self {
        Self {
            accounts,
            substrate,
        }
    }

    /// Deliver a polled message into its room.
    pub async fn route_inbound(&self, inbound: InboundSms) -> Result<(), BridgeError> {
        let identity = RoomIdentity::new(inbound.account_id, inbound.message.counterparty);
        debug!(
            account_id = identity.account_id,
            counterparty = %identity.counterparty,
            message_id = %inbound.message.id,
            "Delivering inbound message"
        );
        self.substrate
            .send_message(&identity.receive_params(), &inbound.message.body)
            .await
    }

    /// Send a room message out through the account's provider.
    pub async fn route_outbound(
        &self,
        identity: &RoomIdentity,
        body: &str,
    ) -> Result<Outbound, ProviderError> {
        let Some(provider) = self.accounts.get_account(identity.account_id).await else {
            debug!(account_id = identity.account_id, "No account for room, dropping message");
            return Ok(Outbound::NoAccount);
        };
        provider.send_message(&identity.counterparty, body).await?;
        Ok(Outbound::Sent)
    }

    /// Post a bridge notice into a room.
    pub async fn notify(&self, room: &RemoteRoom, text: &str) -> Result<(), BridgeError> {
        self.substrate.send_status(room, text).await
    }

    /// Answer a room-creation request: the same room, marked direct, if the
    /// account exists.
    pub async fn create_room(&self, room: &RemoteRoom) -> Option<RemoteRoom> {
        if !self.accounts.contains(room.puppet_id).await {
            return None;
        }
        Some(RoomIdentity::from(room).room())
    }

    /// The DM room for a ghost is the ghost's own id.
    pub async fn get_dm_room_id(&self, user: &RemoteUser) -> Option<String> {
        if !self.accounts.contains(user.puppet_id).await {
            return None;
        }
        Some(user.user_id.clone())
    }
}

/// Drain the pollers' channel into the substrate, one message at a time so
/// per-account order survives.
pub fn spawn_inbound_dispatch(
    router: Arc<Router>,
    mut inbound_rx: mpsc::UnboundedReceiver<InboundSms>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(inbound) = inbound_rx.recv().await {
            let account_id = inbound.account_id;
            if let Err(e) = router.route_inbound(inbound).await {
                warn!(account_id, "Inbound delivery failed: {e}");
            }
        }
        info!("Inbound dispatch finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::accounts::ProviderFactory;
    use crate::config::PollerConfig;
    use crate::provider::{Credentials, Direction, Message, SmsProvider};

    #[derive(Default)]
    struct RecordingSubstrate {
        delivered: Mutex<Vec<(ReceiveParams, String)>>,
    }

    #[async_trait]
    impl Substrate for RecordingSubstrate {
        async fn send_message(&self, params: &ReceiveParams, body: &str) -> Result<(), BridgeError> {
            self.delivered
                .lock()
                .unwrap()
                .push((params.clone(), body.to_string()));
            Ok(())
        }

        async fn send_status(&self, _room: &RemoteRoom, _text: &str) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct SendLog {
        sent: Mutex<Vec<(String, String)>>,
    }

    struct LoggingProvider(Arc<SendLog>);

    #[async_trait]
    impl SmsProvider for LoggingProvider {
        async fn fetch_messages(
            &self,
            _direction: Direction,
            _since: DateTime<Utc>,
        ) -> Result<Vec<Message>, ProviderError> {
            Ok(Vec::new())
        }

        async fn send_message(&self, counterparty: &str, body: &str) -> Result<(), ProviderError> {
            self.0
                .sent
                .lock()
                .unwrap()
                .push((counterparty.to_string(), body.to_string()));
            Ok(())
        }
    }

    async fn router_with_account(
        account_id: AccountId,
    ) -> (Router, Arc<RecordingSubstrate>, Arc<SendLog>) {
        let log = Arc::new(SendLog::default());
        let factory_log = Arc::clone(&log);
        let factory: ProviderFactory = Arc::new(move |_creds: &Credentials| {
            Ok(Arc::new(LoggingProvider(Arc::clone(&factory_log))) as Arc<dyn SmsProvider>)
        });
        let (accounts, _rx) = AccountManager::new(factory, PollerConfig::default()).unwrap();
        accounts
            .create_account(account_id, Credentials::new("alice", "secret", "5555555555"))
            .await
            .unwrap();
        let substrate = Arc::new(RecordingSubstrate::default());
        let router = Router::new(accounts, substrate.clone());
        (router, substrate, log)
    }

    fn room(puppet_id: AccountId, number: &str) -> RemoteRoom {
        RemoteRoom {
            room_id: number.to_string(),
            puppet_id,
            is_direct: false,
        }
    }

    #[tokio::test]
    async fn create_room_for_existing_account() {
        let (router, _, _) = router_with_account(3).await;
        let created = router.create_room(&room(3, "4445556666")).await;
        assert_eq!(
            created,
            Some(RemoteRoom {
                room_id: "4445556666".into(),
                puppet_id: 3,
                is_direct: true,
            })
        );
    }

    #[tokio::test]
    async fn create_room_for_missing_account() {
        let (router, _, _) = router_with_account(3).await;
        assert_eq!(router.create_room(&room(4, "4445556666")).await, None);
    }

    #[tokio::test]
    async fn dm_room_id_is_user_id() {
        let (router, _, _) = router_with_account(3).await;
        let user = RemoteUser {
            user_id: "4445556666".into(),
            puppet_id: 3,
        };
        assert_eq!(router.get_dm_room_id(&user).await.as_deref(), Some("4445556666"));

        let stranger = RemoteUser {
            user_id: "4445556666".into(),
            puppet_id: 9,
        };
        assert_eq!(router.get_dm_room_id(&stranger).await, None);
    }

    #[tokio::test]
    async fn inbound_maps_contact_to_room_and_user() {
        let (router, substrate, _) = router_with_account(3).await;
        let message = Message {
            id: "1".into(),
            timestamp: Utc::now(),
            direction: Direction::Received,
            did: "5555555555".into(),
            counterparty: "4445556666".into(),
            body: "hello".into(),
        };
        router
            .route_inbound(InboundSms {
                account_id: 3,
                message,
            })
            .await
            .unwrap();

        let delivered = substrate.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let (params, body) = &delivered[0];
        assert_eq!(body, "hello");
        assert_eq!(params.room.room_id, "4445556666");
        assert_eq!(params.room.puppet_id, 3);
        assert!(params.room.is_direct);
        assert_eq!(params.user.user_id, "4445556666");
        assert_eq!(params.user.puppet_id, 3);
    }

    #[tokio::test]
    async fn outbound_sends_to_room_number() {
        let (router, _, log) = router_with_account(3).await;
        let outcome = router
            .route_outbound(&RoomIdentity::new(3, "4445556666"), "hi")
            .await
            .unwrap();
        assert_eq!(outcome, Outbound::Sent);
        assert_eq!(
            log.sent.lock().unwrap().as_slice(),
            [("4445556666".to_string(), "hi".to_string())]
        );
    }

    #[tokio::test]
    async fn outbound_without_account_is_dropped() {
        let (router, _, log) = router_with_account(3).await;
        let outcome = router
            .route_outbound(&RoomIdentity::new(8, "4445556666"), "hi")
            .await
            .unwrap();
        assert_eq!(outcome, Outbound::NoAccount);
        assert!(log.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn identity_from_room_ignores_direct_flag() {
        let identity = RoomIdentity::from(&room(5, "1112223333"));
        assert_eq!(identity, RoomIdentity::new(5, "1112223333"));
        assert!(identity.room().is_direct);
    }
}
