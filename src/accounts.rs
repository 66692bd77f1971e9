//! Account (puppet) registry.
//!
//! Owns one provider client and one poller per linked account. All pollers
//! feed a single inbound channel; the router drains it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use crate::config::{BridgeConfig, PollerConfig};
use crate::error::{self, ConfigError, ProviderError};
use crate::poller::{DedupPoller, InboundSms};
use crate::provider::{AccountId, Credentials, SmsProvider, VoipMsClient};

/// Builds the provider client for a set of credentials.
pub type ProviderFactory =
    Arc<dyn Fn(&Credentials) -> Result<Arc<dyn SmsProvider>, ProviderError> + Send + Sync>;

/// One linked account and the resources bound to it.
struct Puppet {
    credentials: Credentials,
    provider: Arc<dyn SmsProvider>,
    poller: DedupPoller,
}

/// Registry of live accounts.
pub struct AccountManager {
    puppets: RwLock<HashMap<AccountId, Puppet>>,
    factory: ProviderFactory,
    poller_config: PollerConfig,
    inbound_tx: mpsc::UnboundedSender<InboundSms>,
}

impl AccountManager {
    /// Create a registry. The returned receiver yields every message any
    /// account's poller emits. Fails if `poller_config` does not validate.
    pub fn new(
        factory: ProviderFactory,
        poller_config: PollerConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<InboundSms>), ConfigError> {
        poller_config.validate()?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            puppets: RwLock::new(HashMap::new()),
            factory,
            poller_config,
            inbound_tx,
        });
        Ok((manager, inbound_rx))
    }

    /// Registry whose accounts talk to voip.ms over REST.
    pub fn voipms(
        config: &BridgeConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<InboundSms>), ConfigError> {
        let provider_config = config.provider.clone();
        let factory: ProviderFactory = Arc::new(move |credentials: &Credentials| {
            let client = VoipMsClient::new(credentials.clone(), provider_config.clone())?;
            Ok(Arc::new(client) as Arc<dyn SmsProvider>)
        });
        Self::new(factory, config.poller)
    }

    /// Link an account and start polling it. An existing entry for the same
    /// id is torn down first.
    pub async fn create_account(
        &self,
        account_id: AccountId,
        credentials: Credentials,
    ) -> error::Result<()> {
        let mut puppets = self.puppets.write().await;

        if let Some(mut old) = puppets.remove(&account_id) {
            debug!(account_id, "Account already exists, replacing");
            old.poller.stop();
        }

        let provider = (self.factory)(&credentials)?;
        let mut poller = DedupPoller::new(
            account_id,
            Arc::clone(&provider),
            self.poller_config,
            self.inbound_tx.clone(),
        )?;
        poller.start();

        info!(account_id, did = %credentials.did, "Account linked");
        puppets.insert(
            account_id,
            Puppet {
                credentials,
                provider,
                poller,
            },
        );
        Ok(())
    }

    /// Unlink an account. Returns whether it existed. The poller is stopped
    /// before this returns.
    pub async fn destroy_account(&self, account_id: AccountId) -> bool {
        let mut puppets = self.puppets.write().await;
        match puppets.remove(&account_id) {
            Some(mut puppet) => {
                puppet.poller.stop();
                info!(account_id, "Account unlinked");
                true
            }
            None => false,
        }
    }

    /// Provider client for an account, if it is linked.
    pub async fn get_account(&self, account_id: AccountId) -> Option<Arc<dyn SmsProvider>> {
        let puppets = self.puppets.read().await;
        puppets.get(&account_id).map(|p| Arc::clone(&p.provider))
    }

    pub async fn contains(&self, account_id: AccountId) -> bool {
        self.puppets.read().await.contains_key(&account_id)
    }

    pub async fn credentials(&self, account_id: AccountId) -> Option<Credentials> {
        let puppets = self.puppets.read().await;
        puppets.get(&account_id).map(|p| p.credentials.clone())
    }

    /// Ids of all linked accounts, ascending.
    pub async fn account_ids(&self) -> Vec<AccountId> {
        let puppets = self.puppets.read().await;
        let mut ids: Vec<AccountId> = puppets.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of accounts whose poller is still running.
    pub async fn running_pollers(&self) -> usize {
        let puppets = self.puppets.read().await;
        puppets.values().filter(|p| p.poller.is_running()).count()
    }

    /// Stop and drop every account.
    pub async fn shutdown(&self) {
        let mut puppets = self.puppets.write().await;
        for (_, mut puppet) in puppets.drain() {
            puppet.poller.stop();
        }
        info!("All accounts stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::error::Error;
    use crate::provider::{Direction, Message};

    struct CountingProvider {
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SmsProvider for CountingProvider {
        async fn fetch_messages(
            &self,
            _direction: Direction,
            _since: DateTime<Utc>,
        ) -> Result<Vec<Message>, ProviderError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn send_message(&self, _counterparty: &str, _body: &str) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct Fixture {
        manager: Arc<AccountManager>,
        fetches: Arc<AtomicUsize>,
        built: Arc<AtomicUsize>,
        // Pollers exit once the inbound channel closes.
        _inbound: mpsc::UnboundedReceiver<InboundSms>,
    }

    fn counting_manager() -> Fixture {
        let fetches = Arc::new(AtomicUsize::new(0));
        let built = Arc::new(AtomicUsize::new(0));
        let (f, b) = (Arc::clone(&fetches), Arc::clone(&built));
        let factory: ProviderFactory = Arc::new(move |_creds: &Credentials| {
            b.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingProvider {
                fetches: Arc::clone(&f),
            }) as Arc<dyn SmsProvider>)
        });
        let (manager, inbound) = AccountManager::new(factory, PollerConfig::default()).unwrap();
        Fixture {
            manager,
            fetches,
            built,
            _inbound: inbound,
        }
    }

    fn creds() -> Credentials {
        Credentials::new("alice", "secret", "5555555555")
    }

    #[tokio::test(start_paused = true)]
    async fn create_twice_leaves_one_live_poller() {
        let Fixture {
            manager,
            fetches,
            built,
            _inbound,
        } = counting_manager();

        manager.create_account(1, creds()).await.unwrap();
        manager.create_account(1, creds()).await.unwrap();

        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(manager.account_ids().await, vec![1]);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(manager.running_pollers().await, 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_stops_polling() {
        let Fixture {
            manager,
            fetches,
            _inbound,
            ..
        } = counting_manager();

        manager.create_account(1, creds()).await.unwrap();
        assert!(manager.destroy_account(1).await);
        assert!(manager.get_account(1).await.is_none());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn destroy_missing_account_is_noop() {
        let fixture = counting_manager();
        let manager = &fixture.manager;
        assert!(!manager.destroy_account(42).await);
        assert!(manager.get_account(42).await.is_none());
    }

    #[tokio::test]
    async fn accounts_are_isolated() {
        let fixture = counting_manager();
        let manager = &fixture.manager;
        manager.create_account(2, creds()).await.unwrap();
        manager
            .create_account(1, Credentials::new("bob", "x", "4444444444"))
            .await
            .unwrap();

        assert_eq!(manager.account_ids().await, vec![1, 2]);
        assert_eq!(manager.credentials(1).await.unwrap().user, "bob");
        assert_eq!(manager.credentials(2).await.unwrap().user, "alice");

        manager.destroy_account(1).await;
        assert!(!manager.contains(1).await);
        assert!(manager.contains(2).await);
    }

    #[tokio::test]
    async fn factory_failure_leaves_no_entry() {
        let factory: ProviderFactory = Arc::new(|_creds: &Credentials| {
            Err(ProviderError::RequestFailed {
                method: "client".into(),
                reason: "tls backend unavailable".into(),
            })
        });
        let (manager, _rx) = AccountManager::new(factory, PollerConfig::default()).unwrap();
        assert!(matches!(
            manager.create_account(1, creds()).await,
            Err(Error::Provider(ProviderError::RequestFailed { .. }))
        ));
        assert!(manager.account_ids().await.is_empty());
    }

    #[test]
    fn invalid_poller_config_is_refused() {
        let factory: ProviderFactory = Arc::new(|_creds: &Credentials| {
            Err(ProviderError::RequestFailed {
                method: "client".into(),
                reason: "unused".into(),
            })
        });
        let zero_interval = PollerConfig {
            interval: Duration::ZERO,
            lookback: Duration::from_secs(60),
        };
        assert!(matches!(
            AccountManager::new(Arc::clone(&factory), zero_interval),
            Err(ConfigError::InvalidValue { .. })
        ));

        let short_lookback = PollerConfig {
            interval: Duration::from_secs(30),
            lookback: Duration::from_secs(30),
        };
        assert!(AccountManager::new(factory, short_lookback).is_err());
    }

    #[tokio::test]
    async fn shutdown_clears_registry() {
        let fixture = counting_manager();
        let manager = &fixture.manager;
        manager.create_account(1, creds()).await.unwrap();
        manager.create_account(2, creds()).await.unwrap();
        manager.shutdown().await;
        assert!(manager.account_ids().await.is_empty());
    }
}
