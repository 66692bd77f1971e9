//! Dedup poller: turns the provider's pull API into an ordered,
//! duplicate-free stream of inbound messages.
//!
//! Each cycle fetches everything received in the last `lookback`, drops ids
//! already fetched by the previous cycle, and emits the rest oldest first.
//! Only one generation of ids is remembered; with `lookback >= 2 * interval`
//! that is enough to cover every overlap.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::error::{ConfigError, ProviderError};
use crate::provider::{AccountId, Direction, Message, SmsProvider};

/// A newly seen inbound message, tagged with the account it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSms {
    pub account_id: AccountId,
    pub message: Message,
}

/// Ids fetched by the immediately preceding cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollWindow {
    seen_ids: HashSet<String>,
}

impl PollWindow {
    /// Filter one cycle's fetch against this window.
    ///
    /// Returns the messages to emit, in non-decreasing timestamp order, and
    /// the window for the next cycle. The next window holds every fetched id,
    /// not only the emitted ones.
    ///
    /// Ordering holds within one call only. A message that first shows up in
    /// a later cycle is emitted even if its timestamp is older than something
    /// an earlier cycle already emitted, so consumers must not assume order
    /// across cycles.
    pub fn advance(&self, fetched: Vec<Message>) -> (Vec<Message>, PollWindow) {
        let next = PollWindow {
            seen_ids: fetched.iter().map(|m| m.id.clone()).collect(),
        };

        // Provider order is newest first.
        let mut fresh: Vec<Message> = fetched
            .into_iter()
            .rev()
            .filter(|m| !self.seen_ids.contains(&m.id))
            .collect();
        fresh.sort_by_key(|m| m.timestamp);

        (fresh, next)
    }

    pub fn len(&self) -> usize {
        self.seen_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen_ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }
}

/// Run one fetch-filter cycle.
pub async fn poll_once(
    provider: &dyn SmsProvider,
    window: &PollWindow,
    lookback: std::time::Duration,
    now: DateTime<Utc>,
) -> Result<(Vec<Message>, PollWindow), ProviderError> {
    let since = chrono::Duration::from_std(lookback)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let fetched = provider.fetch_messages(Direction::Received, since).await?;
    Ok(window.advance(fetched))
}

struct Running {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Recurring poll loop for one account.
pub struct DedupPoller {
    account_id: AccountId,
    provider: Arc<dyn SmsProvider>,
    config: PollerConfig,
    sink: mpsc::UnboundedSender<InboundSms>,
    running: Option<Running>,
}

impl DedupPoller {
    /// Build a stopped poller. Fails if `config` does not validate.
    pub fn new(
        account_id: AccountId,
        provider: Arc<dyn SmsProvider>,
        config: PollerConfig,
        sink: mpsc::UnboundedSender<InboundSms>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            account_id,
            provider,
            config,
            sink,
            running: None,
        })
    }

    /// Start the timer. No-op if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            self.account_id,
            Arc::clone(&self.provider),
            self.config,
            self.sink.clone(),
            stop_rx,
        ));
        self.running = Some(Running { stop_tx, handle });
    }

    /// Stop the timer. A cycle already fetching still emits its messages;
    /// no further cycle starts. No-op if not running.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(true);
            info!(account_id = self.account_id, "Poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for DedupPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(
    account_id: AccountId,
    provider: Arc<dyn SmsProvider>,
    config: PollerConfig,
    sink: mpsc::UnboundedSender<InboundSms>,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!(
        account_id,
        "Poller started: polling every {}s, looking back {}s",
        config.interval.as_secs(),
        config.lookback.as_secs()
    );

    let mut tick = tokio::time::interval(config.interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip immediate first tick
    tick.tick().await;

    let mut window = PollWindow::default();

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = stop_rx.changed() => {}
        }
        if *stop_rx.borrow() || sink.is_closed() {
            debug!(account_id, "Poll loop exiting");
            return;
        }

        match poll_once(provider.as_ref(), &window, config.lookback, Utc::now()).await {
            Ok((fresh, next)) => {
                window = next;
                if !fresh.is_empty() {
                    debug!(account_id, count = fresh.len(), "Emitting new messages");
                }
                for message in fresh {
                    if sink.send(InboundSms { account_id, message }).is_err() {
                        warn!(account_id, "Inbound channel closed, stopping poller");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(account_id, "Poll failed: {e}");
            }
        }
    }
}
