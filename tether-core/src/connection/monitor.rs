use super::{ConnectionState, ConnectivitySource};
use crate::events::{HookId, HookRegistry, TetherEvent, TetherHook};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;

/// Reconnection behavior of a [`ConnectionMonitor`]
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionMonitorConfig {
    /// Start reconnecting on an offline notification (default: true)
    pub auto_reconnect: bool,
    /// Connectivity checks per reconnection run (default: 5)
    pub max_reconnect_attempts: u32,
    /// Wait after the first failed check (default: 1s)
    pub initial_reconnect_delay: Duration,
    /// Upper bound on any single wait (default: 30s)
    pub max_reconnect_delay: Duration,
    /// Random extra wait added to each delay, from zero up to this (default: 500ms)
    pub reconnect_jitter: Duration,
}

impl Default for ConnectionMonitorConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            reconnect_jitter: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default)]
struct Status {
    state: ConnectionState,
    initialized: bool,
    failed_attempts: u32,
    last_connected_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
}

struct Inner {
    source: Arc<dyn ConnectivitySource>,
    config: ConnectionMonitorConfig,
    status: RwLock<Status>,
    init_lock: tokio::sync::Mutex<()>,
    reconnect_guard: Semaphore,
    listener: Mutex<Option<JoinHandle<()>>>,
    hooks: HookRegistry,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

/// Tracks connectivity to the agent service
///
/// The monitor is the only writer of its [`ConnectionState`]. Clones share
/// the same state, so one monitor can be handed to several clients.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tether_core::connection::{ConnectionMonitor, ConnectionState, ManualConnectivity};
///
/// # tokio_test::block_on(async {
/// let source = Arc::new(ManualConnectivity::new(true));
/// let monitor = ConnectionMonitor::new(source);
///
/// assert_eq!(monitor.state(), ConnectionState::Disconnected);
/// assert_eq!(monitor.initialize().await, ConnectionState::Connected);
/// # });
/// ```
#[derive(Clone)]
pub struct ConnectionMonitor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("status", &*self.inner.status.read())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionMonitor {
    pub fn new(source: Arc<dyn ConnectivitySource>) -> Self {
        Self::with_config(source, ConnectionMonitorConfig::default())
    }

    pub fn with_config(source: Arc<dyn ConnectivitySource>, config: ConnectionMonitorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                status: RwLock::new(Status::default()),
                init_lock: tokio::sync::Mutex::new(()),
                reconnect_guard: Semaphore::new(1),
                listener: Mutex::new(None),
                hooks: HookRegistry::new(),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionMonitorConfig {
        &self.inner.config
    }

    /// Observe state changes
    pub fn add_hook(&self, hook: impl TetherHook + 'static) -> HookId {
        self.inner.hooks.add(hook)
    }

    pub fn remove_hook(&self, id: HookId) -> bool {
        self.inner.hooks.remove(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.read().state
    }

    /// Whether the service is currently reachable
    ///
    /// Initializes the monitor on first use; afterwards this only reads the
    /// tracked state.
    pub async fn is_connected(&self) -> bool {
        if !self.is_initialized() {
            self.initialize().await;
        }
        self.state() == ConnectionState::Connected
    }

    /// Failed checks since the last successful connection
    pub fn failed_attempt_count(&self) -> u32 {
        self.inner.status.read().failed_attempts
    }

    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.inner.status.read().last_connected_at
    }

    /// When the reconnection loop last checked connectivity
    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.inner.status.read().last_attempt_at
    }

    fn is_initialized(&self) -> bool {
        self.inner.status.read().initialized
    }

    /// Subscribe to the source and read the initial connectivity
    ///
    /// Calling this again after a successful initialization only returns the
    /// current state. A failed read leaves the monitor in
    /// [`ConnectionState::Error`] and uninitialized, so the next check tries
    /// again.
    pub async fn initialize(&self) -> ConnectionState {
        let _guard = self.inner.init_lock.lock().await;
        if self.is_initialized() {
            return self.state();
        }

        {
            let mut listener = self.inner.listener.lock();
            if listener.is_none() {
                *listener = Some(self.spawn_listener(self.inner.source.subscribe()));
            }
        }

        self.transition(ConnectionState::Connecting, "initializing");
        let state = self.probe().await;
        self.transition(state, "initial connectivity check");
        if state != ConnectionState::Error {
            self.inner.status.write().initialized = true;
        }
        state
    }

    /// Re-read connectivity and update the state if it changed
    pub async fn check_connection(&self) -> ConnectionState {
        if !self.is_initialized() {
            return self.initialize().await;
        }
        let state = self.probe().await;
        self.transition(state, "connectivity check");
        state
    }

    /// Check connectivity repeatedly with exponential backoff
    ///
    /// Returns true once a check reports the service reachable. The state
    /// stays [`ConnectionState::Reconnecting`] between failed checks, so
    /// observers see the whole loop. If another reconnection is already
    /// running this returns false immediately, without waiting for it.
    pub async fn try_reconnect(&self) -> bool {
        let Ok(_permit) = self.inner.reconnect_guard.try_acquire() else {
            log::debug!("reconnect already in progress");
            return false;
        };

        let config = &self.inner.config;
        self.transition(ConnectionState::Reconnecting, "reconnecting");
        let mut delay = config.initial_reconnect_delay;

        for attempt in 1..=config.max_reconnect_attempts {
            self.inner.status.write().last_attempt_at = Some(Utc::now());

            if self.reconnect_check().await == ConnectionState::Connected {
                {
                    let mut status = self.inner.status.write();
                    status.failed_attempts = 0;
                    status.last_connected_at = Some(Utc::now());
                }
                log::info!("reconnected after {} attempt(s)", attempt);
                return true;
            }

            self.inner.status.write().failed_attempts += 1;
            if attempt < config.max_reconnect_attempts {
                let wait = (delay + self.jitter()).min(config.max_reconnect_delay);
                log::debug!(
                    "reconnect attempt {}/{} failed, next in {:?}",
                    attempt,
                    config.max_reconnect_attempts,
                    wait
                );
                tokio::time::sleep(wait).await;
                delay = delay.saturating_mul(2);
            }
        }

        log::warn!(
            "giving up reconnecting after {} attempt(s)",
            config.max_reconnect_attempts
        );
        self.transition(
            ConnectionState::Error,
            format!(
                "reconnect failed after {} attempt(s)",
                config.max_reconnect_attempts
            ),
        );
        false
    }

    /// Stop listening to the source
    ///
    /// The next check initializes the monitor again.
    pub fn shutdown(&self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        self.inner.status.write().initialized = false;
    }

    fn handle_online(&self) {
        {
            let mut status = self.inner.status.write();
            status.failed_attempts = 0;
            status.last_connected_at = Some(Utc::now());
        }
        self.transition(ConnectionState::Connected, "platform reported online");
    }

    fn handle_offline(&self) {
        self.transition(ConnectionState::Disconnected, "platform reported offline");
        if self.inner.config.auto_reconnect {
            let monitor = self.clone();
            tokio::spawn(async move {
                monitor.try_reconnect().await;
            });
        }
    }

    /// One connectivity check inside the reconnection loop
    ///
    /// Only success leaves [`ConnectionState::Reconnecting`]; a failed check,
    /// or an offline notification that arrived meanwhile, puts it back.
    async fn reconnect_check(&self) -> ConnectionState {
        let state = if self.is_initialized() {
            self.probe().await
        } else {
            self.initialize().await
        };
        if state == ConnectionState::Connected {
            self.transition(ConnectionState::Connected, "reconnected");
        } else {
            self.transition(ConnectionState::Reconnecting, "reconnecting");
        }
        state
    }

    async fn probe(&self) -> ConnectionState {
        match self.inner.source.is_online().await {
            Ok(true) => ConnectionState::Connected,
            Ok(false) => ConnectionState::Disconnected,
            Err(e) => {
                log::warn!("connectivity check failed: {}", e);
                ConnectionState::Error
            }
        }
    }

    fn jitter(&self) -> Duration {
        let max = self.inner.config.reconnect_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    /// Move to `next`, notifying hooks if the state actually changed
    fn transition(&self, next: ConnectionState, reason: impl Into<String>) -> bool {
        let previous = {
            let mut status = self.inner.status.write();
            if status.state == next {
                return false;
            }
            let previous = status.state;
            status.state = next;
            if next == ConnectionState::Connected {
                status.last_connected_at = Some(Utc::now());
            }
            previous
        };

        let reason = reason.into();
        log::debug!("connection {} -> {} ({})", previous, next, reason);
        self.inner.hooks.emit(TetherEvent::ConnectionStateChanged {
            previous,
            current: next,
            reason,
            timestamp: Utc::now(),
        });
        true
    }

    fn spawn_listener(&self, mut changes: broadcast::Receiver<bool>) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let online = match changes.recv().await {
                    Ok(online) => online,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("missed {} connectivity notification(s)", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let monitor = ConnectionMonitor { inner };
                if online {
                    monitor.handle_online();
                } else {
                    monitor.handle_offline();
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectivityError, ManualConnectivity};
    use crate::test_utils::EventCollector;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Answers checks from a script, then reports offline
    struct ScriptedConnectivity {
        answers: Mutex<VecDeque<bool>>,
        sender: broadcast::Sender<bool>,
    }

    impl ScriptedConnectivity {
        fn new(answers: impl IntoIterator<Item = bool>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into_iter().collect()),
                sender: broadcast::channel(4).0,
            })
        }
    }

    #[async_trait]
    impl ConnectivitySource for ScriptedConnectivity {
        async fn is_online(&self) -> Result<bool, ConnectivityError> {
            Ok(self.answers.lock().pop_front().unwrap_or(false))
        }

        fn subscribe(&self) -> broadcast::Receiver<bool> {
            self.sender.subscribe()
        }
    }

    fn quiet_config(max_reconnect_attempts: u32) -> ConnectionMonitorConfig {
        ConnectionMonitorConfig {
            auto_reconnect: false,
            max_reconnect_attempts,
            reconnect_jitter: Duration::ZERO,
            ..Default::default()
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_initialize_online() {
        let monitor = ConnectionMonitor::new(Arc::new(ManualConnectivity::new(true)));
        let events = EventCollector::new();
        monitor.add_hook(events.clone());

        assert_eq!(monitor.initialize().await, ConnectionState::Connected);
        assert!(monitor.last_connected_at().is_some());

        let transitions: Vec<_> = events
            .events()
            .into_iter()
            .filter_map(|event| match event {
                TetherEvent::ConnectionStateChanged {
                    previous, current, ..
                } => Some((previous, current)),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                (ConnectionState::Disconnected, ConnectionState::Connecting),
                (ConnectionState::Connecting, ConnectionState::Connected),
            ]
        );

        // Idempotent
        assert_eq!(monitor.initialize().await, ConnectionState::Connected);
        assert_eq!(events.count_event("connection_state_changed"), 2);
    }

    #[tokio::test]
    async fn test_initialize_read_failure_is_error() {
        let source = Arc::new(ManualConnectivity::new(true));
        source.set_failure(Some("no network stack"));
        let monitor = ConnectionMonitor::new(source.clone());

        assert_eq!(monitor.initialize().await, ConnectionState::Error);
        assert!(!monitor.is_connected().await);

        source.set_failure(None::<String>);
        assert_eq!(monitor.check_connection().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_unchanged_check_emits_nothing() {
        let monitor = ConnectionMonitor::new(Arc::new(ManualConnectivity::new(false)));
        monitor.initialize().await;

        let events = EventCollector::new();
        monitor.add_hook(events.clone());

        assert_eq!(
            monitor.check_connection().await,
            ConnectionState::Disconnected
        );
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn test_platform_notifications_drive_state() {
        let source = Arc::new(ManualConnectivity::new(true));
        let monitor = ConnectionMonitor::with_config(source.clone(), quiet_config(3));
        monitor.initialize().await;

        source.set_online(false);
        settle().await;
        assert_eq!(monitor.state(), ConnectionState::Disconnected);

        source.set_online(true);
        settle().await;
        assert_eq!(monitor.state(), ConnectionState::Connected);
        assert_eq!(monitor.failed_attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_notification_starts_reconnect() {
        let source = Arc::new(ManualConnectivity::new(true));
        let config = ConnectionMonitorConfig {
            auto_reconnect: true,
            reconnect_jitter: Duration::ZERO,
            ..Default::default()
        };
        let monitor = ConnectionMonitor::with_config(source.clone(), config);
        monitor.initialize().await;

        source.set_online(false);
        settle().await;
        assert_eq!(monitor.failed_attempt_count(), 1);
        assert!(monitor.last_attempt_at().is_some());

        source.set_online(true);
        settle().await;
        assert_eq!(monitor.state(), ConnectionState::Connected);
        assert_eq!(monitor.failed_attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backs_off_until_online() {
        // initial check, then two failures, then success
        let source = ScriptedConnectivity::new([false, false, false, true]);
        let monitor = ConnectionMonitor::with_config(source, quiet_config(5));
        assert_eq!(monitor.initialize().await, ConnectionState::Disconnected);

        let start = tokio::time::Instant::now();
        assert!(monitor.try_reconnect().await);

        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(monitor.state(), ConnectionState::Connected);
        assert_eq!(monitor.failed_attempt_count(), 0);
        assert!(monitor.last_connected_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnecting_holds_through_backoff() {
        let source = ScriptedConnectivity::new([false, false, false, true]);
        let monitor = ConnectionMonitor::with_config(source, quiet_config(5));
        monitor.initialize().await;
        let events = EventCollector::new();
        monitor.add_hook(events.clone());

        let reconnect = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.try_reconnect().await })
        };
        settle().await;
        assert_eq!(monitor.failed_attempt_count(), 1);
        assert_eq!(monitor.state(), ConnectionState::Reconnecting);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(monitor.failed_attempt_count(), 2);
        assert_eq!(monitor.state(), ConnectionState::Reconnecting);

        assert!(reconnect.await.unwrap());
        let transitions: Vec<_> = events
            .events()
            .into_iter()
            .filter_map(|event| match event {
                TetherEvent::ConnectionStateChanged { current, .. } => Some(current),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![ConnectionState::Reconnecting, ConnectionState::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_delay_is_capped() {
        let source = ScriptedConnectivity::new([]);
        let config = ConnectionMonitorConfig {
            max_reconnect_delay: Duration::from_secs(3),
            ..quiet_config(4)
        };
        let monitor = ConnectionMonitor::with_config(source, config);

        let start = tokio::time::Instant::now();
        assert!(!monitor.try_reconnect().await);

        // 1s + 2s + 3s (capped from 4s)
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_moves_to_error() {
        let source = ScriptedConnectivity::new([]);
        let monitor = ConnectionMonitor::with_config(source, quiet_config(3));
        let events = EventCollector::new();
        monitor.add_hook(events.clone());

        assert!(!monitor.try_reconnect().await);
        assert_eq!(monitor.state(), ConnectionState::Error);
        assert_eq!(monitor.failed_attempt_count(), 3);

        let last = events.events().pop();
        assert!(matches!(
            last,
            Some(TetherEvent::ConnectionStateChanged {
                current: ConnectionState::Error,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reconnect_returns_false() {
        let source = ScriptedConnectivity::new([false]);
        let monitor = ConnectionMonitor::with_config(source, quiet_config(3));
        monitor.initialize().await;

        let first = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.try_reconnect().await })
        };
        settle().await;
        assert_eq!(monitor.state(), ConnectionState::Reconnecting);
        let failed_before = monitor.failed_attempt_count();

        assert!(!monitor.try_reconnect().await);
        assert_eq!(monitor.failed_attempt_count(), failed_before);

        assert!(!first.await.unwrap());
        assert_eq!(monitor.failed_attempt_count(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_listening() {
        let source = Arc::new(ManualConnectivity::new(true));
        let monitor = ConnectionMonitor::with_config(source.clone(), quiet_config(1));
        monitor.initialize().await;
        monitor.shutdown();
        settle().await;

        source.set_online(false);
        settle().await;
        assert_eq!(monitor.state(), ConnectionState::Connected);

        assert_eq!(
            monitor.check_connection().await,
            ConnectionState::Disconnected
        );
    }
}
