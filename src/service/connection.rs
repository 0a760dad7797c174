//! Connection lifecycle: connect with retry, subscribe, idempotent teardown.
//!
//! A [`Connection`] owns at most one protocol session and one
//! subscription per event category. All bookkeeping lives behind
//! one async mutex; the protocol client's notification thread only ever
//! touches the [`EventBridge`]s handed to it at subscribe time.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Subscribing -> Active
//!       ^                                                     |
//!       +------------------------ Terminating <---------------+
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value as Json;
use tokio::sync::Mutex;

use super::retry::RetryPolicy;
use crate::bridge::{BridgeSettings, EventBridge};
use crate::domain::event_category::{IJT_BASE_NS, MACHINERY_RESULT_NS, server_object_path};
use crate::domain::{CompanionNamespaces, EventCategory, Opaque, Value};
use crate::error::GatewayError;
use crate::protocol::{
    AttributeId, BrowsePath, ClientIdentity, MonitorHandle, NodeRef, NotificationTarget,
    ProtocolError, ProtocolSession, ProtocolSubscription, SessionFactory,
};
use crate::serialize::{serialize, serialize_pairs};
use crate::sink::TransportSink;

/// Tuning for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Connect retry policy.
    pub retry: RetryPolicy,
    /// Application name announced in the session identity.
    pub application_name: String,
    /// Publishing interval of created subscriptions.
    pub publishing_interval: Duration,
    /// Server-side queue size per monitored item.
    pub queue_size: u32,
    /// Settle delay between subscription teardown and disconnect.
    pub terminate_grace: Duration,
    /// Bound on the disconnect call, and on the forced close after it.
    pub disconnect_timeout: Duration,
    /// Settings of the event bridges this connection spawns.
    pub bridge: BridgeSettings,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            application_name: "IJT:WebClient".to_string(),
            publishing_interval: Duration::from_millis(100),
            queue_size: 200,
            terminate_grace: Duration::from_millis(500),
            disconnect_timeout: Duration::from_secs(2),
            bridge: BridgeSettings::default(),
        }
    }
}

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Connect attempts in progress.
    Connecting,
    /// Session open, nothing subscribed.
    Connected,
    /// Subscribe in progress.
    Subscribing,
    /// At least one category subscribed.
    Active,
    /// Teardown in progress.
    Terminating,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Subscribing => "subscribing",
            Self::Active => "active",
            Self::Terminating => "terminating",
        };
        f.write_str(s)
    }
}

/// One subscribed category.
#[derive(Debug)]
struct SubscriptionSlot {
    subscription: Box<dyn ProtocolSubscription>,
    monitor: Option<MonitorHandle>,
    filters: Vec<NodeRef>,
    bridge: Arc<EventBridge>,
}

#[derive(Debug)]
struct ConnectionInner {
    state: ConnectionState,
    session: Option<Box<dyn ProtocolSession>>,
    slots: BTreeMap<EventCategory, SubscriptionSlot>,
}

/// Attribute batch, references and value read from one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReadout {
    /// Serialized attribute batch; empty if any attribute failed.
    pub attributes: Json,
    /// Serialized reference descriptions.
    pub relations: Json,
    /// Serialized value for variables, `{}` otherwise.
    pub value: Json,
}

/// One logical session to one endpoint.
pub struct Connection {
    endpoint: String,
    settings: ConnectionSettings,
    factory: Arc<dyn SessionFactory>,
    sink: Arc<dyn TransportSink>,
    terminated: AtomicBool,
    inner: Mutex<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("terminated", &self.is_terminated())
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a disconnected connection; nothing happens until
    /// [`connect`](Self::connect).
    pub fn new(
        endpoint: impl Into<String>,
        settings: ConnectionSettings,
        factory: Arc<dyn SessionFactory>,
        sink: Arc<dyn TransportSink>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            settings,
            factory,
            sink,
            terminated: AtomicBool::new(false),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Disconnected,
                session: None,
                slots: BTreeMap::new(),
            }),
        }
    }

    /// Endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether [`terminate`](Self::terminate) has been called.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Categories with a live subscription.
    pub async fn subscribed(&self) -> Vec<EventCategory> {
        self.inner.lock().await.slots.keys().copied().collect()
    }

    /// Opens the session, retrying with exponential backoff.
    ///
    /// Every attempt builds a fresh session; a failed one is dropped whole.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ConnectionTerminated`] after `terminate`.
    /// - [`GatewayError::InvalidState`] if a session is already open.
    /// - [`GatewayError::Connect`] once every attempt has failed.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        if self.is_terminated() {
            return Err(GatewayError::ConnectionTerminated(self.endpoint.clone()));
        }
        let mut inner = self.inner.lock().await;
        if inner.session.is_some() {
            return Err(GatewayError::InvalidState {
                operation: "connect",
                state: inner.state.to_string(),
            });
        }
        self.connect_locked(&mut inner).await
    }

    async fn connect_locked(&self, inner: &mut ConnectionInner) -> Result<(), GatewayError> {
        inner.state = ConnectionState::Connecting;

        let identity = ClientIdentity::local(&self.settings.application_name);
        let policy = self.settings.retry;
        let budget = policy.max_attempts.max(1);
        let total = policy.total_attempts();
        let mut last_error = ProtocolError::NotConnected;

        for attempt in 1..=total {
            if self.is_terminated() {
                inner.state = ConnectionState::Disconnected;
                return Err(GatewayError::ConnectionTerminated(self.endpoint.clone()));
            }
            if attempt > budget {
                tracing::info!(endpoint = %self.endpoint, "attempting failover connection");
            }
            match self.attempt(&identity).await {
                Ok(session) => {
                    tracing::info!(endpoint = %self.endpoint, attempt, "connection established");
                    inner.session = Some(session);
                    inner.state = ConnectionState::Connected;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        attempt,
                        max_attempts = budget,
                        error = %e,
                        "connect attempt failed"
                    );
                    last_error = e;
                    if attempt < budget {
                        tokio::time::sleep(policy.delay_after(attempt)).await;
                    }
                }
            }
        }

        inner.state = ConnectionState::Disconnected;
        tracing::error!(endpoint = %self.endpoint, attempts = total, "giving up on connection");
        Err(GatewayError::Connect {
            endpoint: self.endpoint.clone(),
            attempts: total,
            source: last_error,
        })
    }

    /// Reconnects if the session was dropped underneath this connection,
    /// or if an earlier reconnect left it without one.
    ///
    /// A lost session takes its server-side subscriptions with it, so their
    /// bridges are stopped and the categories must be subscribed again.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ConnectionTerminated`] after `terminate`.
    /// - [`GatewayError::Reconnect`] if every reconnect attempt failed.
    pub async fn ensure_open(&self) -> Result<(), GatewayError> {
        if self.is_terminated() {
            return Err(GatewayError::ConnectionTerminated(self.endpoint.clone()));
        }
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        match inner.session.as_deref() {
            Some(session) if session.is_open() => return Ok(()),
            Some(_) => tracing::warn!(
                endpoint = %self.endpoint,
                state = %inner.state,
                dropped = inner.slots.len(),
                "session lost; reconnecting"
            ),
            None => tracing::info!(endpoint = %self.endpoint, "no session; reconnecting"),
        }

        for (_, slot) in std::mem::take(&mut inner.slots) {
            slot.bridge.shutdown();
        }
        if let Some(mut lost) = inner.session.take() {
            let forced =
                tokio::time::timeout(self.settings.disconnect_timeout, lost.close_session()).await;
            if !matches!(forced, Ok(Ok(()))) {
                tracing::debug!(endpoint = %self.endpoint, "close of lost session failed");
            }
        }
        self.connect_locked(inner)
            .await
            .map_err(|e| GatewayError::Reconnect(Box::new(e)))
    }

    async fn attempt(
        &self,
        identity: &ClientIdentity,
    ) -> Result<Box<dyn ProtocolSession>, ProtocolError> {
        let mut session = self.factory.create(&self.endpoint, identity)?;
        session.connect().await?;
        Ok(session)
    }

    /// Subscribes the categories selected by `filter`; already subscribed
    /// categories are skipped. Returns the newly subscribed categories.
    ///
    /// On failure the whole connection is terminated before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ConnectionTerminated`] after `terminate`.
    /// - [`GatewayError::InvalidState`] unless connected.
    /// - [`GatewayError::Subscribe`] if any protocol step fails.
    pub async fn subscribe(&self, filter: &str) -> Result<Vec<EventCategory>, GatewayError> {
        if self.is_terminated() {
            return Err(GatewayError::ConnectionTerminated(self.endpoint.clone()));
        }
        let categories = EventCategory::select(filter);

        let result = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            match inner.state {
                ConnectionState::Connected | ConnectionState::Active => {}
                other => {
                    return Err(GatewayError::InvalidState {
                        operation: "subscribe",
                        state: other.to_string(),
                    });
                }
            }
            inner.state = ConnectionState::Subscribing;
            let result = self.subscribe_locked(inner, &categories).await;
            if result.is_ok() {
                inner.state = if inner.slots.is_empty() {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Active
                };
            }
            result
        };

        if let Err(e) = &result {
            tracing::error!(endpoint = %self.endpoint, error = %e, "subscribe failed; terminating");
            self.terminate().await;
        }
        result
    }

    async fn subscribe_locked(
        &self,
        inner: &mut ConnectionInner,
        categories: &[EventCategory],
    ) -> Result<Vec<EventCategory>, GatewayError> {
        let session = inner.session.as_deref().ok_or_else(|| GatewayError::InvalidState {
            operation: "subscribe",
            state: ConnectionState::Disconnected.to_string(),
        })?;

        let mut added = Vec::new();
        for &category in categories {
            if inner.slots.contains_key(&category) {
                tracing::debug!(endpoint = %self.endpoint, %category, "already subscribed");
                continue;
            }
            let slot = self
                .open_slot(session, category)
                .await
                .map_err(|source| GatewayError::Subscribe {
                    endpoint: self.endpoint.clone(),
                    category: category.to_string(),
                    source,
                })?;
            tracing::info!(
                endpoint = %self.endpoint,
                %category,
                filters = slot.filters.len(),
                "subscribed"
            );
            inner.slots.insert(category, slot);
            added.push(category);
        }
        Ok(added)
    }

    async fn open_slot(
        &self,
        session: &dyn ProtocolSession,
        category: EventCategory,
    ) -> Result<SubscriptionSlot, ProtocolError> {
        let namespaces = CompanionNamespaces {
            machinery_result: session.namespace_index(MACHINERY_RESULT_NS).await?,
            ijt_base: session.namespace_index(IJT_BASE_NS).await?,
        };
        let mut filters = Vec::new();
        for path in category.event_type_paths(namespaces) {
            filters.push(session.resolve_node(&path).await?);
        }
        let source = session.resolve_node(&server_object_path()).await?;

        let bridge = EventBridge::spawn(
            self.endpoint.as_str(),
            category,
            Arc::clone(&self.sink),
            session.clock(),
            self.settings.bridge,
        );
        let target: Arc<dyn NotificationTarget> = Arc::clone(&bridge) as _;
        let mut subscription = match session
            .create_subscription(self.settings.publishing_interval, target)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                bridge.shutdown();
                return Err(e);
            }
        };

        match subscription
            .subscribe_events(&source, &filters, self.settings.queue_size)
            .await
        {
            Ok(handle) => Ok(SubscriptionSlot {
                subscription,
                monitor: Some(handle),
                filters,
                bridge,
            }),
            Err(e) => {
                if let Err(delete_error) = subscription.delete().await {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        %category,
                        error = %delete_error,
                        "delete of half-created subscription failed"
                    );
                }
                bridge.shutdown();
                Err(e)
            }
        }
    }

    /// Reads the standard attribute batch of `node`, plus its value when
    /// the node is a variable.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidState`] without an open session.
    /// - [`GatewayError::Protocol`] if the read request fails as a whole.
    pub async fn read(&self, node: &NodeRef) -> Result<NodeReadout, GatewayError> {
        let inner = self.inner.lock().await;
        let session = inner.session.as_deref().ok_or_else(|| GatewayError::InvalidState {
            operation: "read",
            state: inner.state.to_string(),
        })?;
        let values = session
            .read_attributes(node, &AttributeId::READ_BATCH)
            .await?;

        let pairs: Vec<(&str, Result<Value, ProtocolError>)> = AttributeId::READ_BATCH
            .iter()
            .map(AttributeId::as_str)
            .zip(values)
            .collect();
        let variable = Value::from(Opaque::enumeration("NodeClass", "Variable"));
        let is_variable = pairs
            .iter()
            .any(|(name, value)| *name == "NodeClass" && value.as_ref() == Ok(&variable));
        let value = pairs
            .iter()
            .find(|(name, _)| *name == "Value")
            .and_then(|(_, value)| value.as_ref().ok())
            .filter(|_| is_variable)
            .map_or_else(|| Json::Object(serde_json::Map::new()), serialize);

        let relations = session.references(node).await?;

        Ok(NodeReadout {
            attributes: serialize_pairs(pairs),
            relations: serialize(&Value::Sequence(relations)),
            value,
        })
    }

    /// Translates `path`, relative to `start`, into a node id.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidState`] without an open session.
    /// - [`GatewayError::Protocol`] if the path has no target.
    pub async fn path_to_id(
        &self,
        start: &NodeRef,
        path: &BrowsePath,
    ) -> Result<NodeRef, GatewayError> {
        let inner = self.inner.lock().await;
        let session = inner.session.as_deref().ok_or_else(|| GatewayError::InvalidState {
            operation: "pathtoid",
            state: inner.state.to_string(),
        })?;
        Ok(session.translate_path(start, path).await?)
    }

    /// The server's namespace array.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidState`] without an open session.
    /// - [`GatewayError::Protocol`] if the read fails.
    pub async fn namespaces(&self) -> Result<Vec<String>, GatewayError> {
        let inner = self.inner.lock().await;
        let session = inner.session.as_deref().ok_or_else(|| GatewayError::InvalidState {
            operation: "namespaces",
            state: inner.state.to_string(),
        })?;
        Ok(session.namespace_array().await?)
    }

    /// Tears everything down. Only the first call does any work; later
    /// and concurrent calls return immediately. Never fails.
    ///
    /// Each subscription is unsubscribed then deleted on its own; failures
    /// are logged and do not stop the remaining steps. After the grace
    /// period the session is disconnected under a timeout, with a forced
    /// close if the timeout expires.
    pub async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            tracing::debug!(endpoint = %self.endpoint, "terminate already performed");
            return;
        }
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.state = ConnectionState::Terminating;
        tracing::info!(endpoint = %self.endpoint, "terminating connection");

        for (category, mut slot) in std::mem::take(&mut inner.slots) {
            if let Some(handle) = slot.monitor.take()
                && let Err(e) = slot.subscription.unsubscribe(handle).await
            {
                tracing::warn!(endpoint = %self.endpoint, %category, error = %e, "unsubscribe failed");
            }
            if let Err(e) = slot.subscription.delete().await {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    %category,
                    error = %e,
                    "delete subscription failed"
                );
            }
            slot.bridge.shutdown();
        }

        if let Some(mut session) = inner.session.take() {
            tokio::time::sleep(self.settings.terminate_grace).await;
            self.disconnect(session.as_mut()).await;
        }

        inner.state = ConnectionState::Disconnected;
        tracing::info!(endpoint = %self.endpoint, "connection cleaned up");
    }

    async fn disconnect(&self, session: &mut dyn ProtocolSession) {
        let timeout = self.settings.disconnect_timeout;
        let outcome = tokio::time::timeout(timeout, session.disconnect()).await;
        match outcome {
            Ok(Ok(())) => tracing::info!(endpoint = %self.endpoint, "disconnected"),
            Ok(Err(e)) if e.is_benign_disconnect() => {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    error = %e,
                    "late response during disconnect ignored"
                );
            }
            Ok(Err(e)) => tracing::warn!(endpoint = %self.endpoint, error = %e, "disconnect failed"),
            Err(_) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    timeout_ms = timeout.as_millis(),
                    "disconnect timed out; forcing session close"
                );
                let forced = tokio::time::timeout(timeout, session.close_session()).await;
                match forced {
                    Ok(Ok(())) => tracing::info!(endpoint = %self.endpoint, "session forcibly closed"),
                    Ok(Err(e)) => {
                        tracing::warn!(endpoint = %self.endpoint, error = %e, "forced close failed");
                    }
                    Err(_) => tracing::warn!(endpoint = %self.endpoint, "forced close timed out"),
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tracing::field::{Field, Visit};
    use tracing::{Event as TracingEvent, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;
    use crate::protocol::simulated::{
        SimulatedController, SimulationPlan, UNREADABLE_NODE, synthetic_result_event,
    };
    use crate::serialize::SerializedPayload;
    use crate::sink::SinkError;

    const ENDPOINT: &str = "opc.tcp://sim:4840";

    #[derive(Debug, Default)]
    struct NullSink;

    #[async_trait]
    impl TransportSink for NullSink {
        async fn send(&self, _payload: &SerializedPayload) -> Result<(), SinkError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            terminate_grace: Duration::ZERO,
            disconnect_timeout: Duration::from_millis(200),
            ..ConnectionSettings::default()
        }
    }

    fn connection(plan: SimulationPlan, settings: ConnectionSettings) -> (Arc<SimulatedController>, Connection) {
        let controller = Arc::new(SimulatedController::new(plan));
        let factory: Arc<dyn SessionFactory> = Arc::clone(&controller) as _;
        let connection = Connection::new(ENDPOINT, settings, factory, Arc::new(NullSink));
        (controller, connection)
    }

    async fn active(plan: SimulationPlan) -> (Arc<SimulatedController>, Connection) {
        let (controller, connection) = connection(plan, settings());
        let Ok(()) = connection.connect().await else {
            panic!("connect should succeed");
        };
        let Ok(added) = connection.subscribe("").await else {
            panic!("subscribe should succeed");
        };
        assert_eq!(added.len(), 2);
        (controller, connection)
    }

    /// Counts `WARN` and `INFO` events emitted by the connection module.
    #[derive(Debug, Default, Clone)]
    struct LevelCounter(Arc<StdMutex<Vec<(Level, String)>>>);

    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: Subscriber> Layer<S> for LevelCounter {
        fn on_event(&self, event: &TracingEvent<'_>, _ctx: Context<'_, S>) {
            if event.metadata().target().ends_with("service::connection") {
                let mut visitor = MessageVisitor(String::new());
                event.record(&mut visitor);
                if let Ok(mut seen) = self.0.lock() {
                    seen.push((*event.metadata().level(), visitor.0));
                }
            }
        }
    }

    impl LevelCounter {
        fn count(&self, level: Level, message: &str) -> usize {
            self.0.lock().map_or(0, |seen| {
                seen.iter()
                    .filter(|(l, m)| *l == level && m == message)
                    .count()
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_backs_off_between_failures() {
        let counter = LevelCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let (controller, connection) = connection(
            SimulationPlan {
                connect_failures: 2,
                ..SimulationPlan::default()
            },
            settings(),
        );
        let Ok(()) = connection.connect().await else {
            panic!("third attempt should succeed");
        };

        assert_eq!(controller.journal().connect_attempts(), 3);
        assert_eq!(controller.journal().sessions_created(), 3);
        let instants = controller.journal().connect_instants();
        let [first, second, third] = instants.as_slice() else {
            panic!("three attempts expected");
        };
        let gap1 = second.duration_since(*first);
        let gap2 = third.duration_since(*second);
        assert_eq!(gap1, Duration::from_secs(2));
        assert_eq!(gap2, Duration::from_secs(4));
        assert!(gap2 > gap1);

        assert_eq!(counter.count(Level::WARN, "connect attempt failed"), 2);
        assert_eq!(counter.count(Level::INFO, "connection established"), 1);
        assert_eq!(connection.state().await, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_stop_after_budget() {
        let (controller, connection) = connection(
            SimulationPlan {
                connect_failures: u32::MAX,
                ..SimulationPlan::default()
            },
            settings(),
        );
        let result = connection.connect().await;
        assert!(matches!(result, Err(GatewayError::Connect { attempts: 3, .. })));
        assert_eq!(controller.journal().connect_attempts(), 3);
        assert_eq!(connection.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn failover_makes_one_extra_attempt() {
        let mut settings = settings();
        settings.retry.failover = true;
        let (controller, connection) = connection(
            SimulationPlan {
                connect_failures: 3,
                ..SimulationPlan::default()
            },
            settings,
        );
        let Ok(()) = connection.connect().await else {
            panic!("failover attempt should succeed");
        };
        assert_eq!(controller.journal().connect_attempts(), 4);
    }

    #[tokio::test]
    async fn subscribe_requires_connection() {
        let (_, connection) = connection(SimulationPlan::default(), settings());
        assert!(matches!(
            connection.subscribe("").await,
            Err(GatewayError::InvalidState { .. })
        ));
        assert!(!connection.is_terminated());
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_per_category() {
        let (controller, connection) = active(SimulationPlan::default()).await;
        let Ok(again) = connection.subscribe("ResultEvent").await else {
            panic!("resubscribe should succeed");
        };
        assert!(again.is_empty());
        assert_eq!(controller.journal().subscriptions_created(), 2);
        assert_eq!(controller.active_monitors(), 2);
        assert_eq!(connection.state().await, ConnectionState::Active);
    }

    #[tokio::test]
    async fn subscribe_selects_by_filter() {
        let (controller, connection) = connection(SimulationPlan::default(), settings());
        let Ok(()) = connection.connect().await else {
            panic!("connect should succeed");
        };
        let Ok(added) = connection.subscribe(" JoiningSystemEvent ").await else {
            panic!("subscribe should succeed");
        };
        assert_eq!(added, vec![EventCategory::JoiningSystem]);
        assert_eq!(controller.emit(&synthetic_result_event(1)), 0);
    }

    #[tokio::test]
    async fn subscribe_failure_terminates_connection() {
        let (controller, connection) = connection(
            SimulationPlan {
                fail_subscribe: true,
                ..SimulationPlan::default()
            },
            settings(),
        );
        let Ok(()) = connection.connect().await else {
            panic!("connect should succeed");
        };
        let result = connection.subscribe("").await;
        assert!(matches!(result, Err(GatewayError::Subscribe { .. })));
        assert!(connection.is_terminated());
        assert_eq!(connection.state().await, ConnectionState::Disconnected);
        assert_eq!(controller.journal().disconnects(), 1);
        // The half-created subscription was deleted before terminate ran.
        assert_eq!(controller.journal().deletes(), 1);
        assert_eq!(controller.active_monitors(), 0);
    }

    #[tokio::test]
    async fn terminate_twice_disconnects_once() {
        let (controller, connection) = active(SimulationPlan::default()).await;
        connection.terminate().await;
        connection.terminate().await;

        let journal = controller.journal();
        assert_eq!(journal.disconnects(), 1);
        assert_eq!(journal.unsubscribes(), 2);
        assert_eq!(journal.deletes(), 2);
        assert!(connection.subscribed().await.is_empty());
        assert!(matches!(
            connection.connect().await,
            Err(GatewayError::ConnectionTerminated(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_terminate_disconnects_once() {
        let (controller, connection) = active(SimulationPlan::default()).await;
        let connection = Arc::new(connection);
        let calls: Vec<_> = (0..4)
            .map(|_| {
                let connection = Arc::clone(&connection);
                tokio::spawn(async move { connection.terminate().await })
            })
            .collect();
        for call in calls {
            let Ok(()) = call.await else {
                panic!("terminate task panicked");
            };
        }
        assert_eq!(connection.state().await, ConnectionState::Disconnected);

        let journal = controller.journal();
        assert_eq!(journal.disconnects(), 1);
        assert_eq!(journal.unsubscribes(), 2);
        assert_eq!(journal.deletes(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_failure_does_not_stop_teardown() {
        let (controller, connection) = active(SimulationPlan {
            unsubscribe_failures: 1,
            fail_delete: true,
            ..SimulationPlan::default()
        })
        .await;
        connection.terminate().await;

        let journal = controller.journal();
        assert_eq!(journal.unsubscribes(), 2);
        assert_eq!(journal.deletes(), 2);
        assert_eq!(journal.disconnects(), 1);
        assert_eq!(connection.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_timeout_forces_close() {
        let (controller, connection) = active(SimulationPlan {
            disconnect_delay: Duration::from_secs(60),
            ..SimulationPlan::default()
        })
        .await;
        connection.terminate().await;

        assert_eq!(controller.journal().disconnects(), 1);
        assert_eq!(controller.journal().forced_closes(), 1);
        assert_eq!(connection.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn benign_disconnect_error_is_tolerated() {
        let (controller, connection) = active(SimulationPlan {
            disconnect_error: Some(ProtocolError::NoOutstandingRequest),
            ..SimulationPlan::default()
        })
        .await;
        connection.terminate().await;
        assert_eq!(controller.journal().forced_closes(), 0);
        assert_eq!(connection.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn read_degrades_failed_batch_to_empty_object() {
        let (_, connection) = connection(SimulationPlan::default(), settings());
        let Ok(()) = connection.connect().await else {
            panic!("connect should succeed");
        };
        let Ok(good) = connection.read(&NodeRef::new("ns=1;s=Torque")).await else {
            panic!("read should succeed");
        };
        assert_eq!(good.attributes.get("NodeClass"), Some(&serde_json::json!("NodeClass.Variable")));
        assert_eq!(good.value, serde_json::json!("value of Torque"));

        let Ok(bad) = connection.read(&NodeRef::new(UNREADABLE_NODE)).await else {
            panic!("read should succeed");
        };
        assert_eq!(bad.attributes, serde_json::json!({}));
        assert_eq!(bad.value, serde_json::json!({}));
    }

    #[tokio::test]
    async fn read_carries_reference_descriptions() {
        let (_, connection) = connection(SimulationPlan::default(), settings());
        let Ok(()) = connection.connect().await else {
            panic!("connect should succeed");
        };
        let Ok(readout) = connection.read(&NodeRef::new("ns=1;s=Torque")).await else {
            panic!("read should succeed");
        };
        let Some(relations) = readout.relations.as_array() else {
            panic!("relations should be a list");
        };
        assert_eq!(relations.len(), 2);
        assert_eq!(
            relations.first().and_then(|r| r.get(crate::serialize::RECORD_TAG)),
            Some(&serde_json::json!("ReferenceDescription"))
        );
    }

    #[tokio::test]
    async fn path_to_id_translates_from_start_node() {
        let (_, connection) = connection(SimulationPlan::default(), settings());
        let path = BrowsePath::new(vec![crate::protocol::QualifiedName::new(4, "Tools")]);
        assert!(matches!(
            connection.path_to_id(&NodeRef::new("ns=1;s=Station"), &path).await,
            Err(GatewayError::InvalidState { .. })
        ));
        let Ok(()) = connection.connect().await else {
            panic!("connect should succeed");
        };
        let start = NodeRef::new("ns=1;s=Station");
        let Ok(target) = connection.path_to_id(&start, &path).await else {
            panic!("path should translate");
        };
        assert_eq!(target.as_str(), "ns=1;s=Station/4:Tools");
    }

    #[tokio::test]
    async fn ensure_open_keeps_live_session() {
        let (controller, connection) = active(SimulationPlan::default()).await;
        let Ok(()) = connection.ensure_open().await else {
            panic!("open session needs no reconnect");
        };
        assert_eq!(controller.journal().sessions_created(), 1);
        assert_eq!(connection.state().await, ConnectionState::Active);
    }

    #[tokio::test]
    async fn ensure_open_reconnects_dropped_session() {
        let (controller, connection) = active(SimulationPlan::default()).await;
        controller.drop_sessions();

        let Ok(()) = connection.ensure_open().await else {
            panic!("reconnect should succeed");
        };
        assert_eq!(controller.journal().sessions_created(), 2);
        assert_eq!(connection.state().await, ConnectionState::Connected);
        assert!(connection.subscribed().await.is_empty());

        let Ok(added) = connection.subscribe("").await else {
            panic!("subscribe after reconnect should succeed");
        };
        assert_eq!(added.len(), 2);
        assert_eq!(controller.active_monitors(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_reports_and_retries_next_time() {
        let (controller, connection) = active(SimulationPlan::default()).await;
        controller.drop_sessions();
        controller.refuse_next_connects(u32::MAX);

        let Err(error) = connection.ensure_open().await else {
            panic!("reconnect should fail");
        };
        let GatewayError::Reconnect(cause) = &error else {
            panic!("reconnect error expected, got {error}");
        };
        assert!(matches!(**cause, GatewayError::Connect { attempts: 3, .. }));
        assert!(error.to_string().starts_with("Failed to ensure connection is open"));
        assert!(!connection.is_terminated());

        controller.refuse_next_connects(0);
        let Ok(()) = connection.ensure_open().await else {
            panic!("second reconnect should succeed");
        };
        assert_eq!(connection.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn ensure_open_after_terminate_is_rejected() {
        let (_, connection) = active(SimulationPlan::default()).await;
        connection.terminate().await;
        assert!(matches!(
            connection.ensure_open().await,
            Err(GatewayError::ConnectionTerminated(_))
        ));
    }

    #[tokio::test]
    async fn read_without_session_is_rejected() {
        let (_, connection) = connection(SimulationPlan::default(), settings());
        assert!(matches!(
            connection.read(&NodeRef::new("ns=1;s=Torque")).await,
            Err(GatewayError::InvalidState { .. })
        ));
    }
}
