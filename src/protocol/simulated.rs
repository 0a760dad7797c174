//! In-process simulated joining controller.
//!
//! Implements the protocol seam without any network traffic. The binary
//! uses it as a demo backend; tests use it as the collaborator fake, with
//! fault injection through [`SimulationPlan`] and call counting through
//! [`SimulationJournal`].
//!
//! Events are routed by type: [`SimulatedController::emit`] delivers a raw
//! event to every active subscription whose filter set contains the
//! event's type node.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{
    AttributeId, BrowsePath, ClientIdentity, MonitorHandle, NodeRef, NotificationTarget,
    ProtocolError, ProtocolSession, ProtocolSubscription, RawEvent, SessionClock, SessionFactory,
};
use crate::domain::event_category::{IJT_BASE_NS, MACHINERY_RESULT_NS};
use crate::domain::{CompanionNamespaces, EventCategory, Opaque, Record, Value};

/// Namespace indices the simulated server reports.
pub const SIMULATED_NAMESPACES: CompanionNamespaces = CompanionNamespaces {
    machinery_result: 3,
    ijt_base: 4,
};

/// Node whose `Value` attribute always fails to read.
pub const UNREADABLE_NODE: &str = "ns=1;s=Unreadable";

const ENDPOINT_SCHEME: &str = "opc.tcp://";

/// Faults the simulated controller injects.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationPlan {
    /// Number of initial `connect` calls that fail.
    pub connect_failures: u32,
    /// Every `subscribe_events` call fails.
    pub fail_subscribe: bool,
    /// Number of initial `unsubscribe` calls that fail.
    pub unsubscribe_failures: u32,
    /// Every `delete` call fails.
    pub fail_delete: bool,
    /// Time `disconnect` takes before returning.
    pub disconnect_delay: Duration,
    /// Error `disconnect` returns after the delay.
    pub disconnect_error: Option<ProtocolError>,
    /// Whether the session clock can be read.
    pub clock_available: bool,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            connect_failures: 0,
            fail_subscribe: false,
            unsubscribe_failures: 0,
            fail_delete: false,
            disconnect_delay: Duration::ZERO,
            disconnect_error: None,
            clock_available: true,
        }
    }
}

/// Counts of collaborator calls made against the simulated controller.
#[derive(Debug, Default)]
pub struct SimulationJournal {
    sessions_created: AtomicU32,
    connect_attempts: AtomicU32,
    disconnects: AtomicU32,
    forced_closes: AtomicU32,
    subscriptions_created: AtomicU32,
    event_subscriptions: AtomicU32,
    unsubscribes: AtomicU32,
    deletes: AtomicU32,
    connect_instants: Mutex<Vec<Instant>>,
}

impl SimulationJournal {
    /// Sessions built by the factory.
    pub fn sessions_created(&self) -> u32 {
        self.sessions_created.load(Ordering::SeqCst)
    }

    /// `connect` calls, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// `disconnect` calls.
    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// `close_session` calls.
    pub fn forced_closes(&self) -> u32 {
        self.forced_closes.load(Ordering::SeqCst)
    }

    /// `create_subscription` calls.
    pub fn subscriptions_created(&self) -> u32 {
        self.subscriptions_created.load(Ordering::SeqCst)
    }

    /// `subscribe_events` calls.
    pub fn event_subscriptions(&self) -> u32 {
        self.event_subscriptions.load(Ordering::SeqCst)
    }

    /// `unsubscribe` calls.
    pub fn unsubscribes(&self) -> u32 {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// `delete` calls.
    pub fn deletes(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Runtime instants of every `connect` call, in call order.
    pub fn connect_instants(&self) -> Vec<Instant> {
        self.connect_instants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct Registration {
    session_id: u32,
    subscription_id: u32,
    handle: MonitorHandle,
    filters: Vec<NodeRef>,
    target: Arc<dyn NotificationTarget>,
}

struct ControllerState {
    plan: SimulationPlan,
    journal: SimulationJournal,
    namespaces: Vec<String>,
    connect_failures_left: AtomicU32,
    unsubscribe_failures_left: AtomicU32,
    next_id: AtomicU32,
    epoch: AtomicU32,
    registrations: Mutex<Vec<Registration>>,
}

impl ControllerState {
    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn registrations(&self) -> std::sync::MutexGuard<'_, Vec<Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn drop_session(&self, session_id: u32) {
        self.registrations().retain(|r| r.session_id != session_id);
    }
}

/// Decrements `counter` if it is positive; returns whether it was.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Simulated joining controller; hands out [`SimulatedSession`]s.
pub struct SimulatedController {
    state: Arc<ControllerState>,
    sequence: AtomicU64,
}

impl fmt::Debug for SimulatedController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedController")
            .field("plan", &self.state.plan)
            .field("active_monitors", &self.active_monitors())
            .finish_non_exhaustive()
    }
}

impl SimulatedController {
    /// Creates a controller that injects the faults in `plan`.
    #[must_use]
    pub fn new(plan: SimulationPlan) -> Self {
        let connect_failures = plan.connect_failures;
        let unsubscribe_failures = plan.unsubscribe_failures;
        Self {
            state: Arc::new(ControllerState {
                plan,
                journal: SimulationJournal::default(),
                namespaces: vec![
                    "http://opcfoundation.org/UA/".to_string(),
                    "urn:simulated:joining-controller".to_string(),
                    "http://opcfoundation.org/UA/Machinery/".to_string(),
                    MACHINERY_RESULT_NS.to_string(),
                    IJT_BASE_NS.to_string(),
                ],
                connect_failures_left: AtomicU32::new(connect_failures),
                unsubscribe_failures_left: AtomicU32::new(unsubscribe_failures),
                next_id: AtomicU32::new(1),
                epoch: AtomicU32::new(0),
                registrations: Mutex::new(Vec::new()),
            }),
            sequence: AtomicU64::new(1),
        }
    }

    /// Call journal.
    #[must_use]
    pub fn journal(&self) -> &SimulationJournal {
        &self.state.journal
    }

    /// Drops every open session as a server restart would. Sessions report
    /// closed afterwards and their monitored items are gone.
    pub fn drop_sessions(&self) {
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.registrations().clear();
        tracing::info!("simulated controller dropped all sessions");
    }

    /// Makes the next `n` connect attempts fail.
    pub fn refuse_next_connects(&self, n: u32) {
        self.state.connect_failures_left.store(n, Ordering::SeqCst);
    }

    /// Number of bound filter sets across all sessions.
    #[must_use]
    pub fn active_monitors(&self) -> usize {
        self.state.registrations().len()
    }

    /// Delivers `raw` to every subscription filtering on its type.
    ///
    /// Runs on the caller's thread, like a protocol client's receive loop.
    /// Returns the number of targets notified.
    pub fn emit(&self, raw: &RawEvent) -> usize {
        let targets: Vec<Arc<dyn NotificationTarget>> = self
            .state
            .registrations()
            .iter()
            .filter(|r| r.filters.contains(&raw.event_type))
            .map(|r| Arc::clone(&r.target))
            .collect();
        for target in &targets {
            target.notify(raw.clone());
        }
        targets.len()
    }

    /// Emits `events` in order from a dedicated OS thread.
    pub fn emit_from_thread(
        self: &Arc<Self>,
        events: Vec<RawEvent>,
    ) -> std::thread::JoinHandle<usize> {
        let controller = Arc::clone(self);
        std::thread::spawn(move || events.iter().map(|raw| controller.emit(raw)).sum())
    }

    /// Periodically emits a synthetic result, with a joining system event
    /// every fifth tick. Runs until the returned task is aborted.
    pub fn spawn_auto_emitter(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let seq = controller.sequence.fetch_add(1, Ordering::SeqCst);
                let delivered = controller.emit(&synthetic_result_event(seq));
                tracing::debug!(seq, delivered, "simulated result emitted");
                if seq % 5 == 0 {
                    controller.emit(&synthetic_joining_event(seq));
                }
            }
        })
    }
}

impl SessionFactory for SimulatedController {
    fn create(
        &self,
        endpoint: &str,
        identity: &ClientIdentity,
    ) -> Result<Box<dyn ProtocolSession>, ProtocolError> {
        if !endpoint.starts_with(ENDPOINT_SCHEME) {
            return Err(ProtocolError::ConnectionFailed(format!(
                "unsupported endpoint url: {endpoint}"
            )));
        }
        self.state
            .journal
            .sessions_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedSession {
            id: self.state.next_id(),
            endpoint: endpoint.to_string(),
            identity: identity.clone(),
            connected: false,
            epoch: 0,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Session against the simulated controller.
pub struct SimulatedSession {
    id: u32,
    endpoint: String,
    identity: ClientIdentity,
    connected: bool,
    epoch: u32,
    state: Arc<ControllerState>,
}

impl fmt::Debug for SimulatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedSession")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("application_uri", &self.identity.application_uri)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl SimulatedSession {
    fn ensure_connected(&self) -> Result<(), ProtocolError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ProtocolError::NotConnected)
        }
    }

    fn read_one(node: &NodeRef, attribute: AttributeId) -> Result<Value, ProtocolError> {
        let name = node.as_str().rsplit(['=', '/']).next().unwrap_or_default();
        Ok(match attribute {
            AttributeId::NodeId => Value::from(Opaque::node_id(node.as_str())),
            AttributeId::NodeClass => Value::from(Opaque::enumeration("NodeClass", "Variable")),
            AttributeId::BrowseName => Value::from(format!("1:{name}")),
            AttributeId::DisplayName => Value::from(
                Record::new("LocalizedText")
                    .with("Locale", "en")
                    .with("Text", name),
            ),
            AttributeId::Description => Value::from(
                Record::new("LocalizedText")
                    .with("Locale", Value::Null)
                    .with("Text", format!("Simulated node {name}")),
            ),
            AttributeId::EventNotifier
            | AttributeId::WriteMask
            | AttributeId::UserWriteMask
            | AttributeId::AccessRestrictions => Value::UInt(0),
            AttributeId::RolePermissions | AttributeId::UserRolePermissions => {
                Value::Sequence(Vec::new())
            }
            AttributeId::Value if node.as_str() == UNREADABLE_NODE => {
                return Err(ProtocolError::BadStatus {
                    code: 0x803A_0000,
                    message: "BadNotReadable".to_string(),
                });
            }
            AttributeId::Value => Value::from(format!("value of {name}")),
        })
    }
}

#[async_trait]
impl ProtocolSession for SimulatedSession {
    async fn connect(&mut self) -> Result<(), ProtocolError> {
        let journal = &self.state.journal;
        journal.connect_attempts.fetch_add(1, Ordering::SeqCst);
        journal
            .connect_instants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());

        if take_one(&self.state.connect_failures_left) {
            return Err(ProtocolError::ConnectionFailed(format!(
                "{} refused the connection",
                self.endpoint
            )));
        }
        self.connected = true;
        self.epoch = self.state.epoch.load(Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        self.state.journal.disconnects.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.plan.disconnect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.connected = false;
        self.state.drop_session(self.id);
        match &self.state.plan.disconnect_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn close_session(&mut self) -> Result<(), ProtocolError> {
        self.state.journal.forced_closes.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        self.state.drop_session(self.id);
        Ok(())
    }

    async fn namespace_index(&self, uri: &str) -> Result<u16, ProtocolError> {
        self.ensure_connected()?;
        self.state
            .namespaces
            .iter()
            .position(|ns| ns == uri)
            .and_then(|i| u16::try_from(i).ok())
            .ok_or_else(|| ProtocolError::NamespaceNotFound(uri.to_string()))
    }

    async fn namespace_array(&self) -> Result<Vec<String>, ProtocolError> {
        self.ensure_connected()?;
        Ok(self.state.namespaces.clone())
    }

    fn is_open(&self) -> bool {
        self.connected && self.epoch == self.state.epoch.load(Ordering::SeqCst)
    }

    async fn resolve_node(&self, path: &BrowsePath) -> Result<NodeRef, ProtocolError> {
        self.ensure_connected()?;
        if path.elements().is_empty() {
            return Err(ProtocolError::NodeNotFound(path.to_string()));
        }
        Ok(NodeRef::new(path.to_string()))
    }

    async fn translate_path(
        &self,
        start: &NodeRef,
        path: &BrowsePath,
    ) -> Result<NodeRef, ProtocolError> {
        self.ensure_connected()?;
        if path.elements().is_empty() {
            return Err(ProtocolError::NodeNotFound(format!("{start}/")));
        }
        Ok(NodeRef::new(format!("{start}/{path}")))
    }

    async fn references(&self, node: &NodeRef) -> Result<Vec<Value>, ProtocolError> {
        self.ensure_connected()?;
        let reference = |type_id: &str, forward: bool, target: &str, name: &str| {
            Value::from(
                Record::new("ReferenceDescription")
                    .with("ReferenceTypeId", Opaque::node_id(type_id))
                    .with("IsForward", forward)
                    .with("NodeId", Opaque::node_id(target))
                    .with("BrowseName", format!("0:{name}"))
                    .with("NodeClass", Opaque::enumeration("NodeClass", "Object")),
            )
        };
        tracing::trace!(%node, "simulated references browsed");
        Ok(vec![
            reference("i=40", true, "i=58", "BaseObjectType"),
            reference("i=47", false, "ns=1;s=JoiningSystem", "JoiningSystem"),
        ])
    }

    async fn read_attributes(
        &self,
        node: &NodeRef,
        attributes: &[AttributeId],
    ) -> Result<Vec<Result<Value, ProtocolError>>, ProtocolError> {
        self.ensure_connected()?;
        Ok(attributes
            .iter()
            .map(|attribute| Self::read_one(node, *attribute))
            .collect())
    }

    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        target: Arc<dyn NotificationTarget>,
    ) -> Result<Box<dyn ProtocolSubscription>, ProtocolError> {
        self.ensure_connected()?;
        self.state
            .journal
            .subscriptions_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedSubscription {
            id: self.state.next_id(),
            session_id: self.id,
            publishing_interval,
            target,
            state: Arc::clone(&self.state),
        }))
    }

    fn clock(&self) -> Option<Arc<dyn SessionClock>> {
        Some(Arc::new(SimulatedClock {
            available: self.state.plan.clock_available,
        }))
    }
}

/// Subscription on the simulated controller.
pub struct SimulatedSubscription {
    id: u32,
    session_id: u32,
    publishing_interval: Duration,
    target: Arc<dyn NotificationTarget>,
    state: Arc<ControllerState>,
}

impl fmt::Debug for SimulatedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedSubscription")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("publishing_interval", &self.publishing_interval)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProtocolSubscription for SimulatedSubscription {
    async fn subscribe_events(
        &mut self,
        source: &NodeRef,
        event_types: &[NodeRef],
        queue_size: u32,
    ) -> Result<MonitorHandle, ProtocolError> {
        self.state
            .journal
            .event_subscriptions
            .fetch_add(1, Ordering::SeqCst);
        if self.state.plan.fail_subscribe {
            return Err(ProtocolError::Other(format!(
                "event filter on {source} rejected"
            )));
        }
        let handle = MonitorHandle(self.state.next_id());
        tracing::debug!(
            subscription = self.id,
            %handle,
            %source,
            filters = event_types.len(),
            queue_size,
            "simulated monitored item created"
        );
        self.state.registrations().push(Registration {
            session_id: self.session_id,
            subscription_id: self.id,
            handle,
            filters: event_types.to_vec(),
            target: Arc::clone(&self.target),
        });
        Ok(handle)
    }

    async fn unsubscribe(&mut self, handle: MonitorHandle) -> Result<(), ProtocolError> {
        self.state.journal.unsubscribes.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.state.unsubscribe_failures_left) {
            return Err(ProtocolError::Timeout(format!("unsubscribe {handle}")));
        }
        self.state.registrations().retain(|r| r.handle != handle);
        Ok(())
    }

    async fn delete(&mut self) -> Result<(), ProtocolError> {
        self.state.journal.deletes.fetch_add(1, Ordering::SeqCst);
        if self.state.plan.fail_delete {
            return Err(ProtocolError::BadStatus {
                code: 0x8028_0000,
                message: "BadSubscriptionIdInvalid".to_string(),
            });
        }
        let id = self.id;
        self.state.registrations().retain(|r| r.subscription_id != id);
        Ok(())
    }
}

/// Server clock of the simulated controller.
#[derive(Debug)]
pub struct SimulatedClock {
    available: bool,
}

#[async_trait]
impl SessionClock for SimulatedClock {
    async fn current_time(&self) -> Result<DateTime<Utc>, ProtocolError> {
        if self.available {
            Ok(Utc::now())
        } else {
            Err(ProtocolError::Timeout("ServerStatus.CurrentTime".to_string()))
        }
    }
}

/// Type node the simulated controller raises for `category`.
#[must_use]
pub fn event_type_node(category: EventCategory) -> NodeRef {
    let path = category
        .event_type_paths(SIMULATED_NAMESPACES)
        .into_iter()
        .next()
        .unwrap_or_default();
    NodeRef::new(path.to_string())
}

/// A synthetic tightening result numbered `seq`.
#[must_use]
pub fn synthetic_result_event(seq: u64) -> RawEvent {
    let now = Utc::now();
    let start = now - chrono::Duration::milliseconds(1_200);
    let end = now - chrono::Duration::milliseconds(40);
    let result_id = format!("result-{seq}");

    let metadata = Record::new("JoiningResultMetaDataType")
        .with("ResultId", result_id.as_str())
        .with("CreationTime", end)
        .with("SequenceNumber", seq)
        .with("Name", format!("Tightening {seq}"))
        .with(
            "ProcessingTimes",
            Record::new("ProcessingTimesDataType")
                .with("StartTime", start)
                .with("EndTime", end),
        )
        .with(
            "ResultState",
            Opaque::enumeration("ResultEvaluationEnum", "OK"),
        );
    let content = Record::new("JoiningResultDataType")
        .with("OverallResultValues", vec![
            Value::from(
                Record::new("ResultValueDataType")
                    .with("Name", "FinalTorque")
                    .with("MeasuredValue", 12.5)
                    .with("LowLimit", 11.0)
                    .with("HighLimit", 14.0),
            ),
            Value::from(
                Record::new("ResultValueDataType")
                    .with("Name", "FinalAngle")
                    .with("MeasuredValue", 182.0)
                    .with("LowLimit", 150.0)
                    .with("HighLimit", 210.0),
            ),
        ]);
    let result = Record::new("ResultDataType")
        .with("ResultMetaData", metadata)
        .with("ResultContent", vec![Value::from(content)])
        .with_internal("_encoding", "ExtensionObject");

    RawEvent::new(event_type_node(EventCategory::ResultReady))
        .with("EventId", Value::Bytes(uuid::Uuid::new_v4().as_bytes().to_vec()))
        .with(
            "Message",
            Record::new("LocalizedText")
                .with("Locale", "en")
                .with("Text", format!("Result {result_id} ready")),
        )
        .with("Severity", 100u16)
        .with("Time", now)
        .with("ReceiveTime", now)
        .with("SourceName", "SimulatedJoiningSystem")
        .with("SourceNode", Opaque::node_id("ns=1;s=JoiningSystem"))
        .with("Result", result)
}

/// A synthetic joining system event numbered `seq`.
#[must_use]
pub fn synthetic_joining_event(seq: u64) -> RawEvent {
    let now = Utc::now();
    RawEvent::new(event_type_node(EventCategory::JoiningSystem))
        .with("EventId", Value::Bytes(uuid::Uuid::new_v4().as_bytes().to_vec()))
        .with(
            "Message",
            Record::new("LocalizedText")
                .with("Locale", "en")
                .with("Text", format!("Tool 1 connected ({seq})")),
        )
        .with("Severity", 300u16)
        .with("Time", now)
        .with("ReceiveTime", now)
        .with("SourceName", "SimulatedJoiningSystem")
        .with("SourceNode", Opaque::node_id("ns=1;s=JoiningSystem"))
        .with(
            "LocalTime",
            Record::new("TimeZoneDataType")
                .with("Offset", 60i32)
                .with("DaylightSavingInOffset", false),
        )
        .with("ConditionClassId", Opaque::node_id("ns=4;i=1010"))
        .with("ConditionClassName", "AssetConnection")
        .with("JoiningSystemEventContent/EventCode", 2001i64)
        .with("JoiningSystemEventContent/EventText", "Tool connected")
        .with("JoiningSystemEventContent/JoiningTechnology", "Tightening")
        .with(
            "JoiningSystemEventContent/AssociatedEntities",
            vec![Value::from(
                Record::new("EntityDataType")
                    .with("Name", "Tool 1")
                    .with("Description", "Nutrunner")
                    .with("EntityId", "T-0001")
                    .with("EntityType", 4i32)
                    .with("IsExternal", false),
            )],
        )
        .with(
            "JoiningSystemEventContent/ReportedValues",
            vec![Value::from(
                Record::new("ReportedValueDataType")
                    .with("Name", "ToolTemperature")
                    .with("CurrentValue", Record::new("Variant").with("Value", 41.5))
                    .with("PreviousValue", Record::new("Variant").with("Value", 40.0))
                    .with("PhysicalQuantity", 9i32)
                    .with("LowLimit", 0.0)
                    .with("HighLimit", 80.0)
                    .with(
                        "EngineeringUnits",
                        Record::new("EUInformation")
                            .with("DisplayName", "°C")
                            .with("Description", "degree Celsius"),
                    ),
            )],
        )
}
