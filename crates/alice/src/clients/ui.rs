//! Display (mirror) connections: register connectors, relay updates, drive
//! display power.

use super::display::{DisplayPower, DEFAULT_DIM_AFTER};
use super::{reject, ClientError, Outbound};
use crate::bus::{DataEvent, EventBus, EventPayload, SubscriptionToken};
use crate::engine::AggregatorHandle;
use crate::pending::{PrepareError, WantHandler};
use crate::types::{SourceClass, WantConfig, WantId, WantUid};
use crate::want::Want;
use aliceproto::{ServerMessage, UiMessage, UiRegistration};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// State shared between the connection task and the bus subscriptions it
/// installs.
#[derive(Debug, Default)]
struct ClientState {
    display: DisplayPower,
    tokens: Vec<SubscriptionToken>,
    wants: Vec<WantId>,
    pending: Vec<WantUid>,
    /// Set once the connection has shut down; late activations must not subscribe.
    closed: bool,
}

pub struct UiClient {
    engine: AggregatorHandle,
    aliases: Arc<BTreeMap<String, String>>,
    outbound: Outbound,
    state: Arc<Mutex<ClientState>>,
    name: Option<String>,
}

/// Follow a dotted path (`location.city`) through nested objects.
pub fn lookup_path<'a>(settings: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = settings.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn dim_after(settings: &Map<String, Value>) -> Duration {
    settings
        .get("dimafter")
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_DIM_AFTER)
}

impl UiClient {
    pub fn new(engine: AggregatorHandle, aliases: Arc<BTreeMap<String, String>>, outbound: Outbound) -> Self {
        Self {
            engine,
            aliases,
            outbound,
            state: Arc::new(Mutex::new(ClientState::default())),
            name: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Active want ids this client is subscribed to.
    pub fn wants(&self) -> Vec<WantId> {
        self.state.lock().wants.clone()
    }

    /// Connectors still waiting for a source.
    pub fn pending(&self) -> Vec<WantUid> {
        self.state.lock().pending.clone()
    }

    fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message);
    }

    pub async fn handle(&mut self, message: UiMessage) -> Result<(), ClientError> {
        match message {
            UiMessage::Register(registration) => self.register(registration).await,
            UiMessage::Catchup => {
                let wants = self.wants();
                info!(client = self.name().unwrap_or("?"), wants = wants.len(), "client asked to be caught up");
                for id in wants {
                    self.engine.refresh(id, false).await?;
                }
                Ok(())
            }
            UiMessage::SleepMe => {
                debug!(client = self.name().unwrap_or("?"), "client asked to go to sleep");
                if self.state.lock().display.sleep(Instant::now(), false) {
                    self.send(ServerMessage::Sleep);
                }
                Ok(())
            }
            UiMessage::WakeMe => {
                debug!(client = self.name().unwrap_or("?"), "client asked to be woken up");
                if self.state.lock().display.wake(Instant::now(), false) {
                    self.send(ServerMessage::Wake);
                }
                Ok(())
            }
        }
    }

    async fn register(&mut self, registration: UiRegistration) -> Result<(), ClientError> {
        if let Some(field) = registration.missing_identity() {
            return Err(reject(
                &self.outbound,
                format!("cannot register: '{field}' is required"),
            ));
        }
        info!(client.name = %registration.name, client.id = %registration.id, "ui client registering");
        self.name = Some(registration.name.clone());
        self.state.lock().display = DisplayPower::new(dim_after(&registration.settings));
        let settings = Arc::new(registration.settings.clone());

        for connector in registration.data_connectors() {
            match connector {
                Ok(c) => {
                    let want = Want::new(SourceClass::Data, &c.source_type, &c.filter);
                    self.queue(want, c.config, settings.clone()).await?;
                }
                Err(e) => {
                    warn!(error = %e, "ignoring malformed data connector");
                    self.send(ServerMessage::error(format!("ignoring malformed connector: {e}")));
                }
            }
        }

        for connector in registration.sensor_connectors() {
            match connector {
                Ok(c) => {
                    let want = Want::new(SourceClass::Sensor, &c.source_type, &c.id);
                    self.queue(want, WantConfig::new(), settings.clone()).await?;
                }
                Err(e) => {
                    warn!(error = %e, "ignoring malformed sensor connector");
                    self.send(ServerMessage::error(format!("ignoring malformed connector: {e}")));
                }
            }
        }

        self.send(ServerMessage::Registered);
        Ok(())
    }

    async fn queue(&mut self, want: Want, config: WantConfig, settings: Arc<Map<String, Value>>) -> Result<(), ClientError> {
        debug!(want.id = %want.id(), "registering connector");
        let handler = ConnectorHandler {
            uid: want.uid(),
            label: format!("{}/{}", want.source_type(), want.filter()),
            config,
            settings,
            aliases: self.aliases.clone(),
            bus: self.engine.bus().clone(),
            outbound: self.outbound.clone(),
            state: self.state.clone(),
            reported: false,
        };
        // Recorded before queueing so an immediate activation can clear it
        self.state.lock().pending.push(want.uid());
        self.engine.queue_want(want, Box::new(handler)).await?;
        Ok(())
    }

    /// Drop every subscription and cancel connectors that never resolved.
    /// Active wants are left for the still-wanted sweep.
    pub async fn shutdown(&mut self) {
        let (tokens, pending) = {
            let mut state = self.state.lock();
            state.closed = true;
            state.wants.clear();
            (
                std::mem::take(&mut state.tokens),
                std::mem::take(&mut state.pending),
            )
        };
        for token in &tokens {
            self.engine.bus().unsubscribe(token);
        }
        for uid in pending {
            if self.engine.cancel_pending(uid).await.is_err() {
                break;
            }
        }
        info!(
            client = self.name().unwrap_or("?"),
            subscriptions = tokens.len(),
            "ui client disconnected"
        );
    }
}

/// Resolution callback for one UI connector.
struct ConnectorHandler {
    /// Uid of the queued want; the activated want may be another client's.
    uid: WantUid,
    label: String,
    config: WantConfig,
    settings: Arc<Map<String, Value>>,
    aliases: Arc<BTreeMap<String, String>>,
    bus: Arc<EventBus>,
    outbound: Outbound,
    state: Arc<Mutex<ClientState>>,
    reported: bool,
}

impl ConnectorHandler {
    fn fail(&mut self, error: PrepareError) -> PrepareError {
        if self.reported {
            debug!(connector = %self.label, error = %error, "connector still failing");
        } else {
            self.reported = true;
            let _ = self.outbound.send(ServerMessage::error(format!(
                "connector ({}) failed to register: {}",
                self.label, error
            )));
        }
        error
    }
}

impl WantHandler for ConnectorHandler {
    fn prepare(&mut self, want: &mut Want) -> Result<(), PrepareError> {
        let required = match (want.class(), want.source()) {
            (SourceClass::Data, Some(source)) => source.required_fields(want.filter()),
            _ => Vec::new(),
        };

        let mut config = self.config.clone();
        for field in required {
            if !config.contains_key(&field) {
                let aliased = self
                    .aliases
                    .get(&field)
                    .and_then(|path| lookup_path(&self.settings, path))
                    .cloned();
                if let Some(value) = aliased {
                    config.insert(field.clone(), value);
                }
            }
            if !config.contains_key(&field) {
                return Err(self.fail(PrepareError::MissingConfig(field)));
            }
        }

        want.set_config(Some(config));
        Ok(())
    }

    fn on_active(&mut self, want: &Want) {
        {
            let mut state = self.state.lock();
            state.pending.retain(|uid| *uid != self.uid);
            if state.closed || self.outbound.is_closed() {
                debug!(want.id = %want.id(), "client gone before activation");
                return;
            }
        }

        let outbound = self.outbound.clone();
        let state = self.state.clone();
        let token = self.bus.subscribe(want.topic(), move |event: &DataEvent| {
            if outbound.is_closed() {
                return false;
            }
            if let EventPayload::Update { data, wake } = &event.payload {
                deliver(&outbound, &state, event, data, *wake);
            }
            true
        });

        let mut state = self.state.lock();
        if state.closed {
            self.bus.unsubscribe(&token);
            return;
        }
        state.wants.push(want.id());
        state.tokens.push(token);
    }
}

fn deliver(outbound: &Outbound, state: &Mutex<ClientState>, event: &DataEvent, data: &Value, wake: bool) {
    let now = Instant::now();
    let mut power = Vec::new();
    {
        let mut state = state.lock();
        if event.class == SourceClass::Sensor && event.source_type == "motion" {
            match data.get("motion").and_then(Value::as_bool) {
                Some(true) => {
                    if state.display.on_motion(now) {
                        power.push(ServerMessage::Wake);
                    }
                }
                Some(false) => {
                    if state.display.on_still(now) {
                        power.push(ServerMessage::Sleep);
                    }
                }
                None => {}
            }
        }
        if wake && state.display.wake(now, false) {
            power.push(ServerMessage::Wake);
        }
    }

    let message = match event.class {
        SourceClass::Data => ServerMessage::Update {
            source: event.source_type.clone(),
            filter: event.filter.clone(),
            data: data.clone(),
            wake,
        },
        SourceClass::Sensor => ServerMessage::Sense {
            source: event.source_type.clone(),
            id: event.filter.clone(),
            data: data.clone(),
        },
    };
    let _ = outbound.send(message);
    for message in power {
        let _ = outbound.send(message);
    }
}
