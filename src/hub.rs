//! State synchronization hub
//!
//! The single writer for all settings. Producers (CLI/IPC requests, tray and hotkey
//! front-ends, the settings editor) only ever enqueue an [`Intent`] through a
//! [`HubHandle`]; one consumer task applies intents strictly in arrival order, persists
//! after every change, and then tells subscribers.
//!
//! Output changes take a detour through the device: a [`OutputRequest`] is turned into a
//! command, exchanged with the switch box by the device worker, and only the
//! interpreted reply is written to `current_output`. At most one exchange is in flight;
//! further requests wait in the hub and have their command computed when they reach the
//! front of the queue.

use color_eyre::eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, SettingKey, SettingsBackend};
use crate::cycler::{next_output, toggle_mute};
use crate::device::{Connected, DeviceError, DeviceLink, LinkOptions, host_of};
use crate::interpreter::{self, Effect};
use crate::notification::{Notice, Notifier, Priority};
use crate::protocol::{Output, OutputIndex};

/// Capacity of the change broadcast; slow subscribers lag rather than block the hub
const CHANGE_CAPACITY: usize = 64;

// ============================================================================
// Public Types
// ============================================================================

/// A request to change which output is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "output")]
pub enum OutputRequest {
    Select(Output),
    Cycle,
    ToggleMute,
}

/// A state change requested by a producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Write a setting
    Set { key: SettingKey, value: String },
    /// Ask the device to change output; the reply decides `current_output`
    RequestOutput(OutputRequest),
    /// Drop the current link and dial the configured address again
    Reconnect,
    /// Persist and stop the hub
    Shutdown,
}

/// Connectivity of the device link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkState {
    Down,
    Connecting,
    Up { peer: SocketAddr },
}

impl LinkState {
    #[must_use]
    pub fn is_up(self) -> bool {
        matches!(self, Self::Up { .. })
    }
}

/// What a change notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Setting(SettingKey),
    Link,
}

/// Published after a change has been applied and persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub topic: Topic,
    pub value: String,
}

/// Immutable view of the hub's state, republished after every applied change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub settings: ConfigStore,
    pub link: LinkState,
    /// Command currently being exchanged with the device
    pub in_flight: Option<OutputIndex>,
    /// Output requests waiting for the in-flight exchange
    pub queued: usize,
    /// Output to restore on unmute (session only)
    pub prev_before_mute: Option<Output>,
}

/// Cloneable producer handle
#[derive(Debug, Clone)]
pub struct HubHandle {
    intents: mpsc::UnboundedSender<Intent>,
    snapshot: watch::Receiver<Snapshot>,
    changes: broadcast::Sender<Change>,
}

impl HubHandle {
    /// Enqueue an intent without waiting for it to be applied
    ///
    /// # Errors
    /// Returns an error if the hub has stopped.
    pub fn submit(&self, intent: Intent) -> Result<()> {
        self.intents
            .send(intent)
            .map_err(|_| eyre!("State hub has stopped"))
    }

    /// # Errors
    /// Returns an error if the hub has stopped.
    pub fn set(&self, key: SettingKey, value: impl Into<String>) -> Result<()> {
        self.submit(Intent::Set {
            key,
            value: value.into(),
        })
    }

    /// # Errors
    /// Returns an error if the hub has stopped.
    pub fn request(&self, request: OutputRequest) -> Result<()> {
        self.submit(Intent::RequestOutput(request))
    }

    /// # Errors
    /// Returns an error if the hub has stopped.
    pub fn reconnect(&self) -> Result<()> {
        self.submit(Intent::Reconnect)
    }

    /// # Errors
    /// Returns an error if the hub has already stopped.
    pub fn shutdown(&self) -> Result<()> {
        self.submit(Intent::Shutdown)
    }

    /// Latest published state
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that sees every future snapshot
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to change notifications. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }
}

// ============================================================================
// Device Worker
// ============================================================================

/// Connect attempts are numbered so results of superseded attempts can be told apart
type Generation = u64;

enum DeviceJob {
    Connect { address: String, generation: Generation },
    Exchange(OutputIndex),
}

enum DeviceEvent {
    Connected {
        generation: Generation,
        peer: SocketAddr,
        probe_reply: i32,
    },
    ConnectFailed {
        generation: Generation,
        error: DeviceError,
    },
    Reply {
        sent: OutputIndex,
        result: Result<i32, DeviceError>,
    },
}

/// Owns the device link; runs one job at a time
async fn run_device_worker(
    mut jobs: mpsc::UnboundedReceiver<DeviceJob>,
    events: mpsc::UnboundedSender<DeviceEvent>,
    options: LinkOptions,
) {
    let mut link: Option<DeviceLink> = None;

    while let Some(job) = jobs.recv().await {
        let event = match job {
            DeviceJob::Connect {
                address,
                generation,
            } => {
                // The client port is fixed, so the old socket must go before binding again
                link = None;
                match DeviceLink::connect(&address, &options).await {
                    Ok(Connected {
                        link: new_link,
                        probe_reply,
                    }) => {
                        let peer = new_link.peer();
                        link = Some(new_link);
                        DeviceEvent::Connected {
                            generation,
                            peer,
                            probe_reply,
                        }
                    }
                    Err(error) => DeviceEvent::ConnectFailed { generation, error },
                }
            }
            DeviceJob::Exchange(command) => {
                let result = match link.as_mut() {
                    Some(active) => active.exchange(command).await,
                    None => Err(DeviceError::NotReachable {
                        address: String::new(),
                        reason: "not connected".to_string(),
                    }),
                };
                if matches!(&result, Err(e) if e.is_link_failure()) {
                    link = None;
                }
                DeviceEvent::Reply {
                    sent: command,
                    result,
                }
            }
        };

        if events.send(event).is_err() {
            break;
        }
    }

    debug!("Device worker stopped");
}

// ============================================================================
// StateHub
// ============================================================================

/// The consumer side: sole owner of the settings and the persistence backend
pub struct StateHub {
    store: ConfigStore,
    backend: Box<dyn SettingsBackend>,
    notifier: Arc<dyn Notifier>,
    link: LinkState,
    device_port: u16,
    connect_generation: Generation,
    prev_before_mute: Option<Output>,
    in_flight: Option<OutputIndex>,
    pending: VecDeque<OutputRequest>,
    jobs: mpsc::UnboundedSender<DeviceJob>,
    changes: broadcast::Sender<Change>,
    snapshot: watch::Sender<Snapshot>,
}

impl StateHub {
    /// Start the consumer loop and the device worker on the current runtime
    ///
    /// The link starts down; call [`HubHandle::reconnect`] to dial the configured
    /// address. The returned task finishes after [`Intent::Shutdown`] or once every
    /// handle is dropped, having saved the settings one last time.
    #[must_use]
    pub fn spawn(
        store: ConfigStore,
        backend: Box<dyn SettingsBackend>,
        notifier: Arc<dyn Notifier>,
        options: LinkOptions,
    ) -> (HubHandle, JoinHandle<Result<()>>) {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);

        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot {
            settings: store.clone(),
            link: LinkState::Down,
            in_flight: None,
            queued: 0,
            prev_before_mute: None,
        });

        let hub = Self {
            store,
            backend,
            notifier,
            link: LinkState::Down,
            device_port: options.device_port,
            connect_generation: 0,
            prev_before_mute: None,
            in_flight: None,
            pending: VecDeque::new(),
            jobs: job_tx,
            changes: changes.clone(),
            snapshot: snapshot_tx,
        };

        tokio::spawn(run_device_worker(job_rx, event_tx, options));
        let task = tokio::spawn(hub.run(intent_rx, event_rx));

        let handle = HubHandle {
            intents: intent_tx,
            snapshot: snapshot_rx,
            changes,
        };
        (handle, task)
    }

    async fn run(
        mut self,
        mut intents: mpsc::UnboundedReceiver<Intent>,
        mut events: mpsc::UnboundedReceiver<DeviceEvent>,
    ) -> Result<()> {
        info!("State hub running");

        loop {
            tokio::select! {
                intent = intents.recv() => match intent {
                    Some(Intent::Shutdown) | None => break,
                    Some(intent) => self.handle_intent(intent),
                },
                Some(event) = events.recv() => self.handle_device_event(event),
            }
        }

        info!("State hub stopping");
        self.backend
            .save(&self.store.to_map())
            .map_err(|e| e.wrap_err("Failed to save settings on shutdown"))
    }

    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Set { key, value } => self.handle_set(key, &value),
            Intent::RequestOutput(request) => self.handle_request(request),
            Intent::Reconnect => self.start_connect(),
            Intent::Shutdown => {}
        }
    }

    fn handle_set(&mut self, key: SettingKey, value: &str) {
        if key == SettingKey::CurrentOutput {
            warn!("Ignoring direct write to current_output; it only changes on device replies");
            return;
        }

        let value = match key.normalize(value) {
            Ok(value) => value,
            Err(reason) => {
                warn!("Rejected {} = '{}': {}", key, value, reason);
                return;
            }
        };

        if self.apply(key, value) && key == SettingKey::DeviceAddress {
            info!("Device address changed, reconnecting");
            self.start_connect();
        }
    }

    /// Write one setting, persist, and tell subscribers. Returns whether it changed.
    fn apply(&mut self, key: SettingKey, value: String) -> bool {
        if !self.store.set(key, value.clone()) {
            debug!("{} unchanged", key);
            return false;
        }

        if let Err(e) = self.backend.save(&self.store.to_map()) {
            error!("Failed to save settings to {}: {:#}", self.backend.describe(), e);
        }

        debug!("{} = '{}'", key, value);
        self.publish(Topic::Setting(key), value);
        true
    }

    fn publish(&mut self, topic: Topic, value: String) {
        // No subscribers is fine
        let _ = self.changes.send(Change { topic, value });
        self.refresh_snapshot();
    }

    fn refresh_snapshot(&self) {
        self.snapshot.send_replace(self.snapshot_now());
    }

    fn snapshot_now(&self) -> Snapshot {
        Snapshot {
            settings: self.store.clone(),
            link: self.link,
            in_flight: self.in_flight,
            queued: self.pending.len(),
            prev_before_mute: self.prev_before_mute,
        }
    }

    fn notify(&self, notice: Notice) {
        info!("{}: {}", notice.title, notice.body);
        if self.store.notifications_enabled() {
            self.notifier.notify(notice);
        }
    }

    fn set_link(&mut self, link: LinkState) {
        if self.link != link {
            self.link = link;
            let value = match link {
                LinkState::Down => "down".to_string(),
                LinkState::Connecting => "connecting".to_string(),
                LinkState::Up { peer } => format!("up {peer}"),
            };
            self.publish(Topic::Link, value);
        }
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    fn start_connect(&mut self) {
        // Any attempt still running is superseded from here on
        self.connect_generation += 1;
        let generation = self.connect_generation;

        let address = self.store.device_address().to_string();
        if address.is_empty() {
            warn!("No device address configured; set one with `soundbrick set ip ADDRESS`");
            self.set_link(LinkState::Down);
            self.notify(not_connected_notice());
            return;
        }

        info!("Connecting to device at {} (attempt {})", address, generation);
        self.drop_pending("reconnecting");
        self.set_link(LinkState::Connecting);
        if self
            .jobs
            .send(DeviceJob::Connect {
                address,
                generation,
            })
            .is_err()
        {
            error!("Device worker stopped; cannot connect");
            self.set_link(LinkState::Down);
        }
    }

    fn link_down(&mut self, error: &DeviceError) {
        warn!("Device link down: {}", error);
        self.drop_pending("link down");
        self.set_link(LinkState::Down);
        match error {
            DeviceError::Bind { port, .. } => self.notify(port_in_use_notice(*port)),
            _ => self.notify(not_connected_notice()),
        }
    }

    /// Take a learned address as the new configured one; the write triggers a reconnect
    fn learn_address(&mut self, learned: SocketAddr) {
        let host = host_of(learned, self.device_port);
        info!("Device answered from {}, updating address", learned);
        self.apply(SettingKey::DeviceAddress, host);
        self.start_connect();
    }

    fn drop_pending(&mut self, reason: &str) {
        if !self.pending.is_empty() {
            warn!("Dropping {} queued output request(s): {}", self.pending.len(), reason);
            self.pending.clear();
            self.refresh_snapshot();
        }
    }

    // ------------------------------------------------------------------------
    // Output requests
    // ------------------------------------------------------------------------

    fn handle_request(&mut self, request: OutputRequest) {
        if !self.link.is_up() {
            warn!("Ignoring {:?}: device link is not up", request);
            self.notify(not_connected_notice());
            return;
        }

        self.pending.push_back(request);
        self.pump();
    }

    /// Start the next queued exchange if none is in flight
    fn pump(&mut self) {
        if self.in_flight.is_some() || !self.link.is_up() {
            self.refresh_snapshot();
            return;
        }

        while let Some(request) = self.pending.pop_front() {
            let Some(command) = self.command_for(request) else {
                continue;
            };

            if self.jobs.send(DeviceJob::Exchange(command)).is_err() {
                error!("Device worker stopped; dropping {}", command);
                break;
            }
            self.in_flight = Some(command);
            break;
        }

        self.refresh_snapshot();
    }

    /// Command for a request, computed from the confirmed state at dequeue time
    fn command_for(&mut self, request: OutputRequest) -> Option<OutputIndex> {
        let current = self.store.current_output();
        match request {
            OutputRequest::Select(output) => Some(OutputIndex::Output(output)),
            OutputRequest::Cycle => {
                let next = next_output(current, self.store.enabled(), self.prev_before_mute);
                if next.is_none() {
                    info!("All outputs are disabled; nothing to cycle to");
                }
                next.map(OutputIndex::Output)
            }
            OutputRequest::ToggleMute => {
                let (command, prev) = toggle_mute(current, self.prev_before_mute);
                self.prev_before_mute = prev;
                Some(command)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Device events
    // ------------------------------------------------------------------------

    fn handle_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Connected { generation, .. } | DeviceEvent::ConnectFailed { generation, .. }
                if generation != self.connect_generation =>
            {
                debug!(
                    "Ignoring result of superseded connect attempt {} (latest {})",
                    generation, self.connect_generation
                );
            }
            DeviceEvent::Connected {
                peer, probe_reply, ..
            } => {
                self.set_link(LinkState::Up { peer });
                self.notify(Notice::new(
                    "Connected!",
                    "Successfully connected to device!",
                    Priority::Info,
                ));
                let effect = interpreter::interpret(OutputIndex::StatusQuery, probe_reply, &self.store);
                self.apply_effect(effect);
            }
            DeviceEvent::ConnectFailed {
                error: DeviceError::AddressChanged { learned },
                ..
            } => {
                self.set_link(LinkState::Down);
                self.learn_address(learned);
            }
            DeviceEvent::ConnectFailed { error, .. } => self.link_down(&error),
            DeviceEvent::Reply { sent, result } => {
                self.in_flight = None;
                match result {
                    Ok(received) => {
                        let effect = interpreter::interpret(sent, received, &self.store);
                        self.apply_effect(effect);
                    }
                    Err(DeviceError::AddressChanged { learned }) => self.learn_address(learned),
                    Err(DeviceError::Unrecognized { body }) => {
                        self.apply_effect(interpreter::unexpected(sent, body));
                    }
                    Err(e) => {
                        if self.link.is_up() {
                            self.link_down(&e);
                        } else {
                            warn!("Exchange for {} failed after link change: {}", sent, e);
                        }
                    }
                }
            }
        }

        self.pump();
    }

    fn apply_effect(&mut self, effect: Effect) {
        debug!("Device outcome: {:?}", effect.outcome);
        if let Some(update) = effect.update {
            self.apply(SettingKey::CurrentOutput, update.to_setting());
        }
        if let Some(notice) = effect.notice {
            self.notify(notice);
        }
    }
}

fn not_connected_notice() -> Notice {
    Notice::new(
        "Error!",
        "Could not connect to device! Please change IP in settings.",
        Priority::Error,
    )
}

fn port_in_use_notice(port: u16) -> Notice {
    Notice::new(
        "Error!",
        format!("Another program on your computer is using port {port}!"),
        Priority::Error,
    )
}
