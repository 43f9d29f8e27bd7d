use bytes::Bytes;
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::errors::BrokerError;
use crate::routing::Message;
use crate::shared_types::{BrokerState, LinkRole, LinkStatus};

use super::{
    BusEndpoint,
    link::{BusLink, LinkEvent},
    resp::{Command, RespFrame},
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const LIVENESS_PREFIX: &str = "siorelay-liveness-";

// -----------------------------------------------------------------------------
// ----- BrokerEvent -----------------------------------------------------------

/// Notifications from the broker to whoever drives it.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Both links are up and the liveness round-trip succeeded. Sent once per
    /// successful attempt.
    Connected,

    /// The attempt failed. Sent once per attempt; the broker stays `Failed`
    /// until `Broker::connect` is called again.
    Error(String),

    /// A decoded message from one of our subscriptions.
    Message { channel: String, message: Message },
}

// -----------------------------------------------------------------------------
// ----- Broker ----------------------------------------------------------------

/// Owns the connection attempts to one bus endpoint. Each attempt spawns a
/// publish link and a subscribe link and drives them through `LinkStatus`.
#[derive(Debug)]
pub struct Broker {
    endpoint: BusEndpoint,
    handle: BrokerHandle,
    events: mpsc::UnboundedSender<BrokerEvent>,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

// -----------------------------------------------------------------------------
// ----- Broker: Static --------------------------------------------------------

impl Broker {
    pub fn new(endpoint: BusEndpoint, events: mpsc::UnboundedSender<BrokerEvent>) -> Self {
        Self {
            endpoint,
            handle: BrokerHandle::new(),
            events,
            generation: 0,
            task: None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Broker: Public --------------------------------------------------------

impl Broker {
    pub fn handle(&self) -> BrokerHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> BrokerState {
        self.handle.state()
    }

    /// Start a new attempt, dropping whatever the previous one left behind.
    pub fn connect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        self.generation += 1;
        self.handle.begin_attempt(self.generation);

        info!(
            host = %self.endpoint.host,
            port = self.endpoint.port,
            attempt = self.generation,
            "connecting to message broker"
        );

        self.task = Some(tokio::spawn(run_attempt(
            self.generation,
            self.endpoint.clone(),
            self.handle.clone(),
            self.events.clone(),
        )));
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// -----------------------------------------------------------------------------
// ----- BrokerHandle ----------------------------------------------------------

/// Cheap, cloneable access to publish/subscribe/unsubscribe. Stays valid
/// across reconnects; calls fail with `NotConnected` between attempts.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    shared: Arc<Mutex<Shared>>,
}

#[derive(Debug)]
struct Shared {
    state: BrokerState,
    // attempt allowed to change `state`; an aborted attempt may still be
    // mid-poll on another worker
    generation: u64,
    writers: Option<Writers>,
    subscriptions: HashSet<String>,
}

#[derive(Debug)]
struct Writers {
    publish: mpsc::UnboundedSender<Bytes>,
    subscribe: mpsc::UnboundedSender<Bytes>,
}

// -----------------------------------------------------------------------------
// ----- BrokerHandle: Static --------------------------------------------------

impl BrokerHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                state: BrokerState::Disconnected,
                generation: 0,
                writers: None,
                subscriptions: HashSet::new(),
            })),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- BrokerHandle: Public --------------------------------------------------

impl BrokerHandle {
    pub fn state(&self) -> BrokerState {
        self.shared.lock().state
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.shared.lock().subscriptions.contains(channel)
    }

    pub fn publish(&self, channel: &str, message: &Message) -> Result<(), BrokerError> {
        let payload = message.to_vec()?;
        let command = Command::new("PUBLISH")
            .arg(channel.to_string())
            .arg(payload);

        let guard = self.shared.lock();
        let writers = guard.writers.as_ref().ok_or(BrokerError::NotConnected)?;

        writers
            .publish
            .send(command.to_bytes())
            .map_err(|_| BrokerError::LinkClosed(LinkRole::Publish))
    }

    /// Subscribing to a channel we already hold is a no-op.
    pub fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
        let mut guard = self.shared.lock();
        if guard.subscriptions.contains(channel) {
            return Ok(());
        }

        let writers = guard.writers.as_ref().ok_or(BrokerError::NotConnected)?;
        let command = Command::new("SUBSCRIBE").arg(channel.to_string());
        writers
            .subscribe
            .send(command.to_bytes())
            .map_err(|_| BrokerError::LinkClosed(LinkRole::Subscribe))?;

        guard.subscriptions.insert(channel.to_string());
        Ok(())
    }

    /// Unsubscribing from a channel we do not hold is a no-op.
    pub fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        let mut guard = self.shared.lock();
        if !guard.subscriptions.remove(channel) {
            return Ok(());
        }

        // Without links the server has already forgotten the subscription.
        let Some(writers) = guard.writers.as_ref() else {
            return Ok(());
        };

        let command = Command::new("UNSUBSCRIBE").arg(channel.to_string());
        writers
            .subscribe
            .send(command.to_bytes())
            .map_err(|_| BrokerError::LinkClosed(LinkRole::Subscribe))
    }
}

// -----------------------------------------------------------------------------
// ----- BrokerHandle: Private -------------------------------------------------

impl BrokerHandle {
    /// A fresh server connection starts with no subscriptions.
    fn begin_attempt(&self, generation: u64) {
        let mut guard = self.shared.lock();
        guard.generation = generation;
        guard.state = BrokerState::Connecting;
        guard.writers = None;
        guard.subscriptions.clear();
    }

    /// Returns false, changing nothing, if `generation` has been superseded.
    fn attach(&self, generation: u64, publish: &BusLink, subscribe: &BusLink) -> bool {
        let mut guard = self.shared.lock();
        if guard.generation != generation {
            return false;
        }

        guard.state = BrokerState::Connected;
        guard.writers = Some(Writers {
            publish: publish.writer(),
            subscribe: subscribe.writer(),
        });
        true
    }

    /// Returns false, changing nothing, if `generation` has been superseded.
    fn fail(&self, generation: u64) -> bool {
        let mut guard = self.shared.lock();
        if guard.generation != generation {
            return false;
        }

        guard.state = BrokerState::Failed;
        guard.writers = None;
        guard.subscriptions.clear();
        true
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Attempt task ------------------------------------------------

async fn run_attempt(
    generation: u64,
    endpoint: BusEndpoint,
    handle: BrokerHandle,
    events: mpsc::UnboundedSender<BrokerEvent>,
) {
    let (link_tx, mut link_rx) = mpsc::unbounded_channel();
    let publish = BusLink::spawn(LinkRole::Publish, endpoint.clone(), link_tx.clone());
    let subscribe = BusLink::spawn(LinkRole::Subscribe, endpoint.clone(), link_tx);

    let mut status = LinkStatus::new();
    status.begin();

    let probe = Bytes::from(format!("{LIVENESS_PREFIX}{generation}"));

    while let Some(event) = link_rx.recv().await {
        let failure = match event {
            LinkEvent::Up(role) => {
                debug!(%role, attempt = generation, "broker link connected");

                let needs_probe = status.link_up(role);
                let probe_cmd = Command::new("ECHO").arg(probe.clone());
                if needs_probe && !publish.send(probe_cmd.to_bytes()) {
                    Some((publish.role(), "link closed before liveness probe".to_string()))
                } else {
                    None
                }
            }

            LinkEvent::Frame(LinkRole::Publish, frame) => {
                if status.liveness_pending() {
                    if frame.as_bulk() == Some(&probe) && status.liveness_confirmed() {
                        if !handle.attach(generation, &publish, &subscribe) {
                            debug!(attempt = generation, "superseded attempt connected, dropping it");
                            break;
                        }
                        info!(
                            host = %endpoint.host,
                            port = endpoint.port,
                            "message broker connected"
                        );
                        let _ = events.send(BrokerEvent::Connected);
                        None
                    } else {
                        Some((LinkRole::Publish, format!("unexpected liveness reply: {frame:?}")))
                    }
                } else {
                    if let RespFrame::Error(msg) = frame {
                        warn!(%msg, "bus rejected a publish");
                    }
                    None
                }
            }

            LinkEvent::Frame(LinkRole::Subscribe, frame) => {
                forward_push(parse_push(frame), status.state(), &events);
                None
            }

            LinkEvent::Down(role, reason) => Some((role, reason)),
        };

        let Some((role, reason)) = failure else {
            continue;
        };

        if status.link_down(role) && handle.fail(generation) {
            let reason = format!(
                "connection error to {}:{} on {role} link: {reason}",
                endpoint.host, endpoint.port
            );
            error!("{reason}");
            let _ = events.send(BrokerEvent::Error(reason));
        }

        break;
    }
}

fn forward_push(push: Push, state: BrokerState, events: &mpsc::UnboundedSender<BrokerEvent>) {
    match push {
        Push::Message { channel, payload } => {
            // the listener is only attached once connected
            if state != BrokerState::Connected {
                debug!(%channel, "dropping bus message received before connect");
                return;
            }

            match Message::from_slice(&payload) {
                Ok(message) => {
                    let _ = events.send(BrokerEvent::Message { channel, message });
                }
                Err(e) => {
                    warn!(%channel, error = %e, "dropping undecodable bus message");
                }
            }
        }

        Push::Subscription {
            kind,
            channel,
            count,
        } => {
            debug!(%kind, %channel, count, "subscription confirmed");
        }

        Push::Other(frame) => {
            if let RespFrame::Error(msg) = frame {
                warn!(%msg, "bus rejected a subscription command");
            } else {
                debug!(?frame, "ignoring unexpected frame on subscribe link");
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Push frames -------------------------------------------------

#[derive(Debug, PartialEq)]
enum Push {
    Message {
        channel: String,
        payload: Bytes,
    },
    Subscription {
        kind: String,
        channel: String,
        count: i64,
    },
    Other(RespFrame),
}

fn parse_push(frame: RespFrame) -> Push {
    let items = match frame {
        RespFrame::Array(Some(items)) => items,
        other => return Push::Other(other),
    };

    let parsed = match items.as_slice() {
        [kind, channel, third] => match (kind.as_str(), channel.as_str(), third) {
            (Some("message"), Some(channel), RespFrame::Bulk(Some(payload))) => {
                Some(Push::Message {
                    channel: channel.to_string(),
                    payload: payload.clone(),
                })
            }
            (Some(kind @ ("subscribe" | "unsubscribe")), Some(channel), RespFrame::Integer(n)) => {
                Some(Push::Subscription {
                    kind: kind.to_string(),
                    channel: channel.to_string(),
                    count: *n,
                })
            }
            _ => None,
        },
        _ => None,
    };

    parsed.unwrap_or_else(|| Push::Other(RespFrame::Array(Some(items))))
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
