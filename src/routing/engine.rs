use tracing::{debug, info, trace, warn};

use crate::bus::BrokerHandle;
use crate::errors::{BrokerError, RoutingError};
use crate::shared_types::ConnectionId;

use super::{
    channel::{InboundChannel, ServiceRoute, session_channel},
    message::{
        FIELD_CLIENT_ID, FIELD_PROJECT_ID, FIELD_SENDER, FIELD_SERVICE, FIELD_SESSION_ID,
        Message, MessageKind,
    },
    session_table::{SessionEntry, SessionTable},
};

// -----------------------------------------------------------------------------
// ----- Seams -----------------------------------------------------------------

/// The three bus operations routing needs.
pub trait BusPublisher {
    fn publish(&self, channel: &str, message: &Message) -> Result<(), BrokerError>;
    fn subscribe(&self, channel: &str) -> Result<(), BrokerError>;
    fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError>;
}

/// Best-effort delivery to a client connection. Returns false when the
/// connection is gone.
pub trait ConnectionRegistry {
    fn deliver(&self, connection_id: &ConnectionId, message: &Message) -> bool;
}

impl BusPublisher for BrokerHandle {
    fn publish(&self, channel: &str, message: &Message) -> Result<(), BrokerError> {
        BrokerHandle::publish(self, channel, message)
    }

    fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
        BrokerHandle::subscribe(self, channel)
    }

    fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        BrokerHandle::unsubscribe(self, channel)
    }
}

// -----------------------------------------------------------------------------
// ----- RoutingEngine ---------------------------------------------------------

/// Relays messages between client connections and the bus, keeping the
/// session table that lets backend replies find their way back.
///
/// Not thread-safe by itself: one task owns it and feeds it events in order.
#[derive(Debug)]
pub struct RoutingEngine<B, R> {
    self_channel: String,
    bus: B,
    registry: R,
    sessions: SessionTable,
}

// -----------------------------------------------------------------------------
// ----- RoutingEngine: Static -------------------------------------------------

impl<B, R> RoutingEngine<B, R>
where
    B: BusPublisher,
    R: ConnectionRegistry,
{
    pub fn new(self_channel: impl Into<String>, bus: B, registry: R) -> Self {
        Self {
            self_channel: self_channel.into(),
            bus,
            registry,
            sessions: SessionTable::new(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- RoutingEngine: Public -------------------------------------------------

impl<B, R> RoutingEngine<B, R>
where
    B: BusPublisher,
    R: ConnectionRegistry,
{
    pub fn self_channel(&self) -> &str {
        &self.self_channel
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Raw text frame from a client.
    pub fn handle_client_text(
        &mut self,
        connection_id: &ConnectionId,
        text: &str,
    ) -> Result<(), RoutingError> {
        let message = Message::parse(text)?;
        self.handle_client_message(connection_id, message)
    }

    /// Publish a client message to the service it names. Session requests get
    /// stamped with the connection id and our self channel so the backend
    /// knows where to answer.
    pub fn handle_client_message(
        &mut self,
        connection_id: &ConnectionId,
        message: Message,
    ) -> Result<(), RoutingError> {
        debug!(%connection_id, message = %message.to_log_string(), "recv from client");

        let Some(service) = message.get_str(FIELD_SERVICE).map(str::to_owned) else {
            return Err(RoutingError::MissingService {
                kind: message.kind().to_string(),
            });
        };

        let route = ServiceRoute::resolve(&service);
        let mut outbound = message;

        if let Some(project_id) = route.project_id {
            outbound.set(FIELD_SERVICE, route.channel);
            outbound.set(FIELD_PROJECT_ID, project_id);
        }

        if outbound.kind().is_session_request() {
            outbound.set(FIELD_CLIENT_ID, connection_id.as_str());
            outbound.set(FIELD_SENDER, self.self_channel.as_str());
        }

        self.bus.publish(route.channel, &outbound)?;
        debug!(channel = route.channel, message = %outbound.to_log_string(), "send");

        Ok(())
    }

    /// Close every session the connection still owns. Returns how many.
    pub fn handle_client_disconnect(
        &mut self,
        connection_id: &ConnectionId,
    ) -> Result<usize, RoutingError> {
        let owned = self.sessions.owned_by(connection_id);
        let mut first_error = None;
        let mut closed = 0;

        for session_id in owned {
            let Some(entry) = self.sessions.remove(&session_id) else {
                continue;
            };

            let close = Message::new(MessageKind::CloseSession)
                .with(FIELD_SESSION_ID, session_id.as_str())
                .with(FIELD_SENDER, self.self_channel.as_str())
                .with(FIELD_SERVICE, entry.service.as_str());

            info!(%connection_id, %session_id, service = %entry.service, "closing session of disconnected client");

            let published = self.bus.publish(&entry.service, &close);
            let unsubscribed = self.bus.unsubscribe(&session_channel(&session_id));
            closed += 1;

            if let Err(e) = published.and(unsubscribed) {
                first_error.get_or_insert(RoutingError::from(e));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(closed),
        }
    }

    /// Fresh bus connection: claim our inbox, and get back the channels of
    /// sessions that outlived the old connection.
    pub fn handle_broker_connected(&mut self) -> Result<(), RoutingError> {
        info!(channel = %self.self_channel, "subscribing to self channel");
        self.bus.subscribe(&self.self_channel)?;

        for session_id in self.sessions.session_ids() {
            self.bus.subscribe(&session_channel(session_id))?;
        }

        Ok(())
    }

    pub fn handle_bus_message(&mut self, channel: &str, message: Message) -> Result<(), RoutingError> {
        debug!(%channel, message = %message.to_log_string(), "recv");

        match InboundChannel::classify(channel, &self.self_channel) {
            InboundChannel::SelfInbox => self.handle_control(channel, message),
            InboundChannel::Session(session_id) => self.handle_session_data(session_id, message),
            InboundChannel::Unknown => Err(RoutingError::UnknownChannel(channel.to_string())),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- RoutingEngine: Private ------------------------------------------------

impl<B, R> RoutingEngine<B, R>
where
    B: BusPublisher,
    R: ConnectionRegistry,
{
    fn handle_control(&mut self, channel: &str, message: Message) -> Result<(), RoutingError> {
        match message.kind() {
            MessageKind::SessionStarted => self.handle_session_started(message),
            MessageKind::SessionFailed | MessageKind::SessionClosed => {
                self.handle_session_ended(message)
            }
            other => Err(RoutingError::UnexpectedControl {
                kind: other.to_string(),
                channel: channel.to_string(),
            }),
        }
    }

    fn handle_session_started(&mut self, message: Message) -> Result<(), RoutingError> {
        let session_id = required(&message, FIELD_SESSION_ID)?.to_string();
        let connection_id = ConnectionId::from(required(&message, FIELD_CLIENT_ID)?);
        let service = required(&message, FIELD_SERVICE)?.to_string();

        let subscribed = self.bus.subscribe(&session_channel(&session_id));

        let entry = SessionEntry {
            connection_id: connection_id.clone(),
            service,
        };
        if let Some(previous) = self.sessions.insert(&session_id, entry) {
            warn!(%session_id, previous = %previous.connection_id, "session restarted, replacing entry");
        }

        // no disconnect sweep will come for this entry; it lives until the
        // backend sends SESSION_CLOSED or SESSION_FAILED
        if !self.registry.deliver(&connection_id, &message) {
            warn!(%session_id, %connection_id, "session started for a client that is already gone");
        }

        subscribed.map_err(RoutingError::from)
    }

    fn handle_session_ended(&mut self, message: Message) -> Result<(), RoutingError> {
        let session_id = required(&message, FIELD_SESSION_ID)?.to_string();

        let unsubscribed = self.bus.unsubscribe(&session_channel(&session_id));

        let entry = self.sessions.remove(&session_id);
        let target = entry
            .map(|e| e.connection_id)
            .or_else(|| message.get_str(FIELD_CLIENT_ID).map(ConnectionId::from));

        if let Some(connection_id) = target {
            self.deliver(&connection_id, &message);
        }

        unsubscribed.map_err(RoutingError::from)
    }

    fn handle_session_data(&mut self, session_id: &str, message: Message) -> Result<(), RoutingError> {
        let Some(entry) = self.sessions.get(session_id) else {
            return Err(RoutingError::UnknownSession(session_id.to_string()));
        };

        let connection_id = entry.connection_id.clone();
        self.deliver(&connection_id, &message);

        Ok(())
    }

    fn deliver(&self, connection_id: &ConnectionId, message: &Message) {
        if !self.registry.deliver(connection_id, message) {
            trace!(%connection_id, kind = %message.kind(), "client gone, dropping message");
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn required<'a>(message: &'a Message, field: &'static str) -> Result<&'a str, RoutingError> {
    message
        .get_str(field)
        .ok_or_else(|| RoutingError::MissingField {
            kind: message.kind().to_string(),
            field,
        })
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
