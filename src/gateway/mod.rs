pub mod reconnect;

pub use reconnect::{Backoff, ReconnectPolicy};

// Gateway orchestration; protocol code stays in frontend/bus, routing rules in routing.
use std::{future::Future, net::SocketAddr};
use tokio::{
    signal,
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tracing::{debug, error, info, warn};

use crate::bus::{Broker, BrokerEvent, BrokerHandle};
use crate::config::Config;
use crate::errors::{GatewayError, RoutingError};
use crate::frontend::{ClientEvent, ClientListener, ClientRegistry};
use crate::routing::{RoutingEngine, self_channel};
use crate::shared_types::InstanceIdentity;
use crate::tls;

// -----------------------------------------------------------------------------
// ----- Gateway ---------------------------------------------------------------

/// A bound client listener plus everything the event loop needs. Binding is
/// the only step that can fail; once `run` starts, errors are logged and the
/// loop keeps going.
#[derive(Debug)]
pub struct Gateway {
    config: Config,
    identity: InstanceIdentity,
    listener: ClientListener,
    registry: ClientRegistry,
    client_rx: mpsc::UnboundedReceiver<ClientEvent>,
}

// -----------------------------------------------------------------------------
// ----- Gateway: Static -------------------------------------------------------

impl Gateway {
    pub fn bind(config: Config) -> Result<Self, GatewayError> {
        let acceptor = config.tls.as_ref().map(tls::load_acceptor).transpose()?;

        let registry = ClientRegistry::new();
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let listener = ClientListener::bind(config.listen_addr, acceptor, registry.clone(), client_tx)?;

        // port 0 binds an ephemeral port; name ourselves after the real one
        let port = listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(config.listen_addr.port());
        let identity = InstanceIdentity::new(
            config.listen_addr.ip().to_string(),
            port,
            config.instance_id.clone(),
        );

        Ok(Self {
            config,
            identity,
            listener,
            registry,
            client_rx,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Public -------------------------------------------------------

impl Gateway {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn self_channel(&self) -> String {
        self_channel(&self.identity)
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) {
        self.run_until(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let Gateway {
            config,
            identity,
            listener,
            registry,
            mut client_rx,
        } = self;

        info!(
            addr = ?listener.local_addr().ok(),
            tls = listener.is_tls(),
            channel = %self_channel(&identity),
            "siorelay listening"
        );

        let (broker_tx, mut broker_rx) = mpsc::unbounded_channel();
        let mut broker = Broker::new(config.bus.clone(), broker_tx);
        let mut engine = RoutingEngine::new(self_channel(&identity), broker.handle(), registry);
        let mut backoff = Backoff::new(config.reconnect);
        let mut retry_at: Option<Instant> = None;

        broker.connect();
        let accept_task = tokio::spawn(listener.run());

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("siorelay shutting down");
                    break;
                }

                Some(event) = client_rx.recv() => {
                    handle_client_event(&mut engine, event);
                }

                Some(event) = broker_rx.recv() => match event {
                    BrokerEvent::Connected => {
                        backoff.reset();
                        report(engine.handle_broker_connected());
                    }

                    BrokerEvent::Error(reason) => match backoff.next_delay() {
                        Some(delay) => {
                            warn!(?delay, "message broker failed, retrying: {reason}");
                            retry_at = Some(Instant::now() + delay);
                        }
                        None => {
                            warn!("message broker failed, not reconnecting: {reason}");
                        }
                    },

                    BrokerEvent::Message { channel, message } => {
                        report(engine.handle_bus_message(&channel, message));
                    }
                },

                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    retry_at = None;
                    broker.connect();
                }
            }
        }

        accept_task.abort();
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn handle_client_event(engine: &mut RoutingEngine<BrokerHandle, ClientRegistry>, event: ClientEvent) {
    match event {
        ClientEvent::Text {
            connection_id,
            text,
        } => {
            report(engine.handle_client_text(&connection_id, &text));
        }

        ClientEvent::Disconnected { connection_id } => {
            match engine.handle_client_disconnect(&connection_id) {
                Ok(0) => {}
                Ok(closed) => debug!(%connection_id, closed, "closed sessions of disconnected client"),
                Err(e) => report(Err(e)),
            }
        }
    }
}

fn report(result: Result<(), RoutingError>) {
    let Err(e) = result else {
        return;
    };

    if e.is_protocol_violation() {
        warn!("{e}");
    } else {
        error!("{e}");
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusEndpoint;
    use crate::config::LogLevel;

    fn config(instance_id: &str) -> Config {
        Config {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            bus: BusEndpoint::new("127.0.0.1", 1),
            log_level: LogLevel::Info,
            reconnect: ReconnectPolicy::Never,
            instance_id: instance_id.to_string(),
            tls: None,
        }
    }

    #[tokio::test]
    async fn self_channel_uses_bound_port() {
        let gateway = Gateway::bind(config("abc")).unwrap();
        let port = gateway.local_addr().unwrap().port();

        assert_ne!(port, 0);
        assert_eq!(gateway.self_channel(), format!("sio:127.0.0.1:{port}:abc"));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let first = Gateway::bind(config("a")).unwrap();
        let mut taken = config("b");
        taken.listen_addr = first.local_addr().unwrap();

        assert!(matches!(
            Gateway::bind(taken),
            Err(GatewayError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn runs_without_a_bus_and_stops_on_shutdown() {
        let gateway = Gateway::bind(config("x")).unwrap();
        gateway
            .run_until(tokio::time::sleep(std::time::Duration::from_millis(50)))
            .await;
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
