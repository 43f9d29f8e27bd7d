use std::net::SocketAddr;
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::mpsc,
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error};

use crate::errors::GatewayError;

use super::{
    connection::{ClientConnection, ClientEvent},
    registry::ClientRegistry,
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const LISTEN_BACKLOG: u32 = 1024;

// -----------------------------------------------------------------------------
// ----- ClientListener --------------------------------------------------------

pub struct ClientListener {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    registry: ClientRegistry,
    events: mpsc::UnboundedSender<ClientEvent>,
}

// -----------------------------------------------------------------------------
// ----- ClientListener: Static ------------------------------------------------

impl ClientListener {
    pub fn bind(
        addr: SocketAddr,
        tls: Option<TlsAcceptor>,
        registry: ClientRegistry,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Self, GatewayError> {
        let listener = listen(addr).map_err(|source| GatewayError::Bind { addr, source })?;

        Ok(Self {
            listener,
            tls,
            registry,
            events,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- ClientListener: Public ------------------------------------------------

impl ClientListener {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Accept forever, one task per client.
    pub async fn run(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(v) => v,
                Err(e) => {
                    error!("accept error: {e}");
                    continue;
                }
            };

            let _ = stream.set_nodelay(true);

            let conn = ClientConnection::new(
                peer.to_string(),
                self.registry.clone(),
                self.events.clone(),
            );
            tokio::spawn(serve_client(conn, stream, peer, self.tls.clone()));
        }
    }
}

impl std::fmt::Debug for ClientListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientListener")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn listen(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

async fn serve_client(
    conn: ClientConnection,
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
) {
    let result = match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => conn.serve(tls_stream).await,
            Err(e) => {
                debug!("client {peer} tls handshake failed: {e}");
                return;
            }
        },
        None => conn.serve(stream).await,
    };

    if let Err(e) = result {
        debug!("client {peer} closed with error: {e}");
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
