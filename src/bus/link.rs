use bytes::{Bytes, BytesMut};
use secrecy::ExposeSecret;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, trace};

use crate::shared_types::LinkRole;

use super::{
    BusEndpoint,
    resp::{Command, RespFrame},
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const SCRATCH_CAPACITY_HINT: usize = 4096;

// -----------------------------------------------------------------------------
// ----- LinkEvent -------------------------------------------------------------

/// What a link reports back to the broker task that owns it.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    Up(LinkRole),
    Frame(LinkRole, RespFrame),
    Down(LinkRole, String),
}

// -----------------------------------------------------------------------------
// ----- BusLink ---------------------------------------------------------------

/// One TCP connection to the bus. Writes go through an unbounded queue to a
/// writer task; reads are framed and reported as `LinkEvent::Frame`.
///
/// Dropping the link aborts its tasks and closes the socket.
#[derive(Debug)]
pub(crate) struct BusLink {
    role: LinkRole,
    writer: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<()>,
}

// -----------------------------------------------------------------------------
// ----- BusLink: Static -------------------------------------------------------

impl BusLink {
    pub(crate) fn spawn(
        role: LinkRole,
        endpoint: BusEndpoint,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<Bytes>();
        let task = tokio::spawn(run_link(role, endpoint, writer_rx, events));

        Self {
            role,
            writer: writer_tx,
            task,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- BusLink: Public -------------------------------------------------------

impl BusLink {
    pub(crate) fn role(&self) -> LinkRole {
        self.role
    }

    /// Queue raw command bytes. Returns false once the link is gone.
    pub(crate) fn send(&self, bytes: Bytes) -> bool {
        self.writer.send(bytes).is_ok()
    }

    pub(crate) fn writer(&self) -> mpsc::UnboundedSender<Bytes> {
        self.writer.clone()
    }
}

impl Drop for BusLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Link task ---------------------------------------------------

async fn run_link(
    role: LinkRole,
    endpoint: BusEndpoint,
    writer_rx: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let reason = match serve_link(role, &endpoint, writer_rx, &events).await {
        Ok(()) => "connection closed by bus".to_string(),
        Err(reason) => reason,
    };

    let _ = events.send(LinkEvent::Down(role, reason));
}

async fn serve_link(
    role: LinkRole,
    endpoint: &BusEndpoint,
    writer_rx: mpsc::UnboundedReceiver<Bytes>,
    events: &mpsc::UnboundedSender<LinkEvent>,
) -> Result<(), String> {
    let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| format!("connect failed: {e}"))?;
    let _ = stream.set_nodelay(true);

    let (mut reader, mut writer) = stream.into_split();
    let mut inbox = BytesMut::with_capacity(SCRATCH_CAPACITY_HINT);

    if let Some(password) = endpoint.password.as_ref() {
        let auth = Command::new("AUTH").arg(password.expose_secret().to_string());
        writer
            .write_all(&auth.to_bytes())
            .await
            .map_err(|e| format!("write failed: {e}"))?;

        match read_frame(&mut reader, &mut inbox).await? {
            Some(RespFrame::Error(msg)) => return Err(format!("auth rejected: {msg}")),
            Some(_) => {}
            None => return Err("connection closed during auth".to_string()),
        }
    }

    debug!(%role, host = %endpoint.host, port = endpoint.port, "bus link up");
    let _ = events.send(LinkEvent::Up(role));

    let writer_task = spawn_writer_task(writer, writer_rx);
    let result = read_loop(role, &mut reader, &mut inbox, events).await;
    writer_task.abort();

    result
}

async fn read_loop(
    role: LinkRole,
    reader: &mut OwnedReadHalf,
    inbox: &mut BytesMut,
    events: &mpsc::UnboundedSender<LinkEvent>,
) -> Result<(), String> {
    loop {
        let Some(frame) = read_frame(reader, inbox).await? else {
            return Ok(());
        };

        trace!(%role, ?frame, "bus frame");
        if events.send(LinkEvent::Frame(role, frame)).is_err() {
            // owner went away
            return Ok(());
        }
    }
}

/// Next complete frame, reading more bytes as needed. `None` on clean EOF.
async fn read_frame(
    reader: &mut OwnedReadHalf,
    inbox: &mut BytesMut,
) -> Result<Option<RespFrame>, String> {
    loop {
        if let Some(frame) = RespFrame::decode(inbox).map_err(|e| format!("bad frame: {e}"))? {
            return Ok(Some(frame));
        }

        inbox.reserve(SCRATCH_CAPACITY_HINT);
        let n = reader
            .read_buf(inbox)
            .await
            .map_err(|e| format!("read failed: {e}"))?;
        if n == 0 {
            return Ok(None);
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn spawn_writer_task(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        'outer: while let Some(mut buf) = rx.recv().await {
            if writer.write_all_buf(&mut buf).await.is_err() {
                break;
            }

            // coalesce bursts to cut syscalls
            while let Ok(mut more) = rx.try_recv() {
                if writer.write_all_buf(&mut more).await.is_err() {
                    break 'outer;
                }
            }
        }

        let _ = writer.shutdown().await;
    })
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
