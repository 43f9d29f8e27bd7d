use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    net::TcpListener as StdTcpListener,
    process::{Child, Command},
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};

use siorelay::bus::resp::RespFrame;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// -----------------------------------------------------------------------------
// ----- Process helpers -------------------------------------------------------

#[allow(dead_code)]
pub fn reserve_port(host: &str) -> u16 {
    let addr = format!("{host}:0");
    let listener = StdTcpListener::bind(&addr).expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

/// Kills the child when dropped so a failed assertion does not leak it.
pub struct GatewayProcess {
    child: Child,
    pub port: u16,
    pub self_channel: String,
}

impl Drop for GatewayProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[allow(dead_code)]
pub fn spawn_siorelay(port: u16, bus_port: u16, instance_id: &str) -> GatewayProcess {
    let exe = env!("CARGO_BIN_EXE_siorelay");

    let child = Command::new(exe)
        .env("SIORELAY_HOST", "127.0.0.1")
        .env("SIORELAY_PORT", port.to_string())
        .env("SIORELAY_MESSAGING_URI", format!("redis://127.0.0.1:{bus_port}"))
        .env("SIORELAY_INSTANCE_ID", instance_id)
        .env("SIORELAY_LOG", "warn")
        .env_remove("SIORELAY_CONFIG_FILE")
        .env_remove("SIORELAY_BUS_PASSWORD")
        .env_remove("SIORELAY_RECONNECT")
        .env_remove("SIORELAY_TLS_CERT")
        .env_remove("SIORELAY_TLS_KEY")
        .spawn()
        .expect("spawn siorelay");

    GatewayProcess {
        child,
        port,
        self_channel: format!("sio:127.0.0.1:{port}:{instance_id}"),
    }
}

#[allow(dead_code)]
pub async fn wait_for_listen(host: &str, port: u16) {
    let addr = format!("{host}:{port}");
    for _ in 0..100 {
        if std::net::TcpStream::connect(&addr).is_ok() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("siorelay did not start listening on {addr}");
}

/// Bus up, gateway listening and subscribed to its own channel.
#[allow(dead_code)]
pub async fn start_gateway(bus: &FakeBus, instance_id: &str) -> GatewayProcess {
    let port = reserve_port("127.0.0.1");
    let gateway = spawn_siorelay(port, bus.port, instance_id);

    wait_for_listen("127.0.0.1", port).await;
    bus.wait_for_subscription(&gateway.self_channel).await;

    gateway
}

// -----------------------------------------------------------------------------
// ----- FakeBus ---------------------------------------------------------------

/// Minimal RESP pub/sub server: AUTH, PING, ECHO, PUBLISH, SUBSCRIBE,
/// UNSUBSCRIBE. Every PUBLISH is also recorded for the test to inspect.
pub struct FakeBus {
    pub port: u16,
    state: Arc<Mutex<BusState>>,
    published: mpsc::UnboundedReceiver<(String, Value)>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct BusState {
    next_conn: u64,
    conns: HashMap<u64, JoinHandle<()>>,
    subscribers: HashMap<String, HashMap<u64, mpsc::UnboundedSender<Bytes>>>,
}

impl Drop for FakeBus {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakeBus {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake bus");
        let port = listener.local_addr().unwrap().port();

        let state = Arc::new(Mutex::new(BusState::default()));
        let (published_tx, published) = mpsc::unbounded_channel();

        let task = tokio::spawn({
            let state = state.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let conn = {
                        let mut guard = state.lock();
                        guard.next_conn += 1;
                        guard.next_conn
                    };
                    let served = tokio::spawn(serve_bus_conn(
                        conn,
                        stream,
                        state.clone(),
                        published_tx.clone(),
                    ));
                    state.lock().conns.insert(conn, served);
                }
            }
        });

        Self {
            port,
            state,
            published,
            task,
        }
    }

    /// Next PUBLISH any gateway issued, payload parsed as JSON.
    #[allow(dead_code)]
    pub async fn next_published(&mut self) -> (String, Value) {
        timeout(RECV_TIMEOUT, self.published.recv())
            .await
            .expect("timed out waiting for a publish")
            .expect("fake bus stopped")
    }

    /// Publish straight to subscribers, as a backend would. Returns how many
    /// links received it.
    #[allow(dead_code)]
    pub fn inject(&self, channel: &str, payload: &Value) -> usize {
        deliver(&self.state, channel, Bytes::from(payload.to_string()))
    }

    #[allow(dead_code)]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.state
            .lock()
            .subscribers
            .get(channel)
            .is_some_and(|subs| !subs.is_empty())
    }

    /// Hang up on every connected link, as a bus restart would. The listener
    /// keeps accepting.
    #[allow(dead_code)]
    pub fn drop_connections(&self) {
        let mut guard = self.state.lock();
        for (_, served) in guard.conns.drain() {
            served.abort();
        }
        // the per-connection writers exit once their senders are gone
        guard.subscribers.clear();
    }

    #[allow(dead_code)]
    pub async fn wait_for_subscription(&self, channel: &str) {
        self.wait_until(channel, true).await;
    }

    #[allow(dead_code)]
    pub async fn wait_for_unsubscription(&self, channel: &str) {
        self.wait_until(channel, false).await;
    }

    async fn wait_until(&self, channel: &str, subscribed: bool) {
        for _ in 0..100 {
            if self.is_subscribed(channel) == subscribed {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("channel {channel} never reached subscribed={subscribed}");
    }
}

async fn serve_bus_conn(
    conn: u64,
    stream: TcpStream,
    state: Arc<Mutex<BusState>>,
    published: mpsc::UnboundedSender<(String, Value)>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut buf = BytesMut::with_capacity(4096);
    let mut mine: HashSet<String> = HashSet::new();

    'outer: loop {
        while let Some(frame) = RespFrame::decode(&mut buf).expect("gateway sent invalid resp") {
            let RespFrame::Array(Some(items)) = frame else {
                continue;
            };
            let args: Vec<Bytes> = items.iter().filter_map(|f| f.as_bulk().cloned()).collect();
            let Some((name, rest)) = args.split_first() else {
                continue;
            };

            let reply = match name.to_ascii_uppercase().as_slice() {
                b"AUTH" => RespFrame::Simple("OK".into()),
                b"PING" => RespFrame::Simple("PONG".into()),
                b"ECHO" => RespFrame::Bulk(rest.first().cloned()),
                b"PUBLISH" => {
                    let channel = String::from_utf8_lossy(&rest[0]).to_string();
                    let payload = rest[1].clone();
                    let value = serde_json::from_slice(&payload).unwrap_or(Value::Null);
                    let _ = published.send((channel.clone(), value));
                    RespFrame::Integer(deliver(&state, &channel, payload) as i64)
                }
                b"SUBSCRIBE" | b"UNSUBSCRIBE" => {
                    let subscribe = name.eq_ignore_ascii_case(b"SUBSCRIBE");
                    for channel in rest {
                        let channel = String::from_utf8_lossy(channel).to_string();
                        {
                            let mut guard = state.lock();
                            let subs = guard.subscribers.entry(channel.clone()).or_default();
                            if subscribe {
                                subs.insert(conn, tx.clone());
                                mine.insert(channel.clone());
                            } else {
                                subs.remove(&conn);
                                mine.remove(&channel);
                            }
                        }

                        let kind = if subscribe { "subscribe" } else { "unsubscribe" };
                        let confirm = RespFrame::Array(Some(vec![
                            bulk(kind),
                            bulk(&channel),
                            RespFrame::Integer(mine.len() as i64),
                        ]));
                        if tx.send(confirm.to_bytes()).is_err() {
                            break 'outer;
                        }
                    }
                    continue;
                }
                _ => RespFrame::Error("ERR unknown command".into()),
            };

            if tx.send(reply.to_bytes()).is_err() {
                break 'outer;
            }
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }

    let mut guard = state.lock();
    for channel in mine {
        if let Some(subs) = guard.subscribers.get_mut(&channel) {
            subs.remove(&conn);
        }
    }
    writer_task.abort();
}

fn deliver(state: &Arc<Mutex<BusState>>, channel: &str, payload: Bytes) -> usize {
    let push = RespFrame::Array(Some(vec![
        bulk("message"),
        bulk(channel),
        RespFrame::Bulk(Some(payload)),
    ]))
    .to_bytes();

    let guard = state.lock();
    let Some(subs) = guard.subscribers.get(channel) else {
        return 0;
    };

    subs.values()
        .filter(|tx| tx.send(push.clone()).is_ok())
        .count()
}

fn bulk(s: &str) -> RespFrame {
    RespFrame::Bulk(Some(Bytes::copy_from_slice(s.as_bytes())))
}

// -----------------------------------------------------------------------------
// ----- WebSocket client ------------------------------------------------------

pub struct WsClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn connect(port: u16) -> Self {
        let (ws, _) = connect_async(format!("ws://127.0.0.1:{port}"))
            .await
            .expect("websocket connect");
        Self { ws }
    }

    pub async fn send_json(&mut self, value: &Value) {
        self.send_text(&value.to_string()).await;
    }

    #[allow(dead_code)]
    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(WsMessage::text(text.to_string()))
            .await
            .expect("websocket send");
    }

    /// Next text frame as JSON, or `None` if nothing arrives within `wait`.
    #[allow(dead_code)]
    pub async fn try_next_json(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.ws.next()).await.ok()??;
            if let Ok(WsMessage::Text(text)) = frame {
                return Some(serde_json::from_str(text.as_str()).expect("gateway sent invalid json"));
            }
        }
    }

    #[allow(dead_code)]
    pub async fn next_json(&mut self) -> Value {
        self.try_next_json(RECV_TIMEOUT)
            .await
            .expect("timed out waiting for a message from the gateway")
    }

    #[allow(dead_code)]
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
