//! `ChangeFeed` over the Phoenix-protocol realtime websocket.
//!
//! Each subscription owns one socket and one task. The task joins a
//! `postgres_changes` channel, heartbeats every 25 seconds, forwards change
//! frames, and leaves the channel once the subscriber drops its end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rf_core::realtime::{subscription, ChangeEvent, ChangeFilter, ChangeKind, Subscription, SubscriptionSender};
use rf_core::traits::ChangeFeed;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
/// Upper bound for opening the socket and sending the join frame.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PROTOCOL_VERSION: &str = "1.0.0";

pub struct SupabaseRealtime {
    socket_url: Url,
    refs: Arc<AtomicU64>,
    connect_timeout: Duration,
}

/// `https://host` becomes `wss://host/realtime/v1/websocket?apikey=..&vsn=1.0.0`.
pub fn socket_url(base: &Url, anon_key: &str) -> anyhow::Result<Url> {
    let mut url = base.join("/realtime/v1/websocket").context("invalid realtime URL")?;
    let scheme = match base.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => bail!("unsupported backend scheme '{other}'"),
    };
    if url.set_scheme(scheme).is_err() {
        bail!("cannot derive websocket URL from {base}");
    }
    url.query_pairs_mut()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

impl SupabaseRealtime {
    pub fn new(socket_url: Url) -> Self {
        Self { socket_url, refs: Arc::new(AtomicU64::new(1)), connect_timeout: CONNECT_TIMEOUT }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

fn topic(filter: &ChangeFilter) -> String {
    format!("realtime:{}", filter.channel_name())
}

fn next_ref(refs: &AtomicU64) -> String {
    refs.fetch_add(1, Ordering::Relaxed).to_string()
}

pub(crate) fn join_frame(filter: &ChangeFilter, join_ref: &str) -> Value {
    let mut change = json!({
        "event": "*",
        "schema": "public",
        "table": filter.table.as_str(),
    });
    if let Some(post_id) = filter.post_id {
        change["filter"] = json!(format!("post_id=eq.{post_id}"));
    }
    json!({
        "topic": topic(filter),
        "event": "phx_join",
        "payload": { "config": { "postgres_changes": [change] } },
        "ref": join_ref,
    })
}

fn leave_frame(filter: &ChangeFilter, leave_ref: &str) -> Value {
    json!({ "topic": topic(filter), "event": "phx_leave", "payload": {}, "ref": leave_ref })
}

fn heartbeat_frame(heartbeat_ref: &str) -> Value {
    json!({ "topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": heartbeat_ref })
}

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type")]
    kind: String,
    record: Option<Value>,
    old_record: Option<Value>,
}

/// Decodes one text frame. Anything that is not a row change yields `None`.
pub(crate) fn parse_change(text: &str) -> Option<ChangeEvent> {
    let frame: Frame = serde_json::from_str(text).ok()?;
    match frame.event.as_str() {
        "postgres_changes" => {}
        "phx_reply" | "phx_close" | "phx_error" | "system" | "presence_state" => {
            log::debug!("realtime {}: {}", frame.event, frame.payload);
            return None;
        }
        _ => return None,
    }
    let data: ChangeData = serde_json::from_value(frame.payload.get("data")?.clone()).ok()?;
    let table = data.table.parse().ok()?;
    let kind: ChangeKind = data.kind.parse().ok()?;
    // Empty objects stand in for "no row" on inserts and deletes.
    let non_empty = |row: Option<Value>| row.filter(|v| v.as_object().is_some_and(|o| !o.is_empty()));
    Some(ChangeEvent::new(table, kind, non_empty(data.record), non_empty(data.old_record)))
}

#[async_trait]
impl ChangeFeed for SupabaseRealtime {
    async fn subscribe(&self, filter: ChangeFilter) -> anyhow::Result<Subscription> {
        let (socket, _) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(self.socket_url.as_str()))
                .await
                .with_context(|| format!("realtime connection timed out after {:?}", self.connect_timeout))?
                .context("realtime connection failed")?;
        let (mut write, read) = socket.split();

        let join = join_frame(&filter, &next_ref(&self.refs));
        tokio::time::timeout(self.connect_timeout, write.send(Message::Text(join.to_string())))
            .await
            .context("realtime join timed out")??;
        log::debug!("joined {}", topic(&filter));

        let (sender, subscription) = subscription(filter);
        tokio::spawn(run_channel(sender, write, read, self.refs.clone()));
        Ok(subscription)
    }
}

async fn run_channel<W, R>(sender: SubscriptionSender, mut write: W, mut read: R, refs: Arc<AtomicU64>)
where
    W: futures_util::Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
    R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let filter = sender.filter();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = sender.closed() => {
                let leave = leave_frame(&filter, &next_ref(&refs));
                if let Err(err) = write.send(Message::Text(leave.to_string())).await {
                    log::debug!("could not leave {}: {err}", topic(&filter));
                }
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            _ = heartbeat.tick() => {
                let beat = heartbeat_frame(&next_ref(&refs));
                if let Err(err) = write.send(Message::Text(beat.to_string())).await {
                    log::warn!("realtime heartbeat failed on {}: {err}", topic(&filter));
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_change(&text) {
                        if !sender.deliver(event) {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    log::warn!("realtime socket closed for {}: {frame:?}", topic(&filter));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    log::warn!("realtime socket error on {}: {err}", topic(&filter));
                    break;
                }
                None => break,
            },
        }
    }
    log::debug!("left {}", topic(&filter));
}
