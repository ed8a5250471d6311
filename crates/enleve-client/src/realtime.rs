//! Change feed over the hosted realtime socket.
//!
//! One websocket per subscription, speaking the Phoenix channel protocol:
//! join a `postgres_changes` topic, keep it alive with heartbeats, and turn
//! every change message into a [`ChangeEvent`]. A dropped connection is
//! re-established with backoff for as long as the subscription is alive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use enleve_shared::backend::{ChangeEvent, ChangeFilter, ChangeKind, Subscription};
use enleve_shared::BackendError;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const MAX_BACKOFF_SECS: u64 = 60;

static NEXT_TOPIC: AtomicU64 = AtomicU64::new(1);

/// Websocket endpoint for a project URL.
pub fn socket_url(base_url: &str, anon_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0")
}

/// `phx_join` for one `postgres_changes` binding.
pub fn join_message(topic: &str, filter: &ChangeFilter, access_token: Option<&str>) -> Value {
    let mut binding = json!({
        "event": filter.kind.map(ChangeKind::as_str).unwrap_or("*"),
        "schema": "public",
        "table": filter.table,
    });
    if let Some((column, value)) = &filter.column_eq {
        binding["filter"] = json!(format!("{column}=eq.{value}"));
    }

    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [binding],
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = json!(token);
    }

    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": payload,
        "ref": "1",
    })
}

pub fn heartbeat_message(seq: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": seq.to_string(),
    })
}

/// Extract the change carried by a socket message, if any.
pub fn parse_change(message: &Value) -> Option<ChangeEvent> {
    if message.get("event")?.as_str()? != "postgres_changes" {
        return None;
    }
    let data = message.get("payload")?.get("data")?;
    let kind = ChangeKind::parse(data.get("type")?.as_str()?)?;
    let table = data.get("table")?.as_str()?.to_string();
    let new = match data.get("record") {
        Some(Value::Null) | None => None,
        Some(record) => Some(record.clone()),
    };
    Some(ChangeEvent { table, kind, new })
}

/// Whether the server refused our join.
fn join_error(message: &Value) -> Option<String> {
    if message.get("event")?.as_str()? != "phx_reply" {
        return None;
    }
    let payload = message.get("payload")?;
    if payload.get("status")?.as_str()? == "ok" {
        return None;
    }
    Some(
        payload
            .get("response")
            .map(Value::to_string)
            .unwrap_or_else(|| "join refused".into()),
    )
}

/// Open a socket, join, and hand back the subscription. The first connection
/// is made before returning so connection errors reach the caller.
pub async fn subscribe(
    url: String,
    filter: ChangeFilter,
    access_token: Option<String>,
) -> Result<Subscription, BackendError> {
    let topic = format!(
        "realtime:enleve-{}-{}",
        filter.table,
        NEXT_TOPIC.fetch_add(1, Ordering::Relaxed)
    );
    let join = join_message(&topic, &filter, access_token.as_deref());
    let socket = connect(&url, &join).await?;
    info!(table = %filter.table, "realtime subscription joined");

    let (tx, subscription) = Subscription::channel();
    tokio::spawn(run(url, join, filter, socket, tx));
    Ok(subscription)
}

async fn connect(url: &str, join: &Value) -> Result<Socket, BackendError> {
    let (mut socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| BackendError::Transport(e.to_string()))?;
    socket
        .send(Message::text(join.to_string()))
        .await
        .map_err(|e| BackendError::Transport(e.to_string()))?;
    Ok(socket)
}

async fn run(
    url: String,
    join: Value,
    filter: ChangeFilter,
    mut socket: Socket,
    tx: mpsc::Sender<ChangeEvent>,
) {
    let mut attempt = 0u32;
    loop {
        match pump(&mut socket, &filter, &tx).await {
            Ok(()) => attempt = 0,
            Err(e) => warn!(table = %filter.table, error = %e, "realtime connection lost"),
        }
        if tx.is_closed() {
            break;
        }

        loop {
            let delay = backoff(attempt);
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(delay).await;
            if tx.is_closed() {
                debug!("subscription dropped while reconnecting");
                return;
            }
            match connect(&url, &join).await {
                Ok(s) => {
                    info!(table = %filter.table, "realtime reconnected");
                    socket = s;
                    break;
                }
                Err(e) => warn!(error = %e, ?delay, "realtime reconnect failed"),
            }
        }
    }
    let _ = socket.close(None).await;
    debug!(table = %filter.table, "realtime subscription closed");
}

/// Forward changes until the socket closes or the subscriber goes away.
async fn pump(
    socket: &mut Socket,
    filter: &ChangeFilter,
    tx: &mpsc::Sender<ChangeEvent>,
) -> Result<(), String> {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut seq = 2u64;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                socket
                    .send(Message::text(heartbeat_message(seq).to_string()))
                    .await
                    .map_err(|e| e.to_string())?;
                seq += 1;
            }
            _ = tx.closed() => return Ok(()),
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Ok(message) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    if let Some(reason) = join_error(&message) {
                        return Err(format!("join refused: {reason}"));
                    }
                    let Some(event) = parse_change(&message) else {
                        continue;
                    };
                    if !filter.matches(&event) {
                        continue;
                    }
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    socket.send(Message::Pong(data)).await.map_err(|e| e.to_string())?;
                }
                Some(Ok(Message::Close(_))) | None => return Err("closed by server".into()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.to_string()),
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    let secs = 1u64 << attempt.min(6);
    Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_switches_scheme() {
        assert_eq!(
            socket_url("https://abc.supabase.co/", "key"),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );
        assert!(socket_url("http://localhost:54321", "k").starts_with("ws://localhost:54321/"));
    }

    #[test]
    fn join_carries_binding_and_token() {
        let filter = ChangeFilter::table("atendimento")
            .on(ChangeKind::Insert)
            .where_eq("status", "Em Espera");
        let join = join_message("realtime:t", &filter, Some("jwt"));
        assert_eq!(join["event"], "phx_join");
        let binding = &join["payload"]["config"]["postgres_changes"][0];
        assert_eq!(binding["event"], "INSERT");
        assert_eq!(binding["table"], "atendimento");
        assert_eq!(binding["filter"], "status=eq.Em Espera");
        assert_eq!(join["payload"]["access_token"], "jwt");

        let any = join_message("realtime:t", &ChangeFilter::table("atendimento"), None);
        let binding = &any["payload"]["config"]["postgres_changes"][0];
        assert_eq!(binding["event"], "*");
        assert!(binding.get("filter").is_none());
    }

    #[test]
    fn parses_postgres_changes() {
        let message = json!({
            "topic": "realtime:t",
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": "atendimento",
                    "type": "INSERT",
                    "commit_timestamp": "2026-01-01T00:00:00Z",
                    "record": {"id": 7, "status": "Em Espera", "cliente_nome": "Maria"}
                }
            }
        });
        let event = parse_change(&message).unwrap();
        assert_eq!(event.table, "atendimento");
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.column_str("cliente_nome"), Some("Maria"));
    }

    #[test]
    fn ignores_other_messages() {
        let reply = json!({"event": "phx_reply", "payload": {"status": "ok", "response": {}}});
        assert!(parse_change(&reply).is_none());
        assert!(join_error(&reply).is_none());

        let refused = json!({"event": "phx_reply", "payload": {"status": "error", "response": {"reason": "unauthorized"}}});
        assert!(join_error(&refused).unwrap().contains("unauthorized"));

        let delete = json!({
            "event": "postgres_changes",
            "payload": {"data": {"table": "atendimento", "type": "DELETE", "record": null}}
        });
        let event = parse_change(&delete).unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.new.is_none());
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(30), Duration::from_secs(MAX_BACKOFF_SECS));
    }
}
