//! Client-facing front end: JSON messages over message-io framed TCP.

use std::{
    fmt,
    net::SocketAddr,
    ops::RangeInclusive,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use message_io::{
    network::{Endpoint, NetEvent, SendStatus, Transport},
    node::{self, NodeEvent, NodeHandler, NodeTask},
};
use rand::{thread_rng, Rng};
use serde_derive::{Deserialize, Serialize};
use serde_json::{from_slice, to_vec};
use tracing::{debug, info, warn};

use crate::{error::NetError, LOOPBACK};

/// Tries `listen_with_retry` makes before giving up.
pub const BIND_ATTEMPTS: usize = 5;

/// Where `listen_with_retry` looks once the configured port is taken.
pub const FALLBACK_PORTS: RangeInclusive<u16> = 5500..=6000;

/// What a replica offers its clients. Answers are human readable.
pub trait KvService: Send + Sync {
    fn get(&self, key: &str) -> String;
    fn put(&self, key: &str, value: &str) -> String;
    fn delete(&self, key: &str) -> String;
}

/// Response texts shared by both replica kinds.
pub mod reply {
    pub fn get(key: &str, value: Option<String>) -> String {
        value.unwrap_or_else(|| format!("Key {key} not present in store"))
    }

    pub fn put(key: &str, ok: bool) -> String {
        if ok {
            format!("Value updated for {key} successfully")
        } else {
            format!("Value update for {key} failed. Please try again.")
        }
    }

    pub fn delete(key: &str, ok: bool) -> String {
        if ok {
            format!("{key} deleted successfully")
        } else {
            format!("{key} was unable to be deleted. Please try again.")
        }
    }

    pub fn absent(key: &str) -> String {
        format!("{key} not present in the store to be removed")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Get { key: String },
    Put { key: String, value: String },
    Delete { key: String },
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Get { key } => write!(f, "GET {key}"),
            Request::Put { key, value } => write!(f, "PUT {key} {value}"),
            Request::Delete { key } => write!(f, "DELETE {key}"),
        }
    }
}

/// Operator lines: `GET k`, `PUT k v`, `DELETE k`. Verbs are case-insensitive.
impl FromStr for Request {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split_whitespace().collect::<Vec<_>>();
        let bad = || NetError::BadRequest(s.trim().to_string());
        let verb = parts.first().ok_or_else(bad)?.to_ascii_uppercase();
        match (verb.as_str(), &parts[1..]) {
            ("GET", [key]) => Ok(Request::Get {
                key: key.to_string(),
            }),
            ("PUT", [key, value]) => Ok(Request::Put {
                key: key.to_string(),
                value: value.to_string(),
            }),
            ("DELETE", [key]) => Ok(Request::Delete {
                key: key.to_string(),
            }),
            _ => Err(bad()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Request(u64, Request),
    Response(u64, String),
}

pub fn dispatch(service: &dyn KvService, req: &Request) -> String {
    match req {
        Request::Get { key } => service.get(key),
        Request::Put { key, value } => service.put(key, value),
        Request::Delete { key } => service.delete(key),
    }
}

fn send(handler: &NodeHandler<()>, ep: Endpoint, msg: &Message) -> Result<(), NetError> {
    match handler.network().send(ep, &to_vec(msg)?) {
        SendStatus::Sent => Ok(()),
        status => {
            debug!(?status, "send failed");
            Err(NetError::Disconnected)
        }
    }
}

/// A replica's listening socket. Stops when dropped.
pub struct Frontend {
    addr: SocketAddr,
    handler: NodeHandler<()>,
    task: Option<NodeTask>,
}

impl Frontend {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Same as dropping it.
    pub fn stop(self) {}
}

impl Drop for Frontend {
    fn drop(&mut self) {
        self.handler.stop();
        // Joins the event thread.
        self.task.take();
    }
}

/// Serve `service` on `addr` until the returned [`Frontend`] goes away.
pub fn listen(service: Arc<dyn KvService>, addr: SocketAddr) -> Result<Frontend, NetError> {
    let (handler, listener) = node::split::<()>();
    let (_, addr) = handler.network().listen(Transport::FramedTcp, addr)?;
    info!(%addr, "listening");

    let h = handler.clone();
    let task = listener.for_each_async(move |event| match event {
        NodeEvent::Network(NetEvent::Message(ep, buf)) => match from_slice::<Message>(buf) {
            Ok(Message::Request(id, req)) => {
                let body = dispatch(service.as_ref(), &req);
                if let Err(e) = send(&h, ep, &Message::Response(id, body)) {
                    warn!(%addr, client = %ep, error = %e, "could not answer");
                }
            }
            Ok(Message::Response(..)) => warn!(%addr, client = %ep, "unexpected response"),
            Err(e) => warn!(%addr, client = %ep, error = %e, "invalid message"),
        },
        NodeEvent::Network(NetEvent::Accepted(ep, _)) => debug!(%addr, client = %ep, "accepted"),
        NodeEvent::Network(NetEvent::Disconnected(ep)) => {
            debug!(%addr, client = %ep, "disconnected")
        }
        NodeEvent::Network(NetEvent::Connected(..)) | NodeEvent::Signal(()) => {}
    });

    Ok(Frontend {
        addr,
        handler,
        task: Some(task),
    })
}

/// [`listen`] on the loopback `port`, moving to a random port in
/// [`FALLBACK_PORTS`] whenever the bind fails.
pub fn listen_with_retry(service: Arc<dyn KvService>, port: u16) -> Result<Frontend, NetError> {
    let mut port = port;
    let mut attempt = 1;
    loop {
        match listen(service.clone(), SocketAddr::from((LOOPBACK, port))) {
            Ok(front) => return Ok(front),
            Err(e) if attempt < BIND_ATTEMPTS => {
                let next = thread_rng().gen_range(FALLBACK_PORTS);
                warn!(port, attempt, error = %e, next, "server setup failed, retrying on another port");
                port = next;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub struct Client {
    handler: NodeHandler<()>,
    server: Endpoint,
    responses: Receiver<Option<Message>>,
    next_id: AtomicU64,
    timeout: Duration,
    task: Option<NodeTask>,
}

impl Client {
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, NetError> {
        let (handler, listener) = node::split::<()>();
        let (server, _) = handler.network().connect_sync(Transport::FramedTcp, addr)?;

        let (tx, responses) = unbounded();
        let task = listener.for_each_async(move |event| match event {
            NodeEvent::Network(NetEvent::Message(_, buf)) => match from_slice::<Message>(buf) {
                Ok(msg) => {
                    let _ = tx.send(Some(msg));
                }
                Err(e) => warn!(error = %e, "invalid message from server"),
            },
            NodeEvent::Network(NetEvent::Disconnected(_)) => {
                let _ = tx.send(None);
            }
            _ => {}
        });

        Ok(Self {
            handler,
            server,
            responses,
            next_id: AtomicU64::new(0),
            timeout,
            task: Some(task),
        })
    }

    /// Send one request and wait for its answer.
    pub fn call(&self, req: Request) -> Result<String, NetError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        send(&self.handler, self.server, &Message::Request(id, req))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.responses.recv_timeout(wait) {
                Ok(Some(Message::Response(rid, body))) if rid == id => return Ok(body),
                // Late answer to an earlier call.
                Ok(Some(_)) => continue,
                Ok(None) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(NetError::Disconnected)
                }
                Err(RecvTimeoutError::Timeout) => return Err(NetError::TimedOut),
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.handler.stop();
        self.task.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_requests() {
        assert_eq!(
            "put a 1".parse::<Request>().unwrap(),
            Request::Put {
                key: "a".into(),
                value: "1".into()
            }
        );
        assert_eq!(
            "  GET   a ".parse::<Request>().unwrap(),
            Request::Get { key: "a".into() }
        );
        assert_eq!(
            "Delete a".parse::<Request>().unwrap(),
            Request::Delete { key: "a".into() }
        );
        for bad in ["", "GET", "PUT a", "DELETE a b", "PATCH a b"] {
            assert!(matches!(bad.parse::<Request>(), Err(NetError::BadRequest(_))));
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        let req = Request::Put {
            key: "k".into(),
            value: "v".into(),
        };
        assert_eq!(req.to_string().parse::<Request>().unwrap(), req);
    }

    #[test]
    fn reply_texts() {
        assert_eq!(reply::get("a", Some("1".into())), "1");
        assert_eq!(reply::get("a", None), "Key a not present in store");
        assert!(reply::put("a", false).contains("failed"));
        assert_eq!(reply::delete("a", true), "a deleted successfully");
    }
}
