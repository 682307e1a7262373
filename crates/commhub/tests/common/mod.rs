//! Helpers shared by the hub integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use commhub::{
    Communicator, CommunicatorConfig, NotificationHandler, Priority, SessionId, SessionInfo,
};

/// Everything a [`Recorder`] has observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Data(String),
    Joined(SessionId),
    Left(SessionId),
}

/// Handler that appends every notification to a shared list.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn data(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Data(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn joined(&self) -> Vec<SessionId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Joined(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn left(&self) -> Vec<SessionId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Left(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl NotificationHandler for Recorder {
    fn on_data(&self, serialized_data: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Data(serialized_data.to_string()));
    }

    fn on_client_joined(&self, session: &SessionInfo) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Joined(session.id.clone()));
    }

    fn on_client_left(&self, session_id: &SessionId) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Left(session_id.clone()));
    }
}

/// Loopback configuration on an ephemeral port.
pub fn loopback_config() -> CommunicatorConfig {
    CommunicatorConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        connect_timeout: Duration::from_secs(5),
        handshake_timeout: Duration::from_secs(5),
        ..CommunicatorConfig::default()
    }
}

/// Starts a loopback server with a [`Recorder`] subscribed as `recorder`.
pub async fn start_server(
    config: CommunicatorConfig,
) -> (Communicator, Arc<Recorder>, String, String) {
    let server = Communicator::server(config).unwrap();
    let recorder = Recorder::new();
    server.subscribe("recorder", recorder.clone(), Priority::Normal);
    let endpoint = server.start(None, None).await.unwrap();
    let (ip, port) = endpoint.rsplit_once(':').unwrap();
    let (ip, port) = (ip.to_string(), port.to_string());
    (server, recorder, ip, port)
}

/// Connects a client with its own [`Recorder`].
pub async fn connect_client(ip: &str, port: &str) -> (Communicator, Arc<Recorder>) {
    let client = Communicator::client(loopback_config()).unwrap();
    let recorder = Recorder::new();
    client.subscribe("recorder", recorder.clone(), Priority::Normal);
    client.start(Some(ip), Some(port)).await.unwrap();
    (client, recorder)
}

/// Polls `condition` every 10 ms until it holds or 5 seconds pass.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Fails the test if `fut` takes longer than 10 seconds.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("operation timed out")
}
