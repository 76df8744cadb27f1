//! Tests for the connection manager's reconnect loop and request gating

use super::*;
use crate::obs::{TransportCallback, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectOutcome {
    Accept,
    Refuse,
    Error,
}

/// Transport double: records calls and reports outcomes through the handler
struct FakeTransport {
    handler: Mutex<Option<TransportCallback>>,
    outcome: Mutex<ConnectOutcome>,
    connects: Mutex<Vec<Endpoint>>,
    connect_times: Mutex<Vec<tokio::time::Instant>>,
    sent: Mutex<Vec<String>>,
    current: Mutex<String>,
    fail_requests: AtomicBool,
    connected: AtomicBool,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    fn new(outcome: ConnectOutcome) -> Arc<Self> {
        Arc::new(Self {
            handler: Mutex::new(None),
            outcome: Mutex::new(outcome),
            connects: Mutex::new(Vec::new()),
            connect_times: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            current: Mutex::new("Slides".to_string()),
            fail_requests: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
        })
    }

    fn fire(&self, event: TransportEvent) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Simulate OBS dropping the session
    fn drop_session(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.fire(TransportEvent::Disconnected {
            reason: "connection reset".to_string(),
        });
    }

    fn set_outcome(&self, outcome: ConnectOutcome) {
        *self.outcome.lock() = outcome;
    }

    fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }
}

#[async_trait]
impl SceneTransport for FakeTransport {
    fn set_event_handler(&self, handler: TransportCallback) {
        *self.handler.lock() = Some(handler);
    }

    async fn connect(&self, endpoint: &Endpoint, _password: Option<&str>) -> Result<(), TransportError> {
        self.connects.lock().push(endpoint.clone());
        self.connect_times.lock().push(tokio::time::Instant::now());
        let outcome = *self.outcome.lock();
        match outcome {
            ConnectOutcome::Accept => {
                self.connected.store(true, Ordering::SeqCst);
                self.fire(TransportEvent::Connected);
            },
            ConnectOutcome::Refuse => self.fire(TransportEvent::Disconnected {
                reason: "connection refused".to_string(),
            }),
            ConnectOutcome::Error => return Err(TransportError::Request("socket error".to_string())),
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            self.fire(TransportEvent::Disconnected {
                reason: "disconnect requested".to_string(),
            });
        }
    }

    async fn set_current_scene(&self, scene: &str) -> Result<(), TransportError> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(TransportError::Request("scene not found".to_string()));
        }
        self.sent.lock().push(scene.to_string());
        *self.current.lock() = scene.to_string();
        Ok(())
    }

    async fn current_scene(&self) -> Result<String, TransportError> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(TransportError::Request("timeout".to_string()));
        }
        Ok(self.current.lock().clone())
    }
}

fn make_settings(host: &str) -> ObsConfig {
    ObsConfig {
        host: host.to_string(),
        port: 4455,
        password: None,
        reconnect_max_seconds: 1,
    }
}

fn make_manager(transport: &Arc<FakeTransport>) -> Arc<ConnectionManager> {
    let transport: Arc<dyn SceneTransport> = Arc::clone(transport) as Arc<dyn SceneTransport>;
    Arc::new(ConnectionManager::new(transport, make_settings("127.0.0.1")).with_base_delay(Duration::from_millis(10)))
}

fn spawn_run(manager: &Arc<ConnectionManager>, cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let manager = Arc::clone(manager);
    let cancel = cancel.clone();
    tokio::spawn(async move { manager.run(cancel).await })
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_send_when_disconnected_skips_transport() {
    let transport = FakeTransport::new(ConnectOutcome::Accept);
    let manager = make_manager(&transport);
    let cancel = CancellationToken::new();

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.send("Cam 1", &cancel).await);
    assert_eq!(manager.query(&cancel).await, None);
    assert!(transport.sent.lock().is_empty());
}

#[tokio::test]
async fn test_connects_and_sends() {
    let transport = FakeTransport::new(ConnectOutcome::Accept);
    let manager = make_manager(&transport);
    let cancel = CancellationToken::new();
    let handle = spawn_run(&manager, &cancel);

    wait_for(|| manager.is_connected()).await;
    assert_eq!(transport.connects.lock()[0].url(), "ws://127.0.0.1:4455");

    assert!(manager.send("Cam 1", &cancel).await);
    assert_eq!(*transport.sent.lock(), vec!["Cam 1".to_string()]);
    assert_eq!(manager.query(&cancel).await, Some("Cam 1".to_string()));

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_request_failure_keeps_connection() {
    let transport = FakeTransport::new(ConnectOutcome::Accept);
    let manager = make_manager(&transport);
    let cancel = CancellationToken::new();
    let handle = spawn_run(&manager, &cancel);

    wait_for(|| manager.is_connected()).await;
    transport.fail_requests.store(true, Ordering::SeqCst);

    assert!(!manager.send("Missing", &cancel).await);
    assert_eq!(manager.query(&cancel).await, None);
    assert!(manager.is_connected());
    assert_eq!(transport.connect_count(), 1);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_retries_after_refused_connect() {
    let transport = FakeTransport::new(ConnectOutcome::Refuse);
    let manager = make_manager(&transport);
    let cancel = CancellationToken::new();
    let handle = spawn_run(&manager, &cancel);

    wait_for(|| transport.connect_count() >= 3).await;
    assert!(!manager.is_connected());

    transport.set_outcome(ConnectOutcome::Accept);
    wait_for(|| manager.is_connected()).await;

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_connect_error_is_retried() {
    let transport = FakeTransport::new(ConnectOutcome::Error);
    let manager = make_manager(&transport);
    let cancel = CancellationToken::new();
    let handle = spawn_run(&manager, &cancel);

    wait_for(|| transport.connect_count() >= 2).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_reconnects_after_session_drop() {
    let transport = FakeTransport::new(ConnectOutcome::Accept);
    let manager = make_manager(&transport);
    let cancel = CancellationToken::new();
    let handle = spawn_run(&manager, &cancel);

    wait_for(|| manager.is_connected()).await;
    transport.drop_session();
    assert!(!manager.is_connected());

    wait_for(|| transport.connect_count() == 2 && manager.is_connected()).await;

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_cancel_disconnects_and_returns() {
    let transport = FakeTransport::new(ConnectOutcome::Accept);
    let manager = make_manager(&transport);
    let cancel = CancellationToken::new();
    let handle = spawn_run(&manager, &cancel);

    wait_for(|| manager.is_connected()).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("run should return after cancel")
        .unwrap();
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_cancel_interrupts_backoff_sleep() {
    let transport = FakeTransport::new(ConnectOutcome::Refuse);
    let transport_dyn: Arc<dyn SceneTransport> = Arc::clone(&transport) as Arc<dyn SceneTransport>;
    let manager = Arc::new(
        ConnectionManager::new(transport_dyn, make_settings("127.0.0.1")).with_base_delay(Duration::from_secs(30)),
    );
    let cancel = CancellationToken::new();
    let handle = spawn_run(&manager, &cancel);

    wait_for(|| transport.connect_count() == 1).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("backoff sleep should end on cancel")
        .unwrap();
    assert_eq!(transport.connect_count(), 1);
    // Never connected, so nothing to tear down
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unresolvable_host_skips_connect() {
    let transport = FakeTransport::new(ConnectOutcome::Accept);
    let transport_dyn: Arc<dyn SceneTransport> = Arc::clone(&transport) as Arc<dyn SceneTransport>;
    let manager = Arc::new(
        ConnectionManager::new(transport_dyn, make_settings("obs-host-that-does-not-exist.invalid"))
            .with_base_delay(Duration::from_millis(10)),
    );
    let cancel = CancellationToken::new();
    let handle = spawn_run(&manager, &cancel);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.connect_count(), 0);

    // Fixing the host is picked up on the next iteration
    manager.update_settings(make_settings("127.0.0.1"));
    wait_for(|| manager.is_connected()).await;

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_settings_update_used_on_reconnect() {
    let transport = FakeTransport::new(ConnectOutcome::Accept);
    let manager = make_manager(&transport);
    let cancel = CancellationToken::new();
    let handle = spawn_run(&manager, &cancel);

    wait_for(|| manager.is_connected()).await;

    let mut settings = make_settings("127.0.0.1");
    settings.port = 4460;
    manager.update_settings(settings);
    transport.drop_session();

    wait_for(|| transport.connect_count() == 2 && manager.is_connected()).await;
    assert_eq!(transport.connects.lock()[1].port, 4460);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_events_are_broadcast() {
    let transport = FakeTransport::new(ConnectOutcome::Accept);
    let manager = make_manager(&transport);
    let mut events = manager.subscribe();
    let cancel = CancellationToken::new();
    let handle = spawn_run(&manager, &cancel);

    let first = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    assert_eq!(first, ConnectionEvent::Connected);

    transport.fire(TransportEvent::SceneChanged("Wide".to_string()));
    let second = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    assert_eq!(second, ConnectionEvent::SceneChanged("Wide".to_string()));

    cancel.cancel();
    handle.await.unwrap();
}

/// Whole-second gaps between consecutive connect attempts
fn connect_gaps(transport: &FakeTransport) -> Vec<u64> {
    let times = transport.connect_times.lock();
    times.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect()
}

async fn advance_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_caps_and_resets_after_success() {
    let transport = FakeTransport::new(ConnectOutcome::Refuse);
    let transport_dyn: Arc<dyn SceneTransport> = Arc::clone(&transport) as Arc<dyn SceneTransport>;
    let mut settings = make_settings("127.0.0.1");
    settings.reconnect_max_seconds = 8;
    let manager = Arc::new(ConnectionManager::new(transport_dyn, settings));
    let cancel = CancellationToken::new();
    let handle = spawn_run(&manager, &cancel);

    advance_until(|| transport.connect_count() == 6).await;
    assert_eq!(connect_gaps(&transport), vec![1, 2, 4, 8, 8]);

    // Seventh attempt succeeds after the capped delay
    transport.set_outcome(ConnectOutcome::Accept);
    advance_until(|| manager.is_connected()).await;
    assert_eq!(connect_gaps(&transport)[5], 8);

    // The success reset the schedule: a dropped session retries after the base delay
    let dropped_at = tokio::time::Instant::now();
    transport.drop_session();
    advance_until(|| transport.connect_count() == 8).await;

    let reconnected_at = transport.connect_times.lock()[7];
    assert_eq!((reconnected_at - dropped_at).as_secs(), 1);
    assert!(manager.is_connected());

    cancel.cancel();
    handle.await.unwrap();
}
