use crate::{
    config::{Config, ConfigBuilder},
    connection::{Connection, Connector, TcpConnector},
    error::{MqError, Result},
    event::{ClientEvent, EventSink},
    message::{validate_segment, Request, Response},
    queue::BlockingQueue,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`MqClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, not yet started. Operations fail with [`MqError::NotStarted`].
    Created,
    /// Connected, with the sender task serving requests.
    Running,
    /// `stop` has begun; queued requests drain, new ones are rejected.
    Stopping,
    /// The sender has exited and the connection is closed.
    Stopped,
}

enum Outgoing {
    Request(Request),
    Shutdown,
}

/// Client for a publish/subscribe message queue broker.
///
/// All traffic goes over one long-lived connection that carries at most one
/// request at a time, since the protocol has no request identifiers. A
/// background sender task owns the connection and performs each
/// write-request/read-response round trip atomically. Public operations queue a
/// request and wait for its response while holding a client-wide round-trip
/// lock, so concurrent callers are served strictly one after another and each
/// receives the response to its own request.
///
/// # Examples
///
/// ```no_run
/// use mq_client::MqClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), mq_client::MqError> {
///     let client = MqClient::new("alice", "localhost", 1337)?;
///     client.start().await?;
///
///     client.subscribe("news").await?;
///     client.publish("news", "Hello, World!").await?;
///     println!("Retrieved: {}", client.retrieve().await?);
///
///     client.stop().await?;
///     Ok(())
/// }
/// ```
pub struct MqClient {
    shared: Arc<Shared>,
    sender: AsyncMutex<Option<JoinHandle<Option<Connection>>>>,
}

struct Shared {
    config: Config,
    connector: Arc<dyn Connector>,
    events: Option<Arc<dyn EventSink>>,
    outgoing: BlockingQueue<Outgoing>,
    incoming: BlockingQueue<Result<Response>>,
    round_trip: AsyncMutex<()>,
    /// Responses owed to callers that gave up waiting; drained by the next caller.
    orphaned: AtomicUsize,
    lifecycle: Mutex<Lifecycle>,
}

impl MqClient {
    /// Creates a client named `name` for the broker at `host:port`.
    ///
    /// The client is idle until [`start`](Self::start) is called.
    ///
    /// # Errors
    ///
    /// [`MqError::Validation`] if `name` is empty or contains `/`, whitespace or
    /// control characters.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Result<Self> {
        let config = ConfigBuilder::new().name(name).host(host).port(port).build();

        Self::with_config(config)
    }

    /// Creates a client from a full [`Config`], connecting over TCP.
    ///
    /// ```no_run
    /// use mq_client::MqClient;
    /// use std::time::Duration;
    ///
    /// # fn example() -> Result<(), mq_client::MqError> {
    /// let client = MqClient::with_config(
    ///     MqClient::builder()
    ///         .name("worker-1")
    ///         .host("broker.example.com")
    ///         .port(9000)
    ///         .timeout(Duration::from_secs(5))
    ///         .build(),
    /// )?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_config(config: Config) -> Result<Self> {
        Self::with_connector(config, TcpConnector)
    }

    /// Creates a client that obtains its streams from `connector`.
    pub fn with_connector(config: Config, connector: impl Connector) -> Result<Self> {
        validate_segment("client name", &config.name)?;

        let shared = Shared {
            config,
            connector: Arc::new(connector),
            events: None,
            outgoing: BlockingQueue::new(),
            incoming: BlockingQueue::new(),
            round_trip: AsyncMutex::new(()),
            orphaned: AtomicUsize::new(0),
            lifecycle: Mutex::new(Lifecycle::Created),
        };

        Ok(Self {
            shared: Arc::new(shared),
            sender: AsyncMutex::new(None),
        })
    }

    /// Returns a [`ConfigBuilder`] starting from the default configuration.
    ///
    /// ```
    /// use mq_client::MqClient;
    ///
    /// let config = MqClient::builder().name("alice").port(9000).build();
    /// assert_eq!(config.port, 9000);
    /// ```
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Installs an [`EventSink`]. Only takes effect while the client is not running.
    pub fn with_event_sink(mut self, sink: impl EventSink) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.events = Some(Arc::new(sink)),
            None => warn!("event sink ignored: client is running"),
        }
        self
    }

    /// The client name used in `/queue/<name>` and `/subscription/<name>/...`.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Current [`Lifecycle`] state.
    ///
    /// ```
    /// use mq_client::{Lifecycle, MqClient};
    ///
    /// let client = MqClient::new("alice", "localhost", 1337).unwrap();
    /// assert_eq!(client.state(), Lifecycle::Created);
    /// ```
    pub fn state(&self) -> Lifecycle {
        *self.shared.lifecycle()
    }

    /// True once [`stop`](Self::stop) has begun.
    pub fn is_shutdown(&self) -> bool {
        matches!(self.state(), Lifecycle::Stopping | Lifecycle::Stopped)
    }

    /// Connects to the broker and spawns the background sender.
    ///
    /// Starting a running client does nothing. If the connection cannot be
    /// established the client stays idle and `start` may be called again.
    ///
    /// # Errors
    ///
    /// * [`MqError::Connection`] or [`MqError::Timeout`] if the broker is unreachable
    /// * [`MqError::EngineStopped`] if the client was already stopped
    pub async fn start(&self) -> Result<()> {
        let mut sender = self.sender.lock().await;

        match self.state() {
            Lifecycle::Created => {}
            Lifecycle::Running => return Ok(()),
            Lifecycle::Stopping | Lifecycle::Stopped => return Err(MqError::EngineStopped),
        }

        let connection = self.shared.open().await?;
        self.shared.set_lifecycle(Lifecycle::Running);
        *sender = Some(tokio::spawn(
            Arc::clone(&self.shared).run_sender(Some(connection)),
        ));

        info!(name = %self.name(), "client started");
        self.shared.emit(|| ClientEvent::Started {
            name: self.name().to_string(),
        });
        Ok(())
    }

    /// Stops the client.
    ///
    /// Requests queued before `stop` are still sent and answered. The call
    /// returns once the sender has exited and the connection is closed; every
    /// operation afterwards fails with [`MqError::EngineStopped`]. Stopping twice
    /// is harmless.
    pub async fn stop(&self) -> Result<()> {
        let mut sender = self.sender.lock().await;

        {
            let mut lifecycle = self.shared.lifecycle();
            match *lifecycle {
                Lifecycle::Created => {
                    *lifecycle = Lifecycle::Stopped;
                    return Ok(());
                }
                Lifecycle::Running => {
                    *lifecycle = Lifecycle::Stopping;
                    // Queued under the lifecycle lock, hence after every
                    // request that was accepted while running.
                    self.shared.outgoing.push(Outgoing::Shutdown);
                }
                Lifecycle::Stopping | Lifecycle::Stopped => {}
            }
        }

        let Some(handle) = sender.take() else {
            return Ok(());
        };
        debug!(name = %self.name(), "waiting for sender to drain");

        let joined = handle.await;
        let result = match joined {
            Ok(Some(connection)) => {
                if let Err(err) = connection.close().await {
                    debug!(error = %err, "error while closing connection");
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                error!(error = %err, "sender task failed");
                Err(MqError::Connection(format!("sender task failed: {}", err)))
            }
        };

        self.shared.set_lifecycle(Lifecycle::Stopped);
        info!(name = %self.name(), "client stopped");
        self.shared.emit(|| ClientEvent::Stopped {
            name: self.name().to_string(),
        });
        result
    }

    /// Publishes `body` to `topic`.
    ///
    /// # Errors
    ///
    /// * [`MqError::Validation`] if `topic` is not a valid path segment
    /// * [`MqError::MessageTooLarge`] if `body` exceeds `max_message_size`
    /// * [`MqError::RequestFailed`] if the broker answers with a non-2xx status
    /// * [`MqError::Connection`], [`MqError::Protocol`] or [`MqError::Timeout`]
    ///   if the round trip broke down
    /// * [`MqError::NotStarted`] / [`MqError::EngineStopped`] outside `Running`
    pub async fn publish(&self, topic: &str, body: impl Into<Vec<u8>>) -> Result<()> {
        let body = body.into();

        if body.len() > self.shared.config.max_message_size {
            return Err(MqError::MessageTooLarge { size: body.len() });
        }

        let request = Request::publish(topic, body)?;
        self.submit(request).await?.into_result()?;
        Ok(())
    }

    /// Retrieves one message from this client's queue as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Same as [`retrieve_bytes`](Self::retrieve_bytes), plus [`MqError::Protocol`]
    /// if the body is not valid UTF-8.
    pub async fn retrieve(&self) -> Result<String> {
        let body = self.retrieve_bytes().await?;
        String::from_utf8(body)
            .map_err(|_| MqError::Protocol("message body is not valid UTF-8".to_string()))
    }

    /// Retrieves one message from this client's queue.
    ///
    /// A broker with nothing queued typically answers with a non-2xx status,
    /// surfaced as [`MqError::RequestFailed`].
    pub async fn retrieve_bytes(&self) -> Result<Vec<u8>> {
        let request = Request::retrieve(self.name())?;
        self.submit(request).await?.into_result()
    }

    /// Subscribes this client's queue to `topic`.
    ///
    /// Messages published to `topic` afterwards are delivered to the queue read
    /// by [`retrieve`](Self::retrieve).
    ///
    /// # Errors
    ///
    /// * [`MqError::Validation`] if `topic` is not a valid path segment
    /// * [`MqError::RequestFailed`] if the broker answers with a non-2xx status
    /// * [`MqError::Connection`], [`MqError::Protocol`] or [`MqError::Timeout`]
    ///   if the round trip broke down
    /// * [`MqError::NotStarted`] / [`MqError::EngineStopped`] outside `Running`
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        let request = Request::subscribe(self.name(), topic)?;
        self.submit(request).await?.into_result()?;
        Ok(())
    }

    /// Removes the subscription of this client's queue to `topic`.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe). Brokers commonly answer
    /// unsubscribing from an unknown topic with a non-2xx status.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let request = Request::unsubscribe(self.name(), topic)?;
        self.submit(request).await?.into_result()?;
        Ok(())
    }

    /// Queues `request` and waits for the response paired with it.
    async fn submit(&self, request: Request) -> Result<Response> {
        // Rejected before waiting on the lock, which an in-flight round trip may
        // hold for up to `config.timeout`.
        check_running(self.state())?;
        let _round_trip = self.shared.round_trip.lock().await;
        check_running(self.state())?;

        self.shared.discard_orphaned_responses().await;
        self.shared.enqueue(request)?;

        // Declared after `_round_trip`, so it drops first and records the
        // orphan before the next caller can take the lock.
        let mut pending = PendingResponse {
            orphaned: &self.shared.orphaned,
            received: false,
        };
        let response = self.shared.incoming.pop().await;
        pending.received = true;
        response
    }
}

impl Drop for MqClient {
    fn drop(&mut self) {
        let mut lifecycle = self.shared.lifecycle();
        if *lifecycle == Lifecycle::Running {
            *lifecycle = Lifecycle::Stopping;
            self.shared.outgoing.push(Outgoing::Shutdown);
            debug!("client dropped while running, sender told to exit");
        }
    }
}

fn check_running(lifecycle: Lifecycle) -> Result<()> {
    match lifecycle {
        Lifecycle::Running => Ok(()),
        Lifecycle::Created => Err(MqError::NotStarted),
        Lifecycle::Stopping | Lifecycle::Stopped => Err(MqError::EngineStopped),
    }
}

struct PendingResponse<'a> {
    orphaned: &'a AtomicUsize,
    received: bool,
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        if !self.received {
            self.orphaned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Shared {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        *self.lifecycle() = state;
    }

    fn emit(&self, event: impl FnOnce() -> ClientEvent) {
        if let Some(sink) = &self.events {
            sink.on_event(&event());
        }
    }

    fn enqueue(&self, request: Request) -> Result<()> {
        let lifecycle = self.lifecycle();
        check_running(*lifecycle)?;
        self.outgoing.push(Outgoing::Request(request));
        Ok(())
    }

    /// Must be called with the round-trip lock held.
    async fn discard_orphaned_responses(&self) {
        while self.orphaned.load(Ordering::SeqCst) > 0 {
            let response = self.incoming.pop().await;
            self.orphaned.fetch_sub(1, Ordering::SeqCst);
            warn!(
                ok = response.is_ok(),
                "discarded response of an abandoned request"
            );
        }
    }

    /// Connects with the configured retries. Only `start` does this.
    async fn open(&self) -> Result<Connection> {
        let connection = Connection::open(self.connector.as_ref(), &self.config).await?;
        Ok(self.connected(connection))
    }

    /// A single connection attempt, used for reconnects during a round trip.
    async fn connect(&self) -> Result<Connection> {
        let connection = Connection::connect(self.connector.as_ref(), &self.config).await?;
        Ok(self.connected(connection))
    }

    fn connected(&self, connection: Connection) -> Connection {
        info!(address = %self.config.address(), "connected to broker");
        self.emit(|| ClientEvent::Connected {
            host: self.config.host.clone(),
            port: self.config.port,
        });
        connection
    }

    /// The sender task. It is the only reader and writer of the connection;
    /// the connection is handed back to `stop` when the shutdown marker arrives.
    async fn run_sender(self: Arc<Self>, mut connection: Option<Connection>) -> Option<Connection> {
        loop {
            let request = match self.outgoing.pop().await {
                Outgoing::Request(request) => request,
                Outgoing::Shutdown => break,
            };

            let result = self.exchange(&mut connection, &request).await;
            self.incoming.push(result);
        }

        debug!("sender exiting");
        connection
    }

    /// One write-then-read round trip, (re)connecting first if needed.
    ///
    /// A protocol error leaves the stream at an unknown position, so the
    /// connection is replaced once before the error is reported. A transport
    /// failure drops the connection; the next request reconnects.
    async fn exchange(&self, slot: &mut Option<Connection>, request: &Request) -> Result<Response> {
        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => self.connect().await?,
        };

        debug!(id = %request.id, method = %request.method, target = %request.target, "sending request");
        self.emit(|| ClientEvent::RequestSent {
            id: request.id,
            method: request.method,
            target: request.target.clone(),
        });

        let result = match timeout(self.config.timeout, connection.round_trip(request)).await {
            Ok(result) => result,
            Err(_) => Err(MqError::Timeout(self.config.timeout.as_millis() as u64)),
        };

        match &result {
            Ok(response) => {
                debug!(id = %request.id, status = response.status, "received response");
                self.emit(|| ClientEvent::ResponseReceived {
                    id: request.id,
                    status: response.status,
                });
                *slot = Some(connection);
            }
            Err(err) if err.invalidates_connection() => {
                warn!(id = %request.id, error = %err, "round trip failed, closing connection");
                drop(connection);
                self.emit(|| ClientEvent::Disconnected {
                    reason: err.to_string(),
                });

                if matches!(err, MqError::Protocol(_)) {
                    match self.connect().await {
                        Ok(fresh) => *slot = Some(fresh),
                        Err(reconnect_err) => {
                            warn!(error = %reconnect_err, "reconnect after protocol error failed")
                        }
                    }
                }
            }
            Err(_) => *slot = Some(connection),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::connection::{BoxStream, ConnectFuture};
    use std::io;
    use tokio::io::BufReader;

    /// Answers every request with `200 OK` and an empty body.
    struct AckConnector;

    impl Connector for AckConnector {
        fn connect<'a>(&'a self, _host: &'a str, _port: u16) -> ConnectFuture<'a> {
            Box::pin(async move {
                let (client, server) = tokio::io::duplex(4096);
                tokio::spawn(async move {
                    let mut server = BufReader::new(server);
                    while let Ok(Some(_)) = codec::read_request(&mut server, 65536).await {
                        let ok = Response::new(200, "OK", "");
                        if codec::write_response(server.get_mut(), &ok).await.is_err() {
                            break;
                        }
                    }
                });
                Ok::<_, io::Error>(Box::new(client) as BoxStream)
            })
        }
    }

    struct RefusingConnector;

    impl Connector for RefusingConnector {
        fn connect<'a>(&'a self, _host: &'a str, _port: u16) -> ConnectFuture<'a> {
            Box::pin(async {
                Err::<BoxStream, _>(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            })
        }
    }

    fn config() -> Config {
        MqClient::builder()
            .name("alice")
            .max_retries(0)
            .timeout_ms(1000)
            .build()
    }

    #[test]
    fn test_client_creation() {
        let client = MqClient::new("alice", "test-host", 9999).unwrap();
        assert_eq!(client.name(), "alice");
        assert_eq!(client.config().address(), "test-host:9999");
        assert_eq!(client.state(), Lifecycle::Created);
        assert!(!client.is_shutdown());
    }

    #[test]
    fn test_invalid_client_name() {
        for name in ["", "a/b", "two words"] {
            let result = MqClient::new(name, "localhost", 1337);
            assert!(matches!(result, Err(MqError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_operations_before_start() {
        let client = MqClient::with_connector(config(), AckConnector).unwrap();

        assert!(matches!(client.retrieve().await, Err(MqError::NotStarted)));
        assert!(matches!(
            client.publish("news", "hi").await,
            Err(MqError::NotStarted)
        ));
        assert!(client.shared.outgoing.is_empty());
    }

    #[tokio::test]
    async fn test_publish_size_validation() {
        let client = MqClient::with_config(
            MqClient::builder()
                .name("alice")
                .max_message_size(16)
                .build(),
        )
        .unwrap();

        match client.publish("news", "x".repeat(17)).await {
            Err(MqError::MessageTooLarge { size }) => assert_eq!(size, 17),
            other => panic!("Expected MessageTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_lifecycle() {
        let client = MqClient::with_connector(config(), AckConnector).unwrap();

        client.start().await.unwrap();
        assert_eq!(client.state(), Lifecycle::Running);
        client.start().await.unwrap();

        client.subscribe("news").await.unwrap();

        client.stop().await.unwrap();
        assert_eq!(client.state(), Lifecycle::Stopped);
        assert!(client.is_shutdown());

        assert!(matches!(
            client.subscribe("news").await,
            Err(MqError::EngineStopped)
        ));
        assert!(matches!(client.start().await, Err(MqError::EngineStopped)));
        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let client = MqClient::with_connector(config(), AckConnector).unwrap();
        client.stop().await.unwrap();

        assert_eq!(client.state(), Lifecycle::Stopped);
        assert!(matches!(client.retrieve().await, Err(MqError::EngineStopped)));
    }

    #[tokio::test]
    async fn test_failed_start_leaves_client_idle() {
        let client = MqClient::with_connector(config(), RefusingConnector).unwrap();

        assert!(matches!(client.start().await, Err(MqError::Connection(_))));
        assert_eq!(client.state(), Lifecycle::Created);
    }

    #[tokio::test]
    async fn test_event_sink_sees_lifecycle() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |event: &ClientEvent| seen.lock().unwrap().push(event.clone())
        };
        let client = MqClient::with_connector(config(), AckConnector)
            .unwrap()
            .with_event_sink(sink);

        client.start().await.unwrap();
        client.publish("news", "hi").await.unwrap();
        client.stop().await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(matches!(seen[0], ClientEvent::Connected { .. }));
        assert!(matches!(seen[1], ClientEvent::Started { .. }));
        assert!(matches!(
            &seen[2],
            ClientEvent::RequestSent { target, .. } if target == "/topic/news"
        ));
        assert!(matches!(
            seen[3],
            ClientEvent::ResponseReceived { status: 200, .. }
        ));
        assert!(matches!(seen[4], ClientEvent::Stopped { .. }));
    }

    #[tokio::test]
    async fn test_drop_while_running_releases_sender() {
        let client = MqClient::with_connector(config(), AckConnector).unwrap();
        client.start().await.unwrap();

        let shared = Arc::clone(&client.shared);
        drop(client);

        // The sender drops its Arc once it has consumed the shutdown marker.
        for _ in 0..100 {
            if Arc::strong_count(&shared) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(Arc::strong_count(&shared), 1);
        assert_eq!(*shared.lifecycle(), Lifecycle::Stopping);
    }
}
