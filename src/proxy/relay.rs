//! Bidirectional frame relay between an inbound and an outbound WebSocket
//!
//! A relay moves through `Connecting → Relaying → Closed`. Connecting retries
//! a fixed number of times with a deadline on every attempt; once relaying,
//! each direction runs until its source ends or fails, and either one ending
//! tears the whole session down.

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::constants::{RELAY_CONNECT_ATTEMPTS, RELAY_CONNECT_TIMEOUT, RELAY_RETRY_INTERVAL};
use crate::error::RelayError;
use crate::proxy::route::Route;

/// One WebSocket message as seen by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Peer asked to close; never forwarded
    Close,
}

impl Frame {
    /// Re-frame the payload as binary or text.
    ///
    /// Binary payloads that are not valid UTF-8 stay binary in text mode.
    pub fn into_mode(self, binary: bool) -> Frame {
        match (self, binary) {
            (Frame::Text(text), true) => Frame::Binary(text.into_bytes()),
            (Frame::Binary(bytes), false) => match String::from_utf8(bytes) {
                Ok(text) => Frame::Text(text),
                Err(e) => Frame::Binary(e.into_bytes()),
            },
            (frame, _) => frame,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
            Frame::Close => Message::Close(None),
        }
    }
}

/// Map a tungstenite message to a frame; control frames are dropped
fn frame_from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(bytes) => Some(Frame::Binary(bytes)),
        Message::Close(_) => Some(Frame::Close),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = RelayError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, RelayError>> + Send>>;

/// Both halves of an outbound connection
pub type Connection = (FrameSink, FrameStream);

/// Opens the outbound side of a relay
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        route: &Route,
    ) -> impl Future<Output = Result<Connection, RelayError>> + Send;
}

/// Connects to backends over plain WebSocket
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(
        &self,
        route: &Route,
    ) -> impl Future<Output = Result<Connection, RelayError>> + Send {
        let url = route.url();
        async move {
            let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| RelayError::ConnectionFailed(format!("{url}: {e}")))?;

            let (sink, stream) = ws.split();
            let sink = sink
                .with(|frame: Frame| future::ready(Ok::<Message, WsError>(frame.into())))
                .sink_map_err(RelayError::outbound);
            let stream = stream.filter_map(|message| {
                future::ready(match message {
                    Ok(message) => frame_from_message(message).map(Ok),
                    Err(e) => Some(Err(RelayError::outbound(e))),
                })
            });

            Ok((Box::pin(sink) as FrameSink, Box::pin(stream) as FrameStream))
        }
    }
}

/// Outbound connect retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one
    pub interval: Duration,
    /// Deadline of a single attempt; an attempt that runs over counts as failed
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RELAY_CONNECT_ATTEMPTS,
            interval: RELAY_RETRY_INTERVAL,
            connect_timeout: RELAY_CONNECT_TIMEOUT,
        }
    }
}

/// Relay lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Relaying,
    Closed,
}

/// Writing end of one side of a relay; closes at most once
pub struct RelayEnd {
    name: &'static str,
    sink: FrameSink,
    closed: bool,
}

impl RelayEnd {
    pub fn new(name: &'static str, sink: FrameSink) -> Self {
        Self {
            name,
            sink,
            closed: false,
        }
    }

    pub async fn send(&mut self, frame: Frame) -> Result<(), RelayError> {
        self.sink.send(frame).await
    }

    /// Close this side. Closing again is a no-op.
    pub async fn close(&mut self) -> Result<(), RelayError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close_logged(&mut self) {
        if let Err(e) = self.close().await {
            tracing::debug!("Closing {} side: {}", self.name, e);
        }
    }
}

/// What happened during one relay session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    /// Outbound connection attempts made
    pub attempts: u32,
    pub connected: bool,
    /// Frames forwarded backend → client
    pub downstream_frames: u64,
    /// Frames forwarded client → backend
    pub upstream_frames: u64,
    pub state: RelayState,
}

/// Relays one inbound connection to its resolved backend
pub struct StreamRelay {
    route: Route,
    policy: RetryPolicy,
    state: RelayState,
}

impl StreamRelay {
    pub fn new(route: Route, policy: RetryPolicy) -> Self {
        Self {
            route,
            policy,
            state: RelayState::Connecting,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Run the session to completion. Both sides are closed on return.
    ///
    /// Frames the client sends while the backend is still being dialed are
    /// held back and forwarded once connected. If the client goes away
    /// first, dialing stops.
    pub async fn run<C: Connector>(
        mut self,
        connector: &C,
        inbound_sink: FrameSink,
        mut inbound_stream: FrameStream,
    ) -> RelaySummary {
        let mut inbound = RelayEnd::new("inbound", inbound_sink);
        let url = self.route.url();
        let mut attempts = 0;
        let mut early = Vec::new();

        let outcome = {
            let connect = retry_connect(connector, &self.route, &self.policy, &mut attempts);
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    biased;
                    result = &mut connect => break Some(result),
                    item = inbound_stream.next() => match item {
                        Some(Ok(Frame::Close)) | None => break None,
                        Some(Err(e)) => {
                            tracing::debug!("Client failed while connecting to {}: {}", url, e);
                            break None;
                        }
                        Some(Ok(frame)) => early.push(frame),
                    },
                }
            }
        };

        let (outbound_sink, outbound_stream) = match outcome {
            Some(Ok(connection)) => connection,
            Some(Err(e)) => {
                tracing::warn!("{}", e);
                return self.abandon(&mut inbound, attempts).await;
            }
            None => {
                tracing::debug!("Client left before {} was reached", url);
                return self.abandon(&mut inbound, attempts).await;
            }
        };

        tracing::info!("{} connected", url);
        self.state = RelayState::Relaying;

        let mut outbound = RelayEnd::new("outbound", outbound_sink);
        let binary = self.route.binary_mode;
        let mut downstream_frames = 0;
        let mut upstream_frames = 0;

        let mut flushed = Ok(());
        for frame in early {
            flushed = outbound.send(frame.into_mode(binary)).await;
            if flushed.is_err() {
                break;
            }
            upstream_frames += 1;
        }

        if let Err(e) = flushed {
            tracing::warn!("Upstream relay to {} failed: {}", url, e);
        } else {
            tokio::select! {
                result = pump(outbound_stream, &mut inbound, binary, &mut downstream_frames) => {
                    match result {
                        Ok(()) => tracing::debug!("{} closed the connection", url),
                        Err(e) => tracing::warn!("Downstream relay from {} failed: {}", url, e),
                    }
                }
                result = pump(inbound_stream, &mut outbound, binary, &mut upstream_frames) => {
                    match result {
                        Ok(()) => tracing::debug!("Client closed connection to {}", url),
                        Err(e) => tracing::warn!("Upstream relay to {} failed: {}", url, e),
                    }
                }
            }
        }

        outbound.close_logged().await;
        inbound.close_logged().await;
        self.state = RelayState::Closed;
        tracing::debug!("Closing connection {}", url);

        RelaySummary {
            attempts,
            connected: true,
            downstream_frames,
            upstream_frames,
            state: self.state,
        }
    }

    /// End a session that never reached the backend
    async fn abandon(mut self, inbound: &mut RelayEnd, attempts: u32) -> RelaySummary {
        self.state = RelayState::Closed;
        inbound.close_logged().await;
        RelaySummary {
            attempts,
            connected: false,
            downstream_frames: 0,
            upstream_frames: 0,
            state: self.state,
        }
    }
}

/// Try to connect up to `policy.max_attempts` times, `policy.interval` apart
///
/// Each attempt is bounded by `policy.connect_timeout`. Returns the attempt
/// number that succeeded along with the connection.
pub async fn connect_with_retry<C: Connector>(
    connector: &C,
    route: &Route,
    policy: &RetryPolicy,
) -> Result<(u32, Connection), RelayError> {
    let mut attempts = 0;
    let connection = retry_connect(connector, route, policy, &mut attempts).await?;
    Ok((attempts, connection))
}

/// Retry loop behind [`connect_with_retry`]; `attempts` counts as it goes
async fn retry_connect<C: Connector>(
    connector: &C,
    route: &Route,
    policy: &RetryPolicy,
    attempts: &mut u32,
) -> Result<Connection, RelayError> {
    let max_attempts = policy.max_attempts.max(1);
    let url = route.url();

    for attempt in 1..=max_attempts {
        *attempts = attempt;
        let result = tokio::time::timeout(policy.connect_timeout, connector.connect(route))
            .await
            .unwrap_or_else(|_| Err(RelayError::ConnectTimeout(policy.connect_timeout)));

        match result {
            Ok(connection) => return Ok(connection),
            Err(e) if attempt < max_attempts => {
                tracing::info!(
                    "{} not ready ({}), trying again in {:?} ...",
                    url,
                    e,
                    policy.interval
                );
                tokio::time::sleep(policy.interval).await;
            }
            Err(e) => {
                tracing::info!("max number of connection attempts reached for {}: {}", url, e);
            }
        }
    }

    Err(RelayError::ConnectExhausted {
        url,
        attempts: max_attempts,
    })
}

/// Forward frames from `source` to `dest` until the source ends
async fn pump(
    mut source: FrameStream,
    dest: &mut RelayEnd,
    binary: bool,
    forwarded: &mut u64,
) -> Result<(), RelayError> {
    while let Some(frame) = source.next().await {
        match frame? {
            Frame::Close => break,
            frame => {
                dest.send(frame.into_mode(binary)).await?;
                *forwarded += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::time::Instant;

    /// Sink that records frames and close calls
    #[derive(Clone, Default)]
    struct Recorder {
        frames: Arc<Mutex<Vec<Frame>>>,
        closes: Arc<AtomicUsize>,
    }

    impl Sink<Frame> for Recorder {
        type Error = RelayError;

        fn poll_ready(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
            self.frames.lock().push(item);
            Ok(())
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    impl Recorder {
        fn sink(&self) -> FrameSink {
            Box::pin(self.clone())
        }

        fn frames(&self) -> Vec<Frame> {
            self.frames.lock().clone()
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    fn frames(items: Vec<Result<Frame, RelayError>>) -> FrameStream {
        Box::pin(stream::iter(items))
    }

    fn never() -> FrameStream {
        Box::pin(stream::pending())
    }

    /// Fails a set number of times, then hands out the prepared backend
    struct MockConnector {
        failures: u32,
        /// Accept but never finish the handshake
        hang: bool,
        attempts: AtomicU32,
        attempt_times: Mutex<Vec<Instant>>,
        backend: Mutex<Option<Connection>>,
    }

    impl MockConnector {
        fn unreachable() -> Self {
            Self::new(u32::MAX, None)
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::unreachable()
            }
        }

        fn new(failures: u32, backend: Option<Connection>) -> Self {
            Self {
                failures,
                hang: false,
                attempts: AtomicU32::new(0),
                attempt_times: Mutex::new(Vec::new()),
                backend: Mutex::new(backend),
            }
        }
    }

    impl Connector for MockConnector {
        fn connect(
            &self,
            _route: &Route,
        ) -> impl Future<Output = Result<Connection, RelayError>> + Send {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.attempt_times.lock().push(Instant::now());

            if self.hang {
                return future::Either::Left(future::pending());
            }

            let result = if attempt > self.failures {
                self.backend
                    .lock()
                    .take()
                    .ok_or_else(|| RelayError::ConnectionFailed("backend already taken".into()))
            } else {
                Err(RelayError::ConnectionFailed("connection refused".into()))
            };
            future::Either::Right(future::ready(result))
        }
    }

    fn route(binary_mode: bool) -> Route {
        Route {
            backend_host: "127.0.0.1".into(),
            backend_port: 6680,
            path: "/mopidy/ws".into(),
            binary_mode,
        }
    }

    #[test]
    fn test_into_mode() {
        assert_eq!(Frame::Text("a".into()).into_mode(true), Frame::Binary(b"a".to_vec()));
        assert_eq!(Frame::Binary(b"a".to_vec()).into_mode(false), Frame::Text("a".into()));
        assert_eq!(Frame::Binary(vec![0xff]).into_mode(false), Frame::Binary(vec![0xff]));
        assert_eq!(Frame::Text("a".into()).into_mode(false), Frame::Text("a".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_backend_gives_up_after_five_attempts() {
        let connector = MockConnector::unreachable();
        let inbound = Recorder::default();

        let summary = StreamRelay::new(route(false), RetryPolicy::default())
            .run(&connector, inbound.sink(), never())
            .await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 5);
        assert_eq!(summary.attempts, 5);
        assert!(!summary.connected);
        assert_eq!(summary.state, RelayState::Closed);

        let times = connector.attempt_times.lock().clone();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(3));
        }

        assert!(inbound.frames().is_empty());
        assert_eq!(inbound.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_handshake_counts_as_failed_attempt() {
        let connector = MockConnector::hanging();
        let inbound = Recorder::default();
        let started = Instant::now();

        let summary = StreamRelay::new(route(false), RetryPolicy::default())
            .run(&connector, inbound.sink(), never())
            .await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 5);
        assert_eq!(summary.attempts, 5);
        assert!(!summary.connected);
        assert_eq!(summary.state, RelayState::Closed);
        // five 20 s deadlines with four 3 s pauses between them
        assert!(started.elapsed() >= Duration::from_secs(5 * 20 + 4 * 3));
        assert_eq!(inbound.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_reports_timeouts() {
        let connector = MockConnector::hanging();
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };

        let result = connect_with_retry(&connector, &route(false), &policy).await;
        assert!(matches!(result, Err(RelayError::ConnectExhausted { attempts: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_leaving_stops_dialing() {
        let connector = MockConnector::unreachable();
        let inbound = Recorder::default();

        let summary = StreamRelay::new(route(false), RetryPolicy::default())
            .run(&connector, inbound.sink(), frames(vec![]))
            .await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(summary.attempts, 1);
        assert!(!summary.connected);
        assert_eq!(inbound.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_sent_while_connecting_are_forwarded() {
        let backend = Recorder::default();
        let connector = MockConnector::new(1, Some((backend.sink(), never())));
        let inbound = Recorder::default();
        let client: FrameStream = Box::pin(
            stream::iter(vec![Ok::<_, RelayError>(Frame::Text("early".into()))]).chain(
                stream::once(async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(Frame::Close)
                }),
            ),
        );

        let summary = StreamRelay::new(route(false), RetryPolicy::default())
            .run(&connector, inbound.sink(), client)
            .await;

        assert_eq!(summary.attempts, 2);
        assert!(summary.connected);
        assert_eq!(summary.upstream_frames, 1);
        assert_eq!(backend.frames(), vec![Frame::Text("early".into())]);
        assert_eq!(backend.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_after_retries() {
        let backend = Recorder::default();
        let connector = MockConnector::new(2, Some((backend.sink(), frames(vec![]))));
        let inbound = Recorder::default();

        let summary = StreamRelay::new(route(false), RetryPolicy::default())
            .run(&connector, inbound.sink(), never())
            .await;

        assert_eq!(summary.attempts, 3);
        assert!(summary.connected);
    }

    #[tokio::test]
    async fn test_backend_end_of_stream_tears_down_both_sides_once() {
        let backend = Recorder::default();
        let backend_frames = frames(vec![
            Ok(Frame::Text("{\"event\":\"playback_state_changed\"}".into())),
            Ok(Frame::Binary(b"ok".to_vec())),
        ]);
        let connector = MockConnector::new(0, Some((backend.sink(), backend_frames)));
        let inbound = Recorder::default();

        let summary = StreamRelay::new(route(false), RetryPolicy::default())
            .run(&connector, inbound.sink(), never())
            .await;

        assert_eq!(summary.downstream_frames, 2);
        assert_eq!(summary.state, RelayState::Closed);
        assert_eq!(
            inbound.frames(),
            vec![
                Frame::Text("{\"event\":\"playback_state_changed\"}".into()),
                Frame::Text("ok".into()),
            ]
        );
        assert_eq!(inbound.closes(), 1);
        assert_eq!(backend.closes(), 1);
    }

    #[tokio::test]
    async fn test_binary_mode_reframes_downstream() {
        let backend = Recorder::default();
        let backend_frames = frames(vec![Ok(Frame::Text("pcm".into()))]);
        let connector = MockConnector::new(0, Some((backend.sink(), backend_frames)));
        let inbound = Recorder::default();

        StreamRelay::new(route(true), RetryPolicy::default())
            .run(&connector, inbound.sink(), never())
            .await;

        assert_eq!(inbound.frames(), vec![Frame::Binary(b"pcm".to_vec())]);
    }

    #[tokio::test]
    async fn test_upstream_forwarding_until_client_closes() {
        let backend = Recorder::default();
        let connector = MockConnector::new(0, Some((backend.sink(), never())));
        let inbound = Recorder::default();
        let client = frames(vec![
            Ok(Frame::Text("{\"method\":\"core.playback.play\"}".into())),
            Ok(Frame::Close),
            Ok(Frame::Text("never sent".into())),
        ]);

        let summary = StreamRelay::new(route(false), RetryPolicy::default())
            .run(&connector, inbound.sink(), client)
            .await;

        assert_eq!(summary.upstream_frames, 1);
        assert_eq!(
            backend.frames(),
            vec![Frame::Text("{\"method\":\"core.playback.play\"}".into())]
        );
        assert_eq!(backend.closes(), 1);
        assert_eq!(inbound.closes(), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_tears_down() {
        let backend = Recorder::default();
        let connector = MockConnector::new(0, Some((backend.sink(), never())));
        let inbound = Recorder::default();
        let client = frames(vec![Err(RelayError::Inbound("reset by peer".into()))]);

        let summary = StreamRelay::new(route(false), RetryPolicy::default())
            .run(&connector, inbound.sink(), client)
            .await;

        assert_eq!(summary.state, RelayState::Closed);
        assert_eq!(backend.closes(), 1);
        assert_eq!(inbound.closes(), 1);
    }

    #[tokio::test]
    async fn test_relay_end_close_is_idempotent() {
        let recorder = Recorder::default();
        let mut end = RelayEnd::new("inbound", recorder.sink());

        end.close().await.unwrap();
        end.close().await.unwrap();

        assert!(end.is_closed());
        assert_eq!(recorder.closes(), 1);
    }
}
