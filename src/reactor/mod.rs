//! Single-threaded event loop driving every endpoint.
//!
//! The loop owns the timer queue, the socket set and the relay bus. Each
//! iteration waits for the next I/O event, the next timer deadline or the
//! shutdown signal, then runs exactly one endpoint hook at a time.

pub mod socket;
pub mod timer;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn, Span};

use crate::bridge::{EndpointKind, RelayBus, RelayCallback, RelayMessage};
use crate::common::error::ConnectionResult;

pub use socket::{OpenedSocket, Readable, SocketSet, SocketToken};
pub use timer::{TimerHandle, TimerScheduler, DEFAULT_PRIORITY};

/// Index of an endpoint inside the reactor.
pub type EndpointId = usize;

/// How long shutdown waits for queued writes to drain.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Timers an endpoint can arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Reconnect,
    Keepalive,
    CapEnd,
    Perform,
    NickRecovery,
    LoginTimeout,
    ExpireCalls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub owner: EndpointId,
    pub kind: TimerKind,
}

/// Everything that wakes the loop apart from timers and shutdown.
#[derive(Debug)]
pub enum ReactorEvent {
    Opened {
        owner: EndpointId,
        token: SocketToken,
        result: ConnectionResult<OpenedSocket>,
    },
    Readable {
        owner: EndpointId,
        token: SocketToken,
        data: Readable,
    },
    Error {
        owner: EndpointId,
        token: SocketToken,
        error: io::Error,
    },
    Relay {
        owner: EndpointId,
        message: RelayMessage,
    },
}

/// A protocol client driven by the reactor.
///
/// Hooks run on the loop and must not block. An `Err` from any hook is
/// fatal for the whole process.
pub trait Endpoint {
    fn kind(&self) -> EndpointKind;

    fn name(&self) -> &str;

    /// Entered around every hook invocation.
    fn span(&self) -> &Span;

    fn start(&mut self, cx: &mut Context<'_>) -> Result<()>;

    /// A connect or bind requested through the context completed.
    fn on_open(
        &mut self,
        cx: &mut Context<'_>,
        token: SocketToken,
        result: ConnectionResult<SocketAddr>,
    ) -> Result<()>;

    fn on_readable(&mut self, cx: &mut Context<'_>, token: SocketToken, data: Readable) -> Result<()>;

    fn on_error(&mut self, cx: &mut Context<'_>, token: SocketToken, error: io::Error) -> Result<()>;

    fn on_timer(&mut self, cx: &mut Context<'_>, kind: TimerKind) -> Result<()>;

    /// A relay message addressed to this endpoint passed the bus.
    fn on_relay(&mut self, cx: &mut Context<'_>, message: RelayMessage) -> Result<()>;

    fn on_disconnect(&mut self, cx: &mut Context<'_>, reason: &str) -> Result<()>;
}

/// What a hook can reach while it runs.
pub struct Context<'a> {
    owner: EndpointId,
    timers: &'a mut TimerScheduler<TimerEvent>,
    sockets: &'a mut SocketSet,
    bus: &'a mut RelayBus,
    events: &'a UnboundedSender<ReactorEvent>,
}

impl<'a> Context<'a> {
    pub fn new(
        owner: EndpointId,
        timers: &'a mut TimerScheduler<TimerEvent>,
        sockets: &'a mut SocketSet,
        bus: &'a mut RelayBus,
        events: &'a UnboundedSender<ReactorEvent>,
    ) -> Self {
        Self {
            owner,
            timers,
            sockets,
            bus,
            events,
        }
    }

    pub fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        self.schedule_with_priority(delay, DEFAULT_PRIORITY, kind)
    }

    pub fn schedule_with_priority(
        &mut self,
        delay: Duration,
        priority: i32,
        kind: TimerKind,
    ) -> TimerHandle {
        let owner = self.owner;
        self.timers
            .schedule(delay, priority, TimerEvent { owner, kind })
    }

    /// Cancel and clear a stored handle. Empty slots are ignored.
    pub fn cancel_timer(&mut self, slot: &mut Option<TimerHandle>) {
        if let Some(handle) = slot.take() {
            self.timers.cancel(handle);
        }
    }

    pub fn open_tcp(&mut self, host: &str, port: u16) -> SocketToken {
        self.sockets.open_tcp(self.owner, host, port)
    }

    pub fn bind_udp(&mut self, host: &str, port: u16) -> SocketToken {
        self.sockets.bind_udp(self.owner, host, port)
    }

    pub fn send(&mut self, token: SocketToken, data: Bytes) -> ConnectionResult<()> {
        self.sockets.send(token, data)
    }

    pub fn close(&mut self, token: SocketToken) -> bool {
        self.sockets.close(token)
    }

    pub fn bus(&self) -> &RelayBus {
        self.bus
    }

    /// Bind this endpoint on the relay bus. Deliveries come back through
    /// `Endpoint::on_relay`. Returns `None` if the identity is already bound.
    pub fn bind_relay(&mut self, kind: EndpointKind, name: &str) -> Option<RelayCallback> {
        let owner = self.owner;
        let events = self.events.clone();
        let callback: RelayCallback = Arc::new(move |message: &RelayMessage| {
            let event = ReactorEvent::Relay {
                owner,
                message: message.clone(),
            };
            if events.send(event).is_err() {
                debug!(owner, "Relay delivery after reactor shutdown");
            }
        });
        self.bus
            .bind(kind, name, callback.clone())
            .then_some(callback)
    }

    pub fn unbind_relay(&mut self, kind: EndpointKind, name: &str, callback: &RelayCallback) -> bool {
        self.bus.unbind(kind, name, callback)
    }
}

enum Step {
    Shutdown,
    Event(ReactorEvent),
    Timers,
}

/// The event loop.
pub struct Reactor {
    endpoints: Vec<Box<dyn Endpoint>>,
    timers: TimerScheduler<TimerEvent>,
    sockets: SocketSet,
    bus: RelayBus,
    events_tx: UnboundedSender<ReactorEvent>,
    events_rx: UnboundedReceiver<ReactorEvent>,
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            endpoints: Vec::new(),
            timers: TimerScheduler::new(),
            sockets: SocketSet::new(events_tx.clone()),
            bus: RelayBus::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn add_endpoint(&mut self, endpoint: Box<dyn Endpoint>) -> EndpointId {
        self.endpoints.push(endpoint);
        self.endpoints.len() - 1
    }

    /// Run until `shutdown` resolves or a hook fails.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        for id in 0..self.endpoints.len() {
            let started = self.dispatch(id, |endpoint, cx| {
                debug!(kind = %endpoint.kind(), name = endpoint.name(), "Starting endpoint");
                endpoint.start(cx)
            });
            if let Err(e) = started {
                return self.fail(e).await;
            }
        }
        info!(endpoints = self.endpoints.len(), "Reactor started");

        loop {
            let deadline = self.timers.next_deadline();
            let step = tokio::select! {
                biased;
                _ = &mut shutdown => Step::Shutdown,
                Some(event) = self.events_rx.recv() => Step::Event(event),
                _ = wait_until(deadline) => Step::Timers,
            };

            let outcome = match step {
                Step::Shutdown => {
                    info!(sockets = self.sockets.len(), "Shutting down...");
                    self.disconnect_all("Shutting down");
                    self.flush().await;
                    return Ok(());
                }
                // A busy queue keeps `recv` ready, so the timer arm alone would starve.
                Step::Event(event) => self
                    .handle_event(event)
                    .and_then(|()| self.run_overdue_timers()),
                Step::Timers => self.run_timers(),
            };

            if let Err(e) = outcome {
                return self.fail(e).await;
            }
        }
    }

    fn handle_event(&mut self, event: ReactorEvent) -> Result<()> {
        match event {
            ReactorEvent::Opened {
                owner,
                token,
                result,
            } => {
                if !self.sockets.is_pending(token) {
                    debug!(%token, "Dropping completion for cancelled socket");
                    return Ok(());
                }
                let result = match result {
                    Ok(opened) => self.sockets.register(token, opened),
                    Err(e) => {
                        self.sockets.forget_pending(token);
                        Err(e)
                    }
                };
                self.dispatch(owner, |endpoint, cx| endpoint.on_open(cx, token, result))
            }
            ReactorEvent::Readable { owner, token, data } => {
                if !self.sockets.is_registered(token) {
                    return Ok(());
                }
                self.dispatch(owner, |endpoint, cx| endpoint.on_readable(cx, token, data))
            }
            ReactorEvent::Error {
                owner,
                token,
                error,
            } => {
                if !self.sockets.is_registered(token) {
                    return Ok(());
                }
                self.dispatch(owner, |endpoint, cx| endpoint.on_error(cx, token, error))
            }
            ReactorEvent::Relay { owner, message } => {
                self.dispatch(owner, |endpoint, cx| endpoint.on_relay(cx, message))
            }
        }
    }

    fn run_timers(&mut self) -> Result<()> {
        let pass = self.timers.begin_pass(Instant::now());
        while let Some((_, TimerEvent { owner, kind })) = self.timers.pop_due(&pass) {
            self.dispatch(owner, |endpoint, cx| endpoint.on_timer(cx, kind))?;
        }
        Ok(())
    }

    fn run_overdue_timers(&mut self) -> Result<()> {
        match self.timers.next_deadline() {
            Some(deadline) if deadline <= Instant::now() => self.run_timers(),
            _ => Ok(()),
        }
    }

    fn dispatch<F>(&mut self, id: EndpointId, hook: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Endpoint, &mut Context<'_>) -> Result<()>,
    {
        let Some(endpoint) = self.endpoints.get_mut(id) else {
            warn!(id, "Event for unknown endpoint");
            return Ok(());
        };
        let span = endpoint.span().clone();
        let _entered = span.enter();
        let mut cx = Context::new(
            id,
            &mut self.timers,
            &mut self.sockets,
            &mut self.bus,
            &self.events_tx,
        );
        hook(endpoint.as_mut(), &mut cx)
    }

    fn disconnect_all(&mut self, reason: &str) {
        for id in 0..self.endpoints.len() {
            let result = self.dispatch(id, |endpoint, cx| {
                endpoint.on_disconnect(cx, reason).map_err(|e| {
                    e.context(format!("{} client '{}'", endpoint.kind(), endpoint.name()))
                })
            });
            if let Err(e) = result {
                warn!(id, "Disconnect failed: {:#}", e);
            }
        }
    }

    async fn flush(&mut self) {
        let writers = self.sockets.shutdown();
        if writers.is_empty() {
            return;
        }
        debug!(writers = writers.len(), "Waiting for socket writes to flush");
        if tokio::time::timeout(FLUSH_TIMEOUT, join_all(writers))
            .await
            .is_err()
        {
            warn!("Socket flush timed out after {}s", FLUSH_TIMEOUT.as_secs());
        }
    }

    async fn fail(&mut self, e: anyhow::Error) -> Result<()> {
        error!("Fatal error: {:#}", e);
        self.disconnect_all("Fatal error");
        self.flush().await;
        Err(e)
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Detached context for driving endpoints by hand in tests.
#[cfg(test)]
pub mod testing {
    use super::socket::SocketKind;
    use super::*;

    pub struct Harness {
        pub timers: TimerScheduler<TimerEvent>,
        pub sockets: SocketSet,
        pub bus: RelayBus,
        events_tx: UnboundedSender<ReactorEvent>,
        events_rx: UnboundedReceiver<ReactorEvent>,
    }

    impl Default for Harness {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Harness {
        pub fn new() -> Self {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            Self {
                timers: TimerScheduler::new(),
                sockets: SocketSet::detached(events_tx.clone()),
                bus: RelayBus::new(),
                events_tx,
                events_rx,
            }
        }

        pub fn cx(&mut self) -> Context<'_> {
            self.cx_for(0)
        }

        pub fn cx_for(&mut self, owner: EndpointId) -> Context<'_> {
            Context::new(
                owner,
                &mut self.timers,
                &mut self.sockets,
                &mut self.bus,
                &self.events_tx,
            )
        }

        /// Complete the owner's latest pending TCP open. Returns its token and
        /// the queue of bytes written to it.
        pub fn accept_tcp(&mut self, owner: EndpointId) -> (SocketToken, UnboundedReceiver<Bytes>) {
            let token = self
                .sockets
                .pending_token(owner, SocketKind::Tcp)
                .expect("no pending tcp socket");
            let written = self.sockets.attach_detached(token).expect("attach failed");
            (token, written)
        }

        pub fn accept_udp(&mut self, owner: EndpointId) -> SocketToken {
            let token = self
                .sockets
                .pending_token(owner, SocketKind::Udp)
                .expect("no pending udp socket");
            self.sockets.attach_detached(token).expect("attach failed");
            token
        }

        /// Pop every timer for `owner` due within `after` from now.
        pub fn due_timers(&mut self, owner: EndpointId, after: Duration) -> Vec<TimerKind> {
            let pass = self.timers.begin_pass(Instant::now() + after);
            let mut due = Vec::new();
            let mut others = Vec::new();
            while let Some((_, event)) = self.timers.pop_due(&pass) {
                if event.owner == owner {
                    due.push(event.kind);
                } else {
                    others.push(event);
                }
            }
            for event in others {
                self.timers.schedule_at(Instant::now() + after, DEFAULT_PRIORITY, event);
            }
            due
        }

        /// Fire `owner`'s timers due within `after` into `endpoint`.
        pub fn fire_timers(
            &mut self,
            endpoint: &mut dyn Endpoint,
            owner: EndpointId,
            after: Duration,
        ) -> Vec<TimerKind> {
            let due = self.due_timers(owner, after);
            for kind in &due {
                endpoint
                    .on_timer(&mut self.cx_for(owner), *kind)
                    .expect("timer hook failed");
            }
            due
        }

        /// Drain relay deliveries queued by bus callbacks.
        pub fn relayed(&mut self) -> Vec<(EndpointId, RelayMessage)> {
            let mut delivered = Vec::new();
            while let Ok(event) = self.events_rx.try_recv() {
                if let ReactorEvent::Relay { owner, message } = event {
                    delivered.push((owner, message));
                }
            }
            delivered
        }
    }

    /// Everything written so far, decoded as text.
    pub fn drain_text(written: &mut UnboundedReceiver<Bytes>) -> String {
        let mut text = String::new();
        while let Ok(chunk) = written.try_recv() {
            text.push_str(&String::from_utf8_lossy(&chunk));
        }
        text
    }

    pub fn drain_bytes(written: &mut UnboundedReceiver<Bytes>) -> Vec<u8> {
        let mut bytes = Vec::new();
        while let Ok(chunk) = written.try_recv() {
            bytes.extend_from_slice(&chunk);
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl Log {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct TestEndpoint {
        span: Span,
        log: Arc<Log>,
        target: Option<u16>,
        fail_on_start: bool,
        done: Option<oneshot::Sender<()>>,
        token: Option<SocketToken>,
    }

    impl TestEndpoint {
        fn new(log: Arc<Log>, done: oneshot::Sender<()>) -> Self {
            Self {
                span: Span::none(),
                log,
                target: None,
                fail_on_start: false,
                done: Some(done),
                token: None,
            }
        }

        fn finish(&mut self) {
            if let Some(done) = self.done.take() {
                done.send(()).ok();
            }
        }
    }

    impl Endpoint for TestEndpoint {
        fn kind(&self) -> EndpointKind {
            EndpointKind::Irc
        }

        fn name(&self) -> &str {
            "test"
        }

        fn span(&self) -> &Span {
            &self.span
        }

        fn start(&mut self, cx: &mut Context<'_>) -> Result<()> {
            if self.fail_on_start {
                anyhow::bail!("broken endpoint");
            }
            match self.target {
                Some(port) => {
                    self.token = Some(cx.open_tcp("127.0.0.1", port));
                }
                None => {
                    cx.schedule(Duration::from_millis(20), TimerKind::Keepalive);
                    cx.schedule_with_priority(Duration::from_millis(5), 1, TimerKind::Perform);
                    let mut cancelled = Some(cx.schedule(Duration::from_millis(1), TimerKind::CapEnd));
                    cx.cancel_timer(&mut cancelled);
                    cx.cancel_timer(&mut cancelled);
                }
            }
            Ok(())
        }

        fn on_open(
            &mut self,
            cx: &mut Context<'_>,
            token: SocketToken,
            result: ConnectionResult<SocketAddr>,
        ) -> Result<()> {
            result?;
            self.log.push("open");
            cx.send(token, Bytes::from_static(b"ping\n"))?;
            Ok(())
        }

        fn on_readable(&mut self, _cx: &mut Context<'_>, _token: SocketToken, data: Readable) -> Result<()> {
            if let Readable::Stream(bytes) = data {
                self.log.push(String::from_utf8_lossy(&bytes).to_string());
                self.finish();
            }
            Ok(())
        }

        fn on_error(&mut self, _cx: &mut Context<'_>, _token: SocketToken, error: io::Error) -> Result<()> {
            Err(error.into())
        }

        fn on_timer(&mut self, _cx: &mut Context<'_>, kind: TimerKind) -> Result<()> {
            self.log.push(format!("{:?}", kind));
            if kind == TimerKind::Keepalive {
                self.finish();
            }
            Ok(())
        }

        fn on_relay(&mut self, _cx: &mut Context<'_>, _message: RelayMessage) -> Result<()> {
            Ok(())
        }

        fn on_disconnect(&mut self, cx: &mut Context<'_>, reason: &str) -> Result<()> {
            if let Some(token) = self.token.take() {
                cx.close(token);
            }
            self.log.push(format!("disconnect: {}", reason));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_timers_fire_then_shutdown() {
        let log = Arc::new(Log::default());
        let (done_tx, done_rx) = oneshot::channel();

        let mut reactor = Reactor::new();
        reactor.add_endpoint(Box::new(TestEndpoint::new(log.clone(), done_tx)));
        reactor
            .run(async {
                done_rx.await.ok();
            })
            .await
            .unwrap();

        assert_eq!(
            log.entries(),
            vec!["Perform", "Keepalive", "disconnect: Shutting down"]
        );
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping\n");
            stream.write_all(b"pong\n").await.unwrap();
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).await.unwrap();
        });

        let log = Arc::new(Log::default());
        let (done_tx, done_rx) = oneshot::channel();
        let mut endpoint = TestEndpoint::new(log.clone(), done_tx);
        endpoint.target = Some(port);

        let mut reactor = Reactor::new();
        reactor.add_endpoint(Box::new(endpoint));
        reactor
            .run(async {
                done_rx.await.ok();
            })
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(log.entries(), vec!["open", "pong\n", "disconnect: Shutting down"]);
    }

    #[tokio::test]
    async fn test_fatal_hook_error_sweeps_and_fails() {
        let log = Arc::new(Log::default());
        let (done_tx, _done_rx) = oneshot::channel();
        let (other_tx, _other_rx) = oneshot::channel();

        let mut broken = TestEndpoint::new(log.clone(), done_tx);
        broken.fail_on_start = true;

        let mut reactor = Reactor::new();
        reactor.add_endpoint(Box::new(TestEndpoint::new(log.clone(), other_tx)));
        reactor.add_endpoint(Box::new(broken));
        let result = reactor.run(std::future::pending()).await;

        assert!(result.is_err());
        let entries = log.entries();
        assert_eq!(
            entries
                .iter()
                .filter(|entry| *entry == "disconnect: Fatal error")
                .count(),
            2
        );
    }

    /// Keeps exactly one relay event queued to itself at all times.
    struct Echo {
        span: Span,
        relays: Arc<AtomicUsize>,
        timers: Arc<AtomicUsize>,
    }

    impl Echo {
        fn new() -> Self {
            Self {
                span: Span::none(),
                relays: Arc::new(AtomicUsize::new(0)),
                timers: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn publish(cx: &mut Context<'_>) {
            use crate::bridge::{RelayExtra, RelaySource, RelayTarget};

            let target = RelayTarget::new(EndpointKind::Minecraft, "echo", "rcon");
            let source = RelaySource::new(EndpointKind::Minecraft, "echo", "udp");
            cx.bus()
                .call(Some("again".to_string()), &target, source, RelayExtra::None);
        }
    }

    impl Endpoint for Echo {
        fn kind(&self) -> EndpointKind {
            EndpointKind::Minecraft
        }

        fn name(&self) -> &str {
            "echo"
        }

        fn span(&self) -> &Span {
            &self.span
        }

        fn start(&mut self, cx: &mut Context<'_>) -> Result<()> {
            cx.bind_relay(EndpointKind::Minecraft, "echo");
            cx.schedule(Duration::from_millis(1), TimerKind::Keepalive);
            Self::publish(cx);
            Ok(())
        }

        fn on_open(
            &mut self,
            _cx: &mut Context<'_>,
            _token: SocketToken,
            _result: ConnectionResult<SocketAddr>,
        ) -> Result<()> {
            Ok(())
        }

        fn on_readable(&mut self, _cx: &mut Context<'_>, _token: SocketToken, _data: Readable) -> Result<()> {
            Ok(())
        }

        fn on_error(&mut self, _cx: &mut Context<'_>, _token: SocketToken, _error: io::Error) -> Result<()> {
            Ok(())
        }

        fn on_timer(&mut self, _cx: &mut Context<'_>, _kind: TimerKind) -> Result<()> {
            self.timers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_relay(&mut self, cx: &mut Context<'_>, _message: RelayMessage) -> Result<()> {
            self.relays.fetch_add(1, Ordering::SeqCst);
            Self::publish(cx);
            Ok(())
        }

        fn on_disconnect(&mut self, _cx: &mut Context<'_>, _reason: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_overdue_timer_fires_under_steady_events() {
        let echo = Echo::new();
        let relays = echo.relays.clone();
        let timers = echo.timers.clone();

        let mut reactor = Reactor::new();
        reactor.add_endpoint(Box::new(echo));
        reactor
            .run(tokio::time::sleep(Duration::from_millis(300)))
            .await
            .unwrap();

        assert!(relays.load(Ordering::SeqCst) > 1);
        assert_eq!(timers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bound_relay_queues_delivery_for_owner() {
        use crate::bridge::{RelayExtra, RelaySource, RelayTarget};

        let mut harness = testing::Harness::new();
        let callback = harness
            .cx_for(4)
            .bind_relay(EndpointKind::Minecraft, "mc1")
            .unwrap();
        assert!(harness.cx_for(5).bind_relay(EndpointKind::Minecraft, "mc1").is_none());

        let target = RelayTarget::new(EndpointKind::Minecraft, "mc1", "rcon");
        let source = RelaySource::new(EndpointKind::Irc, "net", "#a");
        let delivered = harness
            .bus
            .call(Some("hi".to_string()), &target, source, RelayExtra::None);
        assert_eq!(delivered, 1);

        let relayed = harness.relayed();
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].0, 4);
        assert_eq!(relayed[0].1.text.as_deref(), Some("hi"));

        assert!(harness.cx_for(4).unbind_relay(EndpointKind::Minecraft, "mc1", &callback));
        assert!(!harness.bus.is_bound(EndpointKind::Minecraft, "mc1"));
    }
}
