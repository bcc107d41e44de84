//! Link builder, caller handle and session loop.
//!
//! The [`LinkBuilder`] configures the link and attaches it to a byte
//! stream. A session task then owns everything on the link:
//! 1. Receive caller commands and queue them
//! 2. Transmit the oldest command when the wire is idle
//! 3. Reassemble inbound bytes into frames
//! 4. Resolve the in-flight command with each valid response
//!
//! Callers talk to the session through a cloneable [`LinkHandle`].
//!
//! # Example
//!
//! ```ignore
//! use rtulink::LinkBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = rtulink::transport::open_serial(&Default::default())?;
//!     let link = LinkBuilder::new().address("01".parse()?).connect(stream);
//!
//!     let switches = link.read("FD06".parse()?).await?;
//!     link.write("FA00".parse()?, 0xC400).await?;
//!     link.keepalive(std::time::Duration::from_millis(250), |_| {}).await?;
//!
//!     link.disconnect().await?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::error::{Result, RtuError};
use crate::keepalive::{Keepalive, KeepaliveObserver};
use crate::protocol::{DeviceAddress, FrameBuffer, FrameEvent, Message, RegisterAddress, Request};
use crate::queue::{Command, Origin, RequestQueue};

/// Default keepalive interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(250);

/// Register read by the default keepalive probe.
pub const DEFAULT_KEEPALIVE_REGISTER: RegisterAddress = RegisterAddress(0xFD00);

/// Default capacity of the caller request channel.
pub const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default size of a single transport read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 256;

/// Link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Address of the device on the link.
    pub address: DeviceAddress,
    /// Request sent by the keepalive scheduler.
    pub keepalive_probe: Request,
    /// Interval used by [`LinkHandle::start_keepalive`].
    pub keepalive_interval: Duration,
    /// Resolve an unanswered command with `Timeout` after this long.
    /// `None` waits until a response arrives or the link closes.
    ///
    /// Responses carry no request id. A late answer to a timed-out command
    /// is dropped only when its function code or echoed register rules it
    /// out; a late read answer arriving while another read is in flight
    /// resolves that read.
    pub response_timeout: Option<Duration>,
    /// Capacity of the caller request channel.
    pub request_capacity: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Size of a single transport read.
    pub read_buffer_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: DeviceAddress::DEFAULT,
            keepalive_probe: Request::read(DEFAULT_KEEPALIVE_REGISTER),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            response_timeout: None,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Something observable that happened on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A frame was written to the transport.
    FrameSent(Bytes),
    /// A valid response was decoded.
    Response(Message),
    /// A device exception response was decoded.
    Exception { function: u8, code: u8 },
    /// A frame failed checksum verification and was dropped.
    CrcMismatch { expected: u16, actual: u16, frame: Bytes },
    /// Bytes with an unknown function code were discarded.
    MalformedFrame { function: u8 },
    /// The in-flight command timed out.
    Timeout,
    /// The session ended.
    Closed,
}

/// Builder for configuring and connecting a link.
pub struct LinkBuilder {
    config: LinkConfig,
}

impl LinkBuilder {
    /// Create a new link builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: LinkConfig::default(),
        }
    }

    /// Create a builder from an existing configuration.
    pub fn from_config(config: LinkConfig) -> Self {
        Self { config }
    }

    /// Set the device address.
    ///
    /// Default: `01`
    pub fn address(mut self, address: DeviceAddress) -> Self {
        self.config.address = address;
        self
    }

    /// Set the request sent by the keepalive scheduler.
    ///
    /// Default: read of register `FD00`
    pub fn keepalive_probe(mut self, probe: Request) -> Self {
        self.config.keepalive_probe = probe;
        self
    }

    /// Set the default keepalive interval.
    ///
    /// Default: 250 ms
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Fail unanswered commands with `Timeout` after `timeout`.
    ///
    /// Pick a value well above the device's turnaround time: see
    /// [`LinkConfig::response_timeout`] for how late responses are matched.
    ///
    /// Default: no timeout
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = Some(timeout);
        self
    }

    /// Set the caller request channel capacity. Zero is treated as 1.
    ///
    /// Default: 64
    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.config.request_capacity = capacity;
        self
    }

    /// Set the event broadcast channel capacity. Zero is treated as 1.
    ///
    /// Default: 64
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Set the transport read size. Zero is treated as 1.
    ///
    /// Default: 256
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Attach the link to a duplex byte stream and start the session.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect<S>(self, stream: S) -> LinkHandle
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Session::spawn(stream, self.config)
    }
}

impl Default for LinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Messages from handles and the keepalive task to the session.
pub(crate) enum SessionRequest {
    Command(Command),
    StartKeepalive {
        interval: Duration,
        observer: Option<KeepaliveObserver>,
    },
    StopKeepalive,
    KeepaliveStatus(oneshot::Sender<bool>),
    Disconnect(oneshot::Sender<()>),
}

/// Handle to a running link.
///
/// Cheaply cloneable. The session ends on [`disconnect`](Self::disconnect),
/// when the transport closes, or when the last handle is dropped.
#[derive(Clone)]
pub struct LinkHandle {
    requests: mpsc::Sender<SessionRequest>,
    events: broadcast::Sender<LinkEvent>,
    address: DeviceAddress,
    keepalive_interval: Duration,
}

impl LinkHandle {
    /// Read one register (function `0x03`).
    ///
    /// The device's payload is decoded big-endian into a `u32`. Should a
    /// device answer with more than 4 data bytes, only the last 4 are kept;
    /// subscribe to [`LinkEvent::Response`] for the raw bytes.
    pub async fn read(&self, register: RegisterAddress) -> Result<u32> {
        self.send(Request::read(register)).await
    }

    /// Write one register (function `0x06`).
    ///
    /// Resolves with the value echoed by the device.
    pub async fn write(&self, register: RegisterAddress, value: u16) -> Result<u32> {
        self.send(Request::write(register, value)).await
    }

    /// Queue a request and wait for its response.
    ///
    /// Resolves with the decoded value, see [`read`](Self::read) for its width.
    pub async fn send(&self, request: Request) -> Result<u32> {
        let (command, rx) = Command::new(request, self.address, Origin::Caller);

        self.requests
            .send(SessionRequest::Command(command))
            .await
            .map_err(|_| RtuError::TransportUnavailable)?;

        rx.await.map_err(|_| RtuError::LinkClosed)?
    }

    /// Start sending the keepalive probe every `interval`.
    ///
    /// `on_result` receives the outcome of every probe. Replaces a
    /// keepalive that is already running.
    pub async fn keepalive<F>(&self, interval: Duration, on_result: F) -> Result<()>
    where
        F: FnMut(Result<u32>) + Send + 'static,
    {
        self.start(interval, Some(Box::new(on_result))).await
    }

    /// Start the keepalive with the configured interval and no observer.
    pub async fn start_keepalive(&self) -> Result<()> {
        self.start(self.keepalive_interval, None).await
    }

    async fn start(&self, interval: Duration, observer: Option<KeepaliveObserver>) -> Result<()> {
        self.requests
            .send(SessionRequest::StartKeepalive { interval, observer })
            .await
            .map_err(|_| RtuError::TransportUnavailable)
    }

    /// Stop the keepalive. A probe already in flight completes normally.
    pub async fn stop_keepalive(&self) -> Result<()> {
        self.requests
            .send(SessionRequest::StopKeepalive)
            .await
            .map_err(|_| RtuError::TransportUnavailable)
    }

    /// Check if a keepalive is scheduled.
    pub async fn is_keepalive_active(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .requests
            .send(SessionRequest::KeepaliveStatus(tx))
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Close the link.
    ///
    /// Every queued and in-flight command fails with `LinkClosed` and the
    /// keepalive stops. Returns once the session has shut down.
    pub async fn disconnect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .requests
            .send(SessionRequest::Disconnect(tx))
            .await
            .is_err()
        {
            // Already closed.
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    /// Check if the session is still running.
    pub fn is_connected(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Address of the device on this link.
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}

/// Why the session loop ended.
enum Shutdown {
    Disconnect(oneshot::Sender<()>),
    HandlesDropped,
    Eof,
    Io(std::io::Error),
}

impl From<std::io::Error> for Shutdown {
    fn from(e: std::io::Error) -> Self {
        Shutdown::Io(e)
    }
}

/// Single owner of all link state.
struct Session<R, W> {
    reader: R,
    writer: W,
    frames: FrameBuffer,
    queue: RequestQueue,
    requests: mpsc::Receiver<SessionRequest>,
    weak_requests: mpsc::WeakSender<SessionRequest>,
    events: broadcast::Sender<LinkEvent>,
    keepalive: Option<Keepalive>,
    config: LinkConfig,
}

impl<S> Session<tokio::io::ReadHalf<S>, tokio::io::WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn spawn(stream: S, config: LinkConfig) -> LinkHandle {
        let (reader, writer) = tokio::io::split(stream);
        // Both channels reject a zero capacity.
        let (tx, rx) = mpsc::channel(config.request_capacity.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let handle = LinkHandle {
            requests: tx.clone(),
            events: events.clone(),
            address: config.address,
            keepalive_interval: config.keepalive_interval,
        };

        let session = Session {
            reader,
            writer,
            frames: FrameBuffer::new(),
            queue: RequestQueue::with_timeout(config.response_timeout),
            requests: rx,
            weak_requests: tx.downgrade(),
            events,
            keepalive: None,
            config,
        };

        tracing::debug!("Link to device {} started", session.config.address);
        tokio::spawn(session.run());

        handle
    }
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn run(mut self) {
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];

        let reason = loop {
            let deadline = self.queue.deadline();

            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        break Shutdown::HandlesDropped;
                    };
                    if let Err(reason) = self.handle_request(request).await {
                        break reason;
                    }
                }

                read = self.reader.read(&mut buf) => {
                    match read {
                        Ok(0) => break Shutdown::Eof,
                        Ok(n) => {
                            if let Err(e) = self.on_bytes(&buf[..n]).await {
                                break Shutdown::Io(e);
                            }
                        }
                        Err(e) => break Shutdown::Io(e),
                    }
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Err(e) = self.on_timeout().await {
                        break Shutdown::Io(e);
                    }
                }
            }
        };

        self.close(reason).await;
    }

    async fn handle_request(
        &mut self,
        request: SessionRequest,
    ) -> std::result::Result<(), Shutdown> {
        match request {
            SessionRequest::Command(command) => {
                tracing::debug!(
                    "Queue {:?} {:?} ({} waiting)",
                    command.origin(),
                    command.request(),
                    self.queue.queued_len()
                );
                if let Some(frame) = self.queue.enqueue(command) {
                    self.transmit(frame).await?;
                }
            }

            SessionRequest::StartKeepalive { interval, observer } => {
                if let Some(old) = self.keepalive.take() {
                    old.stop();
                }
                self.keepalive = Some(Keepalive::spawn(
                    interval,
                    self.config.keepalive_probe,
                    self.config.address,
                    self.weak_requests.clone(),
                    observer,
                ));
            }

            SessionRequest::StopKeepalive => {
                if let Some(keepalive) = self.keepalive.take() {
                    keepalive.stop();
                }
            }

            SessionRequest::KeepaliveStatus(tx) => {
                let active = self.keepalive.as_ref().is_some_and(Keepalive::is_running);
                let _ = tx.send(active);
            }

            SessionRequest::Disconnect(done) => return Err(Shutdown::Disconnect(done)),
        }

        Ok(())
    }

    async fn on_bytes(&mut self, data: &[u8]) -> std::io::Result<()> {
        tracing::trace!("Read: {}", hex::encode_upper(data));

        for event in self.frames.push(data) {
            let next = match event {
                FrameEvent::Message(message) => {
                    if message.address != self.config.address {
                        tracing::warn!(
                            "Response from device {} on link to {}",
                            message.address,
                            self.config.address
                        );
                    }
                    let next = self.queue.on_message(&message);
                    self.emit(LinkEvent::Response(message));
                    next
                }

                FrameEvent::Exception { function, code, .. } => {
                    let next = self.queue.on_exception(function, code);
                    self.emit(LinkEvent::Exception { function, code });
                    next
                }

                FrameEvent::CrcMismatch {
                    expected,
                    actual,
                    frame,
                } => {
                    self.emit(LinkEvent::CrcMismatch {
                        expected,
                        actual,
                        frame,
                    });
                    None
                }

                FrameEvent::Malformed { function, .. } => {
                    self.emit(LinkEvent::MalformedFrame { function });
                    None
                }
            };

            if let Some(frame) = next {
                self.transmit(frame).await?;
            }
        }

        Ok(())
    }

    async fn on_timeout(&mut self) -> std::io::Result<()> {
        // Partial bytes belong to the expired response.
        self.frames.clear();
        self.emit(LinkEvent::Timeout);

        if let Some(frame) = self.queue.on_timeout() {
            self.transmit(frame).await?;
        }
        Ok(())
    }

    async fn transmit(&mut self, frame: Bytes) -> std::io::Result<()> {
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;

        tracing::trace!("Sent: {}", hex::encode_upper(&frame));
        self.emit(LinkEvent::FrameSent(frame));
        Ok(())
    }

    async fn close(mut self, reason: Shutdown) {
        match &reason {
            Shutdown::Disconnect(_) => {
                tracing::info!("Disconnecting from device {}", self.config.address)
            }
            Shutdown::HandlesDropped => tracing::debug!("All link handles dropped"),
            Shutdown::Eof => tracing::info!("Transport closed by peer"),
            Shutdown::Io(e) => tracing::error!("Link I/O error: {}", e),
        }

        if let Some(keepalive) = self.keepalive.take() {
            keepalive.stop();
        }

        self.requests.close();
        let mut failed = self.queue.fail_all(|| RtuError::LinkClosed);

        // Requests that raced with the shutdown.
        while let Ok(request) = self.requests.try_recv() {
            match request {
                SessionRequest::Command(command) => {
                    command.resolve(Err(RtuError::LinkClosed));
                    failed += 1;
                }
                SessionRequest::KeepaliveStatus(tx) => {
                    let _ = tx.send(false);
                }
                SessionRequest::Disconnect(done) => {
                    let _ = done.send(());
                }
                SessionRequest::StartKeepalive { .. } | SessionRequest::StopKeepalive => {}
            }
        }

        if failed > 0 {
            tracing::warn!("{} pending commands failed: link closed", failed);
        }

        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("Transport shutdown error: {}", e);
        }

        self.emit(LinkEvent::Closed);

        if let Shutdown::Disconnect(done) = reason {
            let _ = done.send(());
        }
    }

    fn emit(&self, event: LinkEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
