//! Request queue and response correlator.
//!
//! Modbus-RTU responses carry no request identifier, so the only way to
//! pair a response with its request is order. The queue enforces that at
//! most one command is on the wire at a time: a frame is handed out for
//! transmission only when nothing is in flight, and the next one only once
//! the in-flight command has been resolved.
//!
//! ```text
//! enqueue ──► Queued ──(link idle)──► InFlight ──► Resolved(Ok | Err)
//! ```
//!
//! The queue does no I/O. Methods that may start the next command return
//! the frame the caller must transmit.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Result, RtuError};
use crate::protocol::{DeviceAddress, Message, Request};

/// Who issued a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A caller of the link API.
    Caller,
    /// The keepalive scheduler.
    Keepalive,
}

/// Completion handle of a command.
pub type Responder = oneshot::Sender<Result<u32>>;

/// A request waiting for transmission or for its response.
#[derive(Debug)]
pub struct Command {
    request: Request,
    frame: Bytes,
    origin: Origin,
    respond_to: Responder,
}

impl Command {
    /// Build a command and the receiver its outcome is delivered to.
    pub fn new(
        request: Request,
        address: DeviceAddress,
        origin: Origin,
    ) -> (Self, oneshot::Receiver<Result<u32>>) {
        let (respond_to, rx) = oneshot::channel();
        let command = Self {
            request,
            frame: request.encode(address),
            origin,
            respond_to,
        };
        (command, rx)
    }

    /// The request this command carries.
    #[inline]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Encoded frame, CRC included.
    #[inline]
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    /// Who issued this command.
    #[inline]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Deliver the outcome. Consumes the command, so it resolves once.
    pub fn resolve(self, result: Result<u32>) {
        if self.respond_to.send(result).is_err() {
            tracing::debug!(
                "Result for {:?} request on {} dropped, receiver gone",
                self.origin,
                self.request.register()
            );
        }
    }
}

struct InFlight {
    command: Command,
    sent_at: Instant,
}

/// FIFO of outstanding commands with a single in-flight slot.
pub struct RequestQueue {
    queued: VecDeque<Command>,
    in_flight: Option<InFlight>,
    response_timeout: Option<Duration>,
}

impl RequestQueue {
    /// Create an empty queue without response timeout.
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    /// Create an empty queue; in-flight commands expire after `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            queued: VecDeque::new(),
            in_flight: None,
            response_timeout: timeout,
        }
    }

    /// Append a command.
    ///
    /// Returns the frame to transmit if the link was idle.
    pub fn enqueue(&mut self, command: Command) -> Option<Bytes> {
        self.queued.push_back(command);
        self.advance()
    }

    /// Resolve the in-flight command with a decoded response.
    ///
    /// A response that cannot answer the in-flight request (other function
    /// code, or a write echo for another register) is dropped and the
    /// command keeps waiting.
    ///
    /// Returns the next frame to transmit, if any.
    pub fn on_message(&mut self, message: &Message) -> Option<Bytes> {
        let Some(in_flight) = self.in_flight.as_ref() else {
            tracing::warn!(
                "Response with no request in flight (function {:02X}, value {})",
                message.function,
                message.value
            );
            return None;
        };

        let request = in_flight.command.request();
        if !answers(request, message) {
            tracing::warn!(
                "Dropping stale response (function {:02X}, register {:?}) while {:?} is in flight",
                message.function,
                message.register,
                request
            );
            return None;
        }

        let in_flight = self.in_flight.take()?;
        in_flight.command.resolve(Ok(message.value));
        self.advance()
    }

    /// Resolve the in-flight command with a device exception.
    pub fn on_exception(&mut self, function: u8, code: u8) -> Option<Bytes> {
        let Some(in_flight) = self.in_flight.take() else {
            tracing::warn!("Exception {:02X} with no request in flight", code);
            return None;
        };

        in_flight
            .command
            .resolve(Err(RtuError::Exception { function, code }));
        self.advance()
    }

    /// Resolve the in-flight command as timed out.
    pub fn on_timeout(&mut self) -> Option<Bytes> {
        let in_flight = self.in_flight.take()?;
        tracing::warn!(
            "No response to {} after {:?}",
            in_flight.command.request().register(),
            in_flight.sent_at.elapsed()
        );
        in_flight.command.resolve(Err(RtuError::Timeout));
        self.advance()
    }

    /// Resolve every outstanding command with an error and empty the queue.
    ///
    /// Returns the number of commands failed.
    pub fn fail_all<F>(&mut self, make_err: F) -> usize
    where
        F: Fn() -> RtuError,
    {
        let mut failed = 0;

        if let Some(in_flight) = self.in_flight.take() {
            in_flight.command.resolve(Err(make_err()));
            failed += 1;
        }

        for command in self.queued.drain(..) {
            command.resolve(Err(make_err()));
            failed += 1;
        }

        failed
    }

    /// When the in-flight command expires, if a timeout is configured.
    pub fn deadline(&self) -> Option<Instant> {
        let timeout = self.response_timeout?;
        self.in_flight
            .as_ref()
            .map(|in_flight| in_flight.sent_at + timeout)
    }

    /// The command currently on the wire.
    pub fn in_flight(&self) -> Option<&Command> {
        self.in_flight.as_ref().map(|in_flight| &in_flight.command)
    }

    /// Number of commands waiting behind the in-flight one.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Check if nothing is in flight or queued.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queued.is_empty()
    }

    /// Promote the oldest queued command if the wire is free.
    fn advance(&mut self) -> Option<Bytes> {
        if self.in_flight.is_some() {
            return None;
        }

        let command = self.queued.pop_front()?;
        let frame = command.frame().clone();
        self.in_flight = Some(InFlight {
            command,
            sent_at: Instant::now(),
        });
        Some(frame)
    }
}

/// Check if `message` can be the response to `request`.
fn answers(request: &Request, message: &Message) -> bool {
    if request.function() != message.function {
        return false;
    }
    match request {
        Request::Read { .. } => true,
        Request::Write { register, .. } => message.register == Some(*register),
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_frame, encode_write_request, Decoded, RegisterAddress};

    const ADDR: DeviceAddress = DeviceAddress(0x01);

    fn read(register: u16) -> (Command, oneshot::Receiver<Result<u32>>) {
        Command::new(Request::read(RegisterAddress(register)), ADDR, Origin::Caller)
    }

    fn message(value: u16) -> Message {
        let mut frame = vec![0x01, 0x03, 0x02];
        frame.extend_from_slice(&value.to_be_bytes());
        let crc = crate::protocol::compute_crc(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());

        match decode_frame(&frame) {
            Decoded::Message { message, .. } => message,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn echo(register: u16, value: u16) -> Message {
        let frame = encode_write_request(ADDR, RegisterAddress(register), value);
        match decode_frame(&frame) {
            Decoded::Message { message, .. } => message,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_enqueue_when_idle_transmits() {
        let mut queue = RequestQueue::new();
        let (cmd, _rx) = read(0xFD06);
        let expected = cmd.frame().clone();

        assert_eq!(queue.enqueue(cmd), Some(expected));
        assert!(queue.in_flight().is_some());
        assert_eq!(queue.queued_len(), 0);
    }

    #[test]
    fn test_single_in_flight() {
        let mut queue = RequestQueue::new();
        let (a, _ra) = read(0xFD00);
        let (b, _rb) = read(0xFD03);
        let (c, _rc) = read(0xFD05);

        assert!(queue.enqueue(a).is_some());
        assert!(queue.enqueue(b).is_none());
        assert!(queue.enqueue(c).is_none());
        assert_eq!(queue.queued_len(), 2);
    }

    #[test]
    fn test_fifo_correlation() {
        let mut queue = RequestQueue::new();
        let (a, mut ra) = read(0xFD00);
        let (b, mut rb) = read(0xFD03);
        let (c, mut rc) = read(0xFD05);
        let frame_b = b.frame().clone();
        let frame_c = c.frame().clone();

        queue.enqueue(a);
        queue.enqueue(b);
        queue.enqueue(c);

        assert_eq!(queue.on_message(&message(10)), Some(frame_b));
        assert_eq!(ra.try_recv().unwrap().unwrap(), 10);
        assert!(rb.try_recv().is_err());

        assert_eq!(queue.on_message(&message(20)), Some(frame_c));
        assert_eq!(rb.try_recv().unwrap().unwrap(), 20);

        assert_eq!(queue.on_message(&message(30)), None);
        assert_eq!(rc.try_recv().unwrap().unwrap(), 30);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_stale_response_is_dropped() {
        let mut queue = RequestQueue::new();
        let (write, mut rx) =
            Command::new(Request::write(RegisterAddress(0xFA01), 2000), ADDR, Origin::Caller);
        queue.enqueue(write);

        // Late read response and an echo for another register.
        assert_eq!(queue.on_message(&message(24)), None);
        assert_eq!(queue.on_message(&echo(0xFA00, 0xC400)), None);
        assert!(rx.try_recv().is_err());
        assert!(queue.in_flight().is_some());

        assert_eq!(queue.on_message(&echo(0xFA01, 2000)), None);
        assert_eq!(rx.try_recv().unwrap().unwrap(), 2000);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_unsolicited_message_is_ignored() {
        let mut queue = RequestQueue::new();
        assert_eq!(queue.on_message(&message(1)), None);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_exception_resolves_in_flight() {
        let mut queue = RequestQueue::new();
        let (a, mut ra) = read(0xFD00);
        let (b, _rb) = read(0xFD03);
        let frame_b = b.frame().clone();
        queue.enqueue(a);
        queue.enqueue(b);

        assert_eq!(queue.on_exception(0x03, 0x02), Some(frame_b));
        assert!(matches!(
            ra.try_recv().unwrap(),
            Err(RtuError::Exception {
                function: 0x03,
                code: 0x02
            })
        ));
    }

    #[test]
    fn test_fail_all() {
        let mut queue = RequestQueue::new();
        let (a, mut ra) = read(0xFD00);
        let (b, mut rb) = read(0xFD03);
        let (c, mut rc) = read(0xFD05);
        queue.enqueue(a);
        queue.enqueue(b);
        queue.enqueue(c);

        assert_eq!(queue.fail_all(|| RtuError::LinkClosed), 3);
        assert!(queue.is_idle());

        for rx in [&mut ra, &mut rb, &mut rc] {
            assert!(matches!(rx.try_recv().unwrap(), Err(RtuError::LinkClosed)));
        }
    }

    #[test]
    fn test_resolve_with_dropped_receiver() {
        let mut queue = RequestQueue::new();
        let (a, ra) = read(0xFD00);
        drop(ra);
        queue.enqueue(a);

        assert_eq!(queue.on_message(&message(5)), None);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_no_deadline_without_timeout() {
        let mut queue = RequestQueue::new();
        let (a, _ra) = read(0xFD00);
        queue.enqueue(a);

        assert!(queue.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_advances_queue() {
        let mut queue = RequestQueue::with_timeout(Some(Duration::from_millis(200)));
        let (a, mut ra) = read(0xFD00);
        let (b, _rb) = read(0xFD03);
        let frame_b = b.frame().clone();

        assert!(queue.deadline().is_none());
        queue.enqueue(a);
        queue.enqueue(b);

        let deadline = queue.deadline().unwrap();
        assert_eq!(deadline - Instant::now(), Duration::from_millis(200));

        tokio::time::sleep_until(deadline).await;
        assert_eq!(queue.on_timeout(), Some(frame_b));
        assert!(matches!(ra.try_recv().unwrap(), Err(RtuError::Timeout)));
    }
}
