//! Shell exchange state machine.
//!
//! Pure transition logic with no I/O: the driver feeds socket events in and
//! carries out the returned effects. This keeps every protocol step testable
//! without a live server.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use dbridge_core::constants::{OKAY, STATUS_LEN};
use dbridge_core::protocol::{Request, is_affirmative};
use dbridge_core::Error;

/// Position in the shell exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    /// Socket not yet open.
    Start,
    /// Transport selection is being sent.
    SendTransport,
    /// Waiting for the transport acknowledgment.
    WaitTransport,
    /// Shell request is being sent.
    SendShell,
    /// Waiting for the shell acknowledgment.
    RecShell,
    /// Accumulating command output until the socket closes.
    DecodeShell,
    /// Resolved or rejected; further events are ignored.
    Done,
}

/// Socket event fed to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Opened,
    Data(Bytes),
    Closed,
    Failed(String),
}

/// Action the driver must perform.
#[derive(Debug)]
pub enum ShellEffect {
    /// Write this request to the socket.
    Send(Request),
    /// The exchange finished with this output.
    Resolve(String),
    /// The exchange failed.
    Reject(Error),
    /// Close the socket.
    Close,
}

/// One shell command on one device.
#[derive(Debug)]
pub struct ShellMachine {
    serial: String,
    command: String,
    state: ShellState,
    // Status bytes received so far while waiting for an acknowledgment.
    status_buf: BytesMut,
    output: BytesMut,
}

impl ShellMachine {
    pub fn new(serial: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            command: command.into(),
            state: ShellState::Start,
            status_buf: BytesMut::new(),
            output: BytesMut::new(),
        }
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == ShellState::Done
    }

    /// Advance on `event` and return the effects to perform, in order.
    pub fn handle(&mut self, event: ShellEvent) -> Vec<ShellEffect> {
        trace!(state = ?self.state, event = ?event, "shell event");
        let mut effects = Vec::new();

        match (self.state, event) {
            (ShellState::Done, _) => {}
            (_, ShellEvent::Failed(message)) => {
                self.fail(&mut effects, Error::Socket { message });
            }
            (ShellState::Start, ShellEvent::Opened) => {
                self.state = ShellState::SendTransport;
                self.enter(&mut effects);
            }
            (ShellState::WaitTransport, ShellEvent::Data(data)) => {
                self.status_buf.extend_from_slice(&data);
                if self.status_buf.len() < STATUS_LEN {
                    return effects;
                }
                if !is_affirmative(&self.status_buf) {
                    let message = format!(
                        "transport {} not acknowledged: {}",
                        self.serial,
                        String::from_utf8_lossy(&self.status_buf)
                    );
                    self.fail(&mut effects, Error::BadResponse { message });
                    return effects;
                }
                let _ = self.status_buf.split_to(STATUS_LEN);
                self.state = ShellState::SendShell;
                self.enter(&mut effects);
            }
            (ShellState::RecShell, ShellEvent::Data(data)) => {
                self.status_buf.extend_from_slice(&data);
                self.take_shell_ack(&mut effects);
            }
            (ShellState::DecodeShell, ShellEvent::Data(data)) => {
                self.output.extend_from_slice(&data);
            }
            (ShellState::DecodeShell, ShellEvent::Closed) => {
                let text = self.finish_output();
                self.state = ShellState::Done;
                effects.push(ShellEffect::Resolve(text));
                effects.push(ShellEffect::Close);
            }
            (state, ShellEvent::Closed) => {
                let message = format!("socket closed in state {:?}", state);
                self.fail(&mut effects, Error::Socket { message });
            }
            (state, event) => {
                let state = format!("{:?} on {:?}", state, event);
                self.fail(&mut effects, Error::UnexpectedState { state });
            }
        }

        effects
    }

    // Run the on-entry action of a sending state.
    fn enter(&mut self, effects: &mut Vec<ShellEffect>) {
        match self.state {
            ShellState::SendTransport => {
                effects.push(ShellEffect::Send(Request::Transport {
                    serial: self.serial.clone(),
                }));
                self.state = ShellState::WaitTransport;
            }
            ShellState::SendShell => {
                effects.push(ShellEffect::Send(Request::Shell {
                    command: self.command.clone(),
                }));
                self.state = ShellState::RecShell;
                // Bytes that arrived with the transport ack belong to the shell reply.
                if !self.status_buf.is_empty() {
                    self.take_shell_ack(effects);
                }
            }
            _ => {}
        }
    }

    fn take_shell_ack(&mut self, effects: &mut Vec<ShellEffect>) {
        if self.status_buf.len() < STATUS_LEN {
            return;
        }
        if !is_affirmative(&self.status_buf) {
            let message = format!(
                "shell on {} not acknowledged: {}",
                self.serial,
                String::from_utf8_lossy(&self.status_buf)
            );
            self.fail(effects, Error::BadResponse { message });
            return;
        }
        let _ = self.status_buf.split_to(STATUS_LEN);
        self.output.extend_from_slice(&self.status_buf.split());
        self.state = ShellState::DecodeShell;
    }

    // A redundant OKAY at the very start of the output is dropped once.
    fn finish_output(&mut self) -> String {
        let output = self.output.split().freeze();
        let body = output.strip_prefix(&OKAY[..]).unwrap_or(&output[..]);
        String::from_utf8_lossy(body).into_owned()
    }

    fn fail(&mut self, effects: &mut Vec<ShellEffect>, error: Error) {
        self.state = ShellState::Done;
        effects.push(ShellEffect::Reject(error));
        effects.push(ShellEffect::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(bytes: &'static [u8]) -> ShellEvent {
        ShellEvent::Data(Bytes::from_static(bytes))
    }

    fn resolved(effects: &[ShellEffect]) -> Option<&str> {
        effects.iter().find_map(|e| match e {
            ShellEffect::Resolve(text) => Some(text.as_str()),
            _ => None,
        })
    }

    fn rejected(effects: &[ShellEffect]) -> Option<&Error> {
        effects.iter().find_map(|e| match e {
            ShellEffect::Reject(err) => Some(err),
            _ => None,
        })
    }

    fn acked_machine() -> ShellMachine {
        let mut m = ShellMachine::new("emulator-5554", "echo hello");
        m.handle(ShellEvent::Opened);
        m.handle(data(b"OKAY"));
        m
    }

    #[test]
    fn opened_sends_transport() {
        let mut m = ShellMachine::new("emulator-5554", "ls");
        let effects = m.handle(ShellEvent::Opened);
        assert!(matches!(
            &effects[..],
            [ShellEffect::Send(Request::Transport { serial })] if serial == "emulator-5554"
        ));
        assert_eq!(m.state(), ShellState::WaitTransport);
    }

    #[test]
    fn transport_ack_sends_shell() {
        let mut m = ShellMachine::new("emulator-5554", "ls -l");
        m.handle(ShellEvent::Opened);
        let effects = m.handle(data(b"OKAY"));
        assert!(matches!(
            &effects[..],
            [ShellEffect::Send(Request::Shell { command })] if command == "ls -l"
        ));
        assert_eq!(m.state(), ShellState::RecShell);
    }

    #[test]
    fn transport_ack_split_across_events() {
        let mut m = ShellMachine::new("emulator-5554", "ls");
        m.handle(ShellEvent::Opened);
        assert!(m.handle(data(b"OK")).is_empty());
        let effects = m.handle(data(b"AY"));
        assert!(matches!(&effects[..], [ShellEffect::Send(Request::Shell { .. })]));
    }

    #[test]
    fn transport_failure_is_bad_response() {
        let mut m = ShellMachine::new("missing", "ls");
        m.handle(ShellEvent::Opened);
        let effects = m.handle(data(b"FAIL0015device 'missing' not found"));
        assert!(matches!(rejected(&effects), Some(Error::BadResponse { .. })));
        assert!(matches!(effects.last(), Some(ShellEffect::Close)));
        assert!(m.is_done());
    }

    #[test]
    fn redundant_okay_stripped_once() {
        let mut m = acked_machine();
        assert!(m.handle(data(b"OKAY")).is_empty());
        assert_eq!(m.state(), ShellState::DecodeShell);
        m.handle(data(b"OKAYhel"));
        m.handle(data(b"lo\n"));
        let effects = m.handle(ShellEvent::Closed);
        assert_eq!(resolved(&effects), Some("hello\n"));
    }

    #[test]
    fn okay_not_stripped_twice() {
        let mut m = acked_machine();
        m.handle(data(b"OKAY"));
        m.handle(data(b"OKAYOKAY\n"));
        let effects = m.handle(ShellEvent::Closed);
        assert_eq!(resolved(&effects), Some("OKAY\n"));
    }

    #[test]
    fn okay_in_later_chunk_kept() {
        let mut m = acked_machine();
        m.handle(data(b"OKAY"));
        m.handle(data(b"status: "));
        m.handle(data(b"OKAY"));
        let effects = m.handle(ShellEvent::Closed);
        assert_eq!(resolved(&effects), Some("status: OKAY"));
    }

    #[test]
    fn ack_and_output_in_one_frame() {
        let mut m = acked_machine();
        m.handle(data(b"OKAYPixel 7\n"));
        let effects = m.handle(ShellEvent::Closed);
        assert_eq!(resolved(&effects), Some("Pixel 7\n"));
    }

    #[test]
    fn everything_in_first_frame() {
        let mut m = ShellMachine::new("emulator-5554", "echo hi");
        m.handle(ShellEvent::Opened);
        let effects = m.handle(data(b"OKAYOKAYhi\n"));
        assert!(matches!(&effects[..], [ShellEffect::Send(Request::Shell { .. })]));
        assert_eq!(m.state(), ShellState::DecodeShell);
        let effects = m.handle(ShellEvent::Closed);
        assert_eq!(resolved(&effects), Some("hi\n"));
    }

    #[test]
    fn empty_output_resolves_empty() {
        let mut m = acked_machine();
        m.handle(data(b"OKAY"));
        let effects = m.handle(ShellEvent::Closed);
        assert_eq!(resolved(&effects), Some(""));
    }

    #[test]
    fn shell_rejection_is_bad_response() {
        let mut m = acked_machine();
        let effects = m.handle(data(b"FAIL0006closed"));
        assert!(matches!(rejected(&effects), Some(Error::BadResponse { .. })));
    }

    #[test]
    fn close_before_ack_is_socket_error() {
        let mut m = acked_machine();
        let effects = m.handle(ShellEvent::Closed);
        assert!(matches!(rejected(&effects), Some(Error::Socket { .. })));
    }

    #[test]
    fn socket_failure_in_any_state() {
        let mut m = acked_machine();
        m.handle(data(b"OKAYpartial"));
        let effects = m.handle(ShellEvent::Failed("reset by peer".into()));
        assert!(matches!(rejected(&effects), Some(Error::Socket { .. })));
    }

    #[test]
    fn data_before_open_is_unexpected() {
        let mut m = ShellMachine::new("emulator-5554", "ls");
        let effects = m.handle(data(b"OKAY"));
        assert!(matches!(rejected(&effects), Some(Error::UnexpectedState { .. })));
    }

    #[test]
    fn events_after_done_ignored() {
        let mut m = acked_machine();
        m.handle(data(b"OKAY"));
        m.handle(ShellEvent::Closed);
        assert!(m.handle(data(b"late")).is_empty());
        assert!(m.handle(ShellEvent::Closed).is_empty());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut m = acked_machine();
        m.handle(data(b"OKAY"));
        m.handle(data(b"a\xffb"));
        let effects = m.handle(ShellEvent::Closed);
        assert_eq!(resolved(&effects), Some("a\u{fffd}b"));
    }
}
