mod options;
mod state;

pub use options::{MessageOptions, Timeouts};
pub use state::ListenerState;

use state::Step;

use std::time::Instant;

use servicebus_codec::{Message, ReceiveRequest};

#[derive(Debug)]
pub enum ListenerCommand {
    Start(Timeouts),
    Stop,
}

/// Result of one [ReceiveRequest], as reported by the I/O layer.
#[derive(Debug)]
pub enum ReceiveOutcome {
    Message(Message),
    /// The long poll expired without a message.
    Empty,
    /// The broker answered with an error status.
    Failed {
        reason: String,
        fatal: bool,
    },
    /// No answer from the broker at all. Fatal until the broker has answered once.
    Unreachable { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    Stopped,
    Failed(String),
}

#[derive(Debug)]
struct State {
    listener_state: ListenerState,
    options: MessageOptions,
    request: ReceiveRequest,
}

/// Receive-and-delete subscription listener without any I/O.
///
/// The driver feeds inputs through the `handle_*` functions and performs whatever
/// the `poll_*` functions hand out: receives to issue, messages to pass to the
/// callback, and the instant at which a backed-off receive may be retried.
#[derive(Debug)]
pub struct ListenerBinding {
    state: State,
}

impl ListenerBinding {
    pub fn new(request: ReceiveRequest, options: MessageOptions) -> Self {
        let state = State {
            listener_state: ListenerState::NotStarted,
            options,
            request,
        };

        Self { state }
    }

    pub fn handle_client_input(&mut self, command: ListenerCommand, now: Instant) {
        if let Some(change) = self.state.listener_state.step(command, now) {
            self.state.listener_state = change;
        }
    }

    pub fn handle_receive_outcome(&mut self, outcome: ReceiveOutcome, now: Instant) {
        if let Some(change) = self.state.listener_state.step(outcome, now) {
            self.state.listener_state = change;
        }
    }

    /// The callback for a message handed out by [Self::poll_delivery] has returned.
    pub fn handle_callback_complete(&mut self) {
        let ListenerState::Listening(listening) = &mut self.state.listener_state else {
            return;
        };

        match listening.slots_in_use.checked_sub(1) {
            Some(slots) if slots >= listening.receives_in_flight => {
                listening.slots_in_use = slots;
                if self.state.options.auto_complete {
                    log::trace!("Message settled on callback completion");
                }
            }
            _ => log::error!("Callback completed without a delivery in progress"),
        }
    }

    /// What happens when [Self::poll_retry_timeout]'s timestamp is reached.
    pub fn handle_retry_timeout(&mut self, now: Instant) {
        let ListenerState::Listening(listening) = &mut self.state.listener_state else {
            return;
        };

        if let Some(at) = listening.retry.next_attempt_at {
            if now >= at {
                log::trace!("Backoff elapsed; resuming receives");
                listening.retry.next_attempt_at = None;
            }
        }
    }

    /// Next receive to issue, if a slot is free and no backoff is pending.
    pub fn poll_transmit(&mut self) -> Option<ReceiveRequest> {
        let ListenerState::Listening(listening) = &mut self.state.listener_state else {
            return None;
        };

        if listening.retry.next_attempt_at.is_some()
            || listening.slots_in_use >= self.state.options.max_concurrent_calls
        {
            return None;
        }

        listening.slots_in_use += 1;
        listening.receives_in_flight += 1;
        let request = self.state.request.clone();
        log::trace!("Polled {request:?}");
        Some(request)
    }

    /// Next message to pass to the callback.
    pub fn poll_delivery(&mut self) -> Option<Message> {
        let ListenerState::Listening(listening) = &mut self.state.listener_state else {
            return None;
        };
        listening.deliveries.pop_front()
    }

    /// Returns the timestamp when we next expect [Self::handle_retry_timeout] to be called.
    pub fn poll_retry_timeout(&self) -> Option<Instant> {
        let ListenerState::Listening(listening) = &self.state.listener_state else {
            return None;
        };
        listening.retry.next_attempt_at
    }

    pub fn termination(&self) -> Option<&Termination> {
        match &self.state.listener_state {
            ListenerState::Terminated(termination) => Some(termination),
            _ => None,
        }
    }

    pub fn state(&self) -> &ListenerState {
        &self.state.listener_state
    }
}

#[cfg(test)]
fn binding(max_concurrent_calls: usize) -> ListenerBinding {
    let mut binding = ListenerBinding::new(
        ReceiveRequest::new("my_topic", "testApp1"),
        MessageOptions {
            auto_complete: true,
            max_concurrent_calls,
        },
    );
    assert!(matches!(binding.state(), ListenerState::NotStarted));
    assert_eq!(binding.poll_transmit(), None);

    binding.handle_client_input(ListenerCommand::Start(Timeouts::default()), Instant::now());
    assert!(matches!(binding.state(), ListenerState::Listening(_)));
    binding
}

#[test]
fn one_message_at_a_time() {
    let now = Instant::now();
    let mut binding = binding(1);

    // Slot taken by the receive
    assert_eq!(
        binding.poll_transmit(),
        Some(ReceiveRequest::new("my_topic", "testApp1"))
    );
    assert_eq!(binding.poll_transmit(), None);

    binding.handle_receive_outcome(ReceiveOutcome::Message(Message::new("first")), now);
    // Slot still taken while the callback runs
    assert_eq!(binding.poll_transmit(), None);
    let delivered = binding.poll_delivery().expect("message queued");
    assert_eq!(delivered.body.as_deref(), Ok(&b"first"[..]));
    assert!(binding.poll_delivery().is_none());
    assert_eq!(binding.poll_transmit(), None);

    binding.handle_callback_complete();
    assert!(binding.poll_transmit().is_some());

    // An expired long poll frees the slot straight away
    binding.handle_receive_outcome(ReceiveOutcome::Empty, now);
    assert!(binding.poll_delivery().is_none());
    assert!(binding.poll_transmit().is_some());
}

#[test]
fn concurrent_slots() {
    let now = Instant::now();
    let mut binding = binding(2);

    assert!(binding.poll_transmit().is_some());
    assert!(binding.poll_transmit().is_some());
    assert_eq!(binding.poll_transmit(), None);

    binding.handle_receive_outcome(ReceiveOutcome::Message(Message::new("a")), now);
    binding.handle_receive_outcome(ReceiveOutcome::Message(Message::new("b")), now);
    assert!(binding.poll_delivery().is_some());
    assert!(binding.poll_delivery().is_some());

    binding.handle_callback_complete();
    assert!(binding.poll_transmit().is_some());
    assert_eq!(binding.poll_transmit(), None);
}

#[test]
fn transient_failures_back_off() {
    let now = Instant::now();
    let mut binding = binding(1);
    let Timeouts {
        retry_backoff_min,
        retry_backoff_max,
    } = Timeouts::default();

    let mut expected = retry_backoff_min;
    let mut tick = now;
    for _ in 0..8 {
        assert!(binding.poll_transmit().is_some());
        binding.handle_receive_outcome(
            ReceiveOutcome::Failed {
                reason: "connection reset".into(),
                fatal: false,
            },
            tick,
        );

        assert_eq!(binding.poll_retry_timeout(), Some(tick + expected));
        assert_eq!(binding.poll_transmit(), None);

        // Too early
        binding.handle_retry_timeout(tick);
        assert_eq!(binding.poll_transmit(), None);

        tick += expected;
        binding.handle_retry_timeout(tick);
        assert_eq!(binding.poll_retry_timeout(), None);
        expected = (expected * 2).min(retry_backoff_max);
    }
    assert_eq!(expected, retry_backoff_max);

    // Success resets the backoff
    assert!(binding.poll_transmit().is_some());
    binding.handle_receive_outcome(ReceiveOutcome::Empty, tick);
    assert!(binding.poll_transmit().is_some());
    binding.handle_receive_outcome(
        ReceiveOutcome::Failed {
            reason: "timeout".into(),
            fatal: false,
        },
        tick,
    );
    assert_eq!(binding.poll_retry_timeout(), Some(tick + retry_backoff_min));
}

#[test]
fn fatal_failure_terminates() {
    let mut binding = binding(1);

    assert!(binding.poll_transmit().is_some());
    binding.handle_receive_outcome(
        ReceiveOutcome::Failed {
            reason: "401".into(),
            fatal: true,
        },
        Instant::now(),
    );

    assert_eq!(
        binding.termination(),
        Some(&Termination::Failed("401".into()))
    );
    assert_eq!(binding.poll_transmit(), None);
}

#[test]
fn unreachable_before_first_answer_terminates() {
    let mut binding = binding(1);

    assert!(binding.poll_transmit().is_some());
    binding.handle_receive_outcome(
        ReceiveOutcome::Unreachable {
            reason: "connection refused".into(),
        },
        Instant::now(),
    );

    assert_eq!(
        binding.termination(),
        Some(&Termination::Failed("connection refused".into()))
    );
    assert_eq!(binding.poll_retry_timeout(), None);
}

#[test]
fn unreachable_after_first_answer_backs_off() {
    let now = Instant::now();

    // Any answer counts, an error status included
    for first in [
        ReceiveOutcome::Empty,
        ReceiveOutcome::Failed {
            reason: "503".into(),
            fatal: false,
        },
    ] {
        let mut binding = binding(1);
        assert!(binding.poll_transmit().is_some());
        binding.handle_receive_outcome(first, now);
        binding.handle_retry_timeout(now + Timeouts::default().retry_backoff_max);

        assert!(binding.poll_transmit().is_some());
        binding.handle_receive_outcome(
            ReceiveOutcome::Unreachable {
                reason: "connection reset".into(),
            },
            now,
        );
        assert_eq!(binding.termination(), None);
        assert!(binding.poll_retry_timeout().is_some());
        assert_eq!(binding.poll_transmit(), None);
    }
}

#[test]
fn stop() {
    let now = Instant::now();
    let mut binding = binding(1);
    assert!(binding.poll_transmit().is_some());

    binding.handle_client_input(ListenerCommand::Stop, now);
    assert_eq!(binding.termination(), Some(&Termination::Stopped));

    // Late results are dropped
    binding.handle_receive_outcome(ReceiveOutcome::Message(Message::new("late")), now);
    assert!(binding.poll_delivery().is_none());
    binding.handle_client_input(ListenerCommand::Start(Timeouts::default()), now);
    assert_eq!(binding.termination(), Some(&Termination::Stopped));
}
