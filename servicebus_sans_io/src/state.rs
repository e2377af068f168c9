use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use servicebus_codec::Message;

use crate::{ListenerCommand, ReceiveOutcome, Termination, Timeouts};

#[derive(Debug)]
pub enum ListenerState {
    /// No callback registered yet; nothing is received.
    NotStarted,
    /// Receiving and dispatching messages to the callback.
    Listening(Listening),
    /// Stopped by the user or by a failure retrying cannot fix.
    Terminated(Termination),
}

#[derive(Debug)]
pub struct Listening {
    /// Slots taken by a receive in flight or a message between receipt and callback completion.
    pub slots_in_use: usize,
    pub receives_in_flight: usize,
    pub deliveries: VecDeque<Message>,
    pub retry: RetryState,
    /// Whether any receive got an answer from the broker yet.
    pub reached_broker: bool,
}

#[derive(Clone, Debug)]
pub struct RetryState {
    pub timeouts: Timeouts,
    /// No receive is issued before this point in time.
    pub next_attempt_at: Option<Instant>,
    pub backoff: Duration,
}

impl RetryState {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            timeouts,
            next_attempt_at: None,
            backoff: timeouts.retry_backoff_min,
        }
    }

    fn failed(&mut self, now: Instant) {
        self.next_attempt_at = Some(now + self.backoff);
        self.backoff = (self.backoff * 2).min(self.timeouts.retry_backoff_max);
    }

    fn succeeded(&mut self) {
        self.backoff = self.timeouts.retry_backoff_min;
    }
}

pub trait Step<Command> {
    fn step(&mut self, command: Command, now: Instant) -> Option<ListenerState>;
}

impl Step<ListenerCommand> for ListenerState {
    fn step(&mut self, command: ListenerCommand, _now: Instant) -> Option<ListenerState> {
        match (self, command) {
            (ListenerState::NotStarted, ListenerCommand::Start(timeouts)) => {
                log::debug!("Listening started");
                Some(ListenerState::Listening(Listening {
                    slots_in_use: 0,
                    receives_in_flight: 0,
                    deliveries: VecDeque::new(),
                    retry: RetryState::new(timeouts),
                    reached_broker: false,
                }))
            }
            (ListenerState::Listening(_), ListenerCommand::Start(_)) => {
                log::warn!("Listener is already running");
                None
            }
            (ListenerState::NotStarted | ListenerState::Listening(_), ListenerCommand::Stop) => {
                log::debug!("Listening stopped");
                Some(ListenerState::Terminated(Termination::Stopped))
            }
            (ListenerState::Terminated(reason), command) => {
                log::trace!("Discarding {command:?}; listener already terminated ({reason:?})");
                None
            }
        }
    }
}

impl Step<ReceiveOutcome> for ListenerState {
    fn step(&mut self, outcome: ReceiveOutcome, now: Instant) -> Option<ListenerState> {
        let ListenerState::Listening(listening) = self else {
            log::trace!("Discarding {outcome:?}; listener is not running");
            return None;
        };

        if listening.receives_in_flight == 0 {
            log::error!("Received {outcome:?} without a receive in flight");
            return None;
        }
        listening.receives_in_flight -= 1;

        let reached_broker = listening.reached_broker;
        if !matches!(outcome, ReceiveOutcome::Unreachable { .. }) {
            listening.reached_broker = true;
        }

        match outcome {
            ReceiveOutcome::Message(message) => {
                log::trace!("Queued message {:?}", message.properties.message_id);
                listening.retry.succeeded();
                // Slot stays taken until the callback completes
                listening.deliveries.push_back(message);
                None
            }
            ReceiveOutcome::Empty => {
                log::trace!("Receive expired without a message");
                listening.retry.succeeded();
                listening.slots_in_use -= 1;
                None
            }
            ReceiveOutcome::Failed { reason, fatal: true } => {
                log::error!("Receive failed permanently: {reason}");
                Some(ListenerState::Terminated(Termination::Failed(reason)))
            }
            ReceiveOutcome::Unreachable { reason } if !reached_broker => {
                log::error!("Broker is unreachable: {reason}");
                Some(ListenerState::Terminated(Termination::Failed(reason)))
            }
            ReceiveOutcome::Failed {
                reason,
                fatal: false,
            }
            | ReceiveOutcome::Unreachable { reason } => {
                let delay = listening.retry.backoff;
                listening.slots_in_use -= 1;
                listening.retry.failed(now);
                log::warn!(
                    "Receive failed: {reason}; retrying in {}s",
                    delay.as_secs_f64()
                );
                None
            }
        }
    }
}
