use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt as _;
use servicebus_codec::{ConnectionString, Message, ReceiveError, ReceiveRequest};
use servicebus_sans_io::{
    ListenerBinding, ListenerCommand, MessageOptions, ReceiveOutcome, Termination, Timeouts,
};
use tokio::{task::JoinSet, time};
use tokio_util::sync::CancellationToken;

use crate::{ClientError, HttpTransport, MessageHandler, Transport};

/// Client for one topic subscription, reading in receive-and-delete mode.
pub struct SubscriptionClient<T = HttpTransport> {
    transport: Arc<T>,
    request: ReceiveRequest,
}

impl<T> std::fmt::Debug for SubscriptionClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionClient")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl SubscriptionClient<HttpTransport> {
    pub fn create_from_connection_string(
        connection_string: &str,
        topic: &str,
        subscription: &str,
    ) -> Result<Self, ClientError> {
        let parsed: ConnectionString = connection_string.parse()?;
        if let Some(scoped) = &parsed.entity_path {
            if !scoped.eq_ignore_ascii_case(topic) {
                return Err(ClientError::EntityPathMismatch {
                    scoped: scoped.clone(),
                    topic: topic.into(),
                });
            }
        }

        let transport = HttpTransport::new(&parsed)?;
        log::debug!("Created client for {topic}/{subscription} via {transport:?}");

        Ok(Self::with_transport(transport, topic, subscription))
    }
}

impl<T: Transport> SubscriptionClient<T> {
    pub fn with_transport(
        transport: T,
        topic: impl Into<String>,
        subscription: impl Into<String>,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            request: ReceiveRequest::new(topic, subscription),
        }
    }

    pub fn topic(&self) -> &str {
        &self.request.topic
    }

    pub fn subscription(&self) -> &str {
        &self.request.subscription
    }

    /// Registers `handler` and starts delivering messages to it in the background.
    ///
    /// Must be called from within a Tokio runtime. Consumes the client, so a client
    /// only ever has one callback.
    pub fn on_message<H: MessageHandler>(
        self,
        handler: H,
        options: MessageOptions,
    ) -> Result<ListenerHandle, ClientError> {
        if !options.auto_complete {
            return Err(ClientError::UnsupportedOptions(
                "receive-and-delete leaves nothing to complete manually; `auto_complete` must be set",
            ));
        }
        if options.max_concurrent_calls == 0 {
            return Err(ClientError::UnsupportedOptions(
                "`max_concurrent_calls` must be at least 1",
            ));
        }

        let Self { transport, request } = self;
        log::info!(
            "Registering callback on {} ({options:?})",
            request.entity_path()
        );

        let binding = ListenerBinding::new(request, options);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            transport,
            Arc::new(handler),
            binding,
            Timeouts::default(),
            cancel.clone(),
        ));

        Ok(ListenerHandle { cancel, task })
    }
}

/// Owns the background delivery task started by [SubscriptionClient::on_message].
#[derive(Debug)]
pub struct ListenerHandle {
    cancel: CancellationToken,

    /// Resolves once the listener stopped; `Err` if it failed permanently.
    pub task: tokio::task::JoinHandle<Result<(), ClientError>>,
}

impl ListenerHandle {
    /// Stops the delivery task, aborting any receive or callback in progress.
    pub async fn stop(self) -> Result<(), ClientError> {
        self.cancel.cancel();
        self.task.await?
    }
}

enum TaskOutput {
    Received(Result<Option<Message>, ReceiveError>),
    Handled,
}

/// Binding timestamps follow Tokio's clock so that a paused runtime stays consistent.
fn now() -> std::time::Instant {
    time::Instant::now().into_std()
}

async fn run<T: Transport, H: MessageHandler>(
    transport: Arc<T>,
    handler: Arc<H>,
    mut binding: ListenerBinding,
    timeouts: Timeouts,
    cancel: CancellationToken,
) -> Result<(), ClientError> {
    let mut tasks = JoinSet::new();
    binding.handle_client_input(ListenerCommand::Start(timeouts), now());

    let termination = loop {
        while let Some(request) = binding.poll_transmit() {
            let transport = transport.clone();
            tasks.spawn(async move {
                let received = AssertUnwindSafe(transport.receive(request))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(ReceiveError::Transport("receive panicked".into())));
                TaskOutput::Received(received)
            });
        }

        while let Some(message) = binding.poll_delivery() {
            let callback = handler.handle(message);
            tasks.spawn(async move {
                callback.await;
                TaskOutput::Handled
            });
        }

        if let Some(termination) = binding.termination() {
            break termination.clone();
        }

        let retry_at = binding.poll_retry_timeout();
        let retry_sleep = time::sleep_until(
            retry_at
                .map(time::Instant::from_std)
                .unwrap_or_else(time::Instant::now),
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                binding.handle_client_input(ListenerCommand::Stop, now());
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                Ok(TaskOutput::Received(Ok(Some(message)))) => {
                    binding.handle_receive_outcome(ReceiveOutcome::Message(message), now());
                }
                Ok(TaskOutput::Received(Ok(None))) => {
                    binding.handle_receive_outcome(ReceiveOutcome::Empty, now());
                }
                Ok(TaskOutput::Received(Err(e))) => {
                    let reason = e.to_string();
                    let outcome = match e {
                        ReceiveError::Transport(_) => ReceiveOutcome::Unreachable { reason },
                        e => ReceiveOutcome::Failed { reason, fatal: e.is_fatal() },
                    };
                    binding.handle_receive_outcome(outcome, now());
                }
                Ok(TaskOutput::Handled) => binding.handle_callback_complete(),
                // Receives catch their own panics, so this was a callback
                Err(e) if e.is_panic() => {
                    log::error!("Message callback panicked");
                    binding.handle_callback_complete();
                }
                Err(e) => break Termination::Failed(format!("Delivery task was lost: {e}")),
            },
            _ = retry_sleep, if retry_at.is_some() => {
                binding.handle_retry_timeout(now());
            }
        }
    };

    tasks.shutdown().await;

    match termination {
        Termination::Stopped => {
            log::info!("Listener stopped");
            Ok(())
        }
        Termination::Failed(reason) => Err(ClientError::ListenerFailed(reason)),
    }
}
