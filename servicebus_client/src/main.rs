mod args;
mod printer;

use std::{
    error::Error,
    future::Future,
    io::Write,
    process::ExitCode,
    sync::{Arc, Mutex, PoisonError},
};

use clap::Parser;

use args::{Cli, ListenerConfig};
use servicebus_client::{ClientError, Message, MessageOptions, SubscriptionClient, Transport};

/// Console shared by the setup code and the message callback.
type Console<W> = Arc<Mutex<W>>;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let Cli { args } = Cli::parse();

    let console = Arc::new(Mutex::new(std::io::stdout()));
    run(&args, connect, interrupted(), console).await
}

fn connect(config: &ListenerConfig) -> Result<SubscriptionClient, ClientError> {
    SubscriptionClient::create_from_connection_string(
        &config.connection_string,
        &config.topic_name,
        &config.subscription_name,
    )
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {e}");
        futures::future::pending::<()>().await;
    }
}

/// Validates `args` and only then connects through `connect`, listening until
/// `shutdown` resolves or the listener fails.
async fn run<T, C, W>(
    args: &[String],
    connect: C,
    shutdown: impl Future<Output = ()>,
    console: Console<W>,
) -> ExitCode
where
    T: Transport,
    C: FnOnce(&ListenerConfig) -> Result<SubscriptionClient<T>, ClientError>,
    W: Write + Send + 'static,
{
    let config = match ListenerConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            say(&console, &format!("{e}\n\n{}", args::usage()));
            return ExitCode::FAILURE;
        }
    };
    log::debug!("Starting with {config:?}");

    match listen(&config, connect, shutdown, console.clone()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            say(
                &console,
                &format!("General error. Exiting program.\n\n{}", report(&e)),
            );
            ExitCode::FAILURE
        }
    }
}

async fn listen<T, C, W>(
    config: &ListenerConfig,
    connect: C,
    shutdown: impl Future<Output = ()>,
    console: Console<W>,
) -> Result<(), ClientError>
where
    T: Transport,
    C: FnOnce(&ListenerConfig) -> Result<SubscriptionClient<T>, ClientError>,
    W: Write + Send + 'static,
{
    let client = connect(config)?;

    let options = MessageOptions {
        auto_complete: true,
        max_concurrent_calls: 1,
    };
    let mut handle = client.on_message(print_to(console.clone()), options)?;

    say(
        &console,
        &format!(
            "Listening for messages on topic '{}'...\nPress Ctrl+C to exit.",
            config.topic_name
        ),
    );

    tokio::select! {
        () = shutdown => log::info!("Interrupted; stopping listener"),
        joined = &mut handle.task => return joined?,
    }

    handle.stop().await
}

/// Message callback printing every delivered message to `console`.
fn print_to<W>(
    console: Console<W>,
) -> impl Fn(Message) -> std::future::Ready<()> + Send + Sync + 'static
where
    W: Write + Send + 'static,
{
    move |message: Message| {
        log::debug!(
            "Delivered message {:?} (sequence number {:?}, {:?} bytes)",
            message.properties.message_id,
            message.properties.sequence_number,
            message.body_len()
        );

        let mut out = console.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = printer::print_message(&mut *out, message.body.as_deref()) {
            log::error!("Failed to write message to console: {e}");
        }
        std::future::ready(())
    }
}

fn say<W: Write>(console: &Mutex<W>, text: &str) {
    let mut out = console.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = writeln!(out, "{text}").and_then(|()| out.flush()) {
        log::error!("Failed to write to console: {e}");
    }
}

/// Error message followed by every underlying cause.
fn report(error: &dyn Error) -> String {
    let mut report = format!("Error Message: '{error}'");
    let mut source = error.source();
    while let Some(cause) = source {
        report.push_str(&format!("\n\nCaused by: '{cause}'"));
        source = cause.source();
    }
    report
}
