use clap::Parser;
use servicebus_codec::{has_connection_string_shape, is_valid_entity_name};

/// Subscription read when none is named on the command line.
pub const DEFAULT_SUBSCRIPTION: &str = "testApp1";

const USAGE: &str = "servicebus-topic-listener <topicName> [subscriptionName] <connectionString>";
const EXAMPLE: &str = "eg: servicebus-topic-listener my_topic Endpoint=sb://mysb.servicebus.windows.net/;SharedAccessKeyName=tempReaderAccessKey;SharedAccessKey=xxxxx=";

/// Prints every JSON message published to a Service Bus topic subscription.
#[derive(Parser, Debug)]
#[command(name = "servicebus-topic-listener", version, override_usage = USAGE, after_help = EXAMPLE)]
pub struct Cli {
    /// <topicName> [subscriptionName] <connectionString>; the subscription defaults to `testApp1`
    #[arg(value_name = "ARGS", num_args = 0.., allow_hyphen_values = true, trailing_var_arg = true)]
    pub args: Vec<String>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ArgsError {
    #[error("Expected 2 or 3 arguments but got {0}.")]
    WrongCount(usize),

    #[error("Invalid topic name '{0}'.")]
    InvalidTopicName(String),

    #[error("Invalid subscription name '{0}'.")]
    InvalidSubscriptionName(String),

    #[error("Invalid service bus connection string '{0}'.")]
    InvalidConnectionString(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    pub topic_name: String,
    pub subscription_name: String,
    pub connection_string: String,
}

impl std::fmt::Debug for ListenerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("topic_name", &self.topic_name)
            .field("subscription_name", &self.subscription_name)
            .finish_non_exhaustive()
    }
}

impl ListenerConfig {
    /// Validates `<topicName> <connectionString>` or
    /// `<topicName> <subscriptionName> <connectionString>`.
    pub fn from_args(args: &[String]) -> Result<Self, ArgsError> {
        let (topic_name, subscription_name, connection_string) = match args {
            [topic, connection] => (topic, None, connection),
            [topic, subscription, connection] => (topic, Some(subscription), connection),
            _ => return Err(ArgsError::WrongCount(args.len())),
        };

        if !is_valid_entity_name(topic_name) {
            return Err(ArgsError::InvalidTopicName(topic_name.clone()));
        }
        if let Some(subscription) = subscription_name {
            if !is_valid_entity_name(subscription) {
                return Err(ArgsError::InvalidSubscriptionName(subscription.clone()));
            }
        }
        if !has_connection_string_shape(connection_string) {
            return Err(ArgsError::InvalidConnectionString(
                connection_string.clone(),
            ));
        }

        Ok(Self {
            topic_name: topic_name.clone(),
            subscription_name: subscription_name
                .cloned()
                .unwrap_or_else(|| DEFAULT_SUBSCRIPTION.into()),
            connection_string: connection_string.clone(),
        })
    }
}

pub fn usage() -> String {
    format!("ServiceBusTopicListener\nUsage: {USAGE}\n{EXAMPLE}")
}
