mod connection;
mod error;
mod handler;
mod transport;

pub use connection::{ListenerHandle, SubscriptionClient};
pub use error::ClientError;
pub use handler::MessageHandler;
pub use transport::{HttpTransport, Transport};

pub use servicebus_codec::{BodyError, BrokerProperties, Message, ReceiveError, ReceiveRequest};
pub use servicebus_sans_io::MessageOptions;
