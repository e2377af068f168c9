use std::future::Future;

use futures::{future::BoxFuture, FutureExt as _};
use servicebus_codec::Message;

/// Callback invoked once per delivered message.
///
/// Implemented for every `Fn(Message) -> impl Future<Output = ()>`.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: Message) -> BoxFuture<'static, ()>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, message: Message) -> BoxFuture<'static, ()> {
        (self)(message).boxed()
    }
}
