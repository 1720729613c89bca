// src/core/events.rs

//! The event dispatcher seam and `EventRouter`, its default implementation, which
//! routes decoded messages to async handlers by message name.

use crate::connection::ConnectionHandle;
use crate::core::LodestoneError;
use crate::core::codec::DecodedArgs;
use crate::core::protocol::Message;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Interprets a decoded message.
#[async_trait]
pub trait EventDispatcher: Send + Sync + 'static {
    async fn handle(
        &self,
        conn: &ConnectionHandle,
        message: &Message,
        args: DecodedArgs,
    ) -> Result<(), LodestoneError>;
}

type BoxedHandler = Arc<
    dyn Fn(ConnectionHandle, Message, DecodedArgs) -> BoxFuture<'static, Result<(), LodestoneError>>
        + Send
        + Sync,
>;

/// Routes messages to handlers registered under their name.
#[derive(Clone, Default)]
pub struct EventRouter {
    routes: HashMap<String, BoxedHandler>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for messages named `name`, replacing any previous one.
    pub fn on<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(ConnectionHandle, Message, DecodedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), LodestoneError>> + Send + 'static,
    {
        let boxed: BoxedHandler = Arc::new(move |conn, message, args| {
            Box::pin(handler(conn, message, args))
        });
        self.routes.insert(name.to_string(), boxed);
        self
    }
}

#[async_trait]
impl EventDispatcher for EventRouter {
    async fn handle(
        &self,
        conn: &ConnectionHandle,
        message: &Message,
        args: DecodedArgs,
    ) -> Result<(), LodestoneError> {
        match self.routes.get(&message.name) {
            Some(handler) => handler(conn.clone(), message.clone(), args).await,
            None => {
                debug!(
                    "Session {}: no handler for message '{}'.",
                    conn.session_id(),
                    message.name
                );
                Ok(())
            }
        }
    }
}
