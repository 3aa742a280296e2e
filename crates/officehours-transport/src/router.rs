//! Dispatch of decoded server pushes to the subscriber's handlers.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{error::ErrorSignal, protocol::Envelope};

type UpdateHandler<T> = Box<dyn FnMut(T, &ErrorSignal) + Send>;
type DeleteHandler = Box<dyn FnMut(&ErrorSignal) + Send>;

/// Routing failure.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The message is not a valid envelope for this subscription.
    #[error("Invalid message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// `deleted` arrived and nobody handles it.
    #[error("Unexpected message type 'deleted'")]
    UnexpectedDeleted,
}

/// Routes the messages of one subscription.
///
/// `init` and `update` both carry a full snapshot and go to the update
/// handler, in arrival order. `deleted` goes to the delete handler. Handlers
/// registered with [`MessageRouter::with_errors`] and the delete handler
/// receive the connection's error signal so they can surface a message.
pub struct MessageRouter<T> {
    on_update: UpdateHandler<T>,
    on_delete: Option<DeleteHandler>,
}

impl<T: DeserializeOwned> MessageRouter<T> {
    /// Create a router with an update handler and no delete handler.
    #[must_use]
    pub fn new<F>(mut on_update: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self::with_errors(move |content: T, _: &ErrorSignal| on_update(content))
    }

    /// Create a router whose update handler may surface or clear errors,
    /// e.g. for payloads that decode but cannot be shown.
    #[must_use]
    pub fn with_errors<F>(on_update: F) -> Self
    where
        F: FnMut(T, &ErrorSignal) + Send + 'static,
    {
        Self {
            on_update: Box::new(on_update),
            on_delete: None,
        }
    }

    /// Register the delete handler.
    #[must_use]
    pub fn on_delete<F>(mut self, on_delete: F) -> Self
    where
        F: FnMut(&ErrorSignal) + Send + 'static,
    {
        self.on_delete = Some(Box::new(on_delete));
        self
    }

    /// Decode `text` and invoke the matching handler.
    ///
    /// # Errors
    /// Returns [`RouteError::Malformed`] for undecodable messages and
    /// [`RouteError::UnexpectedDeleted`] for a `deleted` message without a
    /// delete handler.
    pub fn route(&mut self, text: &str, errors: &ErrorSignal) -> Result<(), RouteError> {
        match Envelope::<T>::decode(text)? {
            Envelope::Init(content) | Envelope::Update(content) => {
                (self.on_update)(content, errors);
                Ok(())
            }
            Envelope::Deleted => {
                let on_delete = self
                    .on_delete
                    .as_mut()
                    .ok_or(RouteError::UnexpectedDeleted)?;
                on_delete(errors);
                Ok(())
            }
        }
    }
}
