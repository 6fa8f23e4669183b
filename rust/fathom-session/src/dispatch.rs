use std::fmt;

use fathom_schema::MethodKind;
use futures_util::StreamExt;

use crate::{Error, ProtocolBinding, Request, RequestStream};

/// Handles requests for one method.
///
/// Implemented for any `Fn(Request) -> Result<(), Error>`.
pub trait Handler: Send + Sync {
    fn handle(&self, request: Request) -> Result<(), Error>;
}

impl<F> Handler for F
where
    F: Fn(Request) -> Result<(), Error> + Send + Sync,
{
    fn handle(&self, request: Request) -> Result<(), Error> {
        self(request)
    }
}

/// Routes requests to per-method handlers.
///
/// Handler slots are indexed by method position in the binding, so dispatch
/// is a single index once the stream has resolved the ordinal.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use fathom_schema::{LibraryBuilder, Type};
/// use fathom_session::{Dispatcher, ProtocolBinding, Request};
///
/// let mut builder = LibraryBuilder::new("example.echo");
/// builder
///     .add_protocol("Echo")
///     .two_way("Say", [("text", Type::string())], [("text", Type::string())]);
/// let binding = ProtocolBinding::new(Arc::new(builder.build().unwrap()), "Echo").unwrap();
///
/// let mut dispatcher = Dispatcher::new(binding);
/// dispatcher
///     .on("Say", |request: Request| {
///         let (args, responder, _) = request.into_parts();
///         match responder {
///             Some(responder) => responder.send(args),
///             None => Ok(()),
///         }
///     })
///     .unwrap();
/// assert!(dispatcher.has_handler("Say"));
/// ```
pub struct Dispatcher {
    binding: ProtocolBinding,
    handlers: Vec<Option<Box<dyn Handler>>>,
}

impl Dispatcher {
    pub fn new(binding: ProtocolBinding) -> Self {
        let handlers = binding.methods().iter().map(|_| None).collect();
        Self { binding, handlers }
    }

    /// Install the handler for `method`, replacing any previous one.
    pub fn on(
        &mut self,
        method: &str,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self, Error> {
        let index = self.binding.method_index(method)?;
        let kind = self.binding.method_at(index).kind;
        if kind == MethodKind::Event {
            return Err(Error::InvalidMethodKind {
                method: method.to_owned(),
                kind,
            });
        }
        self.handlers[index] = Some(Box::new(handler));
        Ok(self)
    }

    pub fn has_handler(&self, method: &str) -> bool {
        self.binding
            .method_index(method)
            .is_ok_and(|index| self.handlers[index].is_some())
    }

    /// Run the handler for `request`.
    ///
    /// A method without a handler has its responder released without
    /// shutting the connection down and fails with
    /// [`Error::TransitionalMethodUnimplemented`] if the method is
    /// transitional, or [`Error::UnknownOrdinal`] otherwise.
    pub fn dispatch(&self, mut request: Request) -> Result<(), Error> {
        let index = self
            .binding
            .index_of(request.ordinal())
            .ok_or_else(|| Error::UnknownOrdinal {
                ordinal: request.ordinal(),
                protocol_name: self.binding.protocol_name().to_owned(),
            })?;
        let method = self.binding.method_at(index);
        let _span = tracing::debug_span!(
            "dispatch",
            method = %method.name,
            tx_id = request.tx_id(),
            protocol = self.binding.protocol_name()
        )
        .entered();
        if let Some(handler) = &self.handlers[index] {
            return handler.handle(request);
        }
        if let Some(responder) = request.take_responder() {
            responder.drop_without_shutdown();
        }
        let protocol_name = self.binding.protocol_name().to_owned();
        if method.is_transitional {
            tracing::debug!(method = %method.name, "transitional method not implemented");
            Err(Error::TransitionalMethodUnimplemented {
                method: method.name.clone(),
                protocol_name,
            })
        } else {
            Err(Error::UnknownOrdinal {
                ordinal: method.ordinal,
                protocol_name,
            })
        }
    }

    /// Serve `stream` until it ends.
    ///
    /// Per-request failures are logged and the stream keeps serving; a
    /// transport read failure ends serving with that error.
    pub async fn serve(&self, mut stream: RequestStream) -> Result<(), Error> {
        let protocol = self.binding.protocol_name();
        tracing::debug!(protocol, "serving");
        while let Some(item) = stream.next().await {
            match item.and_then(|request| self.dispatch(request)) {
                Ok(()) => {}
                Err(err @ Error::ServerRequestRead(_)) => return Err(err),
                Err(err) => tracing::warn!(protocol, %err, "request failed"),
            }
        }
        tracing::debug!(protocol, "stream ended");
        Ok(())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handled: Vec<_> = self
            .binding
            .methods()
            .iter()
            .zip(&self.handlers)
            .filter(|(_, handler)| handler.is_some())
            .map(|(method, _)| method.name.as_str())
            .collect();
        f.debug_struct("Dispatcher")
            .field("protocol", &self.binding.protocol_name())
            .field("handled", &handled)
            .finish()
    }
}
