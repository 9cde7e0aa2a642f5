//!
//! Per-request routing: parse, validate, resolve, decode, invoke, encode.
//! Every failure path yields a well-formed JSON-RPC response; the
//! dispatcher never panics on malformed input, and handler panics are
//! caught and converted to internal errors.
//!

use crate::context::RequestContext;
use crate::error::{INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR};
use crate::imports::*;
use crate::message::{Message, Response, VERSION};
use crate::server::interface::{Interface, Service};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

/// The result of one dispatch: a single response object or a batch array in
/// request order.
#[derive(Debug)]
pub enum Outcome {
    Single(Response),
    Batch(Vec<Response>),
}

impl Outcome {
    pub fn to_json(&self) -> String {
        let encoded = match self {
            Outcome::Single(response) => serde_json::to_string(response),
            Outcome::Batch(responses) => serde_json::to_string(responses),
        };
        encoded.unwrap_or_else(|err| {
            error!("response serialization failed: {err}");
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{INTERNAL_ERROR},"message":"Internal error"}}}}"#
            )
        })
    }
}

pub struct Dispatcher {
    interface: Interface,
    encoding: Encoding,
}

impl Dispatcher {
    pub fn new(encoding: Encoding) -> Dispatcher {
        Dispatcher {
            interface: Interface::new(),
            encoding,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn register(&self, service: Service) -> Result<()> {
        self.interface.register(service)
    }

    pub async fn dispatch(&self, ctx: &RequestContext, body: &[u8]) -> Outcome {
        let (messages, batch) = match Message::parse(body) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Outcome::Single(Response::failure(
                    None,
                    RpcError::system(PARSE_ERROR, Some(Value::String(err.to_string()))),
                ))
            }
        };

        if batch {
            if messages.is_empty() {
                return Outcome::Single(Response::failure(
                    None,
                    RpcError::system(
                        INVALID_REQUEST,
                        Some(Value::String("empty request".to_string())),
                    ),
                ));
            }
            let mut responses = Vec::with_capacity(messages.len());
            for message in messages {
                responses.push(self.process(ctx, message).await);
            }
            Outcome::Batch(responses)
        } else {
            match messages.into_iter().next() {
                Some(message) => Outcome::Single(self.process(ctx, message).await),
                None => Outcome::Single(Response::failure(
                    None,
                    RpcError::system(INTERNAL_ERROR, None),
                )),
            }
        }
    }

    async fn process(&self, ctx: &RequestContext, msg: Message) -> Response {
        if msg.version.as_deref() != Some(VERSION) {
            return Response::failure(
                msg.id,
                RpcError::system(
                    INVALID_REQUEST,
                    Some(Value::String("invalid version".to_string())),
                ),
            );
        }
        if !msg.has_valid_id() {
            return Response::failure(
                msg.id,
                RpcError::system(
                    INVALID_REQUEST,
                    Some(Value::String("id must set".to_string())),
                ),
            );
        }

        let method_name = msg.method.clone().unwrap_or_default();
        trace!(
            "processRequest method[{method_name}] id[{}]",
            msg.id.as_deref().map(RawValue::get).unwrap_or("null"),
        );

        let handler = match self.interface.resolve(&method_name) {
            Ok(handler) => handler,
            Err(err) => return Response::failure(msg.id, err),
        };

        let id = msg.id.clone();
        let call = handler.call(ctx.clone(), msg.params.as_deref(), self.encoding);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(result)) => Response::success(id, result),
            // handler errors pass through verbatim, reserved range included
            Ok(Err(rpc_err)) => Response::failure(id, rpc_err),
            Err(panic) => {
                let cause = panic_message(panic.as_ref());
                error!("handler for {method_name} panicked: {cause}");
                Response::failure(
                    id,
                    RpcError::system(INTERNAL_ERROR, Some(Value::String(cause))),
                )
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}
