use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use std::collections::HashMap;

use crate::connection::Peer;
use crate::types::{method_not_found, Request, Response};

pub type MethodFuture = BoxFuture<'static, Option<Response>>;

/// One registered method. Handlers receive the peer handle when the request
/// arrived over a WebSocket session; HTTP one-shots get `None`.
pub trait MethodHandler: Send + Sync {
    fn call(&self, request: Request, peer: Option<Peer>) -> MethodFuture;
}

impl<F> MethodHandler for F
where
    F: Fn(Request, Option<Peer>) -> MethodFuture + Send + Sync,
{
    fn call(&self, request: Request, peer: Option<Peer>) -> MethodFuture {
        self(request, peer)
    }
}

/// Method dispatcher keyed by method name.
#[derive(Default)]
pub struct Mux {
    handlers: HashMap<String, Box<dyn MethodHandler>>,
}

impl Mux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_fn<F>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(Request, Option<Peer>) -> MethodFuture + Send + Sync + 'static,
    {
        self.handlers.insert(method.into(), Box::new(handler));
    }

    pub async fn serve(&self, request: Request, peer: Option<Peer>) -> Option<Response> {
        match self.handlers.get(&request.method) {
            Some(handler) => handler.call(request, peer).await,
            None => method_not_found(request.id),
        }
    }
}

/// Dispatches a parsed payload and serializes the answer. A batch always
/// yields a JSON array (possibly empty) in input order; a single request
/// yields its response, or nothing if it was a notification.
pub async fn handle_requests(
    mux: &Mux,
    peer: Option<&Peer>,
    requests: Vec<Request>,
    batch: bool,
) -> Result<Option<String>> {
    let mut responses = Vec::with_capacity(requests.len());
    for request in requests {
        if let Some(response) = mux.serve(request, peer.cloned()).await {
            responses.push(response);
        }
    }

    if batch {
        let body = serde_json::to_string(&responses).context("failed to marshal batch results")?;
        return Ok(Some(body));
    }
    match responses.first() {
        Some(response) => {
            let body = serde_json::to_string(response).context("failed to marshal result")?;
            Ok(Some(body))
        }
        None => Ok(None),
    }
}
