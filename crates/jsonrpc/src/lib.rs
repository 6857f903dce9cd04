//! JSON-RPC 2.0 transport: wire types, method dispatch, and the HTTP /
//! WebSocket server with support for server-initiated notifications.

mod connection;
mod mux;
mod server;
mod types;

pub use self::connection::{NotifyError, Peer};
pub use axum::extract::ws::Message as WsMessage;
pub use self::mux::{handle_requests, MethodFuture, MethodHandler, Mux};
pub use self::server::RpcServer;
pub use self::types::{
    error_response, invalid_params, is_batch, method_not_found, parse_error, parse_requests,
    result_response, ErrorObject, Request, Response, ERR_INVALID_PARAMS, ERR_METHOD_NOT_FOUND,
    ERR_PARSE, VERSION,
};
