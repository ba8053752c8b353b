//! Typed RPC between an action server and an authenticated client, over a
//! binary envelope.
//!
//! The wire format is a self-describing MessagePack map
//! (`application/vnd.msgpack`); see [`envelope`]. The server ([`Appserver`])
//! hosts actions at `POST /exec/<action>` with typed inputs as schemas, a
//! fixed error taxonomy mapped onto HTTP statuses, and a Prometheus-style
//! metrics endpoint. The client ([`Appclient`]) executes actions, holds its
//! bearer token in a reactive cell, and resolves the current user through a
//! dispatcher whenever that token changes.
//!
//! Error policy: the server never lets a handler failure escape the request
//! boundary (undeclared failures become logged, opaque 500s); the client
//! throws [`ClientError`], and callers that want a reactive view wrap calls
//! in a dispatcher, the way the client itself does for `auth/whoami`.

pub mod envelope;
pub mod metrics;

mod client;
mod error;
mod server;

pub use client::Appclient;
pub use error::{
    ActionError, AppserverError, ClientError, FieldError, HandledError,
};
pub use server::Appserver;
