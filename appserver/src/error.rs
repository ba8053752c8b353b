use http::StatusCode;
use rmpv::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One structured validation failure, as carried by a 422 response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

/// The server-side error taxonomy. Every variant maps onto an HTTP status
/// and a stable machine-readable code; the response body is the encoded
/// [`AppserverError::wire_body`].
#[derive(Debug, Error)]
pub enum AppserverError {
    #[error("request content type must be `application/vnd.msgpack`")]
    InvalidTypeHeader,
    #[error("request body is not a valid envelope")]
    InvalidBody,
    /// Carries the structured errors and the received input, so clients can
    /// see exactly what the server rejected.
    #[error("input validation failed")]
    ValidationFailed {
        errors: Vec<FieldError>,
        received: Value,
    },
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("permission denied")]
    PermissionDenied,
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    /// An application-declared error, surfaced with its own status and
    /// payload.
    #[error("{message}")]
    Handled {
        status: u16,
        code: String,
        message: String,
        payload: Value,
    },
    /// Anything the handler threw that it did not declare. Details are
    /// logged server-side and never leave the process.
    #[error("internal server error")]
    Internal,
}

impl AppserverError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidTypeHeader | Self::InvalidBody => {
                StatusCode::BAD_REQUEST
            }
            Self::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::UnknownAction(_) => StatusCode::NOT_FOUND,
            Self::Handled { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|status| status.is_client_error() || status.is_server_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::InvalidTypeHeader => "request_invalid_type_header",
            Self::InvalidBody => "request_invalid_body",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::AuthenticationRequired => "authentication_required",
            Self::PermissionDenied => "permission_denied",
            Self::UnknownAction(_) => "not_found",
            Self::Handled { code, .. } => code,
            Self::Internal => "internal_server_error",
        }
    }

    /// The response body: `{error, code, payload}`, plus `errors` and
    /// `received` for validation failures.
    pub(crate) fn wire_body(&self) -> Value {
        let mut entries = vec![
            (Value::from("error"), Value::from(self.to_string())),
            (Value::from("code"), Value::from(self.code())),
        ];
        match self {
            Self::ValidationFailed { errors, received } => {
                let errors = errors
                    .iter()
                    .map(|error| {
                        let mut fields = Vec::new();
                        if let Some(field) = &error.field {
                            fields.push((
                                Value::from("field"),
                                Value::from(field.as_str()),
                            ));
                        }
                        fields.push((
                            Value::from("message"),
                            Value::from(error.message.as_str()),
                        ));
                        Value::Map(fields)
                    })
                    .collect();
                entries.push((Value::from("errors"), Value::Array(errors)));
                entries.push((Value::from("received"), received.clone()));
            }
            Self::Handled { payload, .. } => {
                entries.push((Value::from("payload"), payload.clone()));
            }
            _ => {}
        }
        Value::Map(entries)
    }
}

/// An error a handler chooses to expose to clients, with a stable code and a
/// structured payload.
///
/// This intentionally does not implement `std::error::Error`: that keeps it
/// distinguishable from undeclared errors in [`ActionError`]'s blanket
/// conversion, the same way the dispatcher's error wrapper works.
#[derive(Clone, Debug)]
pub struct HandledError {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub payload: Value,
}

impl HandledError {
    /// `status` must be an error status (>= 400); anything else is coerced
    /// to 500 at response time.
    pub fn new(
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            payload: Value::Nil,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

impl fmt::Display for HandledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// What a handler can fail with: a declared [`HandledError`] that reaches
/// the client as-is, or anything else, which becomes an opaque 500.
///
/// The blanket `From` lets handlers use `?` on ordinary errors.
#[derive(Debug)]
pub enum ActionError {
    Handled(HandledError),
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handled(handled) => handled.fmt(f),
            Self::Other(error) => error.fmt(f),
        }
    }
}

impl From<HandledError> for ActionError {
    fn from(handled: HandledError) -> Self {
        Self::Handled(handled)
    }
}

impl<E> From<E> for ActionError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::Other(Box::new(error))
    }
}

/// Errors thrown by the RPC client.
///
/// Unlike the dispatcher, the client *does* throw; callers that want a
/// reactive view wrap calls in a dispatcher.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered 401 or 403. The client's auth token cell has
    /// been invalidated, unless it changed while the call was in flight.
    #[error("permission denied")]
    PermissionDenied,
    #[error("not found")]
    NotFound,
    #[error("input validation failed")]
    Validation { errors: Vec<FieldError> },
    #[error("server error `{code}`: {message}")]
    Server {
        code: String,
        message: String,
        payload: Value,
    },
    #[error("unexpected response status {status}")]
    Unexpected { status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("could not encode request: {0}")]
    Encode(String),
}
