use std::{error, fmt, sync::Arc};
use thiserror::Error;

/// A cheaply-cloneable wrapper for any error produced by a dispatched
/// handler.
///
/// Dispatch failures are stored in the state payload rather than thrown, so
/// the error type must be `Clone`; this wraps the underlying error in an
/// `Arc`. Any `std::error::Error` converts into it with `?`, and values that
/// are not errors can be wrapped by stringifying via
/// [`DispatchError::message`].
///
/// Note that this deliberately does *not* implement `std::error::Error`
/// itself: that is what allows the blanket `From` conversion below.
#[derive(Clone)]
pub struct DispatchError(Arc<dyn error::Error + Send + Sync>);

impl DispatchError {
    /// Wraps a plain message as an error.
    pub fn message(message: impl fmt::Display) -> Self {
        Self(Arc::new(Message(message.to_string())))
    }

    /// Converts the wrapper into the inner reference-counted error.
    pub fn into_inner(self) -> Arc<dyn error::Error + Send + Sync> {
        self.0
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DispatchError({:?})", self.0)
    }
}

// Payload equality treats two failures with the same rendered message as the
// same state, so repeated identical failures coalesce in the cell.
impl PartialEq for DispatchError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.to_string() == other.0.to_string()
    }
}

impl<T> From<T> for DispatchError
where
    T: error::Error + Send + Sync + 'static,
{
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);
