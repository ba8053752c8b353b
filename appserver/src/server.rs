use crate::{
    envelope,
    error::{ActionError, AppserverError, FieldError},
    metrics,
};
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{header, HeaderMap, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::Arc,
};

type UserResolver<U> =
    Arc<dyn Fn(String) -> BoxFuture<'static, Option<U>> + Send + Sync>;
type MetricsSource =
    Arc<dyn Fn() -> BTreeMap<String, f64> + Send + Sync>;
type ActionHandler<U> = Arc<
    dyn Fn(
            rmpv::Value,
            Option<U>,
        ) -> BoxFuture<'static, Result<Bytes, AppserverError>>
        + Send
        + Sync,
>;

struct RegisteredAction<U> {
    auth_required: bool,
    handler: ActionHandler<U>,
}

/// Hosts a set of named actions at `POST /exec/<action>` plus a metrics
/// endpoint at `GET /metrics`.
///
/// Each action is registered with a typed input, an auth requirement, and a
/// handler. The typed input *is* the action's schema: a body that decodes as
/// an envelope but does not deserialize as the input type is rejected with a
/// 422 carrying structured errors and the received value.
///
/// ```no_run
/// # use appserver::{ActionError, Appserver};
/// # use serde::{Deserialize, Serialize};
/// # use std::collections::BTreeMap;
/// #[derive(Deserialize)]
/// struct AddInput { n: i64 }
/// #[derive(Serialize)]
/// struct AddOutput { sum: i64 }
///
/// let mut server = Appserver::<String>::new(
///     |_token| async move { None },
///     BTreeMap::new,
/// );
/// server.register("math/add", false, |input: AddInput, _user: Option<String>| async move {
///     Ok::<_, ActionError>(AddOutput { sum: input.n + 1 })
/// });
/// let router = server.into_router();
/// # drop(router);
/// ```
pub struct Appserver<U> {
    actions: HashMap<String, RegisteredAction<U>>,
    resolve_user: UserResolver<U>,
    metrics_source: MetricsSource,
}

impl<U> Appserver<U>
where
    U: Clone + Send + Sync + 'static,
{
    /// `resolve_user` maps a bearer token onto a user, `None` meaning the
    /// token is unknown or expired. `metrics_source` is polled by the
    /// metrics endpoint.
    pub fn new<R, RFut, M>(resolve_user: R, metrics_source: M) -> Self
    where
        R: Fn(String) -> RFut + Send + Sync + 'static,
        RFut: Future<Output = Option<U>> + Send + 'static,
        M: Fn() -> BTreeMap<String, f64> + Send + Sync + 'static,
    {
        Self {
            actions: HashMap::new(),
            resolve_user: Arc::new(move |token| Box::pin(resolve_user(token))),
            metrics_source: Arc::new(metrics_source),
        }
    }

    /// Registers an action.
    ///
    /// # Panics
    ///
    /// Re-registering an action name is a fatal configuration error and
    /// panics.
    pub fn register<I, O, H, Fut>(
        &mut self,
        action: &str,
        auth_required: bool,
        handler: H,
    ) where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        H: Fn(I, Option<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ActionError>> + Send + 'static,
    {
        if self.actions.contains_key(action) {
            panic!("action `{action}` is already registered");
        }
        let action_name = action.to_string();
        let handler = Arc::new(handler);
        let boxed: ActionHandler<U> = Arc::new(move |value, user| {
            let handler = Arc::clone(&handler);
            let action_name = action_name.clone();
            Box::pin(async move {
                let input: I = match envelope::from_value(value.clone()) {
                    Ok(input) => input,
                    Err(err) => {
                        return Err(AppserverError::ValidationFailed {
                            errors: vec![FieldError::message(err.to_string())],
                            received: value,
                        });
                    }
                };
                match handler(input, user).await {
                    Ok(output) => {
                        envelope::encode(&output).map_err(|err| {
                            tracing::error!(
                                action = %action_name,
                                error = %err,
                                "could not encode action output"
                            );
                            AppserverError::Internal
                        })
                    }
                    Err(ActionError::Handled(handled)) => {
                        Err(AppserverError::Handled {
                            status: handled.status,
                            code: handled.code,
                            message: handled.message,
                            payload: handled.payload,
                        })
                    }
                    Err(ActionError::Other(error)) => {
                        tracing::error!(
                            action = %action_name,
                            %error,
                            "action handler failed"
                        );
                        Err(AppserverError::Internal)
                    }
                }
            })
        });
        self.actions.insert(
            action.to_string(),
            RegisteredAction {
                auth_required,
                handler: boxed,
            },
        );
    }

    /// Finishes registration and produces the routable service.
    pub fn into_router(self) -> Router {
        let server = Arc::new(self);
        Router::new()
            .route("/exec/{*action}", post(exec_route::<U>))
            .route("/metrics", get(metrics_route::<U>))
            .with_state(server)
    }

    async fn handle(
        &self,
        action: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Bytes, AppserverError> {
        let registered = self
            .actions
            .get(action)
            .ok_or_else(|| AppserverError::UnknownAction(action.to_string()))?;

        if content_type(headers).as_deref() != Some(envelope::CONTENT_TYPE) {
            return Err(AppserverError::InvalidTypeHeader);
        }
        let value = envelope::decode_value(body)
            .map_err(|_| AppserverError::InvalidBody)?;

        let user = match bearer_token(headers) {
            Some(token) => (self.resolve_user)(token).await,
            None => None,
        };
        if registered.auth_required && user.is_none() {
            return Err(AppserverError::AuthenticationRequired);
        }

        (registered.handler)(value, user).await
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)?
        .to_str()
        .ok()
        .and_then(|value| value.split(';').next())
        .map(|essence| essence.trim().to_ascii_lowercase())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.to_string())
}

async fn exec_route<U>(
    State(server): State<Arc<Appserver<U>>>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    U: Clone + Send + Sync + 'static,
{
    match server.handle(&action, &headers, &body).await {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, envelope::CONTENT_TYPE)],
            output,
        )
            .into_response(),
        Err(error) => {
            // validation failures and auth gates are routine; only genuine
            // server faults log at error level
            match &error {
                AppserverError::Internal => {}
                other => tracing::debug!(
                    action = %action,
                    code = other.code(),
                    "request rejected"
                ),
            }
            error_response(&error)
        }
    }
}

async fn metrics_route<U>(
    State(server): State<Arc<Appserver<U>>>,
) -> Response
where
    U: Clone + Send + Sync + 'static,
{
    let snapshot = (server.metrics_source)();
    match metrics::render(&snapshot) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "metrics snapshot failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                String::from("# metrics unavailable\n"),
            )
                .into_response()
        }
    }
}

fn error_response(error: &AppserverError) -> Response {
    match envelope::encode_value(&error.wire_body()) {
        Ok(body) => (
            error.status(),
            [(header::CONTENT_TYPE, envelope::CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(encode_error) => {
            tracing::error!(%encode_error, "could not encode error body");
            error.status().into_response()
        }
    }
}
