use crate::{
    envelope,
    error::{ClientError, FieldError},
};
use dispatcher::{DispatchPayload, DispatchState, Dispatcher};
use http::header;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use whispr::{Cell, ReadCell};

static CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// The action the user dispatcher resolves the current user from.
const WHOAMI_ACTION: &str = "auth/whoami";

/// How long [`Appclient::login`] waits for the user dispatcher to settle
/// before reporting failure.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct EmptyInput {}

#[derive(Debug, Deserialize)]
struct WhoamiResponse<U> {
    user: Option<U>,
}

#[derive(Debug, Default, Deserialize)]
struct ValidationBody {
    #[serde(default)]
    errors: Vec<FieldError>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: String,
    #[serde(default = "nil")]
    payload: rmpv::Value,
}

impl Default for ErrorBody {
    fn default() -> Self {
        Self {
            error: String::new(),
            code: String::new(),
            payload: rmpv::Value::Nil,
        }
    }
}

fn nil() -> rmpv::Value {
    rmpv::Value::Nil
}

/// A typed, authenticated RPC caller whose login state is itself reactive.
///
/// The bearer token lives in a cell; a debounce-0 [`Dispatcher`] over that
/// cell resolves the current user through `auth/whoami`, so every token
/// change (including the invalidation performed on a 401/403 response)
/// re-resolves the user reactively.
pub struct Appclient<U> {
    url: String,
    auth_token: Cell<Option<String>>,
    user: Dispatcher<Option<String>, Option<U>>,
}

impl<U> Appclient<U>
where
    U: Clone + PartialEq + DeserializeOwned + Send + Sync + 'static,
{
    /// Must be called within a tokio runtime (the user dispatcher spawns).
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let auth_token = Cell::new(None::<String>);
        let user = Dispatcher::new(&auth_token, Duration::ZERO, {
            let url = url.clone();
            let auth_token = auth_token.clone();
            move |token: Option<String>, _progress, _abort| {
                let url = url.clone();
                let auth_token = auth_token.clone();
                async move {
                    if token.is_none() {
                        return Ok(None);
                    }
                    let response: WhoamiResponse<U> = request(
                        &url,
                        &format!("/exec/{WHOAMI_ACTION}"),
                        &auth_token,
                        &EmptyInput {},
                    )
                    .await?;
                    Ok(response.user)
                }
            }
        });
        Self {
            url,
            auth_token,
            user,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The current bearer token. `None` means unauthenticated.
    pub fn auth_token(&self) -> ReadCell<Option<String>> {
        self.auth_token.read_only()
    }

    /// Publishes a new token. A write equal to the current token is a no-op;
    /// an actual change re-resolves the user.
    pub fn set_auth_token(&self, token: Option<String>) {
        self.auth_token.set(token);
    }

    /// The resolved user, `None` while unresolved or unauthenticated.
    pub fn user(&self) -> ReadCell<Option<U>> {
        self.user.data().map(|user| user.clone().flatten())
    }

    /// The user dispatcher's full state, for callers that need to
    /// distinguish "resolving" from "resolved to nothing".
    pub fn user_state(&self) -> ReadCell<DispatchState<Option<U>>> {
        self.user.state()
    }

    /// Sets the token and waits for the user resolution it triggers,
    /// reporting whether a user actually resolved. Returns `false` on
    /// timeout rather than blocking a caller forever.
    ///
    /// A rejected token settles on a resolved-but-null user (the rejection
    /// invalidates the token, and the null token resolves to no user), so
    /// "left loading" alone would vacuously report success.
    pub async fn login(&self, token: impl Into<String>) -> bool {
        self.set_auth_token(Some(token.into()));
        if tokio::time::timeout(LOGIN_TIMEOUT, self.user.ready())
            .await
            .is_err()
        {
            return false;
        }
        self.user.state().with(|state| {
            matches!(&state.payload, DispatchPayload::Ready { data: Some(_) })
        })
    }

    /// Executes a named action.
    pub async fn exec<I, O>(
        &self,
        action: &str,
        input: &I,
    ) -> Result<O, ClientError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        self.unsafe_exec(&format!("/exec/{action}"), input).await
    }

    /// Executes against a raw server path. Prefer [`Appclient::exec`].
    pub async fn unsafe_exec<I, O>(
        &self,
        path: &str,
        input: &I,
    ) -> Result<O, ClientError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        request(&self.url, path, &self.auth_token, input).await
    }
}

/// One request/response cycle, including the 401/403 invalidation dance.
///
/// The token is snapshotted before sending; if the server rejects the call
/// as unauthenticated, the snapshot is compared against the cell before
/// invalidating, so a token that was replaced while the call was in flight
/// is never clobbered.
async fn request<I, O>(
    url: &str,
    path: &str,
    auth_token: &Cell<Option<String>>,
    input: &I,
) -> Result<O, ClientError>
where
    I: Serialize,
    O: DeserializeOwned,
{
    let tested_token = auth_token.get();
    let body = envelope::encode(input)
        .map_err(|err| ClientError::Encode(err.to_string()))?;

    let mut builder = CLIENT
        .post(format!("{url}{path}"))
        .header(header::CONTENT_TYPE, envelope::CONTENT_TYPE)
        .body(body);
    if let Some(token) = &tested_token {
        builder = builder.bearer_auth(token);
    }

    let response = builder
        .send()
        .await
        .map_err(|err| ClientError::Transport(err.to_string()))?;
    let status = response.status().as_u16();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| ClientError::Transport(err.to_string()))?;

    match status {
        200 => envelope::decode(&bytes)
            .map_err(|err| ClientError::Decode(err.to_string())),
        401 | 403 => {
            if auth_token.get() == tested_token {
                auth_token.set(None);
            } else {
                tracing::debug!(
                    "auth token changed mid-flight, leaving it in place"
                );
            }
            Err(ClientError::PermissionDenied)
        }
        404 => Err(ClientError::NotFound),
        422 => {
            let body: ValidationBody =
                envelope::decode(&bytes).unwrap_or_default();
            Err(ClientError::Validation {
                errors: body.errors,
            })
        }
        // declared errors carry their own status but share the body shape
        // of a 400/500
        status if status >= 400 => {
            let body: ErrorBody = envelope::decode(&bytes).unwrap_or_default();
            Err(ClientError::Server {
                code: body.code,
                message: body.error,
                payload: body.payload,
            })
        }
        status => Err(ClientError::Unexpected { status }),
    }
}
