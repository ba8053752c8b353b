use appserver::{
    ActionError, Appclient, Appserver, ClientError, HandledError,
};
use rmpv::Value;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct User {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Empty {}

#[derive(Debug, Serialize, Deserialize)]
struct EchoInput {
    n: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct EchoOutput {
    n: i64,
    user: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WhoamiOutput {
    user: Option<User>,
}

type SharedMetrics = Arc<Mutex<BTreeMap<String, f64>>>;

async fn spawn_server() -> (String, SharedMetrics) {
    applog::init();

    let metrics: SharedMetrics = Arc::new(Mutex::new(BTreeMap::new()));
    let mut server = Appserver::<User>::new(
        |token: String| async move {
            match token.as_str() {
                "alice-token" => Some(User {
                    name: "alice".into(),
                }),
                "t1" => Some(User { name: "t1".into() }),
                "t2" => Some(User { name: "t2".into() }),
                _ => None,
            }
        },
        {
            let metrics = Arc::clone(&metrics);
            move || metrics.lock().unwrap().clone()
        },
    );

    server.register(
        "echo",
        false,
        |input: EchoInput, user: Option<User>| async move {
            Ok::<_, ActionError>(EchoOutput {
                n: input.n,
                user: user.map(|user| user.name),
            })
        },
    );
    server.register(
        "auth/whoami",
        true,
        |_: Empty, user: Option<User>| async move {
            Ok::<_, ActionError>(WhoamiOutput { user })
        },
    );
    server.register(
        "math/add",
        false,
        |input: EchoInput, _user: Option<User>| async move {
            Ok::<_, ActionError>(EchoOutput {
                n: input.n + 1,
                user: None,
            })
        },
    );
    server.register(
        "slow/forbidden",
        false,
        |_: Empty, _user: Option<User>| async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Err::<Empty, _>(ActionError::from(HandledError::new(
                403,
                "forbidden",
                "not for you",
            )))
        },
    );
    server.register(
        "teapot",
        false,
        |_: Empty, _user: Option<User>| async move {
            Err::<Empty, _>(ActionError::from(
                HandledError::new(418, "teapot", "short and stout")
                    .with_payload(Value::Map(vec![(
                        Value::from("lid"),
                        Value::Boolean(true),
                    )])),
            ))
        },
    );
    server.register(
        "boom",
        false,
        |_: Empty, _user: Option<User>| async move {
            let error =
                std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
            Err::<Empty, _>(error.into())
        },
    );

    let router = server.into_router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), metrics)
}

#[test]
#[should_panic(expected = "already registered")]
fn re_registering_an_action_panics() {
    let mut server = Appserver::<User>::new(
        |_token: String| async move { None },
        BTreeMap::new,
    );
    server.register("echo", false, |input: EchoInput, _: Option<User>| async move {
        Ok::<_, ActionError>(input)
    });
    server.register("echo", false, |input: EchoInput, _: Option<User>| async move {
        Ok::<_, ActionError>(input)
    });
}

#[tokio::test]
async fn round_trip_with_and_without_auth() {
    let (url, _) = spawn_server().await;
    let client = Appclient::<User>::new(&url);

    let out: EchoOutput = client.exec("echo", &EchoInput { n: 5 }).await.unwrap();
    assert_eq!(out.n, 5);
    assert_eq!(out.user, None);

    assert!(client.login("alice-token").await);
    assert_eq!(
        client.user().get(),
        Some(User {
            name: "alice".into()
        })
    );

    let out: EchoOutput = client.exec("echo", &EchoInput { n: 6 }).await.unwrap();
    assert_eq!(out.user.as_deref(), Some("alice"));
}

#[tokio::test]
async fn login_with_a_rejected_token_fails_and_invalidates() {
    let (url, _) = spawn_server().await;
    let client = Appclient::<User>::new(&url);

    assert!(!client.login("wrong-token").await);
    assert_eq!(client.auth_token().get(), None);
    assert_eq!(client.user().get(), None);
}

#[tokio::test]
async fn auth_required_actions_reject_anonymous_calls() {
    let (url, _) = spawn_server().await;
    let client = Appclient::<User>::new(&url);

    let result = client.exec::<_, WhoamiOutput>("auth/whoami", &Empty {}).await;
    assert!(matches!(result, Err(ClientError::PermissionDenied)));
}

#[tokio::test]
async fn validation_failures_carry_structured_errors() {
    #[derive(Serialize)]
    struct BadInput {
        n: &'static str,
    }

    let (url, _) = spawn_server().await;
    let client = Appclient::<User>::new(&url);

    let result = client
        .exec::<_, EchoOutput>("math/add", &BadInput { n: "x" })
        .await;
    match result {
        Err(ClientError::Validation { errors }) => {
            assert!(!errors.is_empty());
            assert!(!errors[0].message.is_empty());
        }
        other => panic!("expected a validation error, got {other:?}"),
    }

    // the schema accepts well-typed input as before
    let out: EchoOutput =
        client.exec("math/add", &EchoInput { n: 41 }).await.unwrap();
    assert_eq!(out.n, 42);
}

#[tokio::test]
async fn a_rejection_does_not_clobber_a_token_replaced_mid_flight() {
    let (url, _) = spawn_server().await;
    let client = Arc::new(Appclient::<User>::new(&url));
    client.set_auth_token(Some("t1".into()));

    let call = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.exec::<_, Empty>("slow/forbidden", &Empty {}).await }
    });

    // the application switches tokens while the call is in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.set_auth_token(Some("t2".into()));

    let result = call.await.unwrap();
    assert!(matches!(result, Err(ClientError::PermissionDenied)));
    assert_eq!(client.auth_token().get(), Some("t2".into()));
}

#[tokio::test]
async fn a_rejection_invalidates_an_unchanged_token() {
    let (url, _) = spawn_server().await;
    let client = Appclient::<User>::new(&url);
    client.set_auth_token(Some("t1".into()));

    let result = client.exec::<_, Empty>("slow/forbidden", &Empty {}).await;
    assert!(matches!(result, Err(ClientError::PermissionDenied)));
    assert_eq!(client.auth_token().get(), None);
}

#[tokio::test]
async fn unknown_actions_are_not_found() {
    let (url, _) = spawn_server().await;
    let client = Appclient::<User>::new(&url);

    let result = client.exec::<_, Empty>("no/such/action", &Empty {}).await;
    assert!(matches!(result, Err(ClientError::NotFound)));
}

#[tokio::test]
async fn handled_errors_reach_the_client_decoded() {
    let (url, _) = spawn_server().await;
    let client = Appclient::<User>::new(&url);

    let result = client.exec::<_, Empty>("teapot", &Empty {}).await;
    match result {
        Err(ClientError::Server {
            code,
            message,
            payload,
        }) => {
            assert_eq!(code, "teapot");
            assert_eq!(message, "short and stout");
            assert_eq!(
                payload,
                Value::Map(vec![(Value::from("lid"), Value::Boolean(true))])
            );
        }
        other => panic!("expected a server error, got {other:?}"),
    }
}

#[tokio::test]
async fn undeclared_handler_errors_become_opaque_500s() {
    let (url, _) = spawn_server().await;
    let client = Appclient::<User>::new(&url);

    let result = client.exec::<_, Empty>("boom", &Empty {}).await;
    match result {
        Err(ClientError::Server { code, message, .. }) => {
            assert_eq!(code, "internal_server_error");
            // the handler's own message never leaves the server
            assert!(!message.contains("disk on fire"));
        }
        other => panic!("expected a server error, got {other:?}"),
    }
}

#[tokio::test]
async fn the_wrong_content_type_is_a_400() {
    let (url, _) = spawn_server().await;

    let response = reqwest::Client::new()
        .post(format!("{url}/exec/echo"))
        .header(http::header::CONTENT_TYPE, "application/json")
        .body("{\"n\": 1}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn an_undecodable_body_is_a_400() {
    let (url, _) = spawn_server().await;

    let response = reqwest::Client::new()
        .post(format!("{url}/exec/echo"))
        .header(http::header::CONTENT_TYPE, "application/vnd.msgpack")
        // 0xc1 is the one reserved, never-valid msgpack byte
        .body(vec![0xc1u8])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn metrics_render_normalized_gauges() {
    let (url, metrics) = spawn_server().await;
    metrics.lock().unwrap().extend([
        ("Requests-Per-Sec".to_string(), 12.0),
        ("Bad Name!!".to_string(), 3.0),
    ]);

    let response = reqwest::get(format!("{url}/metrics")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let text = response.text().await.unwrap();
    assert_eq!(
        text,
        "# TYPE app_bad_name gauge\napp_bad_name 3\n\
         # TYPE app_requests_per_sec gauge\napp_requests_per_sec 12\n"
    );
}

#[tokio::test]
async fn a_non_finite_metric_fails_the_scrape() {
    let (url, metrics) = spawn_server().await;
    metrics
        .lock()
        .unwrap()
        .insert("broken".to_string(), f64::NAN);

    let response = reqwest::get(format!("{url}/metrics")).await.unwrap();
    assert_eq!(response.status().as_u16(), 500);
    assert!(response.text().await.unwrap().starts_with('#'));
}
