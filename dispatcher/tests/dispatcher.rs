use dispatcher::{DispatchError, DispatchPayload, Dispatcher};
use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use whispr::Cell;

#[tokio::test]
async fn debounced_burst_runs_the_handler_once_for_the_last_value() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let input = Cell::new(String::from("a"));
    let started = Instant::now();

    let results = Dispatcher::new(&input, Duration::from_millis(200), {
        let calls = Arc::clone(&calls);
        move |value: String, _progress, _abort| {
            calls.lock().unwrap().push((value.clone(), started.elapsed()));
            async move { Ok(format!("{value}-result")) }
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    input.set("ab".into());
    tokio::time::sleep(Duration::from_millis(70)).await;
    input.set("abc".into());

    results.ready().await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "superseded values must not run the handler");
    assert_eq!(calls[0].0, "abc");
    // last write at ~120ms plus the 200ms debounce window
    assert!(calls[0].1 >= Duration::from_millis(320));
    assert_eq!(results.data().get(), Some("abc-result".into()));
}

#[tokio::test]
async fn every_reset_publishes_loading_synchronously() {
    let input = Cell::new(0);
    let results = Dispatcher::new(&input, Duration::from_millis(100), {
        move |n: i32, _progress, _abort| async move { Ok(n * 2) }
    });

    let loading_seen = Arc::new(Mutex::new(0));
    let _sub = results.state().subscribe({
        let loading_seen = Arc::clone(&loading_seen);
        move |state| {
            if state.payload.is_loading() {
                *loading_seen.lock().unwrap() += 1;
            }
        }
    });

    // each write resets to loading before `set` returns, even though the
    // superseded runs never execute
    input.set(1);
    assert_eq!(*loading_seen.lock().unwrap(), 1);
    input.set(2);
    assert_eq!(*loading_seen.lock().unwrap(), 2);
    input.set(3);
    assert_eq!(*loading_seen.lock().unwrap(), 3);

    results.ready().await;
    assert_eq!(results.data().get(), Some(6));
}

#[tokio::test]
async fn equal_input_writes_do_not_redispatch() {
    let calls = Arc::new(Mutex::new(0));
    let input = Cell::new(7);
    let results = Dispatcher::new(&input, Duration::ZERO, {
        let calls = Arc::clone(&calls);
        move |n: i32, _progress, _abort| {
            *calls.lock().unwrap() += 1;
            async move { Ok(n) }
        }
    });

    results.ready().await;
    input.set(7);
    input.set(7);
    results.ready().await;

    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn handler_failure_becomes_state_not_a_panic() {
    let input = Cell::new(1);
    let results = Dispatcher::new(&input, Duration::ZERO, {
        move |n: i32, _progress, _abort| async move {
            if n % 2 == 1 {
                Err(DispatchError::message(format!("odd input: {n}")))
            } else {
                Ok(n)
            }
        }
    });

    results.ready().await;
    let state = results.state().get();
    assert_eq!(
        state.payload.error().map(ToString::to_string),
        Some("odd input: 1".into())
    );
    assert_eq!(results.data().get(), None);

    // a later successful run replaces the failure
    input.set(2);
    results.ready().await;
    assert_eq!(results.data().get(), Some(2));
}

#[tokio::test]
async fn aborted_runs_never_publish() {
    let input = Cell::new(String::from("slow"));
    let results = Dispatcher::new(&input, Duration::ZERO, {
        move |value: String, _progress, _abort| async move {
            if value == "slow" {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok(format!("{value}-result"))
        }
    });

    let published = Arc::new(Mutex::new(Vec::new()));
    let _sub = results.state().subscribe({
        let published = Arc::clone(&published);
        move |state| {
            if let DispatchPayload::Ready { data } = &state.payload {
                published.lock().unwrap().push(data.clone());
            }
        }
    });

    // let the slow run start, then supersede it
    tokio::time::sleep(Duration::from_millis(20)).await;
    input.set("fast".into());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(&*published.lock().unwrap(), &["fast-result"]);
}

#[tokio::test]
async fn progress_reports_flow_through_loading_payloads() {
    let input = Cell::new(());
    let results = Dispatcher::new(&input, Duration::ZERO, {
        move |_: (), progress, _abort| async move {
            progress.report(0.5);
            progress.report(1.0);
            Ok("done")
        }
    });

    let fractions = Arc::new(Mutex::new(Vec::new()));
    let _sub = results.state().subscribe({
        let fractions = Arc::clone(&fractions);
        move |state| {
            if let DispatchPayload::Loading { progress } = state.payload {
                fractions.lock().unwrap().push(progress);
            }
        }
    });

    results.ready().await;
    assert_eq!(&*fractions.lock().unwrap(), &[0.5, 1.0]);
    assert_eq!(results.data().get(), Some("done"));
}

#[tokio::test]
async fn handlers_can_stop_early_via_the_controller() {
    let input = Cell::new(1u32);
    let results = Dispatcher::new(&input, Duration::ZERO, {
        move |n: u32, _progress, abort| async move {
            if n == 1 {
                // simulate work that honors the cancellation capability
                abort.cancelled().await;
                Ok(0)
            } else {
                Ok(n)
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(results.is_loading());

    input.set(2);
    results.ready().await;
    assert_eq!(results.data().get(), Some(2));
}
