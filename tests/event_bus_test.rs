use std::{sync::Arc, time::Duration};

use interactive_kernel::{
    EventKind, EventPayload, FailureKind, Kernel, KernelConfig, ProfileConfig,
};
use pretty_assertions::assert_eq;
use tokio_stream::StreamExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

#[tokio::test]
async fn test_subscribers_see_the_same_log_as_the_caller() {
    let kernel = Kernel::script(KernelConfig::default());
    let (mut first, _) = kernel.subscribe();
    let (mut second, _) = kernel.subscribe();

    let result = kernel.submit_code("echo one; echo two").await;

    let first = first.drain();
    let second = second.drain();
    assert_eq!(first, result.events);
    assert_eq!(second, result.events);
    assert!(first.iter().all(|e| e.command.token == result.command.token));
}

#[tokio::test]
async fn test_event_stream_delivers_live_events() {
    let kernel = Arc::new(Kernel::script(KernelConfig::default()));
    let (events, _) = kernel.subscribe();

    let runner = kernel.clone();
    let handle = tokio::spawn(async move {
        runner
            .submit_code("echo a; Start-Sleep -Milliseconds 20; echo b")
            .await
    });

    let kinds: Vec<EventKind> = events
        .into_stream()
        .take(5)
        .map(|event| event.kind())
        .collect()
        .await;
    assert_eq!(
        kinds,
        vec![
            EventKind::CodeSubmissionReceived,
            EventKind::CompleteCodeSubmissionReceived,
            EventKind::StandardOutputValueProduced,
            EventKind::StandardOutputValueProduced,
            EventKind::CommandSucceeded,
        ]
    );
    assert!(handle.await.unwrap().succeeded());
}

#[tokio::test]
async fn test_profile_failure_goes_to_error_channel() {
    let kernel = Kernel::script(KernelConfig {
        profile: ProfileConfig {
            enabled: true,
            scripts: vec!["throw 'bad profile'".to_string()],
            paths: vec![],
        },
        ..Default::default()
    });
    let (mut events, mut errors) = kernel.subscribe();

    let result = kernel.submit_code("echo still-works").await;
    assert_eq!(result.standard_output(), vec!["still-works\n"]);

    let error = tokio::time::timeout(Duration::from_secs(1), errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(error.error_type, "ProfileFailed");
    assert_eq!(error.message, "bad profile");

    // nothing from the profile reaches the event log
    assert_eq!(events.drain(), result.events);
}

#[tokio::test]
async fn test_cancel_from_another_task() {
    let kernel = Arc::new(Kernel::script(KernelConfig::default()));
    assert!(!kernel.cancel());

    let runner = kernel.clone();
    let handle = tokio::spawn(async move { runner.submit_code("Start-Sleep -Seconds 30").await });

    let mut cancelled = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if kernel.cancel() {
            cancelled = true;
            break;
        }
    }
    assert!(cancelled);

    let result = handle.await.unwrap();
    assert_eq!(
        result.failure(),
        Some((FailureKind::Cancelled, "Command cancelled"))
    );
    match result.events.last().map(|e| &e.payload) {
        Some(EventPayload::CommandFailed { .. }) => {}
        other => panic!("unexpected terminal event {:?}", other),
    }
}
