use std::sync::Arc;
use std::time::Duration;

use kubetink_core::{ObjectKey, ObjectKind, Target};
use kubetink_kubehub::{Call, ClientError, MemoryObjectClient, ReadOutcome};
use kubetink_pipeline::{ConvergencePipeline, ErrorKind, PollConfig, ProvisioningStep, ReconcileError, ENSURE_STEPS};
use kubetink_resources::{ProvisionError, CATALOG};
use tokio_util::sync::CancellationToken;

fn setup() -> (Arc<MemoryObjectClient>, ConvergencePipeline, Target) {
    let client = Arc::new(MemoryObjectClient::new());
    let pipeline = ConvergencePipeline::new(client.clone());
    (client, pipeline, Target::new("tinkerbell"))
}

fn step_for(kind: ObjectKind) -> &'static str {
    ENSURE_STEPS.iter().find(|s| s.kind() == kind).map_or("?", |s| s.name())
}

fn namespace_gets(client: &MemoryObjectClient, key: &ObjectKey) -> usize {
    client.calls().iter().filter(|c| matches!(c, Call::Get(k) if k == key)).count()
}

#[tokio::test(start_paused = true)]
async fn second_run_converges_without_error() {
    let (client, pipeline, target) = setup();
    let ctx = CancellationToken::new();

    pipeline.reconcile(&ctx, &target).await.unwrap();
    let first = client.objects();
    assert_eq!(first.len(), CATALOG.len() + 1);

    pipeline.reconcile(&ctx, &target).await.unwrap();
    assert_eq!(client.objects(), first);
    assert_eq!(client.created().len(), CATALOG.len() + 1);
}

#[tokio::test(start_paused = true)]
async fn objects_are_created_in_step_order() {
    let (client, pipeline, target) = setup();
    pipeline.reconcile(&CancellationToken::new(), &target).await.unwrap();
    let kinds: Vec<ObjectKind> = client.created().iter().map(|k| k.kind).collect();
    let mut sorted = kinds.clone();
    sorted.sort();
    assert_eq!(kinds, sorted);
    assert_eq!(kinds[0], ObjectKind::Namespace);
}

#[tokio::test(start_paused = true)]
async fn failure_at_any_object_stops_everything_after_it() {
    let target = Target::new("tinkerbell");
    for (k, failing) in CATALOG.iter().enumerate() {
        let (client, pipeline, _) = setup();
        let key = failing.key(&target);
        client.fail_create(key.clone(), "admission webhook denied");

        let err = pipeline.reconcile(&CancellationToken::new(), &target).await.unwrap_err();
        match &err {
            ReconcileError::Step { step, object, source } => {
                assert_eq!(*step, step_for(failing.kind()), "{key}");
                assert_eq!(object, &key);
                assert!(matches!(source, ProvisionError::Client(ClientError::Rejected { .. })));
            }
            other => panic!("unexpected error for {key}: {other}"),
        }
        assert_eq!(err.kind(), ErrorKind::Unexpected);

        let mut expected = vec![target.namespace_key()];
        expected.extend(CATALOG[..k].iter().map(|p| p.key(&target)));
        assert_eq!(client.created(), expected, "failing at {key}");
    }
}

#[tokio::test(start_paused = true)]
async fn namespace_create_failure_stops_the_pipeline() {
    let (client, pipeline, target) = setup();
    client.fail_create(target.namespace_key(), "forbidden");
    let err = pipeline.reconcile(&CancellationToken::new(), &target).await.unwrap_err();
    assert_eq!(err.step(), "namespace");
    assert!(client.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn existing_namespace_is_not_recreated() {
    let (client, pipeline, target) = setup();
    client.seed(kubetink_resources::namespace(&target));
    pipeline.reconcile(&CancellationToken::new(), &target).await.unwrap();
    let key = target.namespace_key();
    assert!(!client.calls().contains(&Call::Create(key.clone())));
    assert_eq!(namespace_gets(&client, &key), 1);
}

#[tokio::test(start_paused = true)]
async fn namespace_wait_retries_not_found() {
    let (client, pipeline, target) = setup();
    let key = target.namespace_key();
    // Initial read, then two stale reads after the create.
    client.script_reads(key.clone(), vec![ReadOutcome::NotFound; 3]);

    let start = tokio::time::Instant::now();
    pipeline.reconcile(&CancellationToken::new(), &target).await.unwrap();
    assert_eq!(namespace_gets(&client, &key), 4);
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(client.created().len(), CATALOG.len() + 1);
}

#[tokio::test(start_paused = true)]
async fn namespace_wait_times_out() {
    let (client, pipeline, target) = setup();
    let key = target.namespace_key();
    client.script_reads(key.clone(), vec![ReadOutcome::NotFound; 100]);

    let err = pipeline.reconcile(&CancellationToken::new(), &target).await.unwrap_err();
    match &err {
        ReconcileError::Timeout { step, namespace, waited } => {
            assert_eq!(*step, "namespace");
            assert_eq!(namespace, "tinkerbell");
            assert!(*waited >= Duration::from_secs(30));
        }
        other => panic!("expected timeout, got {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(client.created(), vec![key]);
}

#[tokio::test(start_paused = true)]
async fn namespace_wait_aborts_on_other_read_errors() {
    let (client, pipeline, target) = setup();
    let key = target.namespace_key();
    client.script_reads(
        key.clone(),
        [ReadOutcome::NotFound, ReadOutcome::NotFound, ReadOutcome::Error("connection refused".into())],
    );

    let err = pipeline.reconcile(&CancellationToken::new(), &target).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Step { step: "namespace", source: ProvisionError::Client(ClientError::Rejected { .. }), .. }
    ));
    assert_eq!(namespace_gets(&client, &key), 3);
    assert_eq!(client.created(), vec![key]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_wait() {
    let (client, pipeline, target) = setup();
    client.script_reads(target.namespace_key(), vec![ReadOutcome::NotFound; 100]);
    let ctx = CancellationToken::new();
    let trigger = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(4500)).await;
        trigger.cancel();
    });

    let start = tokio::time::Instant::now();
    let err = pipeline.reconcile(&ctx, &target).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Cancelled { step: "namespace" }));
    assert!(err.is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cancelled_context_makes_no_calls() {
    let (client, pipeline, target) = setup();
    let ctx = CancellationToken::new();
    ctx.cancel();
    let err = pipeline.reconcile(&ctx, &target).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(client.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn poll_settings_are_honoured() {
    let client = Arc::new(MemoryObjectClient::new());
    let poll = PollConfig { interval: Duration::from_millis(100), timeout: Duration::from_millis(500) };
    let pipeline = ConvergencePipeline::with_poll(client.clone(), poll);
    let target = Target::new("tinkerbell");
    client.script_reads(target.namespace_key(), vec![ReadOutcome::NotFound; 100]);

    let err = pipeline.reconcile(&CancellationToken::new(), &target).await.unwrap_err();
    match err {
        ReconcileError::Timeout { waited, .. } => assert_eq!(waited, Duration::from_millis(500)),
        other => panic!("expected timeout, got {other}"),
    }
}
