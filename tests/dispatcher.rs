mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use camwatch::detect::{DetectionResult, StubBackend};
use camwatch::frame::JPEG_SOI;
use camwatch::{
    cancel_pair, CancelHandle, ChatId, DetectionDispatcher, DispatcherConfig, IterationOutcome,
    RawChunk, SharedConfig,
};

use common::{detections, framed_chunk, RecordingDelivery, ScriptedSource};

fn settings(destination: Option<ChatId>) -> SharedConfig {
    let settings = SharedConfig::new("http://192.168.0.104/", 0.6, "yolo.onnx").unwrap();
    if let Some(destination) = destination {
        settings.set_destination(destination);
    }
    settings
}

fn dispatcher(
    settings: SharedConfig,
    source: ScriptedSource,
    backend: StubBackend,
    delivery: Arc<RecordingDelivery>,
) -> (DetectionDispatcher, CancelHandle) {
    let (handle, token) = cancel_pair();
    let dispatcher = DetectionDispatcher::new(
        settings,
        Box::new(source),
        Box::new(backend),
        delivery,
        DispatcherConfig::default(),
        token,
    );
    (dispatcher, handle)
}

#[tokio::test(start_paused = true)]
async fn frame_without_detections_is_not_delivered() {
    let delivery = Arc::new(RecordingDelivery::default());
    let source = ScriptedSource::new().then_chunk(framed_chunk());
    let backend = StubBackend::new().with_fallback(DetectionResult::default());
    let (mut dispatcher, _handle) =
        dispatcher(settings(Some(ChatId(7))), source, backend, delivery.clone());

    let outcome = dispatcher.step().await;
    assert!(matches!(outcome, IterationOutcome::NoDetections));
    assert!(delivery.sent().is_empty());
    assert_eq!(dispatcher.pause_after(&outcome), Duration::from_millis(100));
    assert_eq!(dispatcher.stats().snapshot().frames, 1);
}

#[tokio::test(start_paused = true)]
async fn detection_is_delivered_then_cooled_down() {
    let delivery = Arc::new(RecordingDelivery::default());
    let source = ScriptedSource::new().then_chunk(framed_chunk());
    let backend = StubBackend::new().then_detect(detections(0.8));
    let (mut dispatcher, _handle) =
        dispatcher(settings(Some(ChatId(7))), source, backend, delivery.clone());

    let outcome = dispatcher.step().await;
    assert!(outcome.is_delivered());
    let sent = delivery.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].destination, ChatId(7));
    assert_eq!(sent[0].jpeg[..2], JPEG_SOI);
    assert!(image::load_from_memory(&sent[0].jpeg).is_ok());
    assert_eq!(
        dispatcher.pause_after(&outcome),
        Duration::from_secs(2) + Duration::from_millis(100)
    );
    assert_eq!(dispatcher.stats().snapshot().deliveries, 1);
}

#[tokio::test(start_paused = true)]
async fn detections_without_destination_are_kept_local() {
    let delivery = Arc::new(RecordingDelivery::default());
    let source = ScriptedSource::new().then_chunk(framed_chunk());
    let backend = StubBackend::new().then_detect(detections(0.9));
    let (mut dispatcher, _handle) = dispatcher(settings(None), source, backend, delivery.clone());

    match dispatcher.step().await {
        IterationOutcome::Undelivered { detections } => assert_eq!(detections.len(), 1),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(delivery.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn chunk_without_frame_and_corrupt_frame_yield_no_frame() {
    let delivery = Arc::new(RecordingDelivery::default());
    let source = ScriptedSource::new()
        .then_chunk(RawChunk::new(Vec::new(), true))
        .then_chunk(RawChunk::new(vec![0x00, 0xFF, 0xD9, 0xFF, 0xD8], false))
        .then_chunk(RawChunk::new(vec![0x01, 0x02, 0xFF, 0xD9], true))
        .then_chunk(RawChunk::new(vec![0xFF, 0xD8, 0xAA, 0xBB, 0xFF, 0xD9], true));
    let backend = StubBackend::new().with_fallback(detections(0.9));
    let (mut dispatcher, _handle) =
        dispatcher(settings(Some(ChatId(1))), source, backend, delivery.clone());

    for _ in 0..4 {
        assert!(matches!(dispatcher.step().await, IterationOutcome::NoFrame));
    }
    assert!(delivery.sent().is_empty());
    assert_eq!(dispatcher.stats().snapshot().failures, 0);
}

#[tokio::test(start_paused = true)]
async fn fetch_error_is_reported_and_next_iteration_proceeds() {
    let delivery = Arc::new(RecordingDelivery::default());
    let source = ScriptedSource::new()
        .then_error("connection reset")
        .then_chunk(framed_chunk());
    let backend = StubBackend::new().with_fallback(detections(0.8));
    let (mut dispatcher, _handle) =
        dispatcher(settings(Some(ChatId(3))), source, backend, delivery.clone());

    let failed = dispatcher.step().await;
    match &failed {
        IterationOutcome::Failed(err) => assert!(format!("{:#}", err).contains("connection reset")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(dispatcher.pause_after(&failed), Duration::from_millis(100));

    assert!(dispatcher.step().await.is_delivered());
    let stats = dispatcher.stats().snapshot();
    assert_eq!(stats.iterations, 2);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.deliveries, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_delivery_does_not_cool_down() {
    let delivery = Arc::new(RecordingDelivery::failing());
    let source = ScriptedSource::new().then_chunk(framed_chunk());
    let resets = source.reset_counter();
    let backend = StubBackend::new().then_detect(detections(0.8));
    let (mut dispatcher, _handle) =
        dispatcher(settings(Some(ChatId(3))), source, backend, delivery.clone());

    let outcome = dispatcher.step().await;
    assert!(outcome.is_failed());
    assert_eq!(dispatcher.pause_after(&outcome), Duration::from_millis(100));
    assert_eq!(resets.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn stream_is_reopened_only_after_a_delivery() {
    let delivery = Arc::new(RecordingDelivery::default());
    let source = ScriptedSource::new().repeating(framed_chunk());
    let resets = source.reset_counter();
    let backend = StubBackend::new()
        .then_detect(DetectionResult::default())
        .then_detect(detections(0.9))
        .then_detect(detections(0.8));
    let shared = settings(None);
    let (mut dispatcher, _handle) = dispatcher(shared.clone(), source, backend, delivery.clone());

    assert!(matches!(dispatcher.step().await, IterationOutcome::NoDetections));
    assert!(matches!(
        dispatcher.step().await,
        IterationOutcome::Undelivered { .. }
    ));
    assert_eq!(resets.load(Ordering::SeqCst), 0);

    shared.set_destination(ChatId(5));
    assert!(dispatcher.step().await.is_delivered());
    assert_eq!(resets.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn settings_changes_apply_on_next_iteration() {
    let delivery = Arc::new(RecordingDelivery::default());
    let source = ScriptedSource::new().repeating(framed_chunk());
    let urls = source.url_log();
    let backend = StubBackend::new().with_fallback(detections(0.5));
    let shared = settings(Some(ChatId(9)));
    let (mut dispatcher, _handle) = dispatcher(shared.clone(), source, backend, delivery.clone());

    assert!(matches!(dispatcher.step().await, IterationOutcome::NoDetections));

    shared.set_threshold(0.4).unwrap();
    shared.set_stream_url("http://10.0.0.5:81/stream").unwrap();
    assert!(dispatcher.step().await.is_delivered());

    let urls = urls.lock().unwrap().clone();
    assert_eq!(urls, vec!["http://192.168.0.104/", "http://10.0.0.5:81/stream"]);
}

#[tokio::test(start_paused = true)]
async fn deliveries_are_spaced_by_the_cooldown() {
    let delivery = Arc::new(RecordingDelivery::default());
    let source = ScriptedSource::new().repeating(framed_chunk());
    let backend = StubBackend::new().with_fallback(detections(0.9));
    let (dispatcher, handle) =
        dispatcher(settings(Some(ChatId(5))), source, backend, delivery.clone());

    let task = tokio::spawn(dispatcher.run());
    tokio::time::sleep(Duration::from_secs(7)).await;
    handle.cancel();
    let stats = task.await.unwrap();

    let sent = delivery.sent();
    assert!(sent.len() >= 3, "expected several deliveries, got {}", sent.len());
    for pair in sent.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_secs(2));
    }
    assert_eq!(stats.deliveries as usize, sent.len());
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_a_stalled_fetch() {
    let delivery = Arc::new(RecordingDelivery::default());
    let source = ScriptedSource::new();
    let fetches = source.fetch_counter();
    let (dispatcher, handle) = dispatcher(
        settings(Some(ChatId(5))),
        source,
        StubBackend::new(),
        delivery.clone(),
    );

    let task = tokio::spawn(dispatcher.run());
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    handle.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("dispatcher exits after cancel")
        .unwrap();
    assert_eq!(stats.iterations, 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_does_not_iterate() {
    let delivery = Arc::new(RecordingDelivery::default());
    let source = ScriptedSource::new().repeating(framed_chunk());
    let fetches = source.fetch_counter();
    let (dispatcher, handle) = dispatcher(
        settings(Some(ChatId(5))),
        source,
        StubBackend::new(),
        delivery.clone(),
    );

    handle.cancel();
    let stats = dispatcher.run().await;
    assert_eq!(stats.iterations, 0);
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
}
