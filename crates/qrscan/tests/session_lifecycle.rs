//! End-to-end session tests against the simulated camera
//!
//! Each test wires a `SessionController` to a `SimEnvironment`, drives
//! frames through the simulated hardware and observes what reaches the
//! caller.

use std::time::Duration;

use pretty_assertions::assert_eq;
use qrscan::backend::modern::FlashMode;
use qrscan::sim::{PayloadDetectorFactory, SimEnvironment, SimUnit};
use qrscan::{
    BackendKind, BarcodeFormat, DetectionBatch, DetectionStream, Facing, ScanError,
    SessionController, SessionState, StartRequest,
};
use scanconf::CameraConfig;

const LEGACY: u32 = 19;
const MODERN: u32 = 28;

fn controller_for(env: &SimEnvironment, api_level: u32) -> (SessionController, DetectionStream) {
    SessionController::new(env.platform(api_level), CameraConfig::default())
}

async fn next_batch(detections: &mut DetectionStream) -> DetectionBatch {
    tokio::time::timeout(Duration::from_secs(2), detections.recv())
        .await
        .expect("timed out waiting for detections")
        .expect("detection stream closed")
}

async fn assert_no_batch(detections: &mut DetectionStream) {
    let got = tokio::time::timeout(Duration::from_millis(200), detections.recv()).await;
    assert!(got.is_err(), "unexpected detections: {got:?}");
}

#[tokio::test]
async fn modern_session_detects_and_releases_everything() {
    let env = SimEnvironment::new(vec![SimUnit::back(90)]);
    let (controller, mut detections) = controller_for(&env, MODERN);

    let info = controller
        .start(StartRequest::new(640, 480))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(info.backend, BackendKind::Modern);
    assert_eq!((info.surface_width, info.surface_height), (640, 480));
    assert_eq!(info.surface_orientation, 90);
    assert_eq!(controller.state(), SessionState::Running);
    assert_eq!(controller.session_id(), Some(info.session_id));

    env.camera.emit_frame(b"QR_CODE:HELLO");
    env.camera.flush();
    let batch = next_batch(&mut detections).await;
    assert_eq!(batch.session, info.session_id);
    assert_eq!(batch.codes.len(), 1);
    assert_eq!(batch.codes[0].content.as_deref(), Some("HELLO"));
    assert_eq!(batch.codes[0].raw_bytes, b"HELLO".to_vec());
    assert_eq!(batch.codes[0].format, BarcodeFormat::QrCode);

    controller.stop();
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(!env.camera.is_device_open());
    assert!(env.camera.open_units().is_empty());
    assert_eq!(env.surfaces.live_surfaces(), 0);
    assert_eq!(env.camera.outstanding_buffers(), 0);

    // Controls without a session are no-ops.
    controller.heartbeat();
    controller.set_torch(true);
    controller.stop();
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn legacy_session_reports_upright_surface() {
    let env = SimEnvironment::new(vec![
        SimUnit::back(90).with_preview_sizes(&[(640, 480), (1280, 720)]),
    ]);
    let (controller, mut detections) = controller_for(&env, LEGACY);

    let info = controller
        .start(StartRequest::new(480, 640))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(info.backend, BackendKind::Legacy);
    assert_eq!((info.surface_width, info.surface_height), (480, 640));
    assert_eq!(info.surface_orientation, 0);
    assert_eq!(
        env.surfaces.last_surface().unwrap().buffer_size(),
        Some(qrscan::Size::new(640, 480))
    );

    env.camera.emit_frame(b"DATA_MATRIX:legacy\nPDF417:second");
    env.camera.flush();
    let batch = next_batch(&mut detections).await;
    let formats: Vec<_> = batch.codes.iter().map(|c| c.format).collect();
    assert_eq!(formats, vec![BarcodeFormat::DataMatrix, BarcodeFormat::Pdf417]);

    controller.stop();
    assert!(env.camera.open_units().is_empty());
    assert_eq!(env.surfaces.live_surfaces(), 0);
}

#[tokio::test]
async fn busy_pipeline_drops_new_frames() {
    let env = SimEnvironment::with_detectors(
        vec![SimUnit::back(90)],
        PayloadDetectorFactory::with_latency(Duration::from_millis(150)),
    );
    let (controller, mut detections) = controller_for(&env, MODERN);
    controller
        .start(StartRequest::new(640, 480))
        .unwrap()
        .await
        .unwrap();

    for i in 0..5 {
        env.camera.emit_frame(format!("QR_CODE:frame-{i}").as_bytes());
    }
    env.camera.flush();

    let batch = next_batch(&mut detections).await;
    assert_eq!(batch.codes[0].content.as_deref(), Some("frame-0"));
    assert_eq!(batch.frame_seq, 1);

    let stats = controller.stats().unwrap();
    assert_eq!(stats.received, 5);
    assert_eq!(stats.dropped, 4);
    assert_eq!(stats.processed, 1);
    assert_eq!(env.camera.outstanding_buffers(), 0);

    controller.stop();
}

#[tokio::test]
async fn nothing_is_delivered_after_stop() {
    let env = SimEnvironment::with_detectors(
        vec![SimUnit::back(90)],
        PayloadDetectorFactory::with_latency(Duration::from_millis(50)),
    );
    let (controller, mut detections) = controller_for(&env, MODERN);
    controller
        .start(StartRequest::new(640, 480))
        .unwrap()
        .await
        .unwrap();

    env.camera.emit_frame(b"QR_CODE:in-flight");
    env.camera.flush();
    tokio::task::yield_now().await;
    controller.stop();

    env.camera.emit_frame(b"QR_CODE:after-stop");
    env.camera.flush();
    assert_no_batch(&mut detections).await;
    assert_eq!(env.camera.outstanding_buffers(), 0);
}

#[tokio::test]
async fn restart_gets_fresh_session_and_no_stale_results() {
    let env = SimEnvironment::new(vec![SimUnit::back(90)]);
    let (controller, mut detections) = controller_for(&env, MODERN);

    let first = controller
        .start(StartRequest::new(640, 480))
        .unwrap()
        .await
        .unwrap();
    controller.stop();

    let second = controller
        .start(StartRequest::new(640, 480))
        .unwrap()
        .await
        .unwrap();
    assert!(second.session_id > first.session_id);

    env.camera.emit_frame(b"QR_CODE:second");
    env.camera.flush();
    let batch = next_batch(&mut detections).await;
    assert_eq!(batch.session, second.session_id);
    controller.stop();
}

#[tokio::test]
async fn torch_follows_on_ready() {
    let env = SimEnvironment::new(vec![SimUnit::back(90).with_flash()]);
    let (controller, _detections) = controller_for(&env, MODERN);
    controller
        .start(StartRequest::new(640, 480))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(env.camera.last_request().unwrap().flash, FlashMode::Off);

    controller.set_torch(true);
    env.camera.flush();
    assert_eq!(env.camera.last_request().unwrap().flash, FlashMode::Torch);

    controller.set_torch(true);
    env.camera.flush();
    assert_eq!(env.camera.stop_repeating_count(), 1);
    controller.stop();
}

#[tokio::test]
async fn format_filter_reaches_detector() {
    let env = SimEnvironment::new(vec![SimUnit::back(90)]);
    let (controller, mut detections) = controller_for(&env, MODERN);
    controller
        .start(StartRequest::new(640, 480).with_formats(["EAN_13", "BOGUS"]))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(env.detectors.last_options().unwrap().formats, 32);

    env.camera.emit_frame(b"QR_CODE:ignored\nEAN_13:4006381333931");
    env.camera.flush();
    let batch = next_batch(&mut detections).await;
    assert_eq!(batch.codes.len(), 1);
    assert_eq!(batch.codes[0].format, BarcodeFormat::Ean13);
    controller.stop();
}

#[tokio::test]
async fn detector_faults_are_skipped() {
    let env = SimEnvironment::new(vec![SimUnit::back(90)]);
    let (controller, mut detections) = controller_for(&env, MODERN);
    controller
        .start(StartRequest::new(640, 480))
        .unwrap()
        .await
        .unwrap();

    env.camera.emit_frame(b"ERR");
    env.camera.flush();
    assert_no_batch(&mut detections).await;

    env.camera.emit_frame(b"AZTEC:recovered");
    env.camera.flush();
    let batch = next_batch(&mut detections).await;
    assert_eq!(batch.codes[0].content.as_deref(), Some("recovered"));
    assert_eq!(controller.stats().unwrap().detector_errors, 1);
    assert_eq!(controller.state(), SessionState::Running);
    controller.stop();
}

#[tokio::test]
async fn watchdog_ends_abandoned_session() {
    let env = SimEnvironment::new(vec![SimUnit::back(90)]);
    let (controller, _detections) = controller_for(&env, MODERN);
    controller
        .start(StartRequest::new(640, 480).with_heartbeat_timeout(Duration::from_millis(100)))
        .unwrap()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(controller.session_id(), None);
    assert!(!env.camera.is_device_open());
    assert_eq!(env.surfaces.live_surfaces(), 0);
}

#[tokio::test]
async fn hardware_errors_resolve_the_pending_start() {
    let env = SimEnvironment::new(vec![SimUnit::back(90)]);
    let (controller, _detections) = controller_for(&env, MODERN);
    let err = controller
        .start(StartRequest::new(640, 480).with_facing(Facing::TowardsUser))
        .unwrap()
        .await
        .unwrap_err();
    assert_eq!(err, ScanError::NoMatchingCamera);
    assert_eq!(err.code(), "QRREADER_ERROR");
    assert_eq!(err.reason(), "noMatchingCamera");

    let env = SimEnvironment::new(vec![SimUnit::back(90).failing_configure()]);
    let (controller, _detections) = controller_for(&env, MODERN);
    let err = controller
        .start(StartRequest::new(640, 480))
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::CameraUnavailable(_)));
    assert_eq!(controller.state(), SessionState::Idle);
    env.camera.flush();
    assert!(!env.camera.is_device_open());
    assert_eq!(env.surfaces.live_surfaces(), 0);
}

#[tokio::test]
async fn detections_can_be_consumed_as_a_stream() {
    use tokio_stream::StreamExt;

    let env = SimEnvironment::new(vec![SimUnit::back(90)]);
    let (controller, detections) = controller_for(&env, MODERN);
    let mut stream = detections.into_stream();
    controller
        .start(StartRequest::new(640, 480))
        .unwrap()
        .await
        .unwrap();

    env.camera.emit_frame(b"QR_CODE:streamed");
    env.camera.flush();
    let batch = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for detections")
        .expect("detection stream closed");
    assert_eq!(batch.codes[0].content.as_deref(), Some("streamed"));

    // The stream ends with its controller.
    drop(controller);
    let end = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("stream did not end");
    assert!(end.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watchdog_teardown_while_frames_stream() {
    let env = SimEnvironment::new(vec![SimUnit::back(90)]);
    let (controller, _detections) = controller_for(&env, MODERN);
    controller
        .start(StartRequest::new(640, 480).with_heartbeat_timeout(Duration::from_millis(100)))
        .unwrap()
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while controller.state() != SessionState::Idle && tokio::time::Instant::now() < deadline {
        env.camera.emit_frame(b"QR_CODE:busy");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(controller.state(), SessionState::Idle);

    env.camera.flush();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!env.camera.is_device_open());
    assert_eq!(env.surfaces.live_surfaces(), 0);
    assert_eq!(env.camera.outstanding_buffers(), 0);
}
