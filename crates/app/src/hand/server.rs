//! Actix Web surface: the MJPEG stream, the pose snapshot, the stop signal,
//! and a Prometheus scrape endpoint.
//!
//! The server runs on a dedicated thread so the capture loop never shares a
//! runtime with Actix. All routes answer any origin; failures inside the
//! pipeline never surface as non-200 responses.

use std::{sync::Mutex, thread, time::Duration};

use actix_web::{
    http::header,
    web::{self, Bytes},
    App, HttpResponse, HttpResponseBuilder, HttpServer,
};
use anyhow::{Context, Result};
use async_stream::stream;
use tokio::sync::oneshot;
use tracing::error;

use crate::hand::{
    config::{HandConfig, BIND_ADDR, PACING_MS},
    pipeline::{spawn_pipeline, PipelineShared},
    telemetry,
};

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) shared: PipelineShared,
    pub(crate) config: HandConfig,
    pipeline: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ServerState {
    pub(crate) fn new(config: HandConfig, shared: PipelineShared) -> Self {
        Self {
            shared,
            config,
            pipeline: Mutex::new(None),
        }
    }
}

/// Handle for the HTTP server thread.
#[derive(Default)]
pub(crate) struct HandServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl HandServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Spawn the server thread and return a handle that can stop it.
pub(crate) fn spawn_server(config: HandConfig, shared: PipelineShared) -> Result<HandServer> {
    let state = web::Data::new(ServerState::new(config, shared));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = thread::Builder::new()
        .name("hand-http-server".into())
        .spawn(move || {
            if let Err(err) = actix_web::rt::System::new().block_on(async move {
                let server = HttpServer::new(move || {
                    App::new()
                        .app_data(state.clone())
                        .route("/video_feed", web::get().to(video_feed_handler))
                        .route("/hand_data", web::get().to(hand_data_handler))
                        .route("/stop_camera", web::get().to(stop_camera_handler))
                        .route("/metrics", web::get().to(metrics_handler))
                })
                .bind(BIND_ADDR)?
                .run();

                let srv_handle = server.handle();
                actix_web::rt::spawn(async move {
                    let _ = shutdown_rx.await;
                    srv_handle.stop(true).await;
                });

                server.await
            }) {
                error!("HTTP server error: {err}");
            }
        })
        .context("failed to spawn HTTP server thread")?;
    Ok(HandServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Cross-origin requests are permitted from any origin on all routes.
fn cors(mut builder: HttpResponseBuilder) -> HttpResponseBuilder {
    builder
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"));
    builder
}

/// Start the capture loop when idle, then relay its frames as a multipart
/// stream until the loop goes inactive or the client disconnects.
async fn video_feed_handler(state: web::Data<ServerState>) -> HttpResponse {
    start_pipeline_if_idle(&state);
    mjpeg_stream(state).await
}

fn start_pipeline_if_idle(state: &web::Data<ServerState>) {
    if state.shared.control.is_active() {
        return;
    }
    if let Ok(mut guard) = state.pipeline.lock() {
        if let Some(previous) = guard.take() {
            let _ = previous.join();
        }
    }
    match spawn_pipeline(&state.config, &state.shared) {
        Ok(handle) => {
            if let Ok(mut guard) = state.pipeline.lock() {
                *guard = Some(handle);
            }
        }
        Err(err) => {
            // Device unavailable: the stream body simply ends, still 200.
            error!("could not start capture pipeline: {err:?}");
        }
    }
}

/// Relay loop output as multipart parts, de-duplicated by frame number.
async fn mjpeg_stream(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(Duration::from_millis(PACING_MS));
        // Frames left in the mailbox by an earlier session are not replayed;
        // only frames published after this request starts are streamed.
        let mut last_seq = state
            .shared
            .frame
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|packet| packet.frame_number))
            .unwrap_or(0);
        loop {
            interval.tick().await;
            let packet = state
                .shared
                .frame
                .lock()
                .ok()
                .and_then(|guard| guard.clone());
            match packet {
                Some(packet) if packet.frame_number != last_seq => {
                    last_seq = packet.frame_number;
                    let mut payload = Vec::with_capacity(packet.jpeg.len() + 64);
                    payload.extend_from_slice(b"--frame\r\n");
                    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
                    payload.extend_from_slice(&packet.jpeg);
                    payload.extend_from_slice(b"\r\n");
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
                }
                _ => {
                    if !state.shared.control.is_active() {
                        break;
                    }
                }
            }
        }
    };

    cors(HttpResponse::Ok())
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

/// Snapshot of the latest pose summary. Safe to poll at any rate; keeps
/// serving the last-known summary after the stream stops.
async fn hand_data_handler(state: web::Data<ServerState>) -> HttpResponse {
    let pose = match state.shared.pose.lock() {
        Ok(guard) => guard.clone(),
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };
    cors(HttpResponse::Ok()).json(pose)
}

/// Request loop termination. Returns immediately; the loop observes the flag
/// on its next iteration. Safe to call when no stream is active.
async fn stop_camera_handler(state: web::Data<ServerState>) -> HttpResponse {
    state.shared.control.request_stop();
    cors(HttpResponse::Ok()).json(serde_json::json!({"status": "Camera stopping"}))
}

/// Prometheus scrape endpoint.
async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::Ok().body(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{body::to_bytes, rt, test};

    use super::*;
    use crate::hand::data::FramePacket;
    use crate::hand::pose;
    use crate::hand::detector::{landmarks, HandLandmarks, Landmark};

    fn test_state() -> web::Data<ServerState> {
        web::Data::new(ServerState::new(
            HandConfig::default(),
            PipelineShared::default(),
        ))
    }

    async fn call(state: &web::Data<ServerState>, path: &str) -> HttpResponse {
        match path {
            "/hand_data" => hand_data_handler(state.clone()).await,
            "/stop_camera" => stop_camera_handler(state.clone()).await,
            other => panic!("unknown test path {other}"),
        }
    }

    async fn body_string(response: HttpResponse) -> String {
        let bytes = to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[actix_web::test]
    async fn hand_data_returns_default_summary() {
        let state = test_state();
        let response = call(&state, "/hand_data").await;
        assert_eq!(response.status(), 200);
        let body = body_string(response).await;
        assert_eq!(
            body,
            r#"{"present":false,"x":0.0,"y":0.0,"z":0.0,"fingers":[0,0,0,0,0]}"#
        );
    }

    #[actix_web::test]
    async fn hand_data_reflects_published_pose() {
        let state = test_state();
        let mut points = [Landmark::default(); landmarks::COUNT];
        points[landmarks::WRIST] = Landmark {
            x: 0.5,
            y: 0.5,
            z: 0.0,
        };
        for &tip in &[
            landmarks::THUMB_TIP,
            landmarks::INDEX_FINGER_TIP,
            landmarks::MIDDLE_FINGER_TIP,
            landmarks::RING_FINGER_TIP,
            landmarks::PINKY_TIP,
        ] {
            points[tip].y = 0.2;
            points[tip - 2].y = 0.5;
        }
        let hand = HandLandmarks {
            landmarks: points,
            confidence: 0.9,
            handedness: "Right".into(),
        };
        pose::apply_detection(&mut state.shared.pose.lock().unwrap(), &hand);

        let body = body_string(call(&state, "/hand_data").await).await;
        assert_eq!(
            body,
            r#"{"present":true,"x":0.5,"y":0.5,"z":0.0,"fingers":[1,1,1,1,1]}"#
        );
    }

    #[actix_web::test]
    async fn stop_camera_is_idempotent() {
        let state = test_state();

        let first = call(&state, "/stop_camera").await;
        assert_eq!(first.status(), 200);
        let first_body = body_string(first).await;

        let second = call(&state, "/stop_camera").await;
        assert_eq!(second.status(), 200);
        let second_body = body_string(second).await;

        assert_eq!(first_body, r#"{"status":"Camera stopping"}"#);
        assert_eq!(first_body, second_body);
        assert!(!state.shared.control.is_active());
    }

    #[actix_web::test]
    async fn stop_camera_clears_active_flag() {
        let state = test_state();
        state.shared.control.activate();
        let _ = call(&state, "/stop_camera").await;
        assert!(!state.shared.control.is_active());
    }

    #[actix_web::test]
    async fn responses_allow_any_origin() {
        let state = test_state();
        let response = call(&state, "/hand_data").await;
        let allow_origin = response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap();
        assert_eq!(allow_origin, "*");
    }

    #[actix_web::test]
    async fn stream_does_not_replay_frames_from_an_earlier_session() {
        let state = test_state();
        // A previous session left its last frame behind and went inactive.
        *state.shared.frame.lock().unwrap() = Some(FramePacket {
            jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
            frame_number: 7,
            timestamp_ms: 0,
        });

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/video_feed", web::get().to(mjpeg_stream)),
        )
        .await;

        let request = test::TestRequest::get().uri("/video_feed").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 200);
        let body = test::read_body(response).await;
        assert!(body.is_empty());
    }

    #[actix_web::test]
    async fn stream_frames_use_fixed_part_framing_and_stop_ends_the_body() {
        let state = test_state();
        state.shared.control.activate();

        let shared = state.shared.clone();
        rt::spawn(async move {
            rt::time::sleep(Duration::from_millis(30)).await;
            if let Ok(mut guard) = shared.frame.lock() {
                *guard = Some(FramePacket {
                    jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
                    frame_number: 1,
                    timestamp_ms: 0,
                });
            }
            rt::time::sleep(Duration::from_millis(50)).await;
            shared.control.request_stop();
        });

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/video_feed", web::get().to(mjpeg_stream)),
        )
        .await;

        let request = test::TestRequest::get().uri("/video_feed").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "multipart/x-mixed-replace; boundary=frame"
        );

        let body = test::read_body(response).await;
        assert_eq!(
            body.as_ref(),
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8\xFF\xD9\r\n"
        );
    }

    #[actix_web::test]
    async fn routes_respond_through_the_router() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/hand_data", web::get().to(hand_data_handler))
                .route("/stop_camera", web::get().to(stop_camera_handler)),
        )
        .await;

        let request = test::TestRequest::get().uri("/hand_data").to_request();
        let response = test::call_service(&app, request).await;
        assert!(response.status().is_success());

        let request = test::TestRequest::get().uri("/stop_camera").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["status"], "Camera stopping");
    }
}
