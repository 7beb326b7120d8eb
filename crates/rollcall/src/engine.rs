//! The attendance engine: camera, models and session driven on a
//! dedicated OS thread.
//!
//! Startup is fail-fast: the camera is opened and both ONNX models plus
//! the gallery are loaded before the thread spawns. Per-frame recognition
//! failures are logged and treated as "no face" so a transient inference
//! error cannot kill a running session.

use crate::config::Config;
use crate::overlay::{self, Banner, Overlay};
use crate::session::{ClassWindow, Session, TickOutcome};
use crate::speech::{self, Announcer};
use crate::store::{Store, StoreError};
use chrono::Local;
use rollcall_core::{BoundingBox, Classifier, FaceDetector, FaceEmbedder};
use rollcall_hw::{frame, Camera};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::detector::DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] rollcall_core::embedder::EmbedderError),
    #[error("classifier error: {0}")]
    Classifier(#[from] rollcall_core::classifier::ClassifierError),
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Handle to the running engine thread.
pub struct EngineHandle {
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl EngineHandle {
    /// Signal the loop to stop and wait for it to flush and exit.
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if self.thread.join().is_err() {
            tracing::error!("engine thread panicked");
        }
    }
}

/// Open all resources and start the attendance loop on its own thread.
pub fn spawn_engine(
    config: &Config,
    store: Store,
    announcer: Box<dyn Announcer + Send>,
) -> Result<EngineHandle, EngineError> {
    let camera = Camera::open(&config.camera_device)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let detector = FaceDetector::load(&config.detector_model_path())?;
    let embedder = FaceEmbedder::load(&config.embedder_model_path())?;
    let classifier = Classifier::load(&config.gallery_path, config.unknown_floor)?;
    tracing::info!(
        variant = %config.detection_method,
        gallery = classifier.gallery_len(),
        "recognition stack ready"
    );

    let window = ClassWindow::new(config.start_time()?, config.max_window_secs);
    let shutdown = Arc::new(AtomicBool::new(false));

    let thread = std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn({
            let shutdown = Arc::clone(&shutdown);
            let config = config.clone();
            move || {
                run_loop(
                    &config, camera, detector, embedder, classifier, store, announcer, window,
                    &shutdown,
                );
            }
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { shutdown, thread })
}

/// The attendance loop proper. Runs until the shutdown flag flips, then
/// drains any unflushed sheet to the store.
#[allow(clippy::too_many_arguments)]
fn run_loop(
    config: &Config,
    camera: Camera,
    mut detector: FaceDetector,
    mut embedder: FaceEmbedder,
    classifier: Classifier,
    store: Store,
    announcer: Box<dyn Announcer + Send>,
    window: ClassWindow,
    shutdown: &AtomicBool,
) {
    let mut stream = match camera.stream() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to start capture stream");
            return;
        }
    };

    // Discard warmup frames so camera AGC/AE can settle.
    if config.warmup_frames > 0 {
        tracing::info!(count = config.warmup_frames, "discarding warmup frames");
        for _ in 0..config.warmup_frames {
            let _ = stream.next_frame();
        }
    }

    let mut session = Session::new(window, config.consec_frames);
    let mut names: HashMap<String, String> = HashMap::new();
    let mut last_banner: Option<Banner> = None;

    tracing::info!(class = %config.class_name, start = %config.class_start, "taking attendance");

    while !shutdown.load(Ordering::Relaxed) {
        let now = Local::now();

        let mut frame = match stream.next_frame() {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "frame capture failed");
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
        };

        let recognition_active = matches!(
            window.status(now.time()),
            crate::session::WindowStatus::Open { .. }
        );

        let mut faces: Vec<BoundingBox> = Vec::new();
        let mut observed: Option<String> = None;

        if recognition_active && !frame.is_dark {
            frame::mirror_horizontal(&mut frame.data, frame.width, frame.height);
            frame::clahe_enhance(&mut frame.data, frame.width, frame.height, 8, 0.02);

            (faces, observed) = observe_frame(
                &mut detector,
                &mut embedder,
                &classifier,
                &frame.data,
                frame.width,
                frame.height,
            );
        }

        let outcome = session.tick(now.time(), observed.as_deref());

        for face in &faces {
            overlay::draw_box(&mut frame.data, frame.width, frame.height, face);
        }

        let (banner, remaining) = match &outcome {
            TickOutcome::Closed { flush } => {
                if let Some(entries) = flush {
                    persist(&store, entries);
                }
                (Banner::Closed, None)
            }
            TickOutcome::Pending => (Banner::Prompt, None),
            TickOutcome::NoFace { remaining_secs }
            | TickOutcome::Unconfirmed { remaining_secs } => {
                (Banner::Prompt, Some(*remaining_secs))
            }
            TickOutcome::Marked { student_id, remaining_secs } => {
                let name = display_name(&store, &mut names, student_id);
                tracing::info!(student = %student_id, name = %name, "marked present");

                if let Err(e) = announcer.announce(&speech::confirmation_phrase(&name)) {
                    tracing::warn!(error = %e, "speech announcement failed");
                }

                if let Some(dir) = &config.snapshot_dir {
                    let date = now.format("%Y-%m-%d").to_string();
                    match overlay::save_snapshot(
                        dir, &date, student_id, &frame.data, frame.width, frame.height,
                    ) {
                        Ok(path) => tracing::debug!(path = %path.display(), "snapshot saved"),
                        Err(e) => tracing::warn!(error = %e, "snapshot failed"),
                    }
                }

                (Banner::Marked { name }, Some(*remaining_secs))
            }
            TickOutcome::AlreadyMarked { student_id, remaining_secs } => {
                let name = display_name(&store, &mut names, student_id);
                (Banner::Marked { name }, Some(*remaining_secs))
            }
        };

        let status = Overlay {
            class_name: config.class_name.clone(),
            class_start: config.class_start.clone(),
            now: now.time(),
            remaining_secs: remaining,
            banner: banner.clone(),
        };

        // Full status only on banner transitions; per-frame detail at debug.
        if last_banner.as_ref() != Some(&banner) {
            for line in status.status_lines() {
                tracing::info!("{line}");
            }
            last_banner = Some(banner);
        } else {
            tracing::debug!(
                faces = faces.len(),
                marked = session.marked_count(),
                remaining = ?remaining,
                "frame processed"
            );
        }
    }

    // Operator quit with the window still open: the sheet has not been
    // flushed yet.
    if let Some(entries) = session.drain_unflushed() {
        tracing::info!(students = entries.len(), "flushing attendance on shutdown");
        persist(&store, &entries);
    }

    tracing::info!("engine thread exiting");
}

/// Detect, embed, and classify the first face in a frame.
///
/// Any per-frame inference failure is logged and reported as "no face".
fn observe_frame(
    detector: &mut FaceDetector,
    embedder: &mut FaceEmbedder,
    classifier: &Classifier,
    gray: &[u8],
    width: u32,
    height: u32,
) -> (Vec<BoundingBox>, Option<String>) {
    let faces = match detector.detect(gray, width, height) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "face detection failed");
            return (Vec::new(), None);
        }
    };

    let Some(face) = faces.first() else {
        return (faces, None);
    };

    let embedding = match embedder.extract(gray, width, height, face) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "embedding extraction failed");
            return (faces, None);
        }
    };

    let identification = classifier.classify(&embedding);
    tracing::debug!(
        student = %identification.student_id,
        similarity = identification.similarity,
        confidence = face.confidence,
        "frame classified"
    );

    let label = identification.student_id;
    (faces, Some(label))
}

/// Roster lookup with a per-session cache. A confirmed id missing from
/// the roster is logged and shown by raw id; attendance still stands.
fn display_name(store: &Store, cache: &mut HashMap<String, String>, student_id: &str) -> String {
    if let Some(name) = cache.get(student_id) {
        return name.clone();
    }

    let name = match store.student_name(student_id) {
        Ok(name) => name,
        Err(StoreError::UnknownStudent(_)) => {
            tracing::error!(student = %student_id, "confirmed student missing from roster");
            student_id.to_string()
        }
        Err(e) => {
            tracing::error!(error = %e, "roster lookup failed");
            student_id.to_string()
        }
    };

    cache.insert(student_id.to_string(), name.clone());
    name
}

fn persist(store: &Store, entries: &std::collections::BTreeMap<String, String>) {
    let today = Local::now().date_naive();
    if let Err(e) = store.record_day(today, entries) {
        tracing::error!(error = %e, "failed to record attendance");
    }
}
