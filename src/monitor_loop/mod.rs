//! MonitorLoop - periodic camera polling and alert dispatch
//!
//! ## Responsibilities
//!
//! - Poll enabled cameras on a fixed interval, one camera at a time
//! - Capture -> detect -> (dirty) persist event + notify recipients
//! - Per-camera rate limiting of alerts
//! - Fault isolation: a failing camera, detector call, event write or
//!   notification never affects other cameras or stops the loop
//!
//! The rate-limit map is owned by the loop task and never shared.

use crate::detector_client::DetectionVerdict;
use crate::event_store::NewDetectionEvent;
use crate::interfaces::{AlertSink, CameraSource, Detector, EventSink, FrameSource, RecipientSource};
use crate::notification_service::Alert;
use crate::registry::{Camera, RecipientList};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// When a camera's rate-limit timestamp is refreshed after a dirty detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyPolicy {
    /// Every confirmed dirty detection, whatever happened downstream
    #[default]
    OnDetection,
    /// Only when delivery succeeded, or there was nobody to notify
    OnDelivery,
}

impl FromStr for NotifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on_detection" | "detection" => Ok(NotifyPolicy::OnDetection),
            "on_delivery" | "delivery" => Ok(NotifyPolicy::OnDelivery),
            other => Err(format!("unknown notify policy '{}'", other)),
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Pause between iterations
    pub poll_interval: Duration,
    /// Minimum time between two alerts for one camera
    pub notify_interval: Duration,
    /// Pause after a failed registry read
    pub registry_backoff: Duration,
    pub capture_timeout: Duration,
    pub detect_timeout: Duration,
    pub policy: NotifyPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            notify_interval: Duration::from_secs(60),
            registry_backoff: Duration::from_secs(5),
            capture_timeout: Duration::from_secs(15),
            detect_timeout: Duration::from_secs(30),
            policy: NotifyPolicy::OnDetection,
        }
    }
}

/// Counters published for `GET /monitor/status`
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStats {
    pub running: bool,
    pub iterations: u64,
    pub last_iteration_at: Option<DateTime<Utc>>,
    pub cameras_checked: u64,
    pub rate_limited: u64,
    pub capture_failures: u64,
    pub detection_failures: u64,
    pub dirty_detections: u64,
    pub events_saved: u64,
    pub event_save_failures: u64,
    pub notifications_sent: u64,
    pub notification_failures: u64,
    pub registry_failures: u64,
}

/// What happened to one camera in one iteration
#[derive(Debug, Clone, PartialEq)]
pub enum CameraOutcome {
    RateLimited,
    CaptureFailed,
    DetectionFailed,
    Clean,
    Dirty {
        confidence: f64,
        event_id: Option<u64>,
        /// `None` when nobody could be reached: no recipients, or no channel
        /// configured for the ones there are
        notified: Option<bool>,
    },
}

/// Result of one iteration
#[derive(Debug, Clone, Default)]
pub struct IterationReport {
    pub outcomes: Vec<(i64, CameraOutcome)>,
    pub registry_failed: bool,
    /// Stop signal observed between cameras
    pub cancelled: bool,
}

/// Collaborators the loop drives
pub struct MonitorDeps {
    pub cameras: Arc<dyn CameraSource>,
    pub recipients: Arc<dyn RecipientSource>,
    pub frames: Arc<dyn FrameSource>,
    pub detector: Arc<dyn Detector>,
    pub events: Arc<dyn EventSink>,
    pub alerts: Arc<dyn AlertSink>,
}

/// MonitorLoop instance
pub struct MonitorLoop {
    config: MonitorConfig,
    deps: MonitorDeps,
    /// camera id -> last alert timestamp
    last_notified: HashMap<i64, DateTime<Utc>>,
    stats: Arc<RwLock<MonitorStats>>,
}

impl MonitorLoop {
    pub fn new(config: MonitorConfig, deps: MonitorDeps, stats: Arc<RwLock<MonitorStats>>) -> Self {
        Self {
            config,
            deps,
            last_notified: HashMap::new(),
            stats,
        }
    }

    pub fn last_notified(&self, camera_id: i64) -> Option<DateTime<Utc>> {
        self.last_notified.get(&camera_id).copied()
    }

    /// Run until the stop signal flips to true or its sender is dropped
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        self.stats.write().await.running = true;
        tracing::info!(
            poll_interval_sec = self.config.poll_interval.as_secs(),
            notify_interval_sec = self.config.notify_interval.as_secs(),
            policy = ?self.config.policy,
            "Monitor loop started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            let report = self.run_iteration(Utc::now(), &stop).await;
            if report.cancelled {
                break;
            }

            let pause = if report.registry_failed {
                self.config.registry_backoff
            } else {
                self.config.poll_interval
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        self.stats.write().await.running = false;
        tracing::info!("Monitor loop stopped");
    }

    /// One pass over all enabled cameras
    pub async fn run_iteration(
        &mut self,
        now: DateTime<Utc>,
        stop: &watch::Receiver<bool>,
    ) -> IterationReport {
        let mut report = IterationReport::default();

        let cameras = match self.deps.cameras.list_active_cameras().await {
            Ok(cameras) => cameras,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list active cameras");
                self.finish_iteration(now, true).await;
                report.registry_failed = true;
                return report;
            }
        };

        let recipients = match self.deps.recipients.list_active_recipients().await {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list active recipients");
                self.finish_iteration(now, true).await;
                report.registry_failed = true;
                return report;
            }
        };

        tracing::debug!(
            cameras = cameras.len(),
            recipients = recipients.len(),
            "Monitor iteration"
        );

        for camera in &cameras {
            if *stop.borrow() {
                report.cancelled = true;
                break;
            }
            let outcome = self.process_camera(camera, &recipients, now).await;
            report.outcomes.push((camera.id, outcome));
        }

        self.finish_iteration(now, false).await;
        report
    }

    async fn finish_iteration(&self, now: DateTime<Utc>, registry_failed: bool) {
        let mut stats = self.stats.write().await;
        stats.iterations += 1;
        stats.last_iteration_at = Some(now);
        if registry_failed {
            stats.registry_failures += 1;
        }
    }

    async fn bump(&self, f: impl FnOnce(&mut MonitorStats)) {
        f(&mut *self.stats.write().await);
    }

    /// A timestamp ahead of `now` counts as within the window
    fn is_rate_limited(&self, camera_id: i64, now: DateTime<Utc>) -> bool {
        self.last_notified
            .get(&camera_id)
            .map(|last| match now.signed_duration_since(*last).to_std() {
                Ok(elapsed) => elapsed < self.config.notify_interval,
                Err(_) => true,
            })
            .unwrap_or(false)
    }

    async fn capture(&self, camera: &Camera) -> Option<Vec<u8>> {
        let result = tokio::time::timeout(
            self.config.capture_timeout,
            self.deps.frames.capture_frame(&camera.stream_url),
        )
        .await;

        match result {
            Ok(Ok(frame)) if !frame.is_empty() => Some(frame),
            Ok(Ok(_)) => {
                tracing::warn!(camera_id = camera.id, "Empty frame, skipping camera");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(camera_id = camera.id, error = %e, "Capture failed, skipping camera");
                None
            }
            Err(_) => {
                tracing::warn!(
                    camera_id = camera.id,
                    timeout_sec = self.config.capture_timeout.as_secs(),
                    "Capture timed out, skipping camera"
                );
                None
            }
        }
    }

    async fn detect(&self, camera: &Camera, frame: &[u8]) -> Option<DetectionVerdict> {
        let result =
            tokio::time::timeout(self.config.detect_timeout, self.deps.detector.detect(frame)).await;

        match result {
            Ok(Ok(verdict)) => Some(verdict),
            Ok(Err(e)) => {
                tracing::warn!(camera_id = camera.id, error = %e, "Detection failed, skipping camera");
                None
            }
            Err(_) => {
                tracing::warn!(
                    camera_id = camera.id,
                    timeout_sec = self.config.detect_timeout.as_secs(),
                    "Detection timed out, skipping camera"
                );
                None
            }
        }
    }

    async fn process_camera(
        &mut self,
        camera: &Camera,
        recipients: &RecipientList,
        now: DateTime<Utc>,
    ) -> CameraOutcome {
        if self.is_rate_limited(camera.id, now) {
            tracing::debug!(camera_id = camera.id, "Rate limited, skipping camera");
            self.bump(|s| s.rate_limited += 1).await;
            return CameraOutcome::RateLimited;
        }

        self.bump(|s| s.cameras_checked += 1).await;

        let Some(frame) = self.capture(camera).await else {
            self.bump(|s| s.capture_failures += 1).await;
            return CameraOutcome::CaptureFailed;
        };

        let Some(verdict) = self.detect(camera, &frame).await else {
            self.bump(|s| s.detection_failures += 1).await;
            return CameraOutcome::DetectionFailed;
        };

        if !verdict.is_dirty {
            tracing::debug!(camera_id = camera.id, "Floor clean");
            return CameraOutcome::Clean;
        }

        tracing::info!(
            camera_id = camera.id,
            camera = %camera.name,
            confidence = verdict.confidence,
            "Dirty floor detected"
        );
        self.bump(|s| s.dirty_detections += 1).await;

        let event = NewDetectionEvent {
            source: camera.source_tag(),
            is_dirty: true,
            confidence: Some(verdict.confidence),
            image: Some(frame.clone()),
            notes: Some(format!(
                "Detected by monitor on camera {} ({})",
                camera.id, camera.name
            )),
        };

        let event_id = match self.deps.events.save_event(&event).await {
            Ok(id) => {
                self.bump(|s| s.events_saved += 1).await;
                Some(id)
            }
            Err(e) => {
                tracing::error!(camera_id = camera.id, error = %e, "Failed to save detection event");
                self.bump(|s| s.event_save_failures += 1).await;
                None
            }
        };

        let notified = if recipients.is_empty() {
            tracing::debug!(camera_id = camera.id, "No active recipients, alert not sent");
            None
        } else {
            let alert = Alert::dirty_floor(
                &camera.name,
                camera.location.as_deref(),
                verdict.confidence,
                now,
                Some(frame),
            );
            let result = self.deps.alerts.notify(&alert, recipients).await;
            match result {
                Some(true) => self.bump(|s| s.notifications_sent += 1).await,
                Some(false) => {
                    tracing::warn!(camera_id = camera.id, "Alert delivery failed");
                    self.bump(|s| s.notification_failures += 1).await;
                }
                None => {
                    tracing::debug!(camera_id = camera.id, "No deliverable channel, alert not sent");
                }
            }
            result
        };

        let refresh = match self.config.policy {
            NotifyPolicy::OnDetection => true,
            NotifyPolicy::OnDelivery => notified.unwrap_or(true),
        };
        if refresh {
            self.last_notified.insert(camera.id, now);
        }

        CameraOutcome::Dirty {
            confidence: verdict.confidence,
            event_id,
            notified,
        }
    }
}

/// Running monitor task and its stop signal
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn spawn(monitor: MonitorLoop) -> Self {
        let (stop, rx) = watch::channel(false);
        let task = tokio::spawn(monitor.run(rx));
        Self { stop, task }
    }

    /// Signal stop and wait up to `timeout`; true when the task finished
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let _ = self.stop.send(true);

        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Monitor task ended abnormally");
                false
            }
            Err(_) => {
                tracing::warn!(
                    timeout_sec = timeout.as_secs(),
                    "Monitor loop did not stop in time, detaching"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn camera(id: i64, name: &str, url: &str) -> Camera {
        Camera {
            id,
            name: name.to_string(),
            location: Some("1F".to_string()),
            stream_url: url.to_string(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct FakeCameras(Option<Vec<Camera>>);

    impl CameraSource for FakeCameras {
        fn list_active_cameras(&self) -> BoxFuture<'_, Result<Vec<Camera>>> {
            let result = self
                .0
                .clone()
                .ok_or_else(|| Error::Internal("db down".into()));
            async move { result }.boxed()
        }
    }

    struct FakeRecipients(Option<RecipientList>);

    impl RecipientSource for FakeRecipients {
        fn list_active_recipients(&self) -> BoxFuture<'_, Result<RecipientList>> {
            let result = self
                .0
                .clone()
                .ok_or_else(|| Error::Internal("db down".into()));
            async move { result }.boxed()
        }
    }

    /// Frame content is the stream url, so the detector can key on it
    #[derive(Default)]
    struct FakeFrames {
        failing: HashSet<String>,
        hanging: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FrameSource for FakeFrames {
        fn capture_frame<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.hanging.contains(url) {
                return futures::future::pending().boxed();
            }
            let result = if self.failing.contains(url) {
                Err(Error::Capture("stream down".into()))
            } else {
                Ok(url.as_bytes().to_vec())
            };
            async move { result }.boxed()
        }
    }

    /// url -> Some(confidence) for dirty, None for a failing call; unknown urls are clean
    #[derive(Default)]
    struct FakeDetector {
        verdicts: HashMap<String, Option<f64>>,
        calls: Mutex<u32>,
    }

    impl Detector for FakeDetector {
        fn detect<'a>(&'a self, image: &'a [u8]) -> BoxFuture<'a, Result<DetectionVerdict>> {
            *self.calls.lock().unwrap() += 1;
            let key = String::from_utf8_lossy(image).to_string();
            let result = match self.verdicts.get(&key) {
                Some(Some(conf)) => Ok(DetectionVerdict {
                    is_dirty: true,
                    confidence: *conf,
                    detections: vec![],
                }),
                Some(None) => Err(Error::Detector("timeout".into())),
                None => Ok(DetectionVerdict::clean()),
            };
            async move { result }.boxed()
        }
    }

    #[derive(Default)]
    struct FakeEvents {
        fail: bool,
        saved: Mutex<Vec<NewDetectionEvent>>,
    }

    impl EventSink for FakeEvents {
        fn save_event<'a>(&'a self, event: &'a NewDetectionEvent) -> BoxFuture<'a, Result<u64>> {
            let result = if self.fail {
                Err(Error::Internal("disk full".into()))
            } else {
                let mut saved = self.saved.lock().unwrap();
                saved.push(event.clone());
                Ok(saved.len() as u64)
            };
            async move { result }.boxed()
        }
    }

    struct FakeAlerts {
        result: Option<bool>,
        sent: Mutex<Vec<(Alert, RecipientList)>>,
    }

    impl FakeAlerts {
        fn new(succeed: bool) -> Self {
            Self::with_result(Some(succeed))
        }

        fn with_result(result: Option<bool>) -> Self {
            Self {
                result,
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl AlertSink for FakeAlerts {
        fn notify<'a>(
            &'a self,
            alert: &'a Alert,
            recipients: &'a RecipientList,
        ) -> BoxFuture<'a, Option<bool>> {
            self.sent
                .lock()
                .unwrap()
                .push((alert.clone(), recipients.clone()));
            let result = self.result;
            async move { result }.boxed()
        }
    }

    struct Harness {
        monitor: MonitorLoop,
        frames: Arc<FakeFrames>,
        detector: Arc<FakeDetector>,
        events: Arc<FakeEvents>,
        alerts: Arc<FakeAlerts>,
        stats: Arc<RwLock<MonitorStats>>,
    }

    fn harness(
        config: MonitorConfig,
        cameras: Option<Vec<Camera>>,
        recipients: Option<RecipientList>,
        frames: FakeFrames,
        detector: FakeDetector,
        events: FakeEvents,
        alerts: FakeAlerts,
    ) -> Harness {
        let frames = Arc::new(frames);
        let detector = Arc::new(detector);
        let events = Arc::new(events);
        let alerts = Arc::new(alerts);
        let stats = Arc::new(RwLock::new(MonitorStats::default()));

        let deps = MonitorDeps {
            cameras: Arc::new(FakeCameras(cameras)),
            recipients: Arc::new(FakeRecipients(recipients)),
            frames: frames.clone(),
            detector: detector.clone(),
            events: events.clone(),
            alerts: alerts.clone(),
        };

        Harness {
            monitor: MonitorLoop::new(config, deps, stats.clone()),
            frames,
            detector,
            events,
            alerts,
            stats,
        }
    }

    fn one_recipient() -> RecipientList {
        RecipientList {
            emails: vec!["ops@example.com".to_string()],
            phones: vec![],
        }
    }

    fn dirty(url: &str, conf: f64) -> FakeDetector {
        FakeDetector {
            verdicts: HashMap::from([(url.to_string(), Some(conf))]),
            ..Default::default()
        }
    }

    fn no_stop() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[test]
    fn test_notify_policy_parse() {
        assert_eq!("on_detection".parse::<NotifyPolicy>().unwrap(), NotifyPolicy::OnDetection);
        assert_eq!(" ON_DELIVERY ".parse::<NotifyPolicy>().unwrap(), NotifyPolicy::OnDelivery);
        assert!("never".parse::<NotifyPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_dirty_camera_persists_and_notifies() {
        let mut h = harness(
            MonitorConfig::default(),
            Some(vec![camera(1, "Lobby", "rtsp://a")]),
            Some(one_recipient()),
            FakeFrames::default(),
            dirty("rtsp://a", 0.82),
            FakeEvents::default(),
            FakeAlerts::new(true),
        );
        let now = Utc::now();

        let report = h.monitor.run_iteration(now, &no_stop()).await;

        assert_eq!(
            report.outcomes,
            vec![(
                1,
                CameraOutcome::Dirty {
                    confidence: 0.82,
                    event_id: Some(1),
                    notified: Some(true)
                }
            )]
        );

        let saved = h.events.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].is_dirty);
        assert_eq!(saved[0].confidence, Some(0.82));
        assert_eq!(saved[0].source, "camera_1");
        assert_eq!(saved[0].notes.as_deref(), Some("Detected by monitor on camera 1 (Lobby)"));
        assert_eq!(saved[0].image.as_deref(), Some("rtsp://a".as_bytes()));

        let sent = h.alerts.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.subject, "[FloorEye] Dirty floor detected (Lobby)");
        assert!(sent[0].0.attachment.is_some());
        assert_eq!(sent[0].1, one_recipient());

        assert_eq!(h.monitor.last_notified(1), Some(now));

        let stats = h.stats.read().await;
        assert_eq!(stats.iterations, 1);
        assert_eq!(stats.dirty_detections, 1);
        assert_eq!(stats.events_saved, 1);
        assert_eq!(stats.notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_precedes_work() {
        let mut h = harness(
            MonitorConfig::default(),
            Some(vec![camera(1, "Lobby", "rtsp://a")]),
            Some(one_recipient()),
            FakeFrames::default(),
            dirty("rtsp://a", 0.9),
            FakeEvents::default(),
            FakeAlerts::new(true),
        );
        let t0 = Utc::now();
        h.monitor.run_iteration(t0, &no_stop()).await;

        let t1 = t0 + chrono::Duration::seconds(10);
        let report = h.monitor.run_iteration(t1, &no_stop()).await;

        assert_eq!(report.outcomes, vec![(1, CameraOutcome::RateLimited)]);
        assert_eq!(h.frames.calls.lock().unwrap().len(), 1);
        assert_eq!(*h.detector.calls.lock().unwrap(), 1);
        assert_eq!(h.events.saved.lock().unwrap().len(), 1);
        assert_eq!(h.alerts.sent.lock().unwrap().len(), 1);
        assert_eq!(h.monitor.last_notified(1), Some(t0));

        // Window elapsed
        let t2 = t0 + chrono::Duration::seconds(60);
        let report = h.monitor.run_iteration(t2, &no_stop()).await;
        assert!(matches!(report.outcomes[0].1, CameraOutcome::Dirty { .. }));
        assert_eq!(h.monitor.last_notified(1), Some(t2));
    }

    #[tokio::test]
    async fn test_huge_notify_interval_keeps_rate_limit() {
        let config = MonitorConfig {
            notify_interval: Duration::from_secs(u64::MAX),
            ..Default::default()
        };
        let mut h = harness(
            config,
            Some(vec![camera(1, "Lobby", "rtsp://a")]),
            Some(one_recipient()),
            FakeFrames::default(),
            dirty("rtsp://a", 0.9),
            FakeEvents::default(),
            FakeAlerts::new(true),
        );
        let t0 = Utc::now();
        h.monitor.run_iteration(t0, &no_stop()).await;

        let later = t0 + chrono::Duration::days(3650);
        let report = h.monitor.run_iteration(later, &no_stop()).await;
        assert_eq!(report.outcomes, vec![(1, CameraOutcome::RateLimited)]);

        // Clock stepped backwards
        let earlier = t0 - chrono::Duration::seconds(30);
        let report = h.monitor.run_iteration(earlier, &no_stop()).await;
        assert_eq!(report.outcomes, vec![(1, CameraOutcome::RateLimited)]);
        assert_eq!(h.alerts.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_capture_failure_is_isolated() {
        let frames = FakeFrames {
            failing: HashSet::from(["rtsp://b".to_string()]),
            ..Default::default()
        };
        let mut h = harness(
            MonitorConfig::default(),
            Some(vec![
                camera(1, "A", "rtsp://a"),
                camera(2, "B", "rtsp://b"),
                camera(3, "C", "rtsp://c"),
            ]),
            Some(one_recipient()),
            frames,
            dirty("rtsp://c", 0.7),
            FakeEvents::default(),
            FakeAlerts::new(true),
        );

        let report = h.monitor.run_iteration(Utc::now(), &no_stop()).await;

        assert_eq!(report.outcomes[0], (1, CameraOutcome::Clean));
        assert_eq!(report.outcomes[1], (2, CameraOutcome::CaptureFailed));
        assert!(matches!(report.outcomes[2], (3, CameraOutcome::Dirty { .. })));

        let saved = h.events.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].source, "camera_3");
        assert_eq!(h.monitor.last_notified(2), None);
        assert_eq!(h.stats.read().await.capture_failures, 1);
    }

    #[tokio::test]
    async fn test_detector_failure_is_isolated() {
        let detector = FakeDetector {
            verdicts: HashMap::from([
                ("rtsp://a".to_string(), None),
                ("rtsp://b".to_string(), Some(0.5)),
            ]),
            ..Default::default()
        };
        let mut h = harness(
            MonitorConfig::default(),
            Some(vec![camera(1, "A", "rtsp://a"), camera(2, "B", "rtsp://b")]),
            Some(one_recipient()),
            FakeFrames::default(),
            detector,
            FakeEvents::default(),
            FakeAlerts::new(true),
        );

        let report = h.monitor.run_iteration(Utc::now(), &no_stop()).await;

        assert_eq!(report.outcomes[0], (1, CameraOutcome::DetectionFailed));
        assert!(matches!(report.outcomes[1], (2, CameraOutcome::Dirty { .. })));
        assert_eq!(h.monitor.last_notified(1), None);
        assert!(h.monitor.last_notified(2).is_some());
    }

    #[tokio::test]
    async fn test_clean_result_changes_nothing() {
        let mut h = harness(
            MonitorConfig::default(),
            Some(vec![camera(1, "A", "rtsp://a")]),
            Some(one_recipient()),
            FakeFrames::default(),
            FakeDetector::default(),
            FakeEvents::default(),
            FakeAlerts::new(true),
        );

        let report = h.monitor.run_iteration(Utc::now(), &no_stop()).await;

        assert_eq!(report.outcomes, vec![(1, CameraOutcome::Clean)]);
        assert!(h.events.saved.lock().unwrap().is_empty());
        assert!(h.alerts.sent.lock().unwrap().is_empty());
        assert_eq!(h.monitor.last_notified(1), None);
    }

    #[tokio::test]
    async fn test_no_recipients_still_persists() {
        let mut h = harness(
            MonitorConfig::default(),
            Some(vec![camera(1, "A", "rtsp://a")]),
            Some(RecipientList::default()),
            FakeFrames::default(),
            dirty("rtsp://a", 0.6),
            FakeEvents::default(),
            FakeAlerts::new(true),
        );

        let report = h.monitor.run_iteration(Utc::now(), &no_stop()).await;

        assert_eq!(
            report.outcomes,
            vec![(
                1,
                CameraOutcome::Dirty {
                    confidence: 0.6,
                    event_id: Some(1),
                    notified: None
                }
            )]
        );
        assert_eq!(h.events.saved.lock().unwrap().len(), 1);
        assert!(h.alerts.sent.lock().unwrap().is_empty());
        assert!(h.monitor.last_notified(1).is_some());
    }

    #[tokio::test]
    async fn test_downstream_failures_still_rate_limit() {
        let mut h = harness(
            MonitorConfig::default(),
            Some(vec![camera(1, "A", "rtsp://a")]),
            Some(one_recipient()),
            FakeFrames::default(),
            dirty("rtsp://a", 0.6),
            FakeEvents {
                fail: true,
                ..Default::default()
            },
            FakeAlerts::new(false),
        );
        let now = Utc::now();

        let report = h.monitor.run_iteration(now, &no_stop()).await;

        assert_eq!(
            report.outcomes[0].1,
            CameraOutcome::Dirty {
                confidence: 0.6,
                event_id: None,
                notified: Some(false)
            }
        );
        // Notification still attempted after the failed write
        assert_eq!(h.alerts.sent.lock().unwrap().len(), 1);
        assert_eq!(h.monitor.last_notified(1), Some(now));

        let stats = h.stats.read().await;
        assert_eq!(stats.event_save_failures, 1);
        assert_eq!(stats.notification_failures, 1);
    }

    #[tokio::test]
    async fn test_on_delivery_policy() {
        let config = MonitorConfig {
            policy: NotifyPolicy::OnDelivery,
            ..Default::default()
        };
        let mut h = harness(
            config,
            Some(vec![camera(1, "A", "rtsp://a")]),
            Some(one_recipient()),
            FakeFrames::default(),
            dirty("rtsp://a", 0.6),
            FakeEvents::default(),
            FakeAlerts::new(false),
        );

        h.monitor.run_iteration(Utc::now(), &no_stop()).await;
        assert_eq!(h.monitor.last_notified(1), None);

        // Not rate limited: retried on the next poll
        let report = h.monitor.run_iteration(Utc::now(), &no_stop()).await;
        assert!(matches!(report.outcomes[0].1, CameraOutcome::Dirty { .. }));
        assert_eq!(h.alerts.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_on_delivery_undeliverable_recipients_rate_limit() {
        let config = MonitorConfig {
            policy: NotifyPolicy::OnDelivery,
            ..Default::default()
        };
        let phones_only = RecipientList {
            emails: vec![],
            phones: vec!["+6281234567890".to_string()],
        };
        let mut h = harness(
            config,
            Some(vec![camera(1, "A", "rtsp://a")]),
            Some(phones_only),
            FakeFrames::default(),
            dirty("rtsp://a", 0.6),
            FakeEvents::default(),
            FakeAlerts::with_result(None),
        );
        let t0 = Utc::now();

        let report = h.monitor.run_iteration(t0, &no_stop()).await;
        assert_eq!(
            report.outcomes[0].1,
            CameraOutcome::Dirty {
                confidence: 0.6,
                event_id: Some(1),
                notified: None
            }
        );
        assert_eq!(h.monitor.last_notified(1), Some(t0));

        let t1 = t0 + chrono::Duration::seconds(5);
        let report = h.monitor.run_iteration(t1, &no_stop()).await;
        assert_eq!(report.outcomes, vec![(1, CameraOutcome::RateLimited)]);
        assert_eq!(h.events.saved.lock().unwrap().len(), 1);

        let stats = h.stats.read().await;
        assert_eq!(stats.notification_failures, 0);
        assert_eq!(stats.notifications_sent, 0);
    }

    #[tokio::test]
    async fn test_registry_failure_reported() {
        let mut h = harness(
            MonitorConfig::default(),
            None,
            Some(one_recipient()),
            FakeFrames::default(),
            FakeDetector::default(),
            FakeEvents::default(),
            FakeAlerts::new(true),
        );

        let report = h.monitor.run_iteration(Utc::now(), &no_stop()).await;
        assert!(report.registry_failed);
        assert!(report.outcomes.is_empty());
        assert!(h.frames.calls.lock().unwrap().is_empty());
        assert_eq!(h.stats.read().await.registry_failures, 1);

        let mut h = harness(
            MonitorConfig::default(),
            Some(vec![camera(1, "A", "rtsp://a")]),
            None,
            FakeFrames::default(),
            FakeDetector::default(),
            FakeEvents::default(),
            FakeAlerts::new(true),
        );
        let report = h.monitor.run_iteration(Utc::now(), &no_stop()).await;
        assert!(report.registry_failed);
        assert!(h.frames.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capture_timeout_does_not_stall() {
        let frames = FakeFrames {
            hanging: HashSet::from(["rtsp://a".to_string()]),
            ..Default::default()
        };
        let config = MonitorConfig {
            capture_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let mut h = harness(
            config,
            Some(vec![camera(1, "A", "rtsp://a"), camera(2, "B", "rtsp://b")]),
            Some(one_recipient()),
            frames,
            dirty("rtsp://b", 0.4),
            FakeEvents::default(),
            FakeAlerts::new(true),
        );

        let report = h.monitor.run_iteration(Utc::now(), &no_stop()).await;
        assert_eq!(report.outcomes[0], (1, CameraOutcome::CaptureFailed));
        assert!(matches!(report.outcomes[1], (2, CameraOutcome::Dirty { .. })));
    }

    #[tokio::test]
    async fn test_stop_between_cameras() {
        let mut h = harness(
            MonitorConfig::default(),
            Some(vec![camera(1, "A", "rtsp://a"), camera(2, "B", "rtsp://b")]),
            Some(one_recipient()),
            FakeFrames::default(),
            FakeDetector::default(),
            FakeEvents::default(),
            FakeAlerts::new(true),
        );
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = h.monitor.run_iteration(Utc::now(), &rx).await;
        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_handle_shutdown_is_prompt() {
        let config = MonitorConfig {
            poll_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let h = harness(
            config,
            Some(vec![camera(1, "A", "rtsp://a")]),
            Some(one_recipient()),
            FakeFrames::default(),
            FakeDetector::default(),
            FakeEvents::default(),
            FakeAlerts::new(true),
        );
        let stats = h.stats.clone();

        let handle = MonitorHandle::spawn(h.monitor);
        for _ in 0..100 {
            if stats.read().await.iterations > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stats.read().await.running);

        assert!(handle.shutdown(Duration::from_secs(2)).await);
        assert!(!stats.read().await.running);
    }
}
