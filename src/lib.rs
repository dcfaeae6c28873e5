//! FloorEye Camserver Library
//!
//! Camera-based floor cleanliness monitoring
//!
//! ## Architecture (8 Components)
//!
//! 1. Registry - cameras and notification recipients
//! 2. SnapshotService - single frame capture (ffmpeg / HTTP / file)
//! 3. DetectorClient - remote YOLO service adapter
//! 4. EventStore - detection event persistence
//! 5. NotificationService - email fallback chain and WhatsApp
//! 6. MonitorLoop - periodic polling, rate limiting, alert dispatch
//! 7. DetectionService - manual upload / capture pipeline
//! 8. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - The monitor talks to its collaborators only through `interfaces`
//! - One camera's failure never reaches another camera
//! - The service runs without a database, minus the features that need one

pub mod detection_service;
pub mod detector_client;
pub mod error;
pub mod event_store;
pub mod interfaces;
pub mod models;
pub mod monitor_loop;
pub mod notification_service;
pub mod registry;
pub mod snapshot_service;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
