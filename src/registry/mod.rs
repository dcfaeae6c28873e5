//! Registry - cameras and notification recipients
//!
//! ## Responsibilities
//!
//! - Camera CRUD (stream address, enabled flag)
//! - Email / WhatsApp recipient CRUD
//! - Active camera and recipient reads for the monitor
//!
//! Reads are not cached: the monitor sees registry edits on its next poll.

mod repository;
mod service;
mod types;

pub use repository::RegistryRepository;
pub use service::{
    normalize_email, normalize_phone, validate_camera_name, validate_stream_url,
    RegistryService,
};
pub use types::*;

use crate::error::Result;
use crate::interfaces::{CameraSource, RecipientSource};
use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::MySqlPool;

/// Registry instance
pub struct Registry {
    service: RegistryService,
}

impl Registry {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            service: RegistryService::new(RegistryRepository::new(pool)),
        }
    }

    /// Get service reference
    pub fn service(&self) -> &RegistryService {
        &self.service
    }
}

impl CameraSource for Registry {
    fn list_active_cameras(&self) -> BoxFuture<'_, Result<Vec<Camera>>> {
        self.service.list_active_cameras().boxed()
    }
}

impl RecipientSource for Registry {
    fn list_active_recipients(&self) -> BoxFuture<'_, Result<RecipientList>> {
        self.service.list_active_recipients().boxed()
    }
}
