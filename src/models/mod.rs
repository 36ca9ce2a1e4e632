// Data model for the ingestion pipeline: the persisted entities (§3) and the
// small set of shared enums layered on top of them.

pub mod entities;
pub mod enums;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use entities::*;
pub use enums::*;

/// Thin response envelope shared by the HTTP surface.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}
