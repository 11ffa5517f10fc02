//! facegate-service — face enrollment and verification service.
//!
//! Wraps the analysis pipeline from `facegate-core` with persistence,
//! embedding sealing, and the request-facing enroll / verify / health
//! operations an HTTP layer or CLI binds to.

pub mod config;
pub mod crypto;
pub mod service;
pub mod store;

pub use config::Config;
pub use service::{
    EnrollmentReceipt, FaceReport, FaceService, HealthReport, HealthStatus, ServiceError,
};
pub use store::{EnrollmentRecord, EnrollmentStore, EnrollmentSummary, FaceFeatures, StoreError};
