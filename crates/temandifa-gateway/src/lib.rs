//! # temandifa-gateway
//!
//! Composition root for the Temandifa gateway core.
//!
//! - [`config`] - configuration file and environment overrides
//! - [`app`] - builds every component over one store and task registry
//! - [`inference`] - cache, breaker and backend orchestration
//! - [`admission`] - rate limits and token validation for incoming requests
//! - [`error`] - boundary error taxonomy
//! - [`observability`] - tracing setup

pub mod admission;
pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod inference;
pub mod observability;

pub use admission::{Admission, Admitted, bearer_token};
pub use app::Gateway;
pub use backend::{BackendError, InferenceBackend, InferenceRequest};
pub use config::AppConfig;
pub use error::{GatewayError, GatewayResult};
pub use inference::{InferenceOutcome, InferenceService};
