//! HTTP API: axum handlers and their request/response models.
//!
//! - **Batches** (`/api/generate/batch/*`, `/api/batches/stuck`): start, stop, status, history
//! - **Stream** (`/api/generate/batch/stream`): live status over server-sent events
//! - **Catalog** (`/api/models`, `/api/topics`, `/api/sample-types`): what can be generated
//!
//! OpenAPI documentation is served at `/docs`.

pub mod handlers;
pub mod models;
