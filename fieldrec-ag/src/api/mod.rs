//! HTTP API handlers for fieldrec-ag

pub mod admin;
pub mod artifacts;
pub mod audio;
pub mod health;

pub use admin::admin_routes;
pub use artifacts::artifact_routes;
pub use audio::audio_routes;
pub use health::health_routes;
