//! Offline inference job queue
//!
//! A request gateway enqueues slow generation work (heavy text, images,
//! video frames) into a durable SQLite-backed queue. Independent worker
//! processes claim jobs atomically, run them through a type-specific
//! handler, and record a single terminal outcome per job.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
