//! Tillpoint background worker: dispatcher pool, lifecycle, and status HTTP surface.

pub mod app;
pub mod config;
pub mod lifecycle;
