//! Read-model projections for the identity platform.
//!
//! Events arrive from the bus, the [`projections::Dispatcher`] routes each one
//! to the reducers registered for its aggregate type and event type, and the
//! reducers fold it into tenant-scoped rows in [`read_model::ProjectionTables`].
//! Callers read those rows back through [`repository`] and, for settings,
//! through [`resolver::SettingsResolver`], which applies org-over-instance
//! inheritance.

pub mod config;
pub mod consistency;
pub mod projections;
pub mod read_model;
pub mod repository;
pub mod resolver;
pub mod retry;
pub mod workers;

pub use config::{ConfigError, ProjectionConfig};

#[cfg(test)]
mod test_support;
