//! Caching, request-deduplicating query client for the project-management API.
//!
//! * [`transport`] sends one HTTP request and classifies failures.
//! * [`query`] holds the keyed cache, subscriptions, and mutation executor.
//! * [`api`] is the typed surface: query keys, payloads, and built-in mutations.

pub mod api;
pub mod commands;
pub mod config;
pub mod query;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
