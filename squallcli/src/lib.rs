//! Shared plumbing for the squall command-line endpoints.

pub mod endpoint;
