//! Anime metadata reconciliation: maps local series hints onto catalog ids,
//! walks the relation graph to the franchise root and merges the catalogs'
//! payloads into one normalized record.

pub mod artwork;
pub mod cache;
pub mod cancellation;
pub mod config;
pub mod config_persistence;
pub mod error;
pub mod hint;
pub mod http;
pub mod mapping;
pub mod merge;
pub mod overrides;
pub mod protocol;
pub mod rate_limit;
pub mod resolution_manager;
pub mod resolver;
pub mod service;
pub mod sources;
pub mod tag_filter;
