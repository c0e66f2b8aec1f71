//! Transport adapters for reaching agents

pub mod http;

pub use http::HttpConnector;
