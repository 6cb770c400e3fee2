//! Backend for the Zenarth admin console: an HTTP process supervisor and
//! script execution proxy, plus an embeddable session lifecycle store used
//! in-process by dashboard components.

pub mod config;
pub mod error;
pub mod http;
pub mod services;
pub mod utils;
