//! Angolo serves a pre-built single-page-application tree over HTTP.
//!
//! Every file discovered under the served directory becomes a route at
//! startup. Responses are compressed on demand into an in-memory artifact
//! cache, designated HTML documents receive a fresh Content-Security-Policy
//! nonce per request, and unknown paths fall back to the application entry
//! document so client-side routing keeps working.

pub mod cache;
pub mod compress;
pub mod config;
pub mod infra;
pub mod routes;
pub mod util;
