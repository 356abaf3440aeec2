//! Integration tests for the harvester
//!
//! These tests use wiremock to serve listing pages and drive the full
//! crawl → extract → persist cycle through the bundled HTTP backend.

mod http_session_tests;
mod pipeline_tests;
