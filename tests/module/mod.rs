//! Module system tests
//!
//! Tests for the module lifecycle, load context isolation, security
//! boundaries and the reference registry.

pub mod test_utils;
pub mod registry_tests;
