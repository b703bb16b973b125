//! Test-only support code, kept in the library so both unit tests and
//! the integration suite share one logging bootstrap.

pub mod logging;
