//! Test suites shipped with the tester
//!
//! Each suite registers its scenarios and tests with the
//! [`Registry`](crate::testing::Registry).

pub mod dummy;
