//! Hibernator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the hibernator controller.

pub mod hibernator;

pub use hibernator::*;
