//! Common test utilities for unseal-engine
//!
//! - Counting fakes for the object store and key manager
//! - A fixture that seals secrets into a fake store and builds engines on it

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fakes;
pub mod fixtures;

pub use fakes::*;
pub use fixtures::*;
