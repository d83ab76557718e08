//! Common test utilities and fixtures for vista-graph integration tests
//!
//! - `VistaFixture` builds a temporary source tree: dictionary dumps,
//!   routine files and a package registry
//! - Assertion helpers over store and report contents

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod assertions;
pub mod fixture;

pub use assertions::*;
pub use fixture::*;
