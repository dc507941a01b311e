//! Stager service library.
//!
//! This crate primarily ships a `stager` binary, but we expose the library
//! surface for integration testing and for embedding a stager in-process.

pub mod api;
pub mod compilers;
pub mod config;
pub mod plan;
pub mod stager;
pub mod state;

pub use compilers::CompilerMapping;
pub use stager::{Stager, StagerError};
