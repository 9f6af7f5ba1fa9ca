//! Native function plumbing: the native calling convention, the library
//! registry, and engine configuration.
//!
//! Library functions are registered into the tool namespace through
//! [`Runtime::register`](crate::runner::api::Runtime::register). Each
//! registration mints a new unit, records it in the [`LibraryRegistry`],
//! and binds it under its name. Aliases get distinct units that share the
//! same native entry point.

pub mod config;
pub mod registry;
pub mod types;

pub use registry::LibraryRegistry;
