//! Functions exposed to scripts.
//!
//! The base functions (`print`, `error`, `yield`, `type`, `tostring`) are
//! host functions: they live in the shared host namespace and are not
//! library members. Everything else is tool library, registered in the tool
//! namespace and recorded in the [`LibraryRegistry`](crate::runner::plugin::LibraryRegistry).

pub mod base;
pub mod closures;
pub mod core;
pub mod debug;
pub mod env;

pub use self::core::register_core_library;
