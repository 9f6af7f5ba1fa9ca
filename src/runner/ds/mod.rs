//! Runtime data structures: values, tables, function units, the heap and
//! execution contexts.

pub mod closure;
pub mod error;
pub mod execution_context;
pub mod heap;
pub mod ref_registry;
pub mod table;
pub mod value;
