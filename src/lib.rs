//! # hookvm - closure hooking for an embeddable script runtime
//!
//! A small Lua-flavoured scripting runtime together with the machinery a
//! script-injection tool needs to intercept functions living in it:
//!
//! - `newcclosure` / `newlclosure` / `clonefunction`: mint wrappers and copies
//! - `hookfunction` / `restorefunction`: redirect a function in place, keeping
//!   every existing reference to it, and undo the redirection
//! - `checkcaller` / `isexecutorclosure`: tell tool code apart from host code
//!
//! ## Quick Start
//!
//! ```
//! use hookvm::runner::api::Runtime;
//!
//! let mut rt = Runtime::new();
//! rt.exec(r#"
//!     function greet() print("original") end
//!     local old = hookfunction(greet, function() print("hooked") end)
//!     greet()
//!     old()
//! "#).unwrap();
//! assert_eq!(rt.take_output(), vec!["hooked", "original"]);
//! ```
//!
//! ## Namespaces
//!
//! The runtime keeps two global tables. The *host* globals are shared by
//! every host execution context. The *tool* globals belong to the tool's
//! own context: reads fall through to the host globals, writes stay
//! private. The closure library is registered in the tool globals only.
//!
//! ## Architecture
//!
//! - **[`parser`]** - `pest` grammar and AST for the snippet language
//! - **[`runner`]** - the runtime
//!   - **[`runner::ds`]** - values, tables, units, heap and contexts
//!   - **[`runner::vm`]** - bytecode compiler and interpreter
//!   - **[`runner::closures`]** - wrapper and hook tables, anchors, provenance
//!   - **[`runner::plugin`]** - native calling convention, library registry, config
//!   - **[`runner::std_lib`]** - functions exposed to scripts

#[macro_use]
extern crate lazy_static;

pub mod parser;
pub mod runner;
