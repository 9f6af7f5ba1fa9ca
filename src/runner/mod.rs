pub mod api;
pub mod closures;
pub mod ds;
pub mod plugin;
pub mod std_lib;
pub mod vm;
