//! Control-function modules served over RPC
//!
//! Each module is an explicit table of named methods; the server picks one by
//! name at startup and registers the entries matching its transport prefix.

pub mod controlfunctions;
pub mod modules;
pub mod utils;
