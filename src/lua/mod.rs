//! Lua value serialisation
//!
//! Scenario, mod and army descriptions in the replay header are Lua tables
//! serialised by the game engine. Only decoding matters for relay; the
//! encoder exists to build the same bytes from typed values.

pub mod codec;
pub mod value;

pub use codec::{read_lua_value, read_nul_string, LuaEncoder};
pub use value::LuaValue;
