//! Lua value types
//!
//! The game serialises its scenario and mod tables as a tagged tree of Lua
//! values. Tables keep their wire order, so they are stored as key/value
//! pairs rather than a hash map (keys may be floats).

/// A decoded Lua value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LuaValue {
    /// 32-bit float (tag 0)
    Number(f32),

    /// Nul-terminated string (tag 1)
    String(String),

    /// Nil (tag 2, followed by one padding byte)
    #[default]
    Nil,

    /// Boolean (tag 3, one byte, nonzero = true)
    Bool(bool),

    /// Table (tag 4), pairs in wire order, closed by the table-end sentinel
    Table(Vec<(LuaValue, LuaValue)>),
}

impl LuaValue {
    /// Try to get this value as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a number
    pub fn as_number(&self) -> Option<f32> {
        match self {
            LuaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            LuaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as table entries
    pub fn as_table(&self) -> Option<&[(LuaValue, LuaValue)]> {
        match self {
            LuaValue::Table(entries) => Some(entries),
            _ => None,
        }
    }

    /// Check if this value is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// Look up a string key in a table value
    ///
    /// Later duplicates win, matching how the game builds the table.
    pub fn get(&self, key: &str) -> Option<&LuaValue> {
        self.as_table()?
            .iter()
            .rev()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    /// Get a string field from a table value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Get a number field from a table value
    pub fn get_number(&self, key: &str) -> Option<f32> {
        self.get(key)?.as_number()
    }
}

impl From<bool> for LuaValue {
    fn from(v: bool) -> Self {
        LuaValue::Bool(v)
    }
}

impl From<f32> for LuaValue {
    fn from(v: f32) -> Self {
        LuaValue::Number(v)
    }
}

impl From<u8> for LuaValue {
    fn from(v: u8) -> Self {
        LuaValue::Number(v as f32)
    }
}

impl From<String> for LuaValue {
    fn from(v: String) -> Self {
        LuaValue::String(v)
    }
}

impl From<&str> for LuaValue {
    fn from(v: &str) -> Self {
        LuaValue::String(v.to_string())
    }
}

impl<K: Into<LuaValue>, V: Into<LuaValue>> From<Vec<(K, V)>> for LuaValue {
    fn from(v: Vec<(K, V)>) -> Self {
        LuaValue::Table(v.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
