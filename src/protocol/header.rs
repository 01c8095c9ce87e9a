//! Replay header parsing
//!
//! The header precedes the first operation frame:
//! ```text
//! version\0  <ignored>\0  <line 0>\n<map path>\0  <ignored>\0
//! u32 size + Lua mods
//! u32 size + Lua scenario
//! u8 count + count * (name\0, u32 timeouts remaining)
//! u8 cheats enabled
//! u8 count + count * (u32 size, Lua army table, u8 source id, [0xFF])
//! u32 random seed
//! ```
//! All integers are little endian. Sizes are ignored; values are
//! self-delimiting.

use std::collections::BTreeMap;

use bytes::Buf;

use super::constants::ARMY_TRAILER_MARKER;
use crate::error::CodecError;
use crate::lua::{read_lua_value, read_nul_string, LuaValue};

/// One army entry from the header
#[derive(Debug, Clone, PartialEq)]
pub struct ArmyEntry {
    /// Army description table with `source_id` merged in
    pub fields: LuaValue,
    /// Command source driving this army
    pub source_id: u8,
}

/// Decoded replay header
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayHeader {
    pub version: String,
    pub map_path: String,
    pub mods: LuaValue,
    pub scenario: LuaValue,
    pub timeouts_remaining: BTreeMap<String, u32>,
    pub cheats_enabled: bool,
    pub armies: Vec<ArmyEntry>,
    pub random_seed: u32,
}

impl ReplayHeader {
    /// Scenario display name, if the scenario table carries one
    pub fn map_name(&self) -> Option<&str> {
        self.scenario.get_string("name")
    }
}

/// Decode a complete header
///
/// Fails rather than returning a partial header; callers that need the raw
/// bytes measure how much of the buffer was consumed.
pub fn read_header<B: Buf>(buf: &mut B) -> Result<ReplayHeader, CodecError> {
    let version = read_nul_string(buf)?;
    let _ = read_nul_string(buf)?;
    // Second line of this string is the map path
    let map_path = read_nul_string(buf)?
        .lines()
        .nth(1)
        .unwrap_or_default()
        .to_string();
    let _ = read_nul_string(buf)?;

    let _mods_size = read_u32(buf)?;
    let mods = read_lua_value(buf)?;

    let _scenario_size = read_u32(buf)?;
    let scenario = read_lua_value(buf)?;

    let source_count = read_u8(buf)?;
    let mut timeouts_remaining = BTreeMap::new();
    for _ in 0..source_count {
        let name = read_nul_string(buf)?;
        let remaining = read_u32(buf)?;
        timeouts_remaining.insert(name, remaining);
    }

    let cheats_enabled = read_u8(buf)? != 0;

    let army_count = read_u8(buf)?;
    let mut armies = Vec::with_capacity(army_count as usize);
    for _ in 0..army_count {
        let _army_size = read_u32(buf)?;
        let table = read_lua_value(buf)?;
        let source_id = read_u8(buf)?;

        let mut entries = match table {
            LuaValue::Table(entries) => entries,
            LuaValue::Nil => Vec::new(),
            other => vec![(LuaValue::Nil, other)],
        };
        entries.push(("source_id".into(), source_id.into()));
        armies.push(ArmyEntry {
            fields: LuaValue::Table(entries),
            source_id,
        });

        if buf.chunk().first() == Some(&ARMY_TRAILER_MARKER) {
            buf.advance(1);
        }
    }

    let random_seed = read_u32(buf)?;

    Ok(ReplayHeader {
        version,
        map_path,
        mods,
        scenario,
        timeouts_remaining,
        cheats_enabled,
        armies,
        random_seed,
    })
}

/// Decode a header from the front of `src`, returning it with its byte length
pub fn split_header(src: &[u8]) -> Result<(ReplayHeader, usize), CodecError> {
    let mut cursor = src;
    let header = read_header(&mut cursor)?;
    Ok((header, src.len() - cursor.len()))
}

fn read_u8<B: Buf>(buf: &mut B) -> Result<u8, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::TruncatedStream);
    }
    Ok(buf.get_u8())
}

fn read_u32<B: Buf>(buf: &mut B) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::TruncatedStream);
    }
    Ok(buf.get_u32_le())
}

/// Header fixtures shared by tests across the crate
#[cfg(test)]
pub(crate) mod fixtures {
    use bytes::{BufMut, Bytes, BytesMut};

    use crate::lua::{LuaEncoder, LuaValue};

    /// A two-army header for the given map
    pub fn header_bytes(map_name: &str) -> Bytes {
        let mut lua = LuaEncoder::new();
        let mut buf = BytesMut::new();

        lua.encode_nul_string("Supreme Commander v1.50.3701");
        lua.encode_nul_string("");
        lua.encode_nul_string("Replay v1.9\r\n/maps/setons/setons.scmap");
        lua.encode_nul_string("\r\n\u{1a}");
        buf.put_slice(&lua.finish());

        let mods = LuaValue::Table(vec![]);
        lua.encode(&mods);
        let mods = lua.finish();
        buf.put_u32_le(mods.len() as u32);
        buf.put_slice(&mods);

        let scenario: LuaValue = vec![("name", map_name)].into();
        lua.encode(&scenario);
        let scenario = lua.finish();
        buf.put_u32_le(scenario.len() as u32);
        buf.put_slice(&scenario);

        buf.put_u8(2);
        for name in ["Alice", "Bob"] {
            lua.encode_nul_string(name);
            buf.put_slice(&lua.finish());
            buf.put_u32_le(3);
        }

        buf.put_u8(0);

        buf.put_u8(2);
        for (i, name) in ["Alice", "Bob"].iter().enumerate() {
            let army: LuaValue = vec![("PlayerName", *name)].into();
            lua.encode(&army);
            let army = lua.finish();
            buf.put_u32_le(army.len() as u32);
            buf.put_slice(&army);
            buf.put_u8(i as u8);
            if i == 0 {
                buf.put_u8(0xFF);
            }
        }

        buf.put_u32_le(0xDEADBEEF);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let bytes = fixtures::header_bytes("Seton's Clutch");
        let (header, len) = split_header(&bytes).unwrap();

        assert_eq!(len, bytes.len());
        assert_eq!(header.version, "Supreme Commander v1.50.3701");
        assert_eq!(header.map_path, "/maps/setons/setons.scmap");
        assert_eq!(header.map_name(), Some("Seton's Clutch"));
        assert_eq!(header.timeouts_remaining.get("Bob"), Some(&3));
        assert!(!header.cheats_enabled);
        assert_eq!(header.armies.len(), 2);
        assert_eq!(header.armies[1].source_id, 1);
        assert_eq!(header.armies[1].fields.get_string("PlayerName"), Some("Bob"));
        assert_eq!(header.armies[1].fields.get_number("source_id"), Some(1.0));
        assert_eq!(header.random_seed, 0xDEADBEEF);
    }

    #[test]
    fn test_header_stops_before_operations() {
        let mut bytes = fixtures::header_bytes("Setons").to_vec();
        let header_len = bytes.len();
        bytes.extend_from_slice(&[0, 3, 0]);

        let (_, len) = split_header(&bytes).unwrap();
        assert_eq!(len, header_len);
    }

    #[test]
    fn test_truncated_header_never_partial() {
        let bytes = fixtures::header_bytes("Setons");
        for cut in [0, 10, bytes.len() / 2, bytes.len() - 1] {
            assert_eq!(
                split_header(&bytes[..cut]),
                Err(CodecError::TruncatedStream),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_map_path_without_second_line() {
        let mut lua = crate::lua::LuaEncoder::new();
        for s in ["v1", "", "no newline here", ""] {
            lua.encode_nul_string(s);
        }
        let mut bytes = lua.finish().to_vec();
        // Both Lua values nil, no sources, no cheats, no armies
        bytes.extend_from_slice(&[0, 0, 0, 0, 2, 0]);
        bytes.extend_from_slice(&[0, 0, 0, 0, 2, 0]);
        bytes.extend_from_slice(&[0, 0, 0]);
        bytes.extend_from_slice(&7u32.to_le_bytes());

        let (header, _) = split_header(&bytes).unwrap();
        assert_eq!(header.map_path, "");
        assert!(header.mods.is_nil());
        assert_eq!(header.random_seed, 7);
    }
}
