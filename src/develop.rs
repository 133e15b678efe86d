//! Decoder for catalog develop-settings payloads.
//!
//! Lightroom stores each image's edit parameters in its catalog as a Lua
//! table literal assigned to `s`:
//!
//! ```text
//! s = { AutoGrayscaleMix = true,
//! CropAngle = -2.18554,
//! CameraProfile = "Adobe Standard",
//! RetouchInfo = {  },
//! ToneCurvePV2012 = { 0,
//! 0,
//! 255,
//! 255 },
//! ProcessVersion = "6.7" }
//! ```
//!
//! The `s = ` envelope is checked before anything else: a payload that does
//! not start with it is not a develop-settings string at all, and guessing at
//! its content would write garbage into the sidecar. An empty payload means
//! the image was never developed and decodes to an empty table.
//!
//! Numbers keep their source text. `0.1` must come out as `"0.1"` in the XMP,
//! and a round trip through `f64` formatting is not guaranteed to preserve it.
//!
//! Pure Rust, no Lua runtime: the grammar accepted is the table-constructor
//! subset (`{}`, `name = v`, `["key"] = v`, `[1] = v`, positional values,
//! strings, long strings, numbers, booleans, `nil`, `--` comments).

use thiserror::Error;

/// Literal prefix every non-empty develop-settings payload starts with.
pub const ENVELOPE_PREFIX: &str = "s = ";

/// Deepest table nesting accepted. Real payloads stay in single digits.
const MAX_NESTING: usize = 256;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed develop-settings payload: expected prefix {expected:?}, found {found:?}")]
    MalformedPayload { expected: &'static str, found: String },
    #[error("develop-settings syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
}

/// A decoded Lua value.
#[derive(Debug, Clone, PartialEq)]
pub enum LuaValue {
    Bool(bool),
    /// Numeric literal, kept as written.
    Number(String),
    Str(String),
    Table(LuaTable),
}

/// Key of a table entry: an identifier/string key or a positional index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LuaKey {
    Name(String),
    Index(u64),
}

/// Ordered table entries, as written in the source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LuaTable {
    entries: Vec<(LuaKey, LuaValue)>,
}

impl LuaTable {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Value stored under a named key. Later duplicates win, as in Lua.
    pub fn get(&self, name: &str) -> Option<&LuaValue> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| matches!(k, LuaKey::Name(n) if n == name))
            .map(|(_, v)| v)
    }

    /// True when every entry is positional (a Lua "sequence").
    pub fn is_sequence(&self) -> bool {
        self.entries.iter().all(|(k, _)| matches!(k, LuaKey::Index(_)))
    }

    /// Values in source order.
    pub fn values(&self) -> impl Iterator<Item = &LuaValue> {
        self.entries.iter().map(|(_, v)| v)
    }
}

/// Decoded develop settings: the top-level table of the payload.
pub type DevelopSettings = LuaTable;

/// Decode a develop-settings payload.
///
/// - `""` → empty settings
/// - `"s = { ... }"` → the parsed table
/// - anything else → [`DecodeError::MalformedPayload`]
pub fn decode_develop_settings(payload: &str) -> Result<DevelopSettings, DecodeError> {
    if payload.is_empty() {
        return Ok(DevelopSettings::default());
    }
    let Some(body) = payload.strip_prefix(ENVELOPE_PREFIX) else {
        return Err(DecodeError::MalformedPayload {
            expected: ENVELOPE_PREFIX,
            found: payload.chars().take(ENVELOPE_PREFIX.len()).collect(),
        });
    };

    let mut parser = Parser::new(body, ENVELOPE_PREFIX.len());
    parser.skip_trivia()?;
    let table = parser.parse_table()?;
    parser.skip_trivia()?;
    if !parser.at_end() {
        return Err(parser.error("unexpected content after table"));
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    /// Offset of `src` within the full payload, for error messages.
    base: usize,
    /// Tables currently open.
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, base: usize) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            base,
            depth: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> DecodeError {
        DecodeError::Syntax {
            offset: self.base + self.pos,
            message: message.into(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), DecodeError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", byte as char)))
        }
    }

    /// Skip whitespace and `--` comments (line and long-bracket forms).
    fn skip_trivia(&mut self) -> Result<(), DecodeError> {
        loop {
            while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
                self.pos += 1;
            }
            if self.peek() == Some(b'-') && self.peek_at(1) == Some(b'-') {
                self.pos += 2;
                if let Some(level) = self.long_bracket_level() {
                    self.read_long_bracket(level)?;
                } else {
                    while self.peek().is_some_and(|b| b != b'\n') {
                        self.pos += 1;
                    }
                }
                continue;
            }
            return Ok(());
        }
    }

    fn parse_value(&mut self) -> Result<Option<LuaValue>, DecodeError> {
        match self.peek() {
            Some(b'{') => self.parse_table().map(|t| Some(LuaValue::Table(t))),
            Some(b'"') | Some(b'\'') => self.parse_quoted().map(|s| Some(LuaValue::Str(s))),
            Some(b'[') => match self.long_bracket_level() {
                Some(level) => {
                    let s = self.read_long_bracket(level)?;
                    Ok(Some(LuaValue::Str(s)))
                }
                None => Err(self.error("unexpected '['")),
            },
            Some(b'-') | Some(b'.') | Some(b'0'..=b'9') => {
                self.parse_number().map(|n| Some(LuaValue::Number(n)))
            }
            Some(b) if is_name_start(b) => {
                let name = self.parse_name();
                match name {
                    "true" => Ok(Some(LuaValue::Bool(true))),
                    "false" => Ok(Some(LuaValue::Bool(false))),
                    "nil" => Ok(None),
                    other => Err(self.error(format!("unexpected identifier '{other}'"))),
                }
            }
            Some(b) => Err(self.error(format!("unexpected character '{}'", b as char))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_table(&mut self) -> Result<LuaTable, DecodeError> {
        if self.depth == MAX_NESTING {
            return Err(self.error(format!("tables nested deeper than {MAX_NESTING} levels")));
        }
        self.expect(b'{')?;
        self.depth += 1;
        let mut table = LuaTable::default();
        let mut next_index = 1u64;

        loop {
            self.skip_trivia()?;
            if self.peek() == Some(b'}') {
                self.pos += 1;
                self.depth -= 1;
                return Ok(table);
            }

            let key = self.parse_entry_key()?;
            self.skip_trivia()?;
            let value = self.parse_value()?;

            let key = match key {
                Some(k) => k,
                None => {
                    let k = LuaKey::Index(next_index);
                    next_index += 1;
                    k
                }
            };
            // `nil` entries do not exist in Lua tables
            if let Some(value) = value {
                table.entries.push((key, value));
            }

            self.skip_trivia()?;
            match self.peek() {
                Some(b',') | Some(b';') => self.pos += 1,
                Some(b'}') => {}
                Some(_) => return Err(self.error("expected ',' or '}'")),
                None => return Err(self.error("unterminated table")),
            }
        }
    }

    /// Parse `name =` or `[key] =` if present. Returns `None` for a
    /// positional entry, leaving the cursor at the value.
    fn parse_entry_key(&mut self) -> Result<Option<LuaKey>, DecodeError> {
        let start = self.pos;

        if self.peek() == Some(b'[') && self.long_bracket_level().is_none() {
            self.pos += 1;
            self.skip_trivia()?;
            let key = match self.parse_value()? {
                Some(LuaValue::Str(s)) => LuaKey::Name(s),
                Some(LuaValue::Number(n)) => match n.parse::<u64>() {
                    Ok(i) => LuaKey::Index(i),
                    Err(_) => LuaKey::Name(n),
                },
                _ => return Err(self.error("unsupported table key")),
            };
            self.skip_trivia()?;
            self.expect(b']')?;
            self.skip_trivia()?;
            self.expect(b'=')?;
            return Ok(Some(key));
        }

        if self.peek().is_some_and(is_name_start) {
            let name = self.parse_name().to_string();
            self.skip_trivia()?;
            if self.peek() == Some(b'=') && self.peek_at(1) != Some(b'=') {
                self.pos += 1;
                return Ok(Some(LuaKey::Name(name)));
            }
            // a bare `true`/`false`/`nil` value, rewind
            self.pos = start;
        }

        Ok(None)
    }

    fn parse_name(&mut self) -> &'a str {
        let src: &'a [u8] = self.src;
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        // identifiers are ASCII by construction
        std::str::from_utf8(&src[start..self.pos]).unwrap_or_default()
    }

    fn parse_number(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
            while self.peek().is_some_and(|b| b == b' ' || b == b'\t') {
                self.pos += 1;
            }
        }
        let digits_start = self.pos;

        let is_hex = self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X'));
        if is_hex {
            self.pos += 2;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
        } else {
            while self.peek().is_some_and(|b| b.is_ascii_digit() || b == b'.') {
                self.pos += 1;
            }
            if matches!(self.peek(), Some(b'e' | b'E')) {
                self.pos += 1;
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.pos += 1;
                }
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let digits = String::from_utf8_lossy(&self.src[digits_start..self.pos]).into_owned();
        let valid = if is_hex {
            u64::from_str_radix(&digits[2..], 16).is_ok()
        } else {
            digits.parse::<f64>().is_ok()
        };
        if !valid {
            self.pos = start;
            return Err(self.error(format!("invalid number '{digits}'")));
        }

        let negative = self.src[start] == b'-';
        Ok(if negative { format!("-{digits}") } else { digits })
    }

    fn parse_quoted(&mut self) -> Result<String, DecodeError> {
        let quote = self.src[self.pos];
        self.pos += 1;
        let mut out: Vec<u8> = Vec::new();

        loop {
            let Some(b) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;
            match b {
                b'\n' => return Err(self.error("newline in string")),
                b'\\' => self.parse_escape(&mut out)?,
                _ if b == quote => break,
                _ => out.push(b),
            }
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn parse_escape(&mut self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        let Some(b) = self.peek() else {
            return Err(self.error("unterminated escape"));
        };
        self.pos += 1;
        match b {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'v' => out.push(0x0B),
            b'\\' | b'"' | b'\'' | b'\n' => out.push(b),
            b'x' => {
                let hex = self.take_while_max(2, |c| c.is_ascii_hexdigit());
                let value = u8::from_str_radix(&hex, 16)
                    .map_err(|_| self.error("invalid \\x escape"))?;
                out.push(value);
            }
            b'z' => {
                while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
                    self.pos += 1;
                }
            }
            b'u' => {
                self.expect(b'{')?;
                let hex = self.take_while_max(8, |c| c.is_ascii_hexdigit());
                self.expect(b'}')?;
                let c = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error("invalid \\u escape"))?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            b'0'..=b'9' => {
                self.pos -= 1;
                let digits = self.take_while_max(3, |c| c.is_ascii_digit());
                let value: u8 = digits
                    .parse()
                    .map_err(|_| self.error("decimal escape out of range"))?;
                out.push(value);
            }
            other => return Err(self.error(format!("invalid escape '\\{}'", other as char))),
        }
        Ok(())
    }

    fn take_while_max(&mut self, max: usize, pred: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while self.pos - start < max && self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    /// If the cursor is at `[[` or `[=*[`, return the number of `=`.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(1 + level) == Some(b'[')).then_some(level)
    }

    fn read_long_bracket(&mut self, level: usize) -> Result<String, DecodeError> {
        self.pos += level + 2;
        // a newline right after the opening bracket is skipped
        if self.peek() == Some(b'\r') {
            self.pos += 1;
        }
        if self.peek() == Some(b'\n') {
            self.pos += 1;
        }
        let start = self.pos;

        let mut close = Vec::with_capacity(level + 2);
        close.push(b']');
        close.extend(std::iter::repeat_n(b'=', level));
        close.push(b']');

        let rest = &self.src[start..];
        match rest.windows(close.len()).position(|w| w == close.as_slice()) {
            Some(end) => {
                self.pos = start + end + close.len();
                Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
            }
            None => Err(self.error("unterminated long bracket")),
        }
    }
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}
