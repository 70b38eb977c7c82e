//! The typed-object codec.
//!
//! An [`Object`] is a linear byte buffer of concatenated tagged values,
//! described by a small grammar:
//!
//! ```text
//! descr := item*
//! item  := 'i' | 'u' | 'b' | 's' | 'A' item | '(' item+ ')'
//! ```
//!
//! `i`/`u` are 32-bit signed/unsigned integers, `b` a single byte, `s` a
//! NUL-terminated string. `A X` is a u32-length-prefixed array of `X`;
//! `( ... )` groups items into a struct, which is purely structural and adds
//! nothing on the wire. Scalars and array length prefixes are native byte
//! order: objects never leave the host, only the enclosing frame header is
//! network order.
//!
//! Building appends to the buffer; parsing advances an internal cursor that
//! [`Object::rewind`] resets. Raw bytes round-trip exactly through
//! [`Object::from_bytes`] / [`Object::raw`], which is what lets the daemon
//! pass payloads through to providers without understanding them.

/// Error from building, parsing, or rendering an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectError {
    /// The description string does not parse.
    InvalidDescr,
    /// A value did not match the description item (the offending tag).
    TypeMismatch(char),
    /// Too few or too many values for the description.
    ValueCount,
    /// The buffer ended before the described value.
    UnexpectedEnd,
    /// A string was not NUL-terminated within the remaining buffer.
    UnterminatedString,
    /// A string was not valid UTF-8.
    InvalidUtf8,
    /// A string to insert contained an interior NUL byte.
    InteriorNul,
    /// Rendering exceeded the caller's byte cap.
    NoSpace,
}

impl std::fmt::Display for ObjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectError::InvalidDescr => write!(f, "invalid object description"),
            ObjectError::TypeMismatch(t) => write!(f, "value does not match description item '{t}'"),
            ObjectError::ValueCount => write!(f, "value count does not match description"),
            ObjectError::UnexpectedEnd => write!(f, "object buffer ended mid-value"),
            ObjectError::UnterminatedString => write!(f, "string not NUL-terminated"),
            ObjectError::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            ObjectError::InteriorNul => write!(f, "string contains an interior NUL byte"),
            ObjectError::NoSpace => write!(f, "no space left in output buffer"),
        }
    }
}

impl std::error::Error for ObjectError {}

/// A single value extracted from or inserted into an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    I32(i32),
    U32(u32),
    Byte(u8),
    Str(String),
    Array(Vec<Value>),
    Struct(Vec<Value>),
}

/// Check whether `descr` is a valid object description: the grammar parses
/// to the end, every `A` is followed by an item, and every `(` encloses at
/// least one item and is matched.
pub fn descr_valid(descr: &str) -> bool {
    let d = descr.as_bytes();
    let mut pos = 0;
    while pos < d.len() {
        if !skip_item(d, &mut pos) {
            return false;
        }
    }
    true
}

/// Advance `pos` past one description item. Returns false on malformed input.
fn skip_item(d: &[u8], pos: &mut usize) -> bool {
    match d.get(*pos) {
        Some(b'i') | Some(b'u') | Some(b'b') | Some(b's') => {
            *pos += 1;
            true
        }
        Some(b'A') => {
            *pos += 1;
            skip_item(d, pos)
        }
        Some(b'(') => {
            *pos += 1;
            if d.get(*pos) == Some(&b')') {
                return false;
            }
            while d.get(*pos) != Some(&b')') {
                if *pos >= d.len() || !skip_item(d, pos) {
                    return false;
                }
            }
            *pos += 1;
            true
        }
        _ => false,
    }
}

/// A marshalled object: tagged bytes plus a read cursor.
#[derive(Debug, Clone, Default)]
pub struct Object {
    buf: Vec<u8>,
    pos: usize,
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        // The cursor is extraction state, not content.
        self.buf == other.buf
    }
}

impl Eq for Object {}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt raw bytes as an object, cursor at the start.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            buf: buf.to_vec(),
            pos: 0,
        }
    }

    /// The marshalled bytes.
    pub fn raw(&self) -> &[u8] {
        &self.buf
    }

    pub fn raw_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Reset the extraction cursor to the start of the buffer.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Drop all content; the object is as freshly allocated.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    // ---- building ----

    pub fn push_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    pub fn push_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    pub fn push_byte(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Append a string and its NUL terminator. Fails on interior NULs, which
    /// the encoding cannot represent.
    pub fn push_str(&mut self, s: &str) -> Result<(), ObjectError> {
        if s.as_bytes().contains(&0) {
            return Err(ObjectError::InteriorNul);
        }
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    /// Append an array length prefix; `len` elements must follow.
    pub fn push_array_len(&mut self, len: u32) {
        self.buf.extend_from_slice(&len.to_ne_bytes());
    }

    /// Append a byte array (`Ab`): length prefix plus the bytes.
    pub fn push_bytes(&mut self, b: &[u8]) {
        self.push_array_len(b.len() as u32);
        self.buf.extend_from_slice(b);
    }

    // ---- extraction ----

    fn take(&mut self, n: usize) -> Result<&[u8], ObjectError> {
        let end = self.pos.checked_add(n).ok_or(ObjectError::UnexpectedEnd)?;
        if end > self.buf.len() {
            return Err(ObjectError::UnexpectedEnd);
        }
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    pub fn extract_i32(&mut self) -> Result<i32, ObjectError> {
        let b = self.take(4)?;
        Ok(i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn extract_u32(&mut self) -> Result<u32, ObjectError> {
        let b = self.take(4)?;
        Ok(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn extract_byte(&mut self) -> Result<u8, ObjectError> {
        Ok(self.take(1)?[0])
    }

    pub fn extract_str(&mut self) -> Result<String, ObjectError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(ObjectError::UnterminatedString)?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| ObjectError::InvalidUtf8)?
            .to_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    pub fn extract_array_len(&mut self) -> Result<u32, ObjectError> {
        self.extract_u32()
    }

    /// Extract a byte array (`Ab`).
    pub fn extract_bytes(&mut self) -> Result<Vec<u8>, ObjectError> {
        let n = self.extract_array_len()? as usize;
        Ok(self.take(n)?.to_vec())
    }

    // ---- description-driven build / parse ----

    /// Build an object from a description and matching values.
    pub fn build(descr: &str, values: &[Value]) -> Result<Object, ObjectError> {
        if !descr_valid(descr) {
            return Err(ObjectError::InvalidDescr);
        }
        let mut obj = Object::new();
        let d = descr.as_bytes();
        let mut pos = 0;
        let mut vals = values.iter();
        while pos < d.len() {
            let v = vals.next().ok_or(ObjectError::ValueCount)?;
            obj.append_item(d, &mut pos, v)?;
        }
        if vals.next().is_some() {
            return Err(ObjectError::ValueCount);
        }
        Ok(obj)
    }

    fn append_item(&mut self, d: &[u8], pos: &mut usize, v: &Value) -> Result<(), ObjectError> {
        match (d[*pos], v) {
            (b'i', Value::I32(x)) => {
                *pos += 1;
                self.push_i32(*x);
                Ok(())
            }
            (b'u', Value::U32(x)) => {
                *pos += 1;
                self.push_u32(*x);
                Ok(())
            }
            (b'b', Value::Byte(x)) => {
                *pos += 1;
                self.push_byte(*x);
                Ok(())
            }
            (b's', Value::Str(s)) => {
                *pos += 1;
                self.push_str(s)
            }
            (b'A', Value::Array(elems)) => {
                *pos += 1;
                self.push_array_len(elems.len() as u32);
                let shape = *pos;
                for e in elems {
                    *pos = shape;
                    self.append_item(d, pos, e)?;
                }
                if elems.is_empty() {
                    // Still advance past the element shape.
                    skip_item(d, pos);
                }
                Ok(())
            }
            (b'(', Value::Struct(fields)) => {
                *pos += 1;
                let mut f = fields.iter();
                while d[*pos] != b')' {
                    let v = f.next().ok_or(ObjectError::ValueCount)?;
                    self.append_item(d, pos, v)?;
                }
                *pos += 1;
                if f.next().is_some() {
                    return Err(ObjectError::ValueCount);
                }
                Ok(())
            }
            (tag, _) => Err(ObjectError::TypeMismatch(tag as char)),
        }
    }

    /// Extract all values according to a description, advancing the cursor.
    pub fn parse(&mut self, descr: &str) -> Result<Vec<Value>, ObjectError> {
        if !descr_valid(descr) {
            return Err(ObjectError::InvalidDescr);
        }
        let d = descr.as_bytes();
        let mut pos = 0;
        let mut out = Vec::new();
        while pos < d.len() {
            out.push(self.extract_item(d, &mut pos)?);
        }
        Ok(out)
    }

    fn extract_item(&mut self, d: &[u8], pos: &mut usize) -> Result<Value, ObjectError> {
        match d[*pos] {
            b'i' => {
                *pos += 1;
                Ok(Value::I32(self.extract_i32()?))
            }
            b'u' => {
                *pos += 1;
                Ok(Value::U32(self.extract_u32()?))
            }
            b'b' => {
                *pos += 1;
                Ok(Value::Byte(self.extract_byte()?))
            }
            b's' => {
                *pos += 1;
                Ok(Value::Str(self.extract_str()?))
            }
            b'A' => {
                *pos += 1;
                let n = self.extract_array_len()? as usize;
                // Every element is at least one byte; a count beyond the
                // remaining buffer cannot be honest.
                if n > self.buf.len() - self.pos {
                    return Err(ObjectError::UnexpectedEnd);
                }
                let shape = *pos;
                let mut elems = Vec::new();
                for _ in 0..n {
                    *pos = shape;
                    elems.push(self.extract_item(d, pos)?);
                }
                if n == 0 {
                    skip_item(d, pos);
                }
                Ok(Value::Array(elems))
            }
            b'(' => {
                *pos += 1;
                let mut fields = Vec::new();
                while d[*pos] != b')' {
                    fields.push(self.extract_item(d, pos)?);
                }
                *pos += 1;
                Ok(Value::Struct(fields))
            }
            _ => Err(ObjectError::InvalidDescr),
        }
    }

    // ---- rendering ----

    /// Render a human-readable form, e.g. `(1, "hello", [0x01, 0x02])`,
    /// appending to `out` but never more than `cap` bytes. On overflow the
    /// already-rendered prefix stays in `out` and `NoSpace` is returned.
    ///
    /// The extraction cursor is not disturbed.
    pub fn render(&self, descr: &str, out: &mut String, cap: usize) -> Result<(), ObjectError> {
        let full = self.to_repr(descr)?;
        if full.len() > cap {
            let mut end = cap;
            while !full.is_char_boundary(end) {
                end -= 1;
            }
            out.push_str(&full[..end]);
            return Err(ObjectError::NoSpace);
        }
        out.push_str(&full);
        Ok(())
    }

    /// Render a human-readable form with no size cap.
    pub fn to_repr(&self, descr: &str) -> Result<String, ObjectError> {
        let mut copy = Object::from_bytes(&self.buf);
        let values = copy.parse(descr)?;
        let mut out = String::from("(");
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            fmt_value(v, &mut out);
        }
        out.push(')');
        Ok(out)
    }
}

fn fmt_value(v: &Value, out: &mut String) {
    use std::fmt::Write;

    match v {
        Value::I32(x) => {
            let _ = write!(out, "{x}");
        }
        Value::U32(x) => {
            let _ = write!(out, "{x}");
        }
        Value::Byte(x) => {
            let _ = write!(out, "0x{x:02x}");
        }
        Value::Str(s) => {
            let _ = write!(out, "{s:?}");
        }
        Value::Array(elems) => {
            out.push('[');
            for (i, e) in elems.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_value(e, out);
            }
            out.push(']');
        }
        Value::Struct(fields) => {
            out.push('(');
            for (i, e) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_value(e, out);
            }
            out.push(')');
        }
    }
}
