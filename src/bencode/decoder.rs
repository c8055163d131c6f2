use super::Value;
use crate::error::{LeechError, Result};
use std::collections::BTreeMap;

const MAX_DEPTH: usize = 256;

/// Decode a complete bencoded document. Trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<Value> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.value(0)?;

    if decoder.pos != data.len() {
        return Err(err(format!(
            "{} trailing bytes after value",
            data.len() - decoder.pos
        )));
    }

    Ok(value)
}

/// Raw bytes of `key`'s value in the top-level dictionary of `data`, exactly
/// as they appear in the input.
pub fn dict_value_span<'a>(data: &'a [u8], key: &[u8]) -> Result<Option<&'a [u8]>> {
    let mut decoder = Decoder { data, pos: 0 };
    if decoder.peek()? != b'd' {
        return Err(err("expected a dictionary"));
    }
    decoder.pos += 1;

    while decoder.peek()? != b'e' {
        if !decoder.peek()?.is_ascii_digit() {
            return Err(err("dictionary key must be a byte string"));
        }
        let current = decoder.bytes()?;
        let start = decoder.pos;
        decoder.value(1)?;
        if current == key {
            return Ok(Some(&data[start..decoder.pos]));
        }
    }

    Ok(None)
}

fn err(msg: impl Into<String>) -> LeechError {
    LeechError::Bencode(msg.into())
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| err("unexpected end of input"))
    }

    /// Consume bytes up to (not including) `delim` and step past it.
    fn take_until(&mut self, delim: u8) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == delim)
            .ok_or_else(|| err(format!("missing '{}' terminator", delim as char)))?;
        self.pos += len + 1;
        Ok(&rest[..len])
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(err("nesting too deep"));
        }

        match self.peek()? {
            b'i' => self.int(),
            b'l' => {
                self.pos += 1;
                let mut list = Vec::new();
                while self.peek()? != b'e' {
                    list.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Value::List(list))
            }
            b'd' => {
                self.pos += 1;
                let mut dict = BTreeMap::new();
                while self.peek()? != b'e' {
                    if !self.peek()?.is_ascii_digit() {
                        return Err(err("dictionary key must be a byte string"));
                    }
                    let key = self.bytes()?;
                    if dict.contains_key(&key) {
                        return Err(err(format!(
                            "duplicate dictionary key '{}'",
                            String::from_utf8_lossy(&key)
                        )));
                    }
                    let value = self.value(depth + 1)?;
                    dict.insert(key, value);
                }
                self.pos += 1;
                Ok(Value::Dict(dict))
            }
            b'0'..=b'9' => self.bytes().map(Value::Bytes),
            c => Err(err(format!("invalid token '{}'", c as char))),
        }
    }

    fn int(&mut self) -> Result<Value> {
        self.pos += 1;
        let digits = self.take_until(b'e')?;
        let text = std::str::from_utf8(digits).map_err(|_| err("integer is not ASCII"))?;

        let unsigned = text.strip_prefix('-').unwrap_or(text);
        if unsigned.is_empty()
            || !unsigned.bytes().all(|b| b.is_ascii_digit())
            || (unsigned.len() > 1 && unsigned.starts_with('0'))
            || text == "-0"
        {
            return Err(err(format!("malformed integer '{}'", text)));
        }

        text.parse::<i64>()
            .map(Value::Int)
            .map_err(|_| err(format!("malformed integer '{}'", text)))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let prefix = self.take_until(b':')?;
        let len = std::str::from_utf8(prefix)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| err("invalid string length"))?;

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| err("string length exceeds input"))?;

        let bytes = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }
}
