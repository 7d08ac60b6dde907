//! PHP `serialize()` codec.
//!
//! The file cache and the legacy `cache` table both hold values in PHP's
//! native serialization format so that the legacy site can read what we
//! write and vice versa. Only the scalar and array types are supported;
//! objects and references never appear in cache records.
//!
//! A file cache record is the serialized value immediately followed by the
//! expiry as a serialized integer: `<payload>i:<unix-expiry>;`.

use thiserror::Error;

/// Codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhpError {
    #[error("unexpected end of input at byte {0}")]
    Eof(usize),

    #[error("unexpected byte {found:?} at {pos}, expected {expected}")]
    Unexpected {
        pos: usize,
        found: char,
        expected: &'static str,
    },

    #[error("invalid number at byte {0}")]
    Number(usize),

    #[error("trailing data at byte {0}")]
    Trailing(usize),

    #[error("unsupported type tag {0:?}")]
    Unsupported(char),
}

/// A PHP value.
#[derive(Debug, Clone, PartialEq)]
pub enum PhpValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// PHP strings are byte strings.
    String(Vec<u8>),
    /// Ordered hash map; keys are `Int` or `String`.
    Array(Vec<(PhpValue, PhpValue)>),
}

impl PhpValue {
    pub fn str(s: &str) -> Self {
        PhpValue::String(s.as_bytes().to_vec())
    }

    /// Associative array with string keys.
    pub fn assoc<'a>(pairs: impl IntoIterator<Item = (&'a str, PhpValue)>) -> Self {
        PhpValue::Array(
            pairs
                .into_iter()
                .map(|(k, v)| (PhpValue::str(k), v))
                .collect(),
        )
    }

    /// List with implicit `0..n` keys.
    pub fn list(items: impl IntoIterator<Item = PhpValue>) -> Self {
        PhpValue::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (PhpValue::Int(i as i64), v))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PhpValue::String(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PhpValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PhpValue::Null)
    }

    /// Look up a string key in an array.
    pub fn get(&self, key: &str) -> Option<&PhpValue> {
        match self {
            PhpValue::Array(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Values of an array in order.
    pub fn values(&self) -> impl Iterator<Item = &PhpValue> {
        let entries: &[(PhpValue, PhpValue)] = match self {
            PhpValue::Array(entries) => entries,
            _ => &[],
        };
        entries.iter().map(|(_, v)| v)
    }
}

/// Serialize a value.
pub fn serialize(value: &PhpValue) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &PhpValue) {
    match value {
        PhpValue::Null => out.extend_from_slice(b"N;"),
        PhpValue::Bool(b) => out.extend_from_slice(if *b { b"b:1;" } else { b"b:0;" }),
        PhpValue::Int(i) => out.extend_from_slice(format!("i:{i};").as_bytes()),
        PhpValue::Float(f) => {
            let repr = if f.is_nan() {
                "NAN".to_string()
            } else if f.is_infinite() {
                if *f > 0.0 { "INF" } else { "-INF" }.to_string()
            } else {
                f.to_string()
            };
            out.extend_from_slice(format!("d:{repr};").as_bytes());
        }
        PhpValue::String(bytes) => {
            out.extend_from_slice(format!("s:{}:\"", bytes.len()).as_bytes());
            out.extend_from_slice(bytes);
            out.extend_from_slice(b"\";");
        }
        PhpValue::Array(entries) => {
            out.extend_from_slice(format!("a:{}:{{", entries.len()).as_bytes());
            for (k, v) in entries {
                write_value(out, k);
                write_value(out, v);
            }
            out.push(b'}');
        }
    }
}

/// Unserialize a complete input; trailing bytes are an error.
pub fn unserialize(input: &[u8]) -> Result<PhpValue, PhpError> {
    let (value, end) = parse_value(input, 0)?;
    if end != input.len() {
        return Err(PhpError::Trailing(end));
    }
    Ok(value)
}

/// Encode a cache record: serialized value followed by `i:<expiry>;`.
pub fn encode_record(value: &PhpValue, expires_at: i64) -> Vec<u8> {
    let mut out = serialize(value);
    write_value(&mut out, &PhpValue::Int(expires_at));
    out
}

/// Decode a cache record into `(value, unix expiry)`.
pub fn decode_record(input: &[u8]) -> Result<(PhpValue, i64), PhpError> {
    let (value, pos) = parse_value(input, 0)?;
    let (expiry, end) = parse_value(input, pos)?;
    if end != input.len() {
        return Err(PhpError::Trailing(end));
    }
    match expiry {
        PhpValue::Int(ts) => Ok((value, ts)),
        _ => Err(PhpError::Unexpected {
            pos,
            found: input[pos] as char,
            expected: "integer expiry",
        }),
    }
}

fn byte_at(input: &[u8], pos: usize) -> Result<u8, PhpError> {
    input.get(pos).copied().ok_or(PhpError::Eof(pos))
}

fn expect(input: &[u8], pos: usize, want: u8, expected: &'static str) -> Result<usize, PhpError> {
    let found = byte_at(input, pos)?;
    if found != want {
        return Err(PhpError::Unexpected {
            pos,
            found: found as char,
            expected,
        });
    }
    Ok(pos + 1)
}

/// Read bytes up to (not including) `terminator`, returning them and the
/// position after the terminator.
fn read_until(input: &[u8], pos: usize, terminator: u8) -> Result<(&[u8], usize), PhpError> {
    let rest = input.get(pos..).ok_or(PhpError::Eof(pos))?;
    let len = rest
        .iter()
        .position(|&b| b == terminator)
        .ok_or(PhpError::Eof(input.len()))?;
    Ok((&rest[..len], pos + len + 1))
}

fn parse_int(raw: &[u8], pos: usize) -> Result<i64, PhpError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(PhpError::Number(pos))
}

fn parse_value(input: &[u8], pos: usize) -> Result<(PhpValue, usize), PhpError> {
    let tag = byte_at(input, pos)?;
    match tag {
        b'N' => Ok((PhpValue::Null, expect(input, pos + 1, b';', "';'")?)),
        b'b' => {
            let p = expect(input, pos + 1, b':', "':'")?;
            let (raw, next) = read_until(input, p, b';')?;
            match raw {
                b"0" => Ok((PhpValue::Bool(false), next)),
                b"1" => Ok((PhpValue::Bool(true), next)),
                _ => Err(PhpError::Number(p)),
            }
        }
        b'i' => {
            let p = expect(input, pos + 1, b':', "':'")?;
            let (raw, next) = read_until(input, p, b';')?;
            Ok((PhpValue::Int(parse_int(raw, p)?), next))
        }
        b'd' => {
            let p = expect(input, pos + 1, b':', "':'")?;
            let (raw, next) = read_until(input, p, b';')?;
            let f = match raw {
                b"NAN" => f64::NAN,
                b"INF" => f64::INFINITY,
                b"-INF" => f64::NEG_INFINITY,
                _ => std::str::from_utf8(raw)
                    .ok()
                    .and_then(|s| s.parse::<f64>().ok())
                    .ok_or(PhpError::Number(p))?,
            };
            Ok((PhpValue::Float(f), next))
        }
        b's' => {
            let p = expect(input, pos + 1, b':', "':'")?;
            let (raw, p) = read_until(input, p, b':')?;
            let len = usize::try_from(parse_int(raw, p)?).map_err(|_| PhpError::Number(p))?;
            let start = expect(input, p, b'"', "'\"'")?;
            let end = start.checked_add(len).ok_or(PhpError::Number(p))?;
            let bytes = input.get(start..end).ok_or(PhpError::Eof(input.len()))?;
            let p = expect(input, end, b'"', "'\"'")?;
            let p = expect(input, p, b';', "';'")?;
            Ok((PhpValue::String(bytes.to_vec()), p))
        }
        b'a' => {
            let p = expect(input, pos + 1, b':', "':'")?;
            let (raw, p) = read_until(input, p, b':')?;
            let count = usize::try_from(parse_int(raw, p)?).map_err(|_| PhpError::Number(p))?;
            let mut p = expect(input, p, b'{', "'{'")?;
            let mut entries = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let (key, next) = parse_value(input, p)?;
                if !matches!(key, PhpValue::Int(_) | PhpValue::String(_)) {
                    return Err(PhpError::Unexpected {
                        pos: p,
                        found: input[p] as char,
                        expected: "integer or string key",
                    });
                }
                let (value, next) = parse_value(input, next)?;
                entries.push((key, value));
                p = next;
            }
            let p = expect(input, p, b'}', "'}'")?;
            Ok((PhpValue::Array(entries), p))
        }
        other => Err(PhpError::Unsupported(other as char)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_like_php() {
        let value = PhpValue::assoc([
            ("name", PhpValue::str("Steve")),
            ("age", PhpValue::Int(12)),
            ("slim", PhpValue::Bool(false)),
            ("cape", PhpValue::Null),
        ]);
        assert_eq!(
            serialize(&value),
            b"a:4:{s:4:\"name\";s:5:\"Steve\";s:3:\"age\";i:12;s:4:\"slim\";b:0;s:4:\"cape\";N;}"
        );
    }

    #[test]
    fn string_length_is_in_bytes() {
        let value = PhpValue::str("ü");
        assert_eq!(serialize(&value), "s:2:\"ü\";".as_bytes());
        assert_eq!(unserialize("s:2:\"ü\";".as_bytes()).unwrap(), value);
    }

    #[test]
    fn strings_may_contain_delimiters() {
        let raw = b"s:7:\"a\";b:{}\";";
        assert_eq!(unserialize(raw).unwrap(), PhpValue::str("a\";b:{}"));
    }

    #[test]
    fn parses_php_output() {
        // Output of PHP: serialize(['ids' => ['t1', 't2'], 'n' => 1.5])
        let raw = b"a:2:{s:3:\"ids\";a:2:{i:0;s:2:\"t1\";i:1;s:2:\"t2\";}s:1:\"n\";d:1.5;}";
        let value = unserialize(raw).unwrap();
        let ids: Vec<&str> = value
            .get("ids")
            .unwrap()
            .values()
            .filter_map(PhpValue::as_str)
            .collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert_eq!(value.get("n"), Some(&PhpValue::Float(1.5)));
    }

    #[test]
    fn record_carries_expiry_suffix() {
        let value = PhpValue::str("hello");
        let bytes = encode_record(&value, 1_700_000_000);
        assert_eq!(bytes, b"s:5:\"hello\";i:1700000000;");
        assert_eq!(decode_record(&bytes).unwrap(), (value, 1_700_000_000));
    }

    #[test]
    fn record_without_expiry_is_rejected() {
        assert!(matches!(
            decode_record(b"s:5:\"hello\";"),
            Err(PhpError::Eof(_))
        ));
    }

    #[test]
    fn truncated_and_trailing_input_is_rejected() {
        assert!(unserialize(b"s:10:\"short\";").is_err());
        assert_eq!(unserialize(b"i:1;i:2;"), Err(PhpError::Trailing(4)));
        assert!(unserialize(b"a:1:{i:0;").is_err());
        assert_eq!(unserialize(b"O:8:\"stdClass\":0:{}"), Err(PhpError::Unsupported('O')));
    }

    #[test]
    fn negative_ints_and_special_floats() {
        assert_eq!(unserialize(b"i:-42;").unwrap(), PhpValue::Int(-42));
        assert_eq!(unserialize(b"d:-INF;").unwrap(), PhpValue::Float(f64::NEG_INFINITY));
        assert_eq!(serialize(&PhpValue::Float(1.0)), b"d:1;");
    }
}
