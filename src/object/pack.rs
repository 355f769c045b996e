//! # Pack / Unpack DSL
//!
//! A format-string-driven constructor (`pack`) and destructurer (`unpack`)
//! for [`Object`] trees, mirroring `rpc_object_pack`/`rpc_object_unpack`
//! from the original C API (spec §4.1.1, §4.1.2).
//!
//! Format characters map one-to-one to construction/destructuring steps:
//!
//! | Char | Action | Argument |
//! |---|---|---|
//! | `v` | inline existing [`Object`] | [`PackArg::Object`] |
//! | `n` | Null | — |
//! | `b` | Bool | [`PackArg::Bool`] |
//! | `B` | Binary (always copies) | [`PackArg::Binary`] |
//! | `f` | Fd | [`PackArg::Fd`] |
//! | `i` | Int64 | [`PackArg::Int`] |
//! | `u` | UInt64 | [`PackArg::UInt`] |
//! | `d` | Double | [`PackArg::Double`] |
//! | `s` | String | [`PackArg::Str`] |
//! | `{` / `}` | begin/end Dictionary (each value preceded by a string key) | — |
//! | `[` / `]` | begin/end Array | — |
//!
//! The top-level format must produce exactly one [`Object`]. A malformed
//! format or nesting mismatch fails with an [`Object::Error`], never a
//! partial result.

use super::{Dictionary, Object};
use std::os::unix::io::RawFd;

/// One variadic argument consumed by a pack format character.
#[derive(Debug, Clone)]
pub enum PackArg {
    Object(Object),
    Bool(bool),
    Binary(Vec<u8>),
    Fd(RawFd),
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(String),
}

impl From<Object> for PackArg {
    fn from(v: Object) -> Self {
        PackArg::Object(v)
    }
}
impl From<bool> for PackArg {
    fn from(v: bool) -> Self {
        PackArg::Bool(v)
    }
}
impl From<i64> for PackArg {
    fn from(v: i64) -> Self {
        PackArg::Int(v)
    }
}
impl From<u64> for PackArg {
    fn from(v: u64) -> Self {
        PackArg::UInt(v)
    }
}
impl From<f64> for PackArg {
    fn from(v: f64) -> Self {
        PackArg::Double(v)
    }
}
impl From<&str> for PackArg {
    fn from(v: &str) -> Self {
        PackArg::Str(v.to_string())
    }
}
impl From<String> for PackArg {
    fn from(v: String) -> Self {
        PackArg::Str(v)
    }
}
impl From<Vec<u8>> for PackArg {
    fn from(v: Vec<u8>) -> Self {
        PackArg::Binary(v)
    }
}

/// Build an [`Object`] from a pack format string and its arguments.
///
/// Scalar format characters (`v n b B f i u d s`) each consume one
/// [`PackArg`]; `{`/`}`/`[`/`]` consume none but must balance. On a
/// malformed format or an argument-count mismatch, returns an
/// [`Object::Error`] of kind `invalid-argument` rather than panicking or
/// returning a partial tree (spec §4.1.1).
pub fn pack(fmt: &str, args: Vec<PackArg>) -> Object {
    let mut args = args.into_iter();
    match pack_value(fmt.chars().peekable(), &mut args) {
        Ok((value, mut chars, consumed_all)) => {
            if chars.next().is_some() || !consumed_all {
                invalid_argument("pack: trailing format characters or unconsumed arguments")
            } else {
                value
            }
        }
        Err(e) => invalid_argument(&e),
    }
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

fn pack_value<'a>(
    mut chars: Chars<'a>,
    args: &mut std::vec::IntoIter<PackArg>,
) -> Result<(Object, Chars<'a>, bool), String> {
    let c = chars.next().ok_or_else(|| "pack: empty format".to_string())?;
    let value = match c {
        'n' => Object::Null,
        'v' => match args.next() {
            Some(PackArg::Object(o)) => o,
            _ => return Err("pack: 'v' expects an Object argument".to_string()),
        },
        'b' => match args.next() {
            Some(PackArg::Bool(v)) => Object::bool(v),
            _ => return Err("pack: 'b' expects a bool argument".to_string()),
        },
        'B' => match args.next() {
            Some(PackArg::Binary(v)) => Object::binary(v),
            _ => return Err("pack: 'B' expects a binary argument".to_string()),
        },
        'f' => match args.next() {
            Some(PackArg::Fd(v)) => Object::fd(v),
            _ => return Err("pack: 'f' expects an fd argument".to_string()),
        },
        'i' => match args.next() {
            Some(PackArg::Int(v)) => Object::int64(v),
            _ => return Err("pack: 'i' expects an int argument".to_string()),
        },
        'u' => match args.next() {
            Some(PackArg::UInt(v)) => Object::uint64(v),
            _ => return Err("pack: 'u' expects a uint argument".to_string()),
        },
        'd' => match args.next() {
            Some(PackArg::Double(v)) => Object::double(v),
            _ => return Err("pack: 'd' expects a double argument".to_string()),
        },
        's' => match args.next() {
            Some(PackArg::Str(v)) => Object::string(v),
            _ => return Err("pack: 's' expects a string argument".to_string()),
        },
        '[' => {
            let mut items = Vec::new();
            loop {
                match chars.peek() {
                    Some(']') => {
                        chars.next();
                        break;
                    }
                    None => return Err("pack: unterminated '['".to_string()),
                    _ => {
                        let (item, rest, _) = pack_value(chars, args)?;
                        items.push(item);
                        chars = rest;
                    }
                }
            }
            Object::array(items)
        }
        '{' => {
            let mut dict = Dictionary::new();
            loop {
                match chars.peek() {
                    Some('}') => {
                        chars.next();
                        break;
                    }
                    None => return Err("pack: unterminated '{'".to_string()),
                    _ => {
                        let key = match args.next() {
                            Some(PackArg::Str(k)) => k,
                            _ => return Err("pack: dictionary key must be a string argument".to_string()),
                        };
                        let (value, rest, _) = pack_value(chars, args)?;
                        dict.insert(key, value);
                        chars = rest;
                    }
                }
            }
            Object::dictionary(dict)
        }
        other => return Err(format!("pack: unknown format character '{other}'")),
    };
    Ok((value, chars, true))
}

fn invalid_argument(message: &str) -> Object {
    Object::error(crate::error::RpcErrorKind::InvalidArgument as i64, message)
}

/// One item consumed while unpacking: either an input dictionary key (read
/// immediately before a `{`-nested value, mirroring pack's key argument) or
/// an out-slot a scalar format character writes into.
#[derive(Debug)]
pub enum UnpackItem<'a> {
    Key(String),
    Object(&'a mut Object),
    Bool(&'a mut bool),
    Binary(&'a mut Vec<u8>),
    Fd(&'a mut RawFd),
    Int(&'a mut i64),
    UInt(&'a mut u64),
    Double(&'a mut f64),
    Str(&'a mut String),
    /// `R` — capture the array remainder as a new sub-Array.
    Remainder(&'a mut Object),
}

/// Destructure `value` according to `fmt`, writing into `items` in order.
///
/// Returns the count of scalar format characters successfully consumed, or
/// the negative of that count on the first type mismatch (spec §4.1.2); a
/// missing key/index is treated as a type mismatch against `Object::Null`.
/// `*` in an array position consumes no item and skips that index.
pub fn unpack(value: &Object, fmt: &str, items: Vec<UnpackItem<'_>>) -> i32 {
    let mut items = items.into_iter();
    match unpack_value(value, &mut fmt.chars().peekable(), &mut items) {
        Ok(n) => n,
        Err(n) => -n,
    }
}

fn unpack_value<'a>(
    value: &Object,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    items: &mut std::vec::IntoIter<UnpackItem<'a>>,
) -> Result<i32, i32> {
    let c = match chars.next() {
        Some(c) => c,
        None => return Ok(0),
    };
    let mut consumed = 0;
    match c {
        'n' => {
            if !value.is_null() {
                return Err(consumed + 1);
            }
        }
        'v' => match items.next() {
            Some(UnpackItem::Object(slot)) => {
                *slot = value.clone();
                consumed += 1;
            }
            _ => return Err(consumed + 1),
        },
        'b' => match (value.as_bool(), items.next()) {
            (Some(v), Some(UnpackItem::Bool(slot))) => {
                *slot = v;
                consumed += 1;
            }
            _ => return Err(consumed + 1),
        },
        'i' => match (value.as_i64(), items.next()) {
            (Some(v), Some(UnpackItem::Int(slot))) => {
                *slot = v;
                consumed += 1;
            }
            _ => return Err(consumed + 1),
        },
        'u' => match (value.as_u64(), items.next()) {
            (Some(v), Some(UnpackItem::UInt(slot))) => {
                *slot = v;
                consumed += 1;
            }
            _ => return Err(consumed + 1),
        },
        'd' => match (value.as_f64(), items.next()) {
            (Some(v), Some(UnpackItem::Double(slot))) => {
                *slot = v;
                consumed += 1;
            }
            _ => return Err(consumed + 1),
        },
        's' => match (value.as_str(), items.next()) {
            (Some(v), Some(UnpackItem::Str(slot))) => {
                *slot = v.to_string();
                consumed += 1;
            }
            _ => return Err(consumed + 1),
        },
        'B' => match (value.as_bytes(), items.next()) {
            (Some(v), Some(UnpackItem::Binary(slot))) => {
                *slot = v.to_vec();
                consumed += 1;
            }
            _ => return Err(consumed + 1),
        },
        'f' => match (value, items.next()) {
            (Object::Fd(fd), Some(UnpackItem::Fd(slot))) => {
                *slot = fd.raw();
                consumed += 1;
            }
            _ => return Err(consumed + 1),
        },
        '[' => {
            let array = match value.as_array() {
                Some(array) => array,
                None => return Err(consumed + 1),
            };
            let mut index = 0usize;
            loop {
                match chars.peek() {
                    Some(']') => {
                        chars.next();
                        break;
                    }
                    None => return Err(consumed + 1),
                    Some('*') => {
                        chars.next();
                        index += 1;
                    }
                    Some('R') => {
                        chars.next();
                        match items.next() {
                            Some(UnpackItem::Remainder(slot)) => {
                                *slot = Object::array(array.get(index..).unwrap_or(&[]).to_vec());
                                consumed += 1;
                            }
                            _ => return Err(consumed + 1),
                        }
                        index = array.len();
                    }
                    _ => {
                        let item = array.get(index).cloned().unwrap_or(Object::Null);
                        consumed += unpack_value(&item, chars, items)?;
                        index += 1;
                    }
                }
            }
        }
        '{' => {
            let dict = match value.as_dictionary() {
                Some(dict) => dict,
                None => return Err(consumed + 1),
            };
            loop {
                match chars.peek() {
                    Some('}') => {
                        chars.next();
                        break;
                    }
                    None => return Err(consumed + 1),
                    _ => {
                        let key = match items.next() {
                            Some(UnpackItem::Key(k)) => k,
                            _ => return Err(consumed + 1),
                        };
                        let entry = match dict.get(&key) {
                            Some(v) => v.clone(),
                            None => return Err(consumed + 1),
                        };
                        consumed += unpack_value(&entry, chars, items)?;
                    }
                }
            }
        }
        other => {
            tracing::warn!(format_char = %other, "unpack: unknown format character");
            return Err(consumed + 1);
        }
    }
    Ok(consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_scalar_roundtrip() {
        let obj = pack("i", vec![PackArg::Int(42)]);
        assert_eq!(obj, Object::int64(42));
    }

    #[test]
    fn pack_array() {
        let obj = pack(
            "[is]",
            vec![PackArg::Int(1), PackArg::Str("hi".into())],
        );
        assert_eq!(
            obj,
            Object::array(vec![Object::int64(1), Object::string("hi")])
        );
    }

    #[test]
    fn pack_dictionary_shape() {
        let obj = pack(
            "{i}",
            vec![PackArg::Str("a".into()), PackArg::Int(7)],
        );
        let dict = obj.as_dictionary().unwrap();
        assert_eq!(dict.get("a"), Some(&Object::int64(7)));
    }

    #[test]
    fn pack_malformed_format_yields_error_object() {
        let obj = pack("Q", vec![]);
        assert_eq!(obj.kind(), super::super::ObjectKind::Error);
    }

    #[test]
    fn unpack_scalar() {
        let obj = Object::int64(42);
        let mut out = 0i64;
        let n = unpack(&obj, "i", vec![UnpackItem::Int(&mut out)]);
        assert_eq!(n, 1);
        assert_eq!(out, 42);
    }

    #[test]
    fn unpack_type_mismatch_is_negative() {
        let obj = Object::string("x");
        let mut out = 0i64;
        let n = unpack(&obj, "i", vec![UnpackItem::Int(&mut out)]);
        assert!(n < 0);
    }

    #[test]
    fn unpack_array_with_skip_and_remainder() {
        let obj = Object::array(vec![
            Object::int64(1),
            Object::int64(2),
            Object::int64(3),
            Object::int64(4),
        ]);
        let mut first = 0i64;
        let mut rest = Object::Null;
        let n = unpack(
            &obj,
            "[i*R]",
            vec![UnpackItem::Int(&mut first), UnpackItem::Remainder(&mut rest)],
        );
        assert_eq!(n, 2);
        assert_eq!(first, 1);
        assert_eq!(
            rest,
            Object::array(vec![Object::int64(3), Object::int64(4)])
        );
    }

    #[test]
    fn unpack_dictionary_shape() {
        let dict_obj = pack("{i}", vec![PackArg::Str("a".into()), PackArg::Int(7)]);
        let mut out = 0i64;
        let n = unpack(
            &dict_obj,
            "{i}",
            vec![UnpackItem::Key("a".into()), UnpackItem::Int(&mut out)],
        );
        assert_eq!(n, 1);
        assert_eq!(out, 7);
    }

    #[test]
    fn unpack_missing_key_is_type_mismatch() {
        let obj = Object::empty_dictionary();
        let mut out = 0i64;
        let n = unpack(
            &obj,
            "{i}",
            vec![UnpackItem::Key("missing".into()), UnpackItem::Int(&mut out)],
        );
        assert!(n < 0);
    }
}
