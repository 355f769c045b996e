//! Structural operations on [`Object`]: equality, ordering, hashing, deep
//! copy, iteration, sort, slice and the typed convenience accessors from
//! spec §4.1.

use super::{Dictionary, ErrorPayload, Object, ObjectKind, ShmemHandle};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        use Object::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (UInt64(a), UInt64(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (String(a, _), String(b, _)) => a == b,
            (Binary(a), Binary(b)) => a == b,
            (Fd(a), Fd(b)) => a.raw() == b.raw(),
            (Error(a), Error(b)) => {
                a.code == b.code
                    && a.message == b.message
                    && a.extra == b.extra
                    && a.stack == b.stack
            }
            (Array(a, _), Array(b, _)) => a.as_slice() == b.as_slice(),
            (Dictionary(a, _), Dictionary(b, _)) => dict_eq(a, b),
            (Shmem(a), Shmem(b)) => a.name == b.name && a.size == b.size,
            _ => false,
        }
    }
}

impl Eq for Object {}

fn dict_eq(a: &super::Dictionary, b: &super::Dictionary) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(k, v)| b.get(k).map(|bv| bv == v).unwrap_or(false))
}

/// Total preorder across variants (cross-type compares by declaration order
/// of [`ObjectKind`], intra-type uses the natural order); Doubles follow
/// IEEE-754 `partial_cmp` and fall back to `Equal` only on bit-identical NaN
/// so `compare` never panics on NaN input (spec invariant 4 carves this out
/// explicitly).
pub fn compare(a: &Object, b: &Object) -> Ordering {
    use Object::*;
    let (ka, kb) = (a.kind(), b.kind());
    if ka != kb {
        return kind_rank(ka).cmp(&kind_rank(kb));
    }
    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Bool(x), Bool(y)) => x.cmp(y),
        (Int64(x), Int64(y)) => x.cmp(y),
        (UInt64(x), UInt64(y)) => x.cmp(y),
        (Double(x), Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Date(x), Date(y)) => x.cmp(y),
        (String(x, _), String(y, _)) => x.as_bytes().cmp(y.as_bytes()),
        (Binary(x), Binary(y)) => x.as_ref().cmp(y.as_ref()),
        (Fd(x), Fd(y)) => x.raw().cmp(&y.raw()),
        (Error(x), Error(y)) => x.code.cmp(&y.code).then_with(|| x.message.cmp(&y.message)),
        (Array(x, _), Array(y, _)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let c = compare(xi, yi);
                if c != Ordering::Equal {
                    return c;
                }
            }
            x.len().cmp(&y.len())
        }
        (Dictionary(x, _), Dictionary(y, _)) => compare_dicts(x, y),
        (Shmem(x), Shmem(y)) => x.name.cmp(&y.name).then_with(|| x.size.cmp(&y.size)),
        _ => unreachable!("kind equality checked above"),
    }
}

fn kind_rank(kind: ObjectKind) -> u8 {
    match kind {
        ObjectKind::Null => 0,
        ObjectKind::Bool => 1,
        ObjectKind::UInt64 => 2,
        ObjectKind::Int64 => 3,
        ObjectKind::Double => 4,
        ObjectKind::Date => 5,
        ObjectKind::String => 6,
        ObjectKind::Binary => 7,
        ObjectKind::Fd => 8,
        ObjectKind::Dictionary => 9,
        ObjectKind::Array => 10,
        ObjectKind::Error => 11,
        ObjectKind::Shmem => 12,
    }
}

/// Dictionaries compare key-sorted, elementwise, per spec §3.1.
fn compare_dicts(a: &Dictionary, b: &Dictionary) -> Ordering {
    let mut ak: Vec<&str> = a.keys().collect();
    let mut bk: Vec<&str> = b.keys().collect();
    ak.sort_unstable();
    bk.sort_unstable();
    for (k1, k2) in ak.iter().zip(bk.iter()) {
        let c = k1.cmp(k2);
        if c != Ordering::Equal {
            return c;
        }
        let c = compare(a.get(k1).unwrap(), b.get(k2).unwrap());
        if c != Ordering::Equal {
            return c;
        }
    }
    ak.len().cmp(&bk.len())
}

/// Stable hash, recursive; dictionary hashing is order-independent per spec
/// §3.1 (XOR-combine per entry rather than feeding entries in iteration
/// order into the hasher).
pub fn object_hash(obj: &Object) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut hasher = DefaultHasher::new();
    hash_into(obj, &mut hasher);
    hasher.finish()
}

fn hash_into<H: Hasher>(obj: &Object, state: &mut H) {
    use Object::*;
    obj.kind().hash(state);
    match obj {
        Null => {}
        Bool(v) => v.hash(state),
        Int64(v) => v.hash(state),
        UInt64(v) => v.hash(state),
        Double(v) => v.to_bits().hash(state),
        Date(v) => v.hash(state),
        String(v, _) => v.hash(state),
        Binary(v) => v.hash(state),
        Fd(v) => v.raw().hash(state),
        Error(e) => {
            e.code.hash(state);
            e.message.hash(state);
        }
        Array(items, _) => {
            for item in items.iter() {
                hash_into(item, state);
            }
        }
        Dictionary(dict, _) => {
            let mut combined: u64 = 0;
            for (k, v) in dict.iter() {
                let mut h = std::collections::hash_map::DefaultHasher::new();
                k.hash(&mut h);
                let key_hash = h.finish();
                let value_hash = object_hash(v);
                combined ^= key_hash.wrapping_mul(value_hash.rotate_left(1) | 1);
            }
            combined.hash(state);
        }
        Shmem(s) => {
            s.name.hash(state);
            s.size.hash(state);
        }
    }
}

/// Deep copy: a fresh, unshared graph. Binary and Array/Dictionary backing
/// stores are cloned outright (not merely `Arc::clone`d); Fd is `dup`ed;
/// Shmem copies the handle but not the mapped pages (spec §4.1 "Copy").
pub fn deep_copy(obj: &Object) -> std::io::Result<Object> {
    Ok(match obj {
        Object::Null => Object::Null,
        Object::Bool(v) => Object::Bool(*v),
        Object::Int64(v) => Object::Int64(*v),
        Object::UInt64(v) => Object::UInt64(*v),
        Object::Double(v) => Object::Double(*v),
        Object::Date(v) => Object::Date(*v),
        Object::String(v, loc) => Object::String(Arc::from(v.as_ref()), *loc),
        Object::Binary(v) => Object::Binary(Arc::from(v.as_ref())),
        Object::Fd(fd) => Object::Fd(Arc::new(fd.dup()?)),
        Object::Error(e) => Object::Error(Arc::new(ErrorPayload {
            code: e.code,
            message: e.message.clone(),
            extra: match &e.extra {
                Some(inner) => Some(Box::new(deep_copy(inner)?)),
                None => None,
            },
            stack: match &e.stack {
                Some(inner) => Some(Box::new(deep_copy(inner)?)),
                None => None,
            },
        })),
        Object::Array(items, loc) => {
            let mut copied = Vec::with_capacity(items.len());
            for item in items.iter() {
                copied.push(deep_copy(item)?);
            }
            Object::Array(Arc::new(copied), *loc)
        }
        Object::Dictionary(dict, loc) => {
            let mut copied = Dictionary::new();
            for (k, v) in dict.iter() {
                copied.insert(k.to_string(), deep_copy(v)?);
            }
            Object::Dictionary(Arc::new(copied), *loc)
        }
        Object::Shmem(handle) => Object::Shmem(Arc::new(ShmemHandle {
            name: handle.name.clone(),
            size: handle.size,
            mapping: None,
        })),
    })
}

/// `apply(container, visitor)`: invoke `visitor` per array entry; stop early
/// when it returns `false`. Borrowing `obj` for the whole call makes
/// concurrent mutation a compile error rather than the "undefined order"
/// spec §4.1 allows a native implementation to risk.
pub fn apply_array<F: FnMut(usize, &Object) -> bool>(items: &[Object], mut visitor: F) {
    for (i, item) in items.iter().enumerate() {
        if !visitor(i, item) {
            break;
        }
    }
}

/// `reverse_apply`: walk an array high-to-low index.
pub fn reverse_apply_array<F: FnMut(usize, &Object) -> bool>(items: &[Object], mut visitor: F) {
    for i in (0..items.len()).rev() {
        if !visitor(i, &items[i]) {
            break;
        }
    }
}

/// `apply` over a dictionary, insertion order.
pub fn apply_dictionary<F: FnMut(&str, &Object) -> bool>(dict: &Dictionary, mut visitor: F) {
    for (k, v) in dict.iter() {
        if !visitor(k, v) {
            break;
        }
    }
}

/// Array indexing is dense: setting index `i` in an array of length `n`
/// where `i > n` fills `n..i` with Null (spec invariant 7).
pub fn array_set(arr: &mut Arc<Vec<Object>>, index: usize, value: Object) {
    let vec = Arc::make_mut(arr);
    if index >= vec.len() {
        vec.resize_with(index + 1, || Object::Null);
    }
    vec[index] = value;
}

/// Stable sort using a caller-supplied comparator; ties preserve insertion
/// order (Rust's `sort_by` is already stable, so this is a thin documented
/// wrapper rather than a hand-rolled merge sort).
pub fn sort_array<F: FnMut(&Object, &Object) -> Ordering>(items: &mut Vec<Object>, mut cmp: F) {
    items.sort_by(|a, b| cmp(a, b));
}

/// `slice(a, start, len)`: `len == -1` means "to end"; results are clamped
/// to the array's size. Entries are retained (shared `Clone`), not copied,
/// per spec §4.1.
pub fn slice_array(items: &[Object], start: usize, len: isize) -> Vec<Object> {
    if start >= items.len() {
        return Vec::new();
    }
    let end = if len < 0 {
        items.len()
    } else {
        (start + len as usize).min(items.len())
    };
    items[start..end].to_vec()
}

/// Typed accessor sentinels (spec §4.1): missing key/index or mismatched
/// type never raises, it returns the documented sentinel.
pub fn get_bool(obj: &Object) -> bool {
    obj.as_bool().unwrap_or(false)
}

pub fn get_i64(obj: &Object) -> i64 {
    obj.as_i64().unwrap_or(0)
}

pub fn get_u64(obj: &Object) -> u64 {
    obj.as_u64().unwrap_or(0)
}

pub fn get_f64(obj: &Object) -> f64 {
    obj.as_f64().unwrap_or(0.0)
}

pub fn get_str<'a>(obj: &'a Object) -> Option<&'a str> {
    obj.as_str()
}

pub fn get_bytes<'a>(obj: &'a Object) -> Option<&'a [u8]> {
    obj.as_bytes()
}

pub fn array_get<'a>(array: &'a Object, index: usize) -> Object {
    array
        .as_array()
        .and_then(|items| items.get(index))
        .cloned()
        .unwrap_or(Object::Null)
}

pub fn dictionary_get<'a>(dict: &'a Object, key: &str) -> Object {
    dict.as_dictionary()
        .and_then(|d| d.get(key))
        .cloned()
        .unwrap_or(Object::Null)
}

pub fn text_description(obj: &Object) -> String {
    let mut out = String::new();
    write_text(obj, &mut out);
    out
}

fn write_text(obj: &Object, out: &mut String) {
    use std::fmt::Write;
    match obj {
        Object::Null => out.push_str("null"),
        Object::Bool(v) => {
            let _ = write!(out, "{v}");
        }
        Object::Int64(v) => {
            let _ = write!(out, "{v}");
        }
        Object::UInt64(v) => {
            let _ = write!(out, "{v}");
        }
        Object::Double(v) => {
            let _ = write!(out, "{v}");
        }
        Object::Date(v) => {
            let _ = write!(out, "<date {v}>");
        }
        Object::String(s, _) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    '\r' => out.push_str("\\r"),
                    c if (c as u32) < 0x20 => {
                        let _ = write!(out, "\\x{:02x}", c as u32);
                    }
                    c => out.push(c),
                }
            }
            out.push('"');
        }
        Object::Binary(b) => {
            let _ = write!(out, "<binary, {} bytes>", b.len());
        }
        Object::Fd(fd) => {
            let _ = write!(out, "<fd {}>", fd.raw());
        }
        Object::Error(e) => {
            let _ = write!(out, "<error {}: {}>", e.code, e.message);
        }
        Object::Array(items, _) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_text(item, out);
            }
            out.push(']');
        }
        Object::Dictionary(dict, _) => {
            out.push('{');
            for (i, (k, v)) in dict.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{k}: ");
                write_text(v, out);
            }
            out.push('}');
        }
        Object::Shmem(s) => {
            let _ = write!(out, "<shmem {} ({} bytes)>", s.name, s.size);
        }
    }
}

impl std::fmt::Display for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&text_description(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;

    #[test]
    fn equal_implies_hash_equal() {
        let a = Object::array(vec![Object::int64(1), Object::string("x")]);
        let b = Object::array(vec![Object::int64(1), Object::string("x")]);
        assert_eq!(a, b);
        assert_eq!(object_hash(&a), object_hash(&b));
    }

    #[test]
    fn dictionary_equality_ignores_order() {
        let mut d1 = Dictionary::new();
        d1.insert("a", Object::int64(1));
        d1.insert("b", Object::int64(2));
        let mut d2 = Dictionary::new();
        d2.insert("b", Object::int64(2));
        d2.insert("a", Object::int64(1));
        assert_eq!(Object::dictionary(d1.clone()), Object::dictionary(d2.clone()));
        assert_eq!(object_hash(&Object::dictionary(d1)), object_hash(&Object::dictionary(d2)));
    }

    #[test]
    fn array_ordering_is_order_sensitive() {
        let a = Object::array(vec![Object::int64(1), Object::int64(2)]);
        let b = Object::array(vec![Object::int64(2), Object::int64(1)]);
        assert_ne!(a, b);
    }

    #[test]
    fn cross_type_ordering_uses_kind_rank() {
        assert_eq!(compare(&Object::Null, &Object::bool(true)), Ordering::Less);
        assert_eq!(compare(&Object::uint64(5), &Object::int64(1)), Ordering::Less);
    }

    #[test]
    fn array_set_sparse_fill_is_null() {
        let mut arr = Arc::new(vec![Object::int64(1)]);
        array_set(&mut arr, 3, Object::string("x"));
        assert_eq!(arr.len(), 4);
        assert_eq!(arr[1], Object::Null);
        assert_eq!(arr[2], Object::Null);
        assert_eq!(arr[3], Object::string("x"));
    }

    #[test]
    fn slice_to_end_with_negative_len() {
        let items = vec![Object::int64(1), Object::int64(2), Object::int64(3)];
        let sliced = slice_array(&items, 1, -1);
        assert_eq!(sliced, vec![Object::int64(2), Object::int64(3)]);
    }

    #[test]
    fn slice_clamps_to_length() {
        let items = vec![Object::int64(1), Object::int64(2)];
        let sliced = slice_array(&items, 0, 10);
        assert_eq!(sliced.len(), 2);
    }

    #[test]
    fn deep_copy_is_unshared() {
        let original = Object::array(vec![Object::string("a")]);
        let mut copy = deep_copy(&original).unwrap();
        if let Object::Array(ref mut items, _) = copy {
            array_set(items, 0, Object::string("b"));
        }
        assert_eq!(original.as_array().unwrap()[0], Object::string("a"));
    }

    #[test]
    fn typed_accessors_return_sentinels() {
        let n = Object::Null;
        assert_eq!(get_bool(&n), false);
        assert_eq!(get_i64(&n), 0);
        assert_eq!(get_u64(&n), 0);
        assert_eq!(get_f64(&n), 0.0);
        assert_eq!(get_str(&n), None);
    }

    #[test]
    fn text_description_escapes_strings() {
        let s = Object::string("a\"b\nc");
        assert_eq!(text_description(&s), "\"a\\\"b\\nc\"");
    }

    #[test]
    fn apply_visits_in_order_and_can_stop_early() {
        let items = vec![Object::int64(1), Object::int64(2), Object::int64(3)];
        let mut seen = Vec::new();
        apply_array(&items, |i, v| {
            seen.push((i, v.as_i64().unwrap()));
            i < 1
        });
        assert_eq!(seen, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn reverse_apply_walks_high_to_low() {
        let items = vec![Object::int64(1), Object::int64(2), Object::int64(3)];
        let mut seen = Vec::new();
        reverse_apply_array(&items, |i, v| {
            seen.push((i, v.as_i64().unwrap()));
            true
        });
        assert_eq!(seen, vec![(2, 3), (1, 2), (0, 1)]);
    }
}
