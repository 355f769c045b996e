//! S2: every Object kind survives an encode/decode trip through the JSON
//! wire codec, including the sigil-encoded types that aren't JSON-native.

use librpc::object::json::{from_json_str, to_json_string};
use librpc::Object;

fn round_trip(obj: Object) -> Object {
    let text = to_json_string(&obj).unwrap();
    from_json_str(&text).unwrap()
}

#[test]
fn scalars_and_containers_round_trip() {
    assert_eq!(round_trip(Object::null()), Object::null());
    assert_eq!(round_trip(Object::bool(true)), Object::bool(true));
    assert_eq!(round_trip(Object::int64(-42)), Object::int64(-42));
    assert_eq!(round_trip(Object::double(1.5)), Object::double(1.5));
    assert_eq!(round_trip(Object::string("hi")), Object::string("hi"));

    let arr = Object::array(vec![Object::int64(1), Object::string("two"), Object::bool(false)]);
    assert_eq!(round_trip(arr.clone()), arr);
}

#[test]
fn uint64_above_i64_max_round_trips_exactly() {
    let huge = Object::uint64(u64::MAX);
    assert_eq!(round_trip(huge), Object::uint64(u64::MAX));
}

#[test]
fn binary_round_trips_through_base64_sigil() {
    let bytes = Object::binary(vec![0, 1, 2, 255, 254]);
    assert_eq!(round_trip(bytes.clone()), bytes);
}

#[test]
fn error_with_extra_round_trips() {
    let err = Object::error_with_extra(5, "no such method", Object::string("frobnicate"));
    let back = round_trip(err);
    let payload = back.as_error().unwrap();
    assert_eq!(payload.code, 5);
    assert_eq!(payload.message, "no such method");
}

#[test]
fn nested_dictionary_round_trips() {
    use librpc::Dictionary;
    let mut inner = Dictionary::new();
    inner.insert("a", Object::int64(1));
    let mut outer = Dictionary::new();
    outer.insert("nested", Object::dictionary(inner));
    outer.insert("list", Object::array(vec![Object::string("x")]));
    let obj = Object::dictionary(outer);
    let back = round_trip(obj.clone());
    assert_eq!(back, obj);
}
