//! Integration tests for CryptoKey and the MD5 classes
//!
//! Tests cover:
//! - Keys built from the same string compare equal
//! - Reset returns a key to the freshly constructed state
//! - Keys built from an MD5 hash of a string
//! - Hash text and byte counts seen through macro calls

use cml_engine::intrinsics::{BooleanVal, Card4Val, StringVal};
use cml_engine::{Engine, Intrinsic, ValueId};
use cml_stdlib::MD5HashVal;

struct Fixture {
    engine: Engine,
    key_id: cml_engine::ClassId,
    hash_id: cml_engine::ClassId,
    digest: ValueId,
}

impl Fixture {
    fn new() -> Self {
        let mut engine = Engine::new(cml_stdlib::registry().unwrap());
        let key_id = engine.registry().find("MEng.System.Runtime.CryptoKey").unwrap();
        let hash_id = engine.registry().find("MEng.System.Runtime.MD5Hash").unwrap();
        let digest_id = engine.registry().find("MEng.System.Runtime.MD5Digest").unwrap();
        let digest = engine.construct(digest_id, "digest").unwrap();
        Self {
            engine,
            key_id,
            hash_id,
            digest,
        }
    }

    fn string(&mut self, text: &str) -> ValueId {
        let id = self.engine.construct(Intrinsic::String.id(), "text").unwrap();
        self.engine.value_as_mut::<StringVal>(id).unwrap().text = text.to_string();
        id
    }

    fn key_from_string(&mut self, text: &str) -> ValueId {
        let key = self.engine.construct(self.key_id, "key").unwrap();
        let src = self.string(text);
        self.engine.call_by_name(key, "FromString", &[src]).unwrap();
        key
    }

    fn hash_of(&mut self, text: &str) -> ValueId {
        let hash = self.engine.construct(self.hash_id, "hash").unwrap();
        let src = self.string(text);
        self.engine.call_by_name(self.digest, "DigestStr", &[hash, src]).unwrap();
        hash
    }

    fn key_from_hash(&mut self, text: &str) -> ValueId {
        let key = self.engine.construct(self.key_id, "key").unwrap();
        let hash = self.hash_of(text);
        self.engine.call_by_name(key, "FromHash", &[hash]).unwrap();
        key
    }

    fn equal(&mut self, left: ValueId, right: ValueId) -> bool {
        let result = self.engine.call_by_name(left, "Equal", &[right]).unwrap().unwrap();
        self.engine.value_as::<BooleanVal>(result).unwrap().value
    }
}

#[test]
fn test_same_string_same_key() {
    let mut fx = Fixture::new();
    let first = fx.key_from_string("open sesame");
    let second = fx.key_from_string("open sesame");
    let other = fx.key_from_string("open sesamf");
    assert!(fx.equal(first, second));
    assert!(!fx.equal(first, other));
}

#[test]
fn test_reset_matches_fresh_key() {
    let mut fx = Fixture::new();
    let key = fx.key_from_string("open sesame");
    let fresh = fx.engine.construct(fx.key_id, "fresh").unwrap();
    assert!(!fx.equal(key, fresh));

    fx.engine.call_by_name(key, "Reset", &[]).unwrap();
    assert!(fx.equal(key, fresh));
    let count = fx.engine.call_by_name(key, "GetByteCount", &[]).unwrap().unwrap();
    assert_eq!(fx.engine.value_as::<Card4Val>(count).unwrap().value, 0);
}

#[test]
fn test_key_from_hash() {
    let mut fx = Fixture::new();
    let first = fx.key_from_hash("test");
    let second = fx.key_from_hash("test");
    let other = fx.key_from_hash("Test");
    assert!(fx.equal(first, second));
    assert!(!fx.equal(first, other));

    let count = fx.engine.call_by_name(first, "GetByteCount", &[]).unwrap().unwrap();
    assert_eq!(fx.engine.value_as::<Card4Val>(count).unwrap().value, 16);
}

#[test]
fn test_hash_text() {
    let mut fx = Fixture::new();
    let hash = fx.hash_of("test");
    let text = fx.engine.call_by_name(hash, "GetAsString", &[]).unwrap().unwrap();
    assert_eq!(
        fx.engine.value_as::<StringVal>(text).unwrap().text,
        "098F6BCD4621D373CADE4E832627B4F6"
    );
    assert_eq!(
        fx.engine.value_as::<MD5HashVal>(hash).unwrap(),
        &MD5HashVal::digest("test")
    );

    let empty = fx.hash_of("");
    assert_eq!(
        fx.engine.value_as::<MD5HashVal>(empty).unwrap().to_hex(),
        "D41D8CD98F00B204E9800998ECF8427E"
    );
}
