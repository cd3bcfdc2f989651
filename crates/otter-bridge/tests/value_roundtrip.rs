use otter_bridge::Value;
use otter_bridge::value::{from_value, is_integral, to_value};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        (-1.0e12..1.0e12f64)
            .prop_filter("non-integral", |n| !is_integral(*n))
            .prop_map(Value::Number),
        "[a-zA-Z0-9 _-]{0,16}".prop_map(Value::from),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..8).prop_map(Value::Map),
        ]
    })
}

proptest! {
    #[test]
    fn prop_json_round_trip(original in value()) {
        let json = original.to_json().unwrap();
        prop_assert_eq!(Value::from(json), original);
    }

    #[test]
    fn prop_serde_round_trip(original in value()) {
        let through_serde: Value = from_value(&original).unwrap();
        prop_assert_eq!(&through_serde, &original);
        prop_assert_eq!(to_value(&through_serde).unwrap(), original);
    }

    #[test]
    fn prop_host_map_round_trip(entries in prop::collection::hash_map("[a-z]{1,6}", any::<i32>(), 0..16)) {
        let value = to_value(&entries).unwrap();
        prop_assert_eq!(value.as_map().map(BTreeMap::len), Some(entries.len()));
        let back: HashMap<String, i32> = from_value(&value).unwrap();
        prop_assert_eq!(back, entries);
    }
}

#[test]
fn test_integral_numbers_come_back_as_integers() {
    let value = Value::Array(vec![Value::Number(3.0), Value::Number(3.5)]);
    let back: (i64, f64) = from_value(&value).unwrap();
    assert_eq!(back, (3, 3.5));
    assert!(from_value::<i64>(&Value::Number(3.5)).is_err());
}
