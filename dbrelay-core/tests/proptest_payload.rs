//! Property tests for notification payload parsing

use dbrelay_core::{ChangeEvent, Operation};
use proptest::prelude::*;
use serde_json::json;

fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Insert),
        Just(Operation::Update),
        Just(Operation::Delete),
    ]
}

proptest! {
    #[test]
    fn well_formed_payloads_always_parse(
        table in "[a-z_]{1,24}",
        op in operation(),
        id in any::<i64>(),
        upper in any::<bool>(),
    ) {
        let op_text = if upper { op.as_str().to_uppercase() } else { op.as_str().to_string() };
        let payload = json!({"table": table, "operation": op_text, "data": {"id": id}}).to_string();

        let event = ChangeEvent::from_payload(&payload).unwrap();
        prop_assert_eq!(event.table(), table.as_str());
        prop_assert_eq!(event.operation(), op);
        prop_assert_eq!(event.data(), &json!({"id": id}));
    }

    #[test]
    fn arbitrary_text_never_panics(payload in ".{0,200}") {
        let _ = ChangeEvent::from_payload(&payload);
    }
}
