/// Property-based tests for amount rounding and the wire format.
use proptest::prelude::*;
use rust_decimal::Decimal;
use valkyrie::{
    ErrorCode, ValkyrieError,
    amount::{AMOUNT_SCALE, Amount, round_amount},
};

// Amounts with up to six decimals, i.e. representable on the wire.
fn wire_amount_strategy() -> impl Strategy<Value = Amount> {
    (-1_000_000_000_000i64..1_000_000_000_000i64, 0u32..=AMOUNT_SCALE)
        .prop_map(|(mantissa, scale)| Amount::new(Decimal::new(mantissa, scale)))
}

// Amounts carrying a non-zero seventh to tenth decimal.
fn excess_precision_strategy() -> impl Strategy<Value = Amount> {
    (-1_000_000_000i64..1_000_000_000i64, 7u32..=10, 1i64..10).prop_map(|(mantissa, scale, last)| {
        let mantissa = mantissa * 10 + if mantissa < 0 { -last } else { last };
        Amount::new(Decimal::new(mantissa, scale))
    })
}

proptest! {
    #[test]
    fn rounding_accepts_wire_amounts_unchanged(amount in wire_amount_strategy()) {
        let rounded = round_amount(amount).unwrap();
        prop_assert_eq!(rounded, amount);
    }

    #[test]
    fn rounding_is_idempotent(amount in wire_amount_strategy()) {
        let once = round_amount(amount).unwrap();
        let twice = round_amount(once).unwrap();
        prop_assert_eq!(once, twice);
        prop_assert_eq!(once.value().scale(), twice.value().scale());
    }

    #[test]
    fn excess_precision_is_rejected(amount in excess_precision_strategy()) {
        let error = ValkyrieError::from(round_amount(amount).unwrap_err());
        prop_assert_eq!(error.code(), ErrorCode::PrecisionLoss);
    }

    #[test]
    fn wire_string_parses_back_to_the_same_value(amount in wire_amount_strategy()) {
        let wire = amount.to_wire_string().unwrap();
        let decimals = wire.split('.').nth(1).map(str::len);
        prop_assert_eq!(decimals, Some(AMOUNT_SCALE as usize));
        let parsed: Amount = wire.parse().unwrap();
        prop_assert_eq!(parsed, amount);
    }

    #[test]
    fn json_never_carries_numbers(amount in wire_amount_strategy()) {
        let json = serde_json::to_value(amount).unwrap();
        prop_assert!(json.is_string());
    }
}
