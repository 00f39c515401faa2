//! 能力请求串解析的性质测试：顺序无关、重复幂等、未知名称在任意位置都失败。

use proptest::{prelude::*, sample::Index};
use spark_discard::capability::{CapabilityParseError, CapabilityRequest, vocabulary};

fn names() -> Vec<&'static str> {
    vocabulary().collect()
}

fn known_tokens() -> impl Strategy<Value = Vec<&'static str>> {
    proptest::collection::vec(proptest::sample::select(names()), 0..8)
}

proptest! {
    #[test]
    fn token_order_does_not_change_the_mask(
        (tokens, shuffled) in known_tokens()
            .prop_flat_map(|tokens| (Just(tokens.clone()), Just(tokens).prop_shuffle()))
    ) {
        let forward = CapabilityRequest::parse(&tokens.join(",")).unwrap();
        let reordered = CapabilityRequest::parse(&shuffled.join(";")).unwrap();
        prop_assert_eq!(forward.mask(), reordered.mask());
    }

    #[test]
    fn repeating_tokens_is_idempotent(tokens in known_tokens()) {
        let joined = tokens.join(",");
        let once = CapabilityRequest::parse(&joined).unwrap();
        let twice = CapabilityRequest::parse(&format!("{joined},{joined}")).unwrap();
        prop_assert_eq!(once.mask(), twice.mask());
    }

    #[test]
    fn single_token_sets_exactly_one_bit(name in proptest::sample::select(names())) {
        let request = CapabilityRequest::parse(name).unwrap();
        prop_assert_eq!(request.mask().bits().count_ones(), 1);
    }

    #[test]
    fn unknown_token_fails_at_any_position(tokens in known_tokens(), slot in any::<Index>()) {
        let mut tokens: Vec<String> = tokens.into_iter().map(String::from).collect();
        let position = slot.index(tokens.len() + 1);
        tokens.insert(position, "BOGUS_TOKEN".to_owned());
        let error = CapabilityRequest::parse(&tokens.join(",")).unwrap_err();
        prop_assert_eq!(
            error,
            CapabilityParseError::UnknownToken {
                token: "BOGUS_TOKEN".to_owned(),
                position,
            }
        );
    }
}
