use diabetactic_types::{Timestamp, MILLIS_PER_DAY};
use proptest::prelude::*;
use std::time::Duration;

#[test]
fn now_is_after_epoch() {
    assert!(Timestamp::now().as_millis() > 0);
}

#[test]
fn from_millis_roundtrip() {
    assert_eq!(Timestamp::from_millis(42).as_millis(), 42);
}

#[test]
fn minus_days_subtracts_whole_days() {
    let ts = Timestamp::from_millis(10 * MILLIS_PER_DAY);
    assert_eq!(ts.minus_days(3).as_millis(), 7 * MILLIS_PER_DAY);
}

#[test]
fn minus_days_saturates() {
    let ts = Timestamp::from_millis(i64::MIN + 5);
    assert_eq!(ts.minus_days(1).as_millis(), i64::MIN);
}

#[test]
fn plus_adds_duration() {
    let ts = Timestamp::from_millis(1_000);
    assert_eq!(ts.plus(Duration::from_millis(500)).as_millis(), 1_500);
}

#[test]
fn days_ago_is_in_the_past() {
    let now = Timestamp::now();
    let past = Timestamp::days_ago(100);
    assert!(past.is_before(&now));
    assert!(now.as_millis() - past.as_millis() >= 100 * MILLIS_PER_DAY);
}

#[test]
fn display_shows_millis() {
    assert_eq!(Timestamp::from_millis(7).to_string(), "7ms");
}

proptest! {
    #[test]
    fn ordering_matches_millis(a in any::<i64>(), b in any::<i64>()) {
        let ta = Timestamp::from_millis(a);
        let tb = Timestamp::from_millis(b);
        prop_assert_eq!(ta.cmp(&tb), a.cmp(&b));
    }
}
