//! Worst-of roll-up of per-metric statuses.

use appetite_types::RagStatus;

/// Severity rank used by the roll-up. Diagnostics share a rank with
/// `UNKNOWN`.
pub fn rank(status: RagStatus) -> u8 {
    match status {
        RagStatus::Red => 4,
        RagStatus::Amber => 3,
        RagStatus::Green => 2,
        RagStatus::Unknown | RagStatus::NoKri | RagStatus::NoData => 1,
        RagStatus::NoMetrics => 0,
    }
}

/// Collapse statuses into the single worst one.
///
/// An empty input is `NO_METRICS`. When a diagnostic is the worst child the
/// result is `UNKNOWN`, whichever diagnostic it was.
pub fn worst_of<I>(statuses: I) -> RagStatus
where
    I: IntoIterator<Item = RagStatus>,
{
    let worst = statuses
        .into_iter()
        .map(|status| match status {
            RagStatus::NoKri | RagStatus::NoData => RagStatus::Unknown,
            other => other,
        })
        .max_by_key(|status| rank(*status));
    worst.unwrap_or(RagStatus::NoMetrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = RagStatus> {
        prop_oneof![
            Just(RagStatus::Red),
            Just(RagStatus::Amber),
            Just(RagStatus::Green),
            Just(RagStatus::Unknown),
            Just(RagStatus::NoKri),
            Just(RagStatus::NoData),
            Just(RagStatus::NoMetrics),
        ]
    }

    #[test]
    fn single_red_dominates() {
        let statuses = [
            RagStatus::Green,
            RagStatus::NoData,
            RagStatus::Red,
            RagStatus::Amber,
        ];
        assert_eq!(worst_of(statuses), RagStatus::Red);
    }

    #[test]
    fn empty_is_no_metrics() {
        assert_eq!(worst_of(Vec::new()), RagStatus::NoMetrics);
    }

    #[test]
    fn diagnostics_roll_up_to_unknown() {
        assert_eq!(
            worst_of([RagStatus::NoKri, RagStatus::NoData, RagStatus::NoMetrics]),
            RagStatus::Unknown
        );
        assert_eq!(
            worst_of([RagStatus::NoKri, RagStatus::Green]),
            RagStatus::Green
        );
    }

    proptest! {
        #[test]
        fn order_does_not_matter(
            (statuses, shuffled) in prop::collection::vec(any_status(), 0..24)
                .prop_flat_map(|statuses| (Just(statuses.clone()), Just(statuses).prop_shuffle())),
        ) {
            prop_assert_eq!(worst_of(statuses), worst_of(shuffled));
        }

        #[test]
        fn rolling_up_twice_changes_nothing(
            statuses in prop::collection::vec(any_status(), 0..24),
        ) {
            let once = worst_of(statuses.clone());
            let mut again = statuses;
            again.push(once);
            prop_assert_eq!(worst_of(again), once);
        }
    }
}
