use std::cmp::Ordering;

use proptest::prelude::*;

use wrptp::bmca::{compare, BmcDataset};
use wrptp::clock::{ClockIdentity, ClockQuality};
use wrptp::port::{PortIdentity, PortNumber};

fn dataset() -> impl Strategy<Value = BmcDataset> {
    (
        any::<u8>(),
        any::<[u8; 8]>(),
        (any::<u8>(), any::<u8>(), any::<u16>()),
        any::<u8>(),
        any::<u16>(),
        any::<u16>(),
    )
        .prop_map(|(p1, id, (class, accuracy, variance), p2, steps, port)| {
            let identity = ClockIdentity::new(&id);
            BmcDataset {
                grandmaster_priority1: p1,
                grandmaster_identity: identity,
                grandmaster_clock_quality: ClockQuality::new(class, accuracy, variance),
                grandmaster_priority2: p2,
                steps_removed: steps,
                sender: PortIdentity::new(identity, PortNumber::new(port)),
            }
        })
}

/// The precedence the comparison must follow for different grandmasters.
fn precedence(d: &BmcDataset) -> (u8, u8, u8, u16, u8, ClockIdentity) {
    let q = &d.grandmaster_clock_quality;
    (
        d.grandmaster_priority1,
        q.clock_class,
        q.clock_accuracy,
        q.offset_scaled_log_variance,
        d.grandmaster_priority2,
        d.grandmaster_identity,
    )
}

proptest! {
    #[test]
    fn bmc_compare_is_antisymmetric(a in dataset(), b in dataset()) {
        prop_assume!(a.grandmaster_identity != b.grandmaster_identity);
        let parent = PortIdentity::default();

        prop_assert_eq!(compare(&a, &b, &parent), compare(&b, &a, &parent).reverse());
    }

    #[test]
    fn bmc_compare_follows_field_precedence(a in dataset(), b in dataset()) {
        prop_assume!(a.grandmaster_identity != b.grandmaster_identity);
        let parent = PortIdentity::default();

        prop_assert_eq!(compare(&a, &b, &parent), precedence(&a).cmp(&precedence(&b)));
    }

    #[test]
    fn bmc_compare_is_transitive(a in dataset(), b in dataset(), c in dataset()) {
        prop_assume!(a.grandmaster_identity != b.grandmaster_identity);
        prop_assume!(b.grandmaster_identity != c.grandmaster_identity);
        prop_assume!(a.grandmaster_identity != c.grandmaster_identity);
        let parent = PortIdentity::default();

        let ab = compare(&a, &b, &parent);
        let bc = compare(&b, &c, &parent);
        if ab == Ordering::Less && bc == Ordering::Less {
            prop_assert_eq!(compare(&a, &c, &parent), Ordering::Less);
        }
    }

    #[test]
    fn bmc_fewer_steps_win_for_the_same_grandmaster(a in dataset(), extra in 2u16..100) {
        let parent = PortIdentity::default();
        let mut far = a;
        far.steps_removed = a.steps_removed.saturating_add(extra);
        prop_assume!(far.steps_removed - a.steps_removed > 1);

        prop_assert_eq!(compare(&a, &far, &parent), Ordering::Less);
        prop_assert_eq!(compare(&far, &a, &parent), Ordering::Greater);
    }
}

#[test]
fn bmc_lower_priority1_beats_better_quality() {
    let parent = PortIdentity::default();
    let base = BmcDataset {
        grandmaster_priority1: 128,
        grandmaster_identity: ClockIdentity::new(&[0, 0, 0, 0, 0, 0, 0, 1]),
        grandmaster_clock_quality: ClockQuality::new(6, 0x20, 0x4E5D),
        grandmaster_priority2: 128,
        steps_removed: 0,
        sender: PortIdentity::new(
            ClockIdentity::new(&[0, 0, 0, 0, 0, 0, 0, 1]),
            PortNumber::new(1),
        ),
    };
    let preferred = BmcDataset {
        grandmaster_priority1: 100,
        grandmaster_identity: ClockIdentity::new(&[0, 0, 0, 0, 0, 0, 0, 2]),
        grandmaster_clock_quality: ClockQuality::new(248, 0xFE, 0xFFFF),
        sender: PortIdentity::new(
            ClockIdentity::new(&[0, 0, 0, 0, 0, 0, 0, 2]),
            PortNumber::new(1),
        ),
        ..base
    };

    assert_eq!(compare(&preferred, &base, &parent), Ordering::Less);
}
