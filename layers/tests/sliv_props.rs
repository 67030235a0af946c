use layers::mac::sliv::{ra_type1_riv, riv_nof_bits, s_and_l_to_sliv, sliv_to_s_and_l, time_sliv, time_sliv_to_s_and_l};
use proptest::prelude::*;
use std::num::NonZeroU32;

const BWP_SIZES: [u32; 7] = [10, 12, 24, 48, 52, 106, 275];

/// Domain size followed by a valid (start, length) pair in it
fn interval_in_domain() -> impl Strategy<Value = (u32, u32, u32)> {
    prop::sample::select(BWP_SIZES.to_vec())
        .prop_flat_map(|n| (Just(n), 0..n))
        .prop_flat_map(|(n, start)| (Just(n), Just(start), 1..=(n - start)))
}

proptest! {
    #[test]
    fn riv_round_trips((n, start, length) in interval_in_domain()) {
        let domain = NonZeroU32::new(n).unwrap();
        let riv = s_and_l_to_sliv(domain, start, length);
        prop_assert_eq!(sliv_to_s_and_l(domain, riv), (start, length));
        prop_assert_eq!(ra_type1_riv(domain, start, length), riv);
    }

    #[test]
    fn riv_fits_in_dci_field((n, start, length) in interval_in_domain()) {
        let domain = NonZeroU32::new(n).unwrap();
        let riv = ra_type1_riv(domain, start, length);
        prop_assert!(riv < n * (n + 1) / 2);
        prop_assert!((riv as u64) < 1u64 << riv_nof_bits(domain));
    }

    #[test]
    fn time_sliv_round_trips(start in 0u32..14, length in 1u32..=14) {
        prop_assume!(start + length <= 14);
        prop_assert_eq!(time_sliv_to_s_and_l(time_sliv(start, length)), (start, length));
    }
}
