//! Property tests for the parameter buffer.

use std::collections::HashMap;

use cramrpc_wire::{record_len, validate, ParamBuffer, Region, WireError};
use proptest::prelude::*;

const BASE: u32 = 0x2000_0000;

fn arb_params() -> impl Strategy<Value = Vec<(u32, Vec<u8>)>> {
    proptest::collection::vec(
        (0u32..16, proptest::collection::vec(any::<u8>(), 0..40)),
        0..12,
    )
}

proptest! {
    /// Whatever sequence of distinct-id writes fits, the reader sees exactly
    /// the bytes written and the chain validates.
    #[test]
    fn written_params_read_back(params in arb_params()) {
        let mut buf = ParamBuffer::new(4096);
        let mut expected: HashMap<u32, Vec<u8>> = HashMap::new();
        for (slot, data) in &params {
            let id = BASE + slot;
            if expected.contains_key(&id) {
                continue;
            }
            buf.set(id, Some(data.as_slice()), data.len()).unwrap();
            expected.insert(id, data.clone());
        }
        buf.loopback().unwrap();

        prop_assert!(buf.validate_input());
        for (id, data) in &expected {
            prop_assert_eq!(buf.get(*id), Some(data.as_slice()));
        }
        let total: usize = expected.values().map(|d| record_len(d.len())).sum();
        prop_assert_eq!(buf.input().len(), total);
    }

    /// Only the newest record may change size; rewriting an older record
    /// at a different size fails and leaves the buffer intact.
    #[test]
    fn earlier_records_are_size_locked(
        first in 0usize..32,
        second in 0usize..32,
        resize in 0usize..32,
    ) {
        let mut region = Region::new(0, 1024);
        region.set(BASE + 1, None, first).unwrap();
        region.set(BASE + 2, None, second).unwrap();
        let before = region.params().to_vec();

        let result = region.set(BASE + 1, None, resize);
        if resize == first {
            prop_assert!(result.is_ok());
        } else {
            let locked = matches!(result, Err(WireError::ParamLocked { .. }));
            prop_assert!(locked);
            prop_assert_eq!(region.params(), before.as_slice());
        }

        region.set(BASE + 2, None, resize).unwrap();
        prop_assert_eq!(region.get(BASE + 2).map(<[u8]>::len), Some(resize));
        prop_assert!(region.validate());
    }

    /// Reading ids that were never written gives zero values, never a panic.
    #[test]
    fn unset_ids_read_as_zero(id in any::<u32>()) {
        let mut buf = ParamBuffer::new(256);
        buf.output_mut().set_u32(BASE + 999, 7).unwrap();
        buf.loopback().unwrap();
        prop_assume!(id != BASE + 999);

        let input = buf.input();
        prop_assert_eq!(input.get(id), None);
        prop_assert_eq!(input.get_u64(id), 0);
        prop_assert_eq!(input.get_str(id), "");
    }

    /// Arbitrary bytes never make the walker panic or read out of bounds,
    /// and lookups on an invalid chain find nothing past the damage.
    #[test]
    fn arbitrary_bytes_are_walked_safely(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let ok = validate(&bytes);
        let mut region = Region::new(0, 256);
        region.load(&bytes).unwrap();
        prop_assert_eq!(region.validate(), ok);
        for record in region.records().flatten() {
            prop_assert!(record.data_range().end <= bytes.len());
        }
    }

    /// Corrupting a size or link field in a valid buffer is either still a
    /// valid chain or is rejected; it never reads past the logical length.
    #[test]
    fn corrupted_fields_stay_in_bounds(
        params in arb_params(),
        field in 0usize..64,
        value in any::<u32>(),
    ) {
        let mut region = Region::new(0, 4096);
        let mut seen = Vec::new();
        for (slot, data) in &params {
            if seen.contains(slot) {
                continue;
            }
            seen.push(*slot);
            region.set_bytes(BASE + slot, data).unwrap();
        }
        let mut bytes = region.params().to_vec();
        let word = field * 4;
        prop_assume!(word + 4 <= bytes.len());
        bytes[word..word + 4].copy_from_slice(&value.to_be_bytes());

        let mut damaged = Region::new(0, 4096);
        damaged.load(&bytes).unwrap();
        for record in damaged.records().flatten() {
            prop_assert!(record.data_range().end <= bytes.len());
        }
    }
}
