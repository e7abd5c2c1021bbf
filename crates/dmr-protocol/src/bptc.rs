//! BPTC(196,96) block product code
//!
//! Header and terminator bursts carry 96 information bits in a 13x15
//! matrix protected by Hamming(15,11,3) rows and Hamming(13,9,3) columns,
//! interleaved over the 196 bits either side of the burst's sync field.
//! Only encoding and plain extraction are needed: the gateway rebuilds
//! link control rather than repairing it.

use crate::bits;
use crate::frame::Payload;
use crate::hamming;

const CODED_BITS: usize = 196;
const INFO_BITS: usize = 96;

/// Payload bits before the sync field that belong to the code
const FIRST_HALF: usize = 98;
/// First payload bit after the slot-type/sync field
const SECOND_HALF_START: usize = 166;

/// Rows of the matrix that carry information, as (first index, length)
const INFO_RUNS: [(usize, usize); 9] = [
    (4, 8),
    (16, 11),
    (31, 11),
    (46, 11),
    (61, 11),
    (76, 11),
    (91, 11),
    (106, 11),
    (121, 11),
];

fn interleave_index(a: usize) -> usize {
    (a * 181) % CODED_BITS
}

fn read_raw(payload: &Payload) -> [bool; CODED_BITS] {
    let mut raw = [false; CODED_BITS];
    for (i, bit) in raw.iter_mut().enumerate() {
        let pos = if i < FIRST_HALF {
            i
        } else {
            SECOND_HALF_START + i - FIRST_HALF
        };
        *bit = bits::get(payload, pos);
    }
    raw
}

fn write_raw(raw: &[bool; CODED_BITS], payload: &mut Payload) {
    for (i, &bit) in raw.iter().enumerate() {
        let pos = if i < FIRST_HALF {
            i
        } else {
            SECOND_HALF_START + i - FIRST_HALF
        };
        bits::set(payload, pos, bit);
    }
}

/// Extract the 12 information bytes from a coded burst
pub fn decode(payload: &Payload) -> [u8; 12] {
    let raw = read_raw(payload);
    let mut matrix = [false; CODED_BITS];
    for (a, bit) in matrix.iter_mut().enumerate() {
        *bit = raw[interleave_index(a)];
    }

    let mut info = [false; INFO_BITS];
    let mut pos = 0;
    for (start, len) in INFO_RUNS {
        info[pos..pos + len].copy_from_slice(&matrix[start..start + len]);
        pos += len;
    }

    let mut out = [0u8; 12];
    bits::pack(&info, &mut out);
    out
}

/// Encode 12 information bytes into the coded part of `payload`
///
/// The sync and slot-type bits in the middle of the burst are left alone.
pub fn encode(data: &[u8; 12], payload: &mut Payload) {
    let mut info = [false; INFO_BITS];
    bits::unpack(data, &mut info);

    let mut matrix = [false; CODED_BITS];
    let mut pos = 0;
    for (start, len) in INFO_RUNS {
        matrix[start..start + len].copy_from_slice(&info[pos..pos + len]);
        pos += len;
    }

    for row in 0..9 {
        let start = row * 15 + 1;
        hamming::encode_15_11_3(&mut matrix[start..start + 15]);
    }

    for col in 0..15 {
        let mut column = [false; 13];
        for (r, bit) in column.iter_mut().enumerate() {
            *bit = matrix[col + 1 + r * 15];
        }
        hamming::encode_13_9_3(&mut column);
        for (r, bit) in column.iter().enumerate() {
            matrix[col + 1 + r * 15] = *bit;
        }
    }

    let mut raw = [false; CODED_BITS];
    for (a, bit) in matrix.iter().enumerate() {
        raw[interleave_index(a)] = *bit;
    }
    write_raw(&raw, payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_interleave_is_a_permutation() {
        let mut seen = [false; CODED_BITS];
        for a in 0..CODED_BITS {
            let i = interleave_index(a);
            assert!(!seen[i]);
            seen[i] = true;
        }
    }

    #[test]
    fn test_sync_field_untouched() {
        let mut payload = [0xFFu8; 33];
        encode(&[0u8; 12], &mut payload);
        // Bits 98..166 hold slot type and sync
        for pos in 98..166 {
            assert!(bits::get(&payload, pos), "bit {pos} changed");
        }
        assert!(!bits::get(&payload, 0));
    }

    proptest! {
        #[test]
        fn extracted_info_matches_encoded(data in prop::array::uniform12(any::<u8>())) {
            let mut payload = [0u8; 33];
            encode(&data, &mut payload);
            prop_assert_eq!(decode(&payload), data);
        }
    }
}
