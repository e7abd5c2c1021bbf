//! Embedded link control carried in voice bursts B to E
//!
//! The 72 LC bits plus a 5-bit checksum are laid into an 8x16 matrix with
//! Hamming(16,11,4) rows and a column parity row, read out by columns and
//! split into four 32-bit fragments.

use crate::bits;
use crate::frame::Payload;
use crate::hamming;
use crate::lc::LinkControl;

const MATRIX_BITS: usize = 128;
const FRAGMENT_BITS: usize = 32;

/// First payload bit of the embedded signalling fragment
const FRAGMENT_START: usize = 116;

/// Matrix runs holding LC bits, as (first index, length)
const LC_RUNS: [(usize, usize); 7] = [
    (0, 11),
    (16, 11),
    (32, 10),
    (48, 10),
    (64, 10),
    (80, 10),
    (96, 10),
];

/// Matrix positions of the checksum bits, most significant first
const CRC_POSITIONS: [usize; 5] = [42, 58, 74, 90, 106];

/// One embedded fragment
pub type Fragment = [bool; FRAGMENT_BITS];

fn checksum(lc: &[u8; 9]) -> u8 {
    (lc.iter().map(|&b| b as u32).sum::<u32>() % 31) as u8
}

/// Column read-out order of the matrix
fn column_order() -> impl Iterator<Item = usize> {
    let mut b = 0usize;
    (0..MATRIX_BITS).map(move |_| {
        let current = b;
        b += 16;
        if b > 127 {
            b -= 127;
        }
        current
    })
}

/// Embedded LC for one voice superframe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedLc {
    raw: [bool; MATRIX_BITS],
}

impl EmbeddedLc {
    pub fn encode(lc: &LinkControl) -> Self {
        let bytes = lc.to_bytes();
        let mut lc_bits = [false; 72];
        bits::unpack(&bytes, &mut lc_bits);

        let mut data = [false; MATRIX_BITS];
        let crc = checksum(&bytes);
        for (i, &pos) in CRC_POSITIONS.iter().enumerate() {
            data[pos] = crc & (0x10 >> i) != 0;
        }

        let mut b = 0;
        for (start, len) in LC_RUNS {
            data[start..start + len].copy_from_slice(&lc_bits[b..b + len]);
            b += len;
        }

        for row in (0..112).step_by(16) {
            hamming::encode_16_11_4(&mut data[row..row + 16]);
        }

        for col in 0..16 {
            data[112 + col] = (0..7).fold(false, |acc, row| acc ^ data[col + row * 16]);
        }

        let mut raw = [false; MATRIX_BITS];
        for (a, b) in column_order().enumerate() {
            raw[a] = data[b];
        }
        Self { raw }
    }

    /// Fragment for voice burst `n` (1 to 4 for bursts B to E)
    pub fn fragment(&self, n: u8) -> Option<Fragment> {
        if !(1..=4).contains(&n) {
            return None;
        }
        let start = (n as usize - 1) * FRAGMENT_BITS;
        let mut out = [false; FRAGMENT_BITS];
        out.copy_from_slice(&self.raw[start..start + FRAGMENT_BITS]);
        Some(out)
    }

    /// Write the fragment for burst `n` into a voice payload
    ///
    /// The EMB bits either side of the fragment are preserved. Returns `false`
    /// for bursts that carry no LC fragment.
    pub fn write_fragment(&self, n: u8, payload: &mut Payload) -> bool {
        let Some(fragment) = self.fragment(n) else {
            return false;
        };
        for (i, &bit) in fragment.iter().enumerate() {
            bits::set(payload, FRAGMENT_START + i, bit);
        }
        true
    }

    /// Reassemble and verify link control from four fragments in burst order
    pub fn decode(fragments: &[Fragment; 4]) -> Option<LinkControl> {
        let mut raw = [false; MATRIX_BITS];
        for (n, fragment) in fragments.iter().enumerate() {
            raw[n * FRAGMENT_BITS..(n + 1) * FRAGMENT_BITS].copy_from_slice(fragment);
        }

        let mut data = [false; MATRIX_BITS];
        for (a, b) in column_order().enumerate() {
            data[b] = raw[a];
        }

        for row in (0..112).step_by(16) {
            let mut check = [false; 16];
            check.copy_from_slice(&data[row..row + 16]);
            hamming::encode_16_11_4(&mut check);
            if check[..] != data[row..row + 16] {
                return None;
            }
        }

        let mut lc_bits = [false; 72];
        let mut b = 0;
        for (start, len) in LC_RUNS {
            lc_bits[b..b + len].copy_from_slice(&data[start..start + len]);
            b += len;
        }
        let mut bytes = [0u8; 9];
        bits::pack(&lc_bits, &mut bytes);

        let crc = CRC_POSITIONS
            .iter()
            .fold(0u8, |acc, &pos| (acc << 1) | data[pos] as u8);
        if crc != checksum(&bytes) {
            return None;
        }
        LinkControl::from_bytes(&bytes)
    }
}

/// Read the embedded fragment from a voice payload
pub fn read_fragment(payload: &Payload) -> Fragment {
    let mut out = [false; FRAGMENT_BITS];
    for (i, bit) in out.iter_mut().enumerate() {
        *bit = bits::get(payload, FRAGMENT_START + i);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CallType;

    #[test]
    fn test_column_order_is_a_permutation() {
        let mut seen = [false; MATRIX_BITS];
        for b in column_order() {
            assert!(!seen[b]);
            seen[b] = true;
        }
    }

    #[test]
    fn test_fragments_reassemble() {
        let lc = LinkControl::new(CallType::Group, 2_140_001, 214);
        let emb = EmbeddedLc::encode(&lc);

        let mut payloads = [[0u8; 33]; 4];
        for (i, payload) in payloads.iter_mut().enumerate() {
            assert!(emb.write_fragment(i as u8 + 1, payload));
        }
        let fragments = [
            read_fragment(&payloads[0]),
            read_fragment(&payloads[1]),
            read_fragment(&payloads[2]),
            read_fragment(&payloads[3]),
        ];
        assert_eq!(EmbeddedLc::decode(&fragments), Some(lc));
    }

    #[test]
    fn test_emb_bits_preserved() {
        let emb = EmbeddedLc::encode(&LinkControl::new(CallType::Private, 7, 8));
        let mut payload = [0xFFu8; 33];
        emb.write_fragment(2, &mut payload);
        assert_eq!(payload[14] & 0xF0, 0xF0);
        assert_eq!(payload[18] & 0x0F, 0x0F);
        assert_eq!(payload[13], 0xFF);
        assert_eq!(payload[19], 0xFF);
    }

    #[test]
    fn test_no_fragment_outside_b_to_e() {
        let emb = EmbeddedLc::encode(&LinkControl::new(CallType::Group, 1, 9));
        let mut payload = [0u8; 33];
        assert!(!emb.write_fragment(0, &mut payload));
        assert!(!emb.write_fragment(5, &mut payload));
        assert_eq!(payload, [0u8; 33]);
    }

    #[test]
    fn test_corrupted_fragment_rejected() {
        let lc = LinkControl::new(CallType::Group, 1234, 5678);
        let emb = EmbeddedLc::encode(&lc);
        let mut fragments = [
            emb.fragment(1).unwrap(),
            emb.fragment(2).unwrap(),
            emb.fragment(3).unwrap(),
            emb.fragment(4).unwrap(),
        ];
        fragments[1][5] = !fragments[1][5];
        assert_eq!(EmbeddedLc::decode(&fragments), None);
    }
}
