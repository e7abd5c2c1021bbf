//! Reed-Solomon (12,9) parity over GF(2^8)
//!
//! Full link control carries three parity bytes, XORed with a mask that
//! identifies whether the burst is a voice header or a terminator.

/// Field polynomial x^8 + x^4 + x^3 + x^2 + 1
const FIELD_POLY: u16 = 0x11D;

/// Generator (x + a)(x + a^2)(x + a^3), constant term first
const GENERATOR: [u8; 4] = [64, 56, 14, 1];

const PARITY_LEN: usize = 3;

/// Parity mask for voice LC headers
pub const VOICE_HEADER_MASK: [u8; 3] = [0x96, 0x96, 0x96];

/// Parity mask for terminators with LC
pub const TERMINATOR_MASK: [u8; 3] = [0x99, 0x99, 0x99];

const fn build_tables() -> ([u8; 512], [u8; 256]) {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= FIELD_POLY;
        }
        i += 1;
    }
    while i < 512 {
        exp[i] = exp[i - 255];
        i += 1;
    }
    (exp, log)
}

static TABLES: ([u8; 512], [u8; 256]) = build_tables();

/// Multiply two field elements
pub fn gmul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let (exp, log) = &TABLES;
    exp[log[a as usize] as usize + log[b as usize] as usize]
}

/// Compute the three parity bytes for a nine-byte message, in wire order
pub fn parity(msg: &[u8; 9]) -> [u8; 3] {
    let mut reg = [0u8; PARITY_LEN + 1];
    for &byte in msg {
        let feedback = byte ^ reg[PARITY_LEN - 1];
        for j in (1..PARITY_LEN).rev() {
            reg[j] = reg[j - 1] ^ gmul(GENERATOR[j], feedback);
        }
        reg[0] = gmul(GENERATOR[0], feedback);
    }
    [reg[2], reg[1], reg[0]]
}

/// Check masked parity bytes against a message
pub fn check(msg: &[u8; 9], masked: &[u8; 3], mask: &[u8; 3]) -> bool {
    let expected = parity(msg);
    (0..PARITY_LEN).all(|i| masked[i] ^ mask[i] == expected[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpha_pow(n: usize) -> u8 {
        TABLES.0[n]
    }

    #[test]
    fn test_generator_roots() {
        // Expand (x + a)(x + a^2)(x + a^3) and compare
        let mut poly = vec![1u8];
        for k in 1..=3 {
            let root = alpha_pow(k);
            let mut next = vec![0u8; poly.len() + 1];
            for (i, &c) in poly.iter().enumerate() {
                next[i] ^= gmul(c, root);
                next[i + 1] ^= c;
            }
            poly = next;
        }
        assert_eq!(poly, GENERATOR.to_vec());
    }

    #[test]
    fn test_zero_message_has_zero_parity() {
        assert_eq!(parity(&[0u8; 9]), [0, 0, 0]);
    }

    #[test]
    fn test_check_with_mask() {
        let msg = [0x00, 0x00, 0x00, 0x00, 0x00, 0x5B, 0x23, 0xC8, 0x29];
        let p = parity(&msg);
        let masked = [
            p[0] ^ VOICE_HEADER_MASK[0],
            p[1] ^ VOICE_HEADER_MASK[1],
            p[2] ^ VOICE_HEADER_MASK[2],
        ];
        assert!(check(&msg, &masked, &VOICE_HEADER_MASK));
        assert!(!check(&msg, &masked, &TERMINATOR_MASK));
    }

    #[test]
    fn test_gmul_identity() {
        for a in 0..=255u8 {
            assert_eq!(gmul(a, 1), a);
        }
    }
}
