//! MSB-first bit helpers over byte buffers

/// Read bit `index` (0 = MSB of byte 0)
pub fn get(data: &[u8], index: usize) -> bool {
    data[index / 8] & (0x80 >> (index % 8)) != 0
}

/// Write bit `index` (0 = MSB of byte 0)
pub fn set(data: &mut [u8], index: usize, value: bool) {
    let mask = 0x80 >> (index % 8);
    if value {
        data[index / 8] |= mask;
    } else {
        data[index / 8] &= !mask;
    }
}

/// Unpack `out.len()` bits starting at bit 0 of `data`
pub fn unpack(data: &[u8], out: &mut [bool]) {
    for (i, bit) in out.iter_mut().enumerate() {
        *bit = get(data, i);
    }
}

/// Pack `bits` into `out`, MSB first
pub fn pack(bits: &[bool], out: &mut [u8]) {
    for (i, &bit) in bits.iter().enumerate() {
        set(out, i, bit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let mut data = [0u8; 2];
        set(&mut data, 0, true);
        set(&mut data, 9, true);
        assert_eq!(data, [0x80, 0x40]);
        assert!(get(&data, 9));
        set(&mut data, 0, false);
        assert_eq!(data[0], 0x00);
    }

    #[test]
    fn test_pack_unpack() {
        let data = [0xA5u8, 0x3C];
        let mut bits = [false; 16];
        unpack(&data, &mut bits);
        let mut out = [0u8; 2];
        pack(&bits, &mut out);
        assert_eq!(out, data);
    }
}
