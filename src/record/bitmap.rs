//! Slot-occupancy bitmap helpers. Bits are MSB-first within each byte,
//! matching `BitVec::from_bytes`.

use bit_vec::BitVec;

pub fn is_set(bitmap: &[u8], pos: usize) -> bool {
    let bv = BitVec::from_bytes(bitmap);
    bv[pos]
}

pub fn set(bitmap: &mut [u8], pos: usize) {
    let mut bv = BitVec::from_bytes(bitmap);
    bv.set(pos, true);
    bitmap.copy_from_slice(&bv.to_bytes());
}

pub fn reset(bitmap: &mut [u8], pos: usize) {
    let mut bv = BitVec::from_bytes(bitmap);
    bv.set(pos, false);
    bitmap.copy_from_slice(&bv.to_bytes());
}

/// First clear bit in `[0, max)`, if any.
pub fn first_clear(bitmap: &[u8], max: usize) -> Option<usize> {
    let bv = BitVec::from_bytes(bitmap);
    bv.iter().take(max).position(|b| !b)
}

/// First set bit in `[from, max)`, if any.
pub fn next_set(bitmap: &[u8], max: usize, from: usize) -> Option<usize> {
    if from >= max {
        return None;
    }
    let bv = BitVec::from_bytes(bitmap);
    bv.iter()
        .take(max)
        .skip(from)
        .position(|b| b)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reset() {
        let mut bm = vec![0u8; 2];
        assert!(!is_set(&bm, 3));
        set(&mut bm, 3);
        assert!(is_set(&bm, 3));
        reset(&mut bm, 3);
        assert!(!is_set(&bm, 3));
    }

    #[test]
    fn test_scans() {
        let mut bm = vec![0u8; 2];
        set(&mut bm, 0);
        set(&mut bm, 1);
        set(&mut bm, 9);

        assert_eq!(first_clear(&bm, 16), Some(2));
        assert_eq!(next_set(&bm, 16, 0), Some(0));
        assert_eq!(next_set(&bm, 16, 2), Some(9));
        assert_eq!(next_set(&bm, 16, 10), None);

        for i in 0..16 {
            set(&mut bm, i);
        }
        assert_eq!(first_clear(&bm, 16), None);
    }
}
