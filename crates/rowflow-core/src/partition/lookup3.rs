//! Bob Jenkins' lookup3 `hashword`.
//!
//! Hashes a slice of 32-bit words. Three accumulators are seeded from the
//! word count and `initval`, mixed over each group of three words, and the
//! last one to three words go through the final avalanche. An empty input
//! returns the seed unchanged.

const SEED: u32 = 0xdead_beef;

#[inline]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

#[inline]
fn finalize(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

/// Hashes `key` with the given initial value.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn hashword(key: &[u32], initval: u32) -> u32 {
    // Word counts beyond u32::MAX / 4 wrap, same as the reference code.
    let seed = SEED
        .wrapping_add((key.len() as u32).wrapping_shl(2))
        .wrapping_add(initval);
    let (mut a, mut b, mut c) = (seed, seed, seed);

    let mut rest = key;
    while rest.len() > 3 {
        a = a.wrapping_add(rest[0]);
        b = b.wrapping_add(rest[1]);
        c = c.wrapping_add(rest[2]);
        mix(&mut a, &mut b, &mut c);
        rest = &rest[3..];
    }

    match *rest {
        [k0, k1, k2] => {
            c = c.wrapping_add(k2);
            b = b.wrapping_add(k1);
            a = a.wrapping_add(k0);
            finalize(&mut a, &mut b, &mut c);
        }
        [k0, k1] => {
            b = b.wrapping_add(k1);
            a = a.wrapping_add(k0);
            finalize(&mut a, &mut b, &mut c);
        }
        [k0] => {
            a = a.wrapping_add(k0);
            finalize(&mut a, &mut b, &mut c);
        }
        _ => {}
    }
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_returns_seed() {
        assert_eq!(hashword(&[], 0), 0xdead_beef);
        assert_eq!(hashword(&[], 1), 0xdead_bef0);
    }

    #[test]
    fn test_deterministic() {
        let key = [1, 2, 3, 4, 5, 6, 7];
        assert_eq!(hashword(&key, 0), hashword(&key, 0));
    }

    #[test]
    fn test_sensitive_to_every_word_and_initval() {
        let base = hashword(&[10, 20, 30, 40], 0);
        assert_ne!(base, hashword(&[10, 20, 30, 41], 0));
        assert_ne!(base, hashword(&[11, 20, 30, 40], 0));
        assert_ne!(base, hashword(&[10, 20, 30, 40], 7));
        assert_ne!(hashword(&[0], 0), hashword(&[0, 0], 0));
    }

    #[test]
    fn test_spreads_sequential_keys() {
        let mut buckets = [0usize; 8];
        for i in 0..8000u32 {
            buckets[(hashword(&[i], 0) % 8) as usize] += 1;
        }
        for count in buckets {
            assert!(count > 800 && count < 1200, "uneven bucket: {count}");
        }
    }
}
