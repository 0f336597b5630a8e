//! Size-class map: quantizes request sizes into a small set of classes.
//!
//! The schedule is a spline of five linear segments. The first class is `L0`
//! bytes; classes then grow by `S0` until they reach `L1`, by `S1` until `L2`,
//! and so on. Steps are powers of two for cheap division, the largest class
//! is a power of two, and the class count is a power of two no larger than
//! 256. Larger classes are cached less aggressively per thread, which the
//! per-segment caps below encode.

const L0: usize = 1 << 4;
const L1: usize = 1 << 9;
const L2: usize = 1 << 12;
const L3: usize = 1 << 15;
const L4: usize = 1 << 18;
const L5: usize = 1 << 21;

const S0: usize = 1 << 4;
const S1: usize = 1 << 6;
const S2: usize = 1 << 9;
const S3: usize = 1 << 12;
const S4: usize = 1 << 15;

const C0: usize = 256;
const C1: usize = 64;
const C2: usize = 16;
const C3: usize = 4;
const C4: usize = 1;

/// Cumulative class counts at each segment boundary.
const U0: usize = (L1 - L0) / S0;
const U1: usize = U0 + (L2 - L1) / S1;
const U2: usize = U1 + (L3 - L2) / S2;
const U3: usize = U2 + (L4 - L3) / S3;
const U4: usize = U3 + (L5 - L4) / S4;

pub const NUM_CLASSES: usize = U4 + 1;
pub const MAX_SIZE: usize = L5;
pub const MIN_SIZE: usize = L0;

const _: () = {
    assert!(NUM_CLASSES <= 256);
    assert!(NUM_CLASSES.is_power_of_two());
    assert!(MAX_SIZE.is_power_of_two());
    assert!(S0.is_power_of_two());
    assert!(S1.is_power_of_two());
    assert!(S2.is_power_of_two());
    assert!(S3.is_power_of_two());
    assert!(S4.is_power_of_two());
    assert!((L1 - L0) % S0 == 0);
    assert!((L2 - L1) % S1 == 0);
    assert!((L3 - L2) % S2 == 0);
    assert!((L4 - L3) % S3 == 0);
    assert!((L5 - L4) % S4 == 0);
};

/// Chunk size served for `class_id`.
#[inline]
pub const fn class_to_size(class_id: usize) -> usize {
    if class_id <= U0 {
        L0 + S0 * class_id
    } else if class_id <= U1 {
        L1 + S1 * (class_id - U0)
    } else if class_id <= U2 {
        L2 + S2 * (class_id - U1)
    } else if class_id <= U3 {
        L3 + S3 * (class_id - U2)
    } else if class_id <= U4 {
        L4 + S4 * (class_id - U3)
    } else {
        0
    }
}

/// Smallest class whose chunks hold `size` bytes.
/// Defined for `1 <= size <= MAX_SIZE`; larger sizes belong to the secondary
/// allocator and must be filtered out before this call.
#[inline]
pub const fn class_id(size: usize) -> usize {
    debug_assert!(size >= 1);
    debug_assert!(size <= MAX_SIZE);
    // Each arm computes ceil((size - l_k) / s_k) with the additions ordered
    // so the intermediate never underflows for size >= 1.
    if size <= L1 {
        (size + S0 - 1 - L0) / S0
    } else if size <= L2 {
        U0 + (size + S1 - 1 - L1) / S1
    } else if size <= L3 {
        U1 + (size + S2 - 1 - L2) / S2
    } else if size <= L4 {
        U2 + (size + S3 - 1 - L3) / S3
    } else {
        U3 + (size + S4 - 1 - L4) / S4
    }
}

/// Per-thread cache cap for `class_id`. Non-increasing in class size.
#[inline]
pub const fn max_cached(class_id: usize) -> usize {
    if class_id <= U0 {
        C0
    } else if class_id <= U1 {
        C1
    } else if class_id <= U2 {
        C2
    } else if class_id <= U3 {
        C3
    } else if class_id <= U4 {
        C4
    } else {
        0
    }
}

/// Step of the segment containing `class_id`. Bounds the rounding slack.
#[inline]
pub const fn step_of_class(class_id: usize) -> usize {
    if class_id <= U0 {
        S0
    } else if class_id <= U1 {
        S1
    } else if class_id <= U2 {
        S2
    } else if class_id <= U3 {
        S3
    } else {
        S4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_and_last_class() {
        assert_eq!(class_to_size(0), MIN_SIZE);
        assert_eq!(class_to_size(NUM_CLASSES - 1), MAX_SIZE);
    }

    #[test]
    fn class_count() {
        assert_eq!(NUM_CLASSES, 256);
        assert!(NUM_CLASSES.is_power_of_two());
        assert!(MAX_SIZE.is_power_of_two());
    }

    #[test]
    fn sizes_are_strictly_increasing() {
        for c in 1..NUM_CLASSES {
            assert!(
                class_to_size(c) > class_to_size(c - 1),
                "class {} ({}) <= class {} ({})",
                c,
                class_to_size(c),
                c - 1,
                class_to_size(c - 1)
            );
        }
    }

    #[test]
    fn class_of_own_size_round_trips() {
        for c in 0..NUM_CLASSES {
            assert_eq!(class_id(class_to_size(c)), c, "class {}", c);
        }
    }

    #[test]
    fn rounding_covers_and_stays_within_step() {
        // Exhaustive over the dense small range, then every boundary +/- 1
        // and a coarse stride over the rest.
        let check = |s: usize| {
            let c = class_id(s);
            let sz = class_to_size(c);
            assert!(sz >= s, "size {} mapped to class {} of {} bytes", s, c, sz);
            assert!(
                sz - s < step_of_class(c),
                "size {} wastes {} bytes in class {}",
                s,
                sz - s,
                c
            );
        };
        for s in 1..=(L2 + 1) {
            check(s);
        }
        for &b in &[L3, L4, L5] {
            check(b - 1);
            check(b);
        }
        let mut s = L2;
        while s <= MAX_SIZE {
            check(s);
            s += 4093; // odd stride, hits misaligned sizes
        }
    }

    #[test]
    fn boundary_lookups() {
        assert_eq!(class_id(1), 0);
        assert_eq!(class_id(16), 0);
        assert_eq!(class_id(17), 1);
        assert_eq!(class_id(32), 1);
        assert_eq!(class_id(MAX_SIZE), NUM_CLASSES - 1);
    }

    #[test]
    fn cache_caps_non_increasing() {
        for c in 1..NUM_CLASSES {
            assert!(max_cached(c) <= max_cached(c - 1));
        }
        assert!(max_cached(0) >= 1);
        assert!(max_cached(NUM_CLASSES - 1) >= 1);
    }
}
