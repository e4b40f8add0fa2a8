use oorandom::Rand32;


/// Branching factor of the geometric height distribution.
///
/// A node's height is increased with probability `1/BRANCHING`, so higher
/// towers are exponentially less likely. `4` matches Google's LevelDB and
/// keeps tower memory low.
pub const BRANCHING: u32 = 4;

/// Return a random height in `1..=max_height`, geometrically distributed.
///
/// The cap differs per structure: the frozen skiplist uses 12 levels, the
/// interval index 32, so the bound is a parameter rather than a constant.
#[must_use]
pub fn random_height(prng: &mut Rand32, max_height: usize) -> usize {
    let mut height = 1;
    while height < max_height && prng.rand_u32() % BRANCHING == 0 {
        height += 1;
    }
    height
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heights_stay_in_bounds() {
        let mut prng = Rand32::new(0xdead_beef);
        for _ in 0..10_000 {
            let height = random_height(&mut prng, 12);
            assert!(1 <= height && height <= 12);
        }
    }

    #[test]
    fn distribution_is_roughly_geometric() {
        let mut prng = Rand32::new(7);
        let mut ones = 0_u32;
        const SAMPLES: u32 = 40_000;
        for _ in 0..SAMPLES {
            if random_height(&mut prng, 12) == 1 {
                ones += 1;
            }
        }
        // P(height == 1) = 3/4; allow generous slack for the fixed seed.
        assert!(ones > SAMPLES / 2 && ones < SAMPLES * 9 / 10);
    }
}
