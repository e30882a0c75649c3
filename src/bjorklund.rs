//! Bjorklund's algorithm for euclidean rhythm distribution
//!
//! Distributes `pulses` onsets as evenly as possible across `steps` slots.
//! The classic examples come out right: `(3,8)` is the tresillo `x..x..x.`
//! and `(5,8)` is the cinquillo `x.xx.xx.`.

/// Compute the euclidean bit pattern for `pulses` in `steps`, rotated left
/// by `rotation`. The result has exactly `steps` entries; empty when either
/// count is zero or pulses exceed steps.
pub fn bjorklund(pulses: usize, steps: usize, rotation: i64) -> Vec<bool> {
    if steps == 0 || pulses == 0 {
        return vec![false; steps];
    }
    if pulses >= steps {
        return vec![true; steps];
    }

    // Bjorklund's pairing procedure: repeatedly fold the remainder groups
    // into the count groups until one group remains.
    let mut groups: Vec<Vec<bool>> = (0..pulses).map(|_| vec![true]).collect();
    let mut remainder: Vec<Vec<bool>> = (0..steps - pulses).map(|_| vec![false]).collect();

    while remainder.len() > 1 {
        let take = groups.len().min(remainder.len());
        let tail: Vec<Vec<bool>> = remainder.drain(..take).collect();
        for (group, extra) in groups.iter_mut().zip(tail) {
            group.extend(extra);
        }
        if groups.len() > take {
            // Ungrouped counts become the new remainder
            remainder = groups.split_off(take);
        }
    }

    let mut bits: Vec<bool> = groups.into_iter().flatten().collect();
    bits.extend(remainder.into_iter().flatten());
    debug_assert_eq!(bits.len(), steps);

    if rotation != 0 {
        let len = bits.len() as i64;
        let rot = rotation.rem_euclid(len) as usize;
        bits.rotate_left(rot);
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(bits: &[bool]) -> String {
        bits.iter().map(|&b| if b { 'x' } else { '.' }).collect()
    }

    #[test]
    fn test_tresillo() {
        assert_eq!(render(&bjorklund(3, 8, 0)), "x..x..x.");
    }

    #[test]
    fn test_cinquillo() {
        assert_eq!(render(&bjorklund(5, 8, 0)), "x.xx.xx.");
    }

    #[test]
    fn test_common_patterns() {
        assert_eq!(render(&bjorklund(2, 5, 0)), "x.x..");
        assert_eq!(render(&bjorklund(3, 4, 0)), "xxx.");
        assert_eq!(render(&bjorklund(4, 9, 0)), "x.x.x.x..");
    }

    #[test]
    fn test_rotation() {
        assert_eq!(render(&bjorklund(3, 8, 2)), ".x..x.x.");
        // Full rotation is the identity
        assert_eq!(bjorklund(3, 8, 8), bjorklund(3, 8, 0));
        // Negative rotation wraps
        assert_eq!(bjorklund(3, 8, -2), bjorklund(3, 8, 6));
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(bjorklund(0, 4, 0), vec![false; 4]);
        assert_eq!(bjorklund(4, 4, 0), vec![true; 4]);
        assert_eq!(bjorklund(9, 4, 0), vec![true; 4]);
        assert!(bjorklund(3, 0, 0).is_empty());
    }

    #[test]
    fn test_pulse_count_is_preserved() {
        for steps in 1..=16usize {
            for pulses in 0..=steps {
                let bits = bjorklund(pulses, steps, 0);
                assert_eq!(bits.iter().filter(|&&b| b).count(), pulses);
            }
        }
    }
}
