//! Target eligibility filtering.
//!
//! A target survives when its fiber is usable and it carries at least one
//! classification bit. The mask is computed once per file and applied
//! identically to every per-target array so row alignment is preserved.

use crate::core::loaders::Fibermap;

/// Compute the keep-mask for one fibermap.
///
/// `mask[k]` is true iff `fiber_status[k] == good_status` and
/// `target_bits[k] != 0`. The mask length always equals the table length.
pub fn keep_mask(fibermap: &Fibermap, good_status: i32) -> Vec<bool> {
    fibermap
        .fiber_status
        .iter()
        .zip(fibermap.target_bits.iter())
        .map(|(&status, &bits)| status == good_status && bits != 0)
        .collect()
}

/// Indices of surviving targets, in table order.
pub fn surviving_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fibermap(status: Vec<i32>, bits: Vec<u64>) -> Fibermap {
        let n = status.len();
        Fibermap {
            target_id: (0..n as i64).collect(),
            fiber_status: status,
            target_bits: bits,
            tile_id: vec![None; n],
            petal_loc: vec![None; n],
        }
    }

    #[test]
    fn test_keep_mask_rule() {
        let fm = fibermap(vec![0, 0, 1], vec![2, 0, 4]);

        let mask = keep_mask(&fm, 0);

        assert_eq!(mask, vec![true, false, false]);
        assert_eq!(surviving_indices(&mask), vec![0]);
    }

    #[test]
    fn test_keep_mask_exhaustive_small_domain() {
        // Every combination of a few status codes and bitfields: the mask
        // must agree with the rule pointwise and preserve length.
        let statuses = [0, 1, 2, -1, 255];
        let bit_values: [u64; 5] = [0, 1, 2, 5, u64::MAX];

        let mut status_col = Vec::new();
        let mut bits_col = Vec::new();
        for &s in &statuses {
            for &b in &bit_values {
                status_col.push(s);
                bits_col.push(b);
            }
        }

        let fm = fibermap(status_col.clone(), bits_col.clone());
        let mask = keep_mask(&fm, 0);

        assert_eq!(mask.len(), fm.len());
        for k in 0..mask.len() {
            assert_eq!(mask[k], status_col[k] == 0 && bits_col[k] != 0, "row {k}");
        }
    }

    #[test]
    fn test_keep_mask_custom_good_status() {
        let fm = fibermap(vec![0, 4], vec![1, 1]);

        let mask = keep_mask(&fm, 4);

        assert_eq!(mask, vec![false, true]);
    }

    #[test]
    fn test_keep_mask_empty_table() {
        let fm = fibermap(vec![], vec![]);
        assert!(keep_mask(&fm, 0).is_empty());
    }

    #[test]
    fn test_surviving_indices_order() {
        let mask = vec![true, false, true, true, false];
        assert_eq!(surviving_indices(&mask), vec![0, 2, 3]);
    }
}
