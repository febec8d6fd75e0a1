//! Resizing algorithms
//!
//! `reduce` is the downsampler used everywhere a sequence has to shrink:
//! buffer clamping, step-grid scaling and size reconciliation between two
//! operands. Its stride is deliberately nonlinear so golden outputs match.

/// Downsample to `target` items. Output item `i` is taken from index
/// `floor(i * (L + floor(L / T)) / T)`. A target at or above the current
/// length returns the input unchanged.
pub fn reduce<T: Clone>(items: &[T], target: usize) -> Vec<T> {
    let len = items.len();
    if target >= len {
        return items.to_vec();
    }
    if target == 0 {
        return Vec::new();
    }
    let stride = len + len / target;
    (0..target)
        .map(|i| {
            let index = (i * stride / target).min(len - 1);
            items[index].clone()
        })
        .collect()
}

/// Interleaved duplication: every item is followed by `factor - 1` copies of
/// itself, so `[a, b]` by 3 becomes `[a, a, a, b, b, b]`.
pub fn duplicate_interleaved<T: Clone>(items: &[T], factor: usize) -> Vec<T> {
    let factor = factor.max(1);
    let mut out = Vec::with_capacity(items.len() * factor);
    for item in items {
        for _ in 0..factor {
            out.push(item.clone());
        }
    }
    out
}

/// Bring two sequences to the same length. The shorter one is stretched by
/// the integer ratio of the lengths, then the longer one is reduced to the
/// stretched length. Either side empty yields two empty sequences.
pub fn make_same_size<T: Clone>(a: Vec<T>, b: Vec<T>) -> (Vec<T>, Vec<T>) {
    if a.is_empty() || b.is_empty() {
        return (Vec::new(), Vec::new());
    }
    if a.len() > b.len() {
        let b = duplicate_interleaved(&b, a.len() / b.len());
        let a = reduce(&a, b.len());
        let b = reduce(&b, a.len());
        (a, b)
    } else if b.len() > a.len() {
        let a = duplicate_interleaved(&a, b.len() / a.len());
        let b = reduce(&b, a.len());
        let a = reduce(&a, b.len());
        (a, b)
    } else {
        (a, b)
    }
}

/// Nearest-neighbour resample to exactly `target` items, growing or shrinking
pub fn resample_nearest<T: Clone>(items: &[T], target: usize) -> Vec<T> {
    let len = items.len();
    if len == 0 {
        return Vec::new();
    }
    (0..target)
        .map(|i| items[(i * len / target).min(len - 1)].clone())
        .collect()
}

/// Place a shorter pattern onto a `steps`-long grid leaving gaps: element
/// `n` lands at `floor(n / len * steps)` and every other slot is `None`.
/// Patterns at least as long as the grid are reduced onto it.
pub fn spread_to_steps(items: &[f64], steps: usize) -> Vec<Option<f64>> {
    let len = items.len();
    if len == 0 || steps == 0 {
        return vec![None; steps];
    }
    if len >= steps {
        return reduce(items, steps).into_iter().map(Some).collect();
    }
    let mut grid = vec![None; steps];
    for (n, item) in items.iter().enumerate() {
        let slot = ((n as f64 / len as f64) * steps as f64).floor() as usize;
        if let Some(cell) = grid.get_mut(slot.min(steps - 1)) {
            *cell = Some(*item);
        }
    }
    grid
}

/// Stretch a shorter pattern across the grid by holding each value, then
/// reduce. Used for per-note velocity and duration.
pub fn stretch_to_steps(items: &[f64], steps: usize) -> Vec<f64> {
    let len = items.len();
    if len == 0 {
        return Vec::new();
    }
    if len < steps {
        let copies = steps / len + 1;
        let upscaled = duplicate_interleaved(items, copies);
        return reduce(&upscaled, steps);
    }
    reduce(items, steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_stride() {
        let items: Vec<usize> = (0..10).collect();
        // stride 10 + 3 = 13 over 3 outputs
        assert_eq!(reduce(&items, 3), vec![0, 4, 8]);
        assert_eq!(reduce(&items, 5), vec![0, 2, 4, 7, 9]);
        assert_eq!(reduce(&items, 10), items);
        assert_eq!(reduce(&items, 20), items);
        assert!(reduce(&items, 0).is_empty());
    }

    #[test]
    fn test_reduce_length_and_determinism() {
        let items: Vec<f64> = (0..97).map(|i| (i as f64).sin()).collect();
        for target in 1..=97 {
            let a = reduce(&items, target);
            assert_eq!(a.len(), target);
            assert_eq!(a, reduce(&items, target));
        }
    }

    #[test]
    fn test_duplicate_interleaved() {
        assert_eq!(duplicate_interleaved(&[1, 2], 3), vec![1, 1, 1, 2, 2, 2]);
        assert_eq!(duplicate_interleaved(&[1, 2], 0), vec![1, 2]);
    }

    #[test]
    fn test_make_same_size() {
        let a: Vec<i32> = (0..10).collect();
        let b = vec![100, 200, 300];
        let (ra, rb) = make_same_size(a.clone(), b.clone());
        assert_eq!(ra.len(), rb.len());
        assert_eq!(rb, vec![100, 100, 100, 200, 200, 200, 300, 300, 300]);
        assert!(ra.iter().all(|v| a.contains(v)));

        let (rb2, ra2) = make_same_size(b, a);
        assert_eq!(rb2.len(), ra2.len());

        let (x, y) = make_same_size(vec![1], Vec::<i32>::new());
        assert!(x.is_empty() && y.is_empty());
    }

    #[test]
    fn test_spread_to_steps() {
        let grid = spread_to_steps(&[60.0, 62.0, 64.0, 65.0], 16);
        assert_eq!(grid.len(), 16);
        assert_eq!(grid[0], Some(60.0));
        assert_eq!(grid[4], Some(62.0));
        assert_eq!(grid[8], Some(64.0));
        assert_eq!(grid[12], Some(65.0));
        assert_eq!(grid.iter().filter(|s| s.is_some()).count(), 4);

        let long: Vec<f64> = (0..32).map(|i| i as f64).collect();
        let grid = spread_to_steps(&long, 16);
        assert!(grid.iter().all(Option::is_some));
        assert_eq!(grid[0], Some(0.0));
    }

    #[test]
    fn test_stretch_to_steps() {
        let stretched = stretch_to_steps(&[1.0, 2.0], 4);
        assert_eq!(stretched.len(), 4);
        assert_eq!(stretched[0], 1.0);
        assert_eq!(stretched[3], 2.0);
        assert!(stretch_to_steps(&[], 4).is_empty());
    }
}
