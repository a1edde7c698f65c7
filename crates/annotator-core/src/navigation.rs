//! Keyboard navigation through the block list.

use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

impl Direction {
    fn delta(self) -> isize {
        match self {
            Direction::Next => 1,
            Direction::Previous => -1,
        }
    }
}

/// Index to select after moving one step from `current`, wrapping around.
///
/// With `skip`, blocks whose id is in the set are passed over. When every
/// block is in the set this degrades to a plain single step. `None` current
/// behaves as if the selection sat just before the first block.
pub fn step_selection(
    block_ids: &[String],
    current: Option<usize>,
    direction: Direction,
    skip: Option<&HashSet<String>>,
) -> Option<usize> {
    let count = block_ids.len() as isize;
    if count == 0 {
        return None;
    }
    let start = current.map_or(-1, |i| i as isize);
    let delta = direction.delta();
    let wrap = |i: isize| i.rem_euclid(count) as usize;

    if let Some(skip) = skip {
        let mut index = start;
        for _ in 0..count {
            index += delta;
            let candidate = wrap(index);
            if !skip.contains(&block_ids[candidate]) {
                return Some(candidate);
            }
        }
    }
    Some(wrap(start + delta))
}
