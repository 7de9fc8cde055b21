//! Shortest-free-stall search over the parking grid.
//!
//! Dijkstra from the entrance with unit cost per 4-neighbor step. Roads,
//! stalls, the exit and the entrance are passable; decorations block. Among
//! the free stalls settled by the search, the one with the smallest distance
//! wins; ties resolve by insertion order into the queue, which makes the
//! choice deterministic for a given topology. Unit weights make this
//! equivalent to BFS today, but the queue is kept distance-ordered so turn
//! penalties or weighted lanes slot in without touching the selection logic.

use crate::grid::{CellKind, Stall};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Queue entry: distance first, then insertion sequence for stable ties.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Visit {
    dist: u32,
    seq: u64,
    x: usize,
    y: usize,
}

/// Find the free `Park` cell nearest to `entrance`, or `None` when no free
/// stall is reachable.
///
/// `free` is the row-major free-bit slice maintained by the lot; the caller
/// holds the occupancy lock for the duration of the search.
pub(crate) fn nearest_free_stall(
    cells: &[Vec<CellKind>],
    entrance: (usize, usize),
    free: &[bool],
) -> Option<Stall> {
    let height = cells.len();
    let width = cells.first().map(Vec::len)?;
    if width == 0 {
        return None;
    }

    let mut dist = vec![u32::MAX; height * width];
    let mut visited = vec![false; height * width];

    let mut queue: BinaryHeap<Reverse<Visit>> = BinaryHeap::new();
    let mut seq = 0u64;

    let (ex, ey) = entrance;
    dist[ex * width + ey] = 0;
    queue.push(Reverse(Visit {
        dist: 0,
        seq,
        x: ex,
        y: ey,
    }));

    let mut best: Option<(u32, Stall)> = None;

    while let Some(Reverse(Visit { dist: d, x, y, .. })) = queue.pop() {
        let idx = x * width + y;
        if visited[idx] {
            continue;
        }
        if let Some((best_dist, _)) = best {
            if d > best_dist {
                continue;
            }
        }
        visited[idx] = true;

        if cells[x][y] == CellKind::Park && free[idx] {
            let better = match best {
                Some((best_dist, _)) => d < best_dist,
                None => true,
            };
            if better {
                best = Some((d, Stall { x, y }));
            }
        }

        // Up, right, down, left.
        const STEPS: [(isize, isize); 4] = [(-1, 0), (0, 1), (1, 0), (0, -1)];
        for (dx, dy) in STEPS {
            let nx = x as isize + dx;
            let ny = y as isize + dy;
            if nx < 0 || nx >= height as isize || ny < 0 || ny >= width as isize {
                continue;
            }
            let (nx, ny) = (nx as usize, ny as usize);
            let nidx = nx * width + ny;
            if !cells[nx][ny].is_passable() || visited[nidx] {
                continue;
            }
            let nd = d + 1;
            if nd < dist[nidx] {
                dist[nidx] = nd;
                seq += 1;
                queue.push(Reverse(Visit {
                    dist: nd,
                    seq,
                    x: nx,
                    y: ny,
                }));
            }
        }
    }

    best.map(|(_, stall)| stall)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&str]) -> Vec<Vec<CellKind>> {
        rows.iter()
            .map(|row| {
                row.chars()
                    .map(|ch| match ch {
                        '.' => CellKind::Road,
                        'P' => CellKind::Park,
                        'I' => CellKind::Entrance,
                        'O' => CellKind::Exit,
                        'D' => CellKind::Decoration,
                        other => panic!("unknown cell {other}"),
                    })
                    .collect()
            })
            .collect()
    }

    fn all_free(cells: &[Vec<CellKind>]) -> Vec<bool> {
        vec![true; cells.len() * cells[0].len()]
    }

    #[test]
    fn picks_the_closest_stall() {
        let cells = grid(&["....", ".PP.", ".PP.", "I..O"]);
        let free = all_free(&cells);

        let stall = nearest_free_stall(&cells, (3, 0), &free).unwrap();
        assert_eq!(stall, Stall { x: 2, y: 1 });
    }

    #[test]
    fn skips_occupied_stalls() {
        let cells = grid(&["....", ".PP.", ".PP.", "I..O"]);
        let width = 4;
        let mut free = all_free(&cells);
        free[2 * width + 1] = false;

        let stall = nearest_free_stall(&cells, (3, 0), &free).unwrap();
        // (1,1) and (2,2) are both three steps away; (1,1) is settled first
        // because the search relaxes upward before rightward.
        assert_eq!(stall, Stall { x: 1, y: 1 });
    }

    #[test]
    fn ties_are_deterministic() {
        let cells = grid(&["....", ".PP.", ".PP.", "I..O"]);
        let width = 4;
        let mut free = all_free(&cells);
        free[2 * width + 1] = false;

        let first = nearest_free_stall(&cells, (3, 0), &free);
        for _ in 0..10 {
            assert_eq!(nearest_free_stall(&cells, (3, 0), &free), first);
        }
    }

    #[test]
    fn decoration_blocks_the_path() {
        let cells = grid(&["DDDD", "PDDD", "DDDD", "I..O"]);
        let free = all_free(&cells);
        assert_eq!(nearest_free_stall(&cells, (3, 0), &free), None);
    }

    #[test]
    fn no_free_stall_returns_none() {
        let cells = grid(&["....", ".PP.", "....", "I..O"]);
        let mut free = all_free(&cells);
        for slot in free.iter_mut() {
            *slot = false;
        }
        assert_eq!(nearest_free_stall(&cells, (3, 0), &free), None);
    }

    #[test]
    fn walks_around_obstacles() {
        // The left column is walled off; the path detours through column 1.
        let cells = grid(&["P.DD", "D.D.", "D.D.", "I.DO"]);
        let free = all_free(&cells);
        let stall = nearest_free_stall(&cells, (3, 0), &free).unwrap();
        assert_eq!(stall, Stall { x: 0, y: 0 });
    }
}
