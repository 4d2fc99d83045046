//! Playfield, tetrominoes and the 7-bag generator.

use std::collections::VecDeque;

use rand::SeedableRng as _;
use rand::seq::SliceRandom;
use rand_pcg::Pcg32;
use tetra_types::Board;

pub const WIDTH: usize = 10;
pub const HEIGHT: usize = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Pieces
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    I,
    O,
    S,
    Z,
    J,
    L,
    T,
}

impl PieceKind {
    pub const ALL: [PieceKind; 7] = [
        PieceKind::I,
        PieceKind::O,
        PieceKind::S,
        PieceKind::Z,
        PieceKind::J,
        PieceKind::L,
        PieceKind::T,
    ];

    /// Cell value written into the playfield (1..=7; 0 is empty).
    pub fn cell(self) -> u8 {
        self as u8 + 1
    }

    /// Spawn orientation, `(x, y)` with `y` growing downwards.
    fn spawn_cells(self) -> [(i8, i8); 4] {
        match self {
            PieceKind::I => [(0, 1), (1, 1), (2, 1), (3, 1)],
            PieceKind::O => [(0, 0), (1, 0), (0, 1), (1, 1)],
            PieceKind::S => [(1, 0), (2, 0), (0, 1), (1, 1)],
            PieceKind::Z => [(0, 0), (1, 0), (1, 1), (2, 1)],
            PieceKind::J => [(0, 0), (0, 1), (1, 1), (2, 1)],
            PieceKind::L => [(2, 0), (0, 1), (1, 1), (2, 1)],
            PieceKind::T => [(1, 0), (0, 1), (1, 1), (2, 1)],
        }
    }

    /// Cells after `rotation` clockwise quarter turns, shifted so the
    /// smallest `x` and `y` are both zero.
    pub fn cells(self, rotation: usize) -> [(usize, usize); 4] {
        let mut cells = self.spawn_cells();
        for _ in 0..rotation % 4 {
            for c in &mut cells {
                *c = (-c.1, c.0);
            }
        }
        let min_x = cells.iter().map(|c| c.0).min().unwrap_or(0);
        let min_y = cells.iter().map(|c| c.1).min().unwrap_or(0);
        cells.map(|(x, y)| ((x - min_x) as usize, (y - min_y) as usize))
    }
}

/// 7-bag generator: every run of seven consecutive pieces (aligned to the
/// bag) contains each kind exactly once.
#[derive(Debug, Clone)]
pub struct PieceBag {
    rng: Pcg32,
    bag: VecDeque<PieceKind>,
}

impl PieceBag {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Pcg32::seed_from_u64(seed),
            bag: VecDeque::with_capacity(PieceKind::ALL.len() * 2),
        }
    }

    pub fn next_piece(&mut self) -> PieceKind {
        if self.bag.is_empty() {
            let mut fresh = PieceKind::ALL;
            fresh.shuffle(&mut self.rng);
            self.bag.extend(fresh);
        }
        self.bag.pop_front().unwrap_or(PieceKind::T)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Playfield
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar summary of a playfield, used for rewards and as engine features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoardStats {
    pub holes: u32,
    pub bumpiness: u32,
    pub aggregate_height: u32,
    pub max_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playfield {
    rows: [[u8; WIDTH]; HEIGHT],
}

impl Default for Playfield {
    fn default() -> Self {
        Self {
            rows: [[0; WIDTH]; HEIGHT],
        }
    }
}

impl Playfield {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_filled(&self, x: usize, y: usize) -> bool {
        self.rows[y][x] != 0
    }

    fn fits(&self, cells: &[(usize, usize); 4], x: usize, y: usize) -> bool {
        cells.iter().all(|&(cx, cy)| {
            let (px, py) = (x + cx, y + cy);
            px < WIDTH && py < HEIGHT && self.rows[py][px] == 0
        })
    }

    /// Row at which the piece comes to rest when dropped in column `x`, or
    /// `None` when it does not even fit at the top.
    pub fn drop_row(&self, kind: PieceKind, rotation: usize, x: usize) -> Option<usize> {
        let cells = kind.cells(rotation);
        if !self.fits(&cells, x, 0) {
            return None;
        }
        let mut y = 0;
        while self.fits(&cells, x, y + 1) {
            y += 1;
        }
        Some(y)
    }

    /// Drop the piece in column `x` and clear full rows.
    ///
    /// Returns the new playfield and the number of cleared lines, or `None`
    /// for an illegal placement.
    pub fn place(&self, kind: PieceKind, rotation: usize, x: usize) -> Option<(Playfield, u32)> {
        let y = self.drop_row(kind, rotation, x)?;
        let mut next = self.clone();
        for (cx, cy) in kind.cells(rotation) {
            next.rows[y + cy][x + cx] = kind.cell();
        }
        let cleared = next.clear_lines();
        Some((next, cleared))
    }

    fn clear_lines(&mut self) -> u32 {
        let kept: Vec<[u8; WIDTH]> = self
            .rows
            .iter()
            .filter(|row| row.iter().any(|&c| c == 0))
            .copied()
            .collect();
        let cleared = HEIGHT - kept.len();
        let mut rows = [[0; WIDTH]; HEIGHT];
        rows[cleared..].copy_from_slice(&kept);
        self.rows = rows;
        cleared as u32
    }

    /// Height of every column (0 for an empty column).
    pub fn column_heights(&self) -> [u32; WIDTH] {
        let mut heights = [0; WIDTH];
        for (x, h) in heights.iter_mut().enumerate() {
            if let Some(top) = (0..HEIGHT).find(|&y| self.rows[y][x] != 0) {
                *h = (HEIGHT - top) as u32;
            }
        }
        heights
    }

    pub fn stats(&self) -> BoardStats {
        let heights = self.column_heights();
        let mut holes = 0;
        for (x, &h) in heights.iter().enumerate() {
            let top = HEIGHT - h as usize;
            holes += (top..HEIGHT).filter(|&y| self.rows[y][x] == 0).count() as u32;
        }
        BoardStats {
            holes,
            bumpiness: heights.windows(2).map(|w| w[0].abs_diff(w[1])).sum(),
            aggregate_height: heights.iter().sum(),
            max_height: heights.iter().copied().max().unwrap_or(0),
        }
    }

    pub fn to_board(&self) -> Board {
        self.rows.iter().map(|r| r.to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_rotation_has_four_distinct_cells_anchored_at_origin() {
        for kind in PieceKind::ALL {
            for r in 0..4 {
                let cells = kind.cells(r);
                assert!(cells.iter().any(|c| c.0 == 0));
                assert!(cells.iter().any(|c| c.1 == 0));
                for i in 0..4 {
                    for j in i + 1..4 {
                        assert_ne!(cells[i], cells[j], "{kind:?} r{r}");
                    }
                }
            }
        }
    }

    #[test]
    fn vertical_i_is_one_column_wide() {
        let cells = PieceKind::I.cells(1);
        assert!(cells.iter().all(|c| c.0 == 0));
    }

    #[test]
    fn bag_deals_each_kind_once_per_seven() {
        let mut bag = PieceBag::with_seed(7);
        for _ in 0..3 {
            let mut seen: Vec<_> = (0..7).map(|_| bag.next_piece() as u8).collect();
            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6]);
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = PieceBag::with_seed(42);
        let mut b = PieceBag::with_seed(42);
        for _ in 0..21 {
            assert_eq!(a.next_piece(), b.next_piece());
        }
    }

    #[test]
    fn horizontal_i_on_empty_board_lands_on_the_floor() {
        let field = Playfield::new();
        assert_eq!(field.drop_row(PieceKind::I, 0, 0), Some(HEIGHT - 1));
        assert_eq!(field.drop_row(PieceKind::I, 0, 7), None);
    }

    #[test]
    fn filling_a_row_clears_it() {
        let mut field = Playfield::new();
        let mut cleared = 0;
        for x in [0, 4] {
            let (next, c) = field.place(PieceKind::I, 0, x).unwrap();
            field = next;
            cleared += c;
        }
        let (field, c) = field.place(PieceKind::O, 0, 8).unwrap();
        cleared += c;
        assert_eq!(cleared, 1);
        // Only the top half of the O piece remains.
        assert_eq!(field.column_heights(), [0, 0, 0, 0, 0, 0, 0, 0, 1, 1]);
    }

    #[test]
    fn stats_count_holes_and_bumpiness() {
        let field = Playfield::new();
        // Horizontal S leaves one hole under its overhang.
        let (field, _) = field.place(PieceKind::S, 0, 0).unwrap();
        let stats = field.stats();
        assert_eq!(stats.holes, 1);
        assert_eq!(stats.max_height, 2);
        assert_eq!(stats.aggregate_height, 5);
        assert_eq!(field.column_heights()[..4], [1, 2, 2, 0]);
        assert_eq!(stats.bumpiness, 1 + 0 + 2);
    }
}
