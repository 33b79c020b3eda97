//! Board Generation
//!
//! Builds puzzles in three passes:
//!
//! 1. Seed the diagonal boxes with random permutations. Diagonal boxes share no
//!    row, column or box, so each can be filled independently. On 4x4 only the
//!    first box is seeded: two independent 2x2 diagonal boxes leave no
//!    completion about half the time, while any single box always completes.
//! 2. Complete the grid by backtracking: first empty cell in row-major order,
//!    candidates tried in ascending order.
//! 3. Punch holes at uniformly chosen positions.
//!
//! The solver tracks row/column/box membership as bitmasks and refuses a
//! placement that leaves any empty peer without candidates. Only dead branches
//! are cut, so the completed grid is the same one a plain ascending search
//! reaches. A step budget bounds pathological seeds; exceeding it fails the
//! attempt instead of returning a partial board.
//!
//! Puzzles are not checked for a unique solution.

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::rng::DeterministicRng;
use crate::game::board::{Board, BoardSize};

/// Generator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Attempts made by [`BoardGenerator::generate_with_retries`].
    pub max_attempts: u32,
    /// Placements the solver may try per attempt.
    pub step_budget: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            step_budget: 2_000_000,
        }
    }
}

/// Generation failures. Always internal faults from the caller's view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Solver gave up after trying `budget` placements.
    #[error("Solver exceeded {budget} steps completing a {size} board")]
    BudgetExhausted {
        /// Board size being generated.
        size: BoardSize,
        /// Configured step budget.
        budget: u64,
    },

    /// Seeded board has no completion.
    #[error("Seeded {size} board has no valid completion")]
    Unsolvable {
        /// Board size being generated.
        size: BoardSize,
    },

    /// Every retry failed.
    #[error("No {size} board after {attempts} attempts")]
    AttemptsExhausted {
        /// Board size being generated.
        size: BoardSize,
        /// Attempts made.
        attempts: u32,
    },
}

/// Produces Sudoku puzzles.
#[derive(Debug, Clone, Default)]
pub struct BoardGenerator {
    config: GeneratorConfig,
}

impl BoardGenerator {
    /// Create a generator with the given tuning.
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Generator tuning.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Single generation attempt.
    pub fn generate(
        &self,
        size: BoardSize,
        rng: &mut DeterministicRng,
    ) -> Result<Board, GenerationError> {
        let mut solver = Solver::new(Board::empty(size), self.config.step_budget);
        solver.seed_diagonal(rng);

        if !solver.solve_from(0)? {
            return Err(GenerationError::Unsolvable { size });
        }
        debug!(size = %size, steps = solver.steps, "Solved seeded board");

        let mut board = solver.board;
        punch_holes(&mut board, rng);
        Ok(board)
    }

    /// Generate with fresh randomness until an attempt succeeds or
    /// `max_attempts` is reached.
    pub fn generate_with_retries(
        &self,
        size: BoardSize,
        rng: &mut DeterministicRng,
    ) -> Result<Board, GenerationError> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.generate(size, rng) {
                Ok(board) => return Ok(board),
                Err(e) => {
                    warn!(size = %size, attempt, error = %e, "Board generation attempt failed")
                }
            }
        }
        Err(GenerationError::AttemptsExhausted { size, attempts })
    }

    /// Fill every empty cell of `board` with the ascending backtracking search.
    pub fn complete(&self, board: &Board) -> Result<Board, GenerationError> {
        let size = board.size();
        if !board.is_consistent() {
            return Err(GenerationError::Unsolvable { size });
        }
        let mut solver = Solver::new(board.clone(), self.config.step_budget);
        if solver.solve_from(0)? {
            Ok(solver.board)
        } else {
            Err(GenerationError::Unsolvable { size })
        }
    }
}

/// Clear `size.holes()` distinct cells chosen uniformly at random.
fn punch_holes(board: &mut Board, rng: &mut DeterministicRng) {
    let size = board.size();
    let n = size.side();
    let mut positions: Vec<usize> = (0..size.cell_count()).collect();
    rng.shuffle(&mut positions);

    for &idx in positions.iter().take(size.holes()) {
        board.set(idx / n, idx % n, 0);
    }
}

// =============================================================================
// SOLVER
// =============================================================================

/// Backtracking state. Bit `v` of a mask is set when value `v` is used.
struct Solver {
    board: Board,
    n: usize,
    b: usize,
    full: u32,
    rows: Vec<u32>,
    cols: Vec<u32>,
    boxes: Vec<u32>,
    steps: u64,
    budget: u64,
}

impl Solver {
    /// Board must satisfy the Sudoku invariant.
    fn new(board: Board, budget: u64) -> Self {
        let size = board.size();
        let n = size.side();
        let mut solver = Self {
            board,
            n,
            b: size.box_len(),
            full: ((1u32 << n) - 1) << 1,
            rows: vec![0; n],
            cols: vec![0; n],
            boxes: vec![0; n],
            steps: 0,
            budget,
        };

        for row in 0..n {
            for col in 0..n {
                let value = solver.board.get(row, col).unwrap_or(0);
                if value != 0 {
                    solver.mark(row, col, value);
                }
            }
        }
        solver
    }

    #[inline]
    fn box_of(&self, row: usize, col: usize) -> usize {
        (row / self.b) * self.b + col / self.b
    }

    #[inline]
    fn candidates(&self, row: usize, col: usize) -> u32 {
        self.full & !(self.rows[row] | self.cols[col] | self.boxes[self.box_of(row, col)])
    }

    fn mark(&mut self, row: usize, col: usize, value: u8) {
        let bit = 1u32 << value;
        let bx = self.box_of(row, col);
        self.rows[row] |= bit;
        self.cols[col] |= bit;
        self.boxes[bx] |= bit;
    }

    fn assign(&mut self, row: usize, col: usize, value: u8) {
        self.mark(row, col, value);
        self.board.set(row, col, value);
    }

    fn unassign(&mut self, row: usize, col: usize, value: u8) {
        let bit = !(1u32 << value);
        let bx = self.box_of(row, col);
        self.rows[row] &= bit;
        self.cols[col] &= bit;
        self.boxes[bx] &= bit;
        self.board.set(row, col, 0);
    }

    fn is_empty(&self, row: usize, col: usize) -> bool {
        self.board.get(row, col) == Some(0)
    }

    /// Boxes along the diagonal that are seeded before solving.
    fn seeded_boxes(&self) -> usize {
        if self.b == 2 {
            1
        } else {
            self.b
        }
    }

    /// Fill the seeded diagonal boxes with a shuffled 1..=N each.
    fn seed_diagonal(&mut self, rng: &mut DeterministicRng) {
        let mut values: Vec<u8> = (1..=self.n as u8).collect();
        for k in 0..self.seeded_boxes() {
            rng.shuffle(&mut values);
            let origin = k * self.b;
            for (i, &value) in values.iter().enumerate() {
                self.assign(origin + i / self.b, origin + i % self.b, value);
            }
        }
    }

    /// True if some empty peer of (`row`, `col`) has no candidates left.
    fn leaves_dead_peer(&self, row: usize, col: usize) -> bool {
        let dead = |r: usize, c: usize| self.is_empty(r, c) && self.candidates(r, c) == 0;

        if (0..self.n).any(|c| dead(row, c)) || (0..self.n).any(|r| dead(r, col)) {
            return true;
        }
        let top = row - row % self.b;
        let left = col - col % self.b;
        (top..top + self.b).any(|r| (left..left + self.b).any(|c| dead(r, c)))
    }

    /// Every cell before `start` is filled.
    fn solve_from(&mut self, start: usize) -> Result<bool, GenerationError> {
        let n = self.n;
        let Some(idx) = (start..n * n).find(|&i| self.is_empty(i / n, i % n)) else {
            return Ok(true);
        };
        let (row, col) = (idx / n, idx % n);
        let free = self.candidates(row, col);

        for value in 1..=n as u8 {
            if free & (1u32 << value) == 0 {
                continue;
            }
            self.steps += 1;
            if self.steps > self.budget {
                return Err(GenerationError::BudgetExhausted {
                    size: self.board.size(),
                    budget: self.budget,
                });
            }

            self.assign(row, col, value);
            if !self.leaves_dead_peer(row, col) && self.solve_from(idx + 1)? {
                return Ok(true);
            }
            self.unassign(row, col, value);
        }

        Ok(false)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn box_values(board: &Board, top: usize, left: usize) -> Vec<u8> {
        let b = board.size().box_len();
        let mut values = Vec::new();
        for r in top..top + b {
            for c in left..left + b {
                values.push(board.get(r, c).unwrap());
            }
        }
        values
    }

    #[test]
    fn test_generate_all_sizes() {
        let generator = BoardGenerator::default();
        let mut rng = DeterministicRng::new(2024);

        for size in BoardSize::ALL {
            let board = generator.generate_with_retries(size, &mut rng).unwrap();
            assert_eq!(board.size(), size);
            assert!(board.is_consistent(), "{size} board breaks the invariant");
            assert_eq!(board.empty_cells(), size.holes());
        }
    }

    #[test]
    fn test_nine_by_nine_has_forty_holes() {
        let generator = BoardGenerator::default();
        let mut rng = DeterministicRng::new(7);
        let board = generator.generate(BoardSize::Nine, &mut rng).unwrap();
        assert_eq!(board.empty_cells(), 40);
    }

    #[test]
    fn test_four_by_four_scenario() {
        let generator = BoardGenerator::default();
        let mut rng = DeterministicRng::new(31337);
        let board = generator.generate(BoardSize::Four, &mut rng).unwrap();
        let grid = board.to_grid();

        assert_eq!(grid.len(), 4);
        assert!(grid.iter().all(|row| row.len() == 4));
        assert_eq!(board.empty_cells(), 8);

        let no_dupes = |values: Vec<u8>| {
            let filled: Vec<u8> = values.into_iter().filter(|&v| v != 0).collect();
            let mut sorted = filled.clone();
            sorted.sort_unstable();
            sorted.dedup();
            sorted.len() == filled.len()
        };

        for i in 0..4 {
            assert!(no_dupes(grid[i].clone()));
            assert!(no_dupes(grid.iter().map(|row| row[i]).collect()));
        }
        for top in [0, 2] {
            for left in [0, 2] {
                assert!(no_dupes(box_values(&board, top, left)));
            }
        }
    }

    #[test]
    fn test_same_seed_same_board() {
        let generator = BoardGenerator::default();
        let a = generator.generate(BoardSize::Nine, &mut DeterministicRng::new(99)).unwrap();
        let b = generator.generate(BoardSize::Nine, &mut DeterministicRng::new(99)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_diagonal_seed_fills_boxes() {
        let mut solver = Solver::new(Board::empty(BoardSize::Nine), 0);
        solver.seed_diagonal(&mut DeterministicRng::new(5));

        for k in 0..3 {
            let mut values = box_values(&solver.board, k * 3, k * 3);
            values.sort_unstable();
            assert_eq!(values, (1..=9).collect::<Vec<u8>>());
        }
        // Off-diagonal boxes untouched
        assert!(box_values(&solver.board, 0, 3).iter().all(|&v| v == 0));
        assert!(solver.board.is_consistent());
    }

    #[test]
    fn test_four_by_four_seeds_first_box_only() {
        let mut solver = Solver::new(Board::empty(BoardSize::Four), 0);
        solver.seed_diagonal(&mut DeterministicRng::new(31337));

        let mut values = box_values(&solver.board, 0, 0);
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3, 4]);
        assert!(box_values(&solver.board, 2, 2).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_four_by_four_generates_first_try_for_many_seeds() {
        let generator = BoardGenerator::default();
        for seed in 0..10_000u64 {
            let mut rng = DeterministicRng::new(seed);
            let board = generator.generate(BoardSize::Four, &mut rng);
            assert!(board.is_ok(), "seed {seed}: {board:?}");
        }
    }

    #[test]
    fn test_complete_picks_ascending_solution() {
        // An empty 4x4 completes to the lexicographically smallest grid.
        let generator = BoardGenerator::default();
        let solved = generator.complete(&Board::empty(BoardSize::Four)).unwrap();
        assert_eq!(
            solved.to_grid(),
            vec![
                vec![1, 2, 3, 4],
                vec![3, 4, 1, 2],
                vec![2, 1, 4, 3],
                vec![4, 3, 2, 1],
            ]
        );
    }

    #[test]
    fn test_complete_reports_unsolvable() {
        // (0,0) can only take 1 from its row, but column 0 already has 1.
        let grid = vec![
            vec![0, 2, 3, 4],
            vec![0, 0, 0, 0],
            vec![1, 0, 0, 0],
            vec![0, 0, 0, 0],
        ];
        let board = Board::from_grid(&grid).unwrap();
        let result = BoardGenerator::default().complete(&board);
        assert_eq!(result, Err(GenerationError::Unsolvable { size: BoardSize::Four }));
    }

    #[test]
    fn test_budget_exhaustion_is_an_error() {
        let generator = BoardGenerator::new(GeneratorConfig {
            max_attempts: 3,
            step_budget: 1,
        });
        let mut rng = DeterministicRng::new(1);

        assert!(matches!(
            generator.generate(BoardSize::Nine, &mut rng),
            Err(GenerationError::BudgetExhausted { budget: 1, .. })
        ));
        assert_eq!(
            generator.generate_with_retries(BoardSize::Nine, &mut rng),
            Err(GenerationError::AttemptsExhausted { size: BoardSize::Nine, attempts: 3 })
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_generated_boards_hold_invariant(seed in any::<u64>(), idx in 0usize..2) {
            let size = [BoardSize::Four, BoardSize::Nine][idx];
            let generator = BoardGenerator::default();
            let board = generator
                .generate_with_retries(size, &mut DeterministicRng::new(seed))
                .unwrap();

            prop_assert!(board.is_consistent());
            prop_assert_eq!(board.empty_cells(), size.holes());

            // Every hole can be refilled to a full solution.
            let solved = generator.complete(&board).unwrap();
            prop_assert!(solved.is_complete());
            prop_assert!(solved.is_consistent());
        }
    }
}
