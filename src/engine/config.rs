// Scoring
pub const FLAT_CORRECT_BONUS: u32 = 50;
pub const FIRST_GUESS_BONUS: u32 = 25;
pub const TRICKERY_BONUS: u32 = 25; // per fooled guesser
pub const STREAK_STEP: u32 = 10;
pub const SPEED_DIVISOR: u32 = 2; // half a point per second left

// First-guess and streak bonuses need at least this many players in the round
pub const MIN_PLAYERS_FOR_BONUSES: usize = 3;

// Statements per round: two truths and one lie
pub const STATEMENTS_PER_ROUND: usize = 3;

// Timer
pub const SPEED_UP_THRESHOLD_SECS: u32 = 15;
pub const TICK_INTERVAL_MS: u64 = 1000;

// Lobby limits
pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 6;
pub const MIN_ROUNDS: usize = 2;
pub const MAX_ROUNDS: usize = 20;
pub const MIN_ROUND_LENGTH_SECS: u32 = 30;
pub const MAX_ROUND_LENGTH_SECS: u32 = 600;
pub const ROUND_LENGTH_STEP_SECS: u32 = 30;

// Lobby defaults
pub const DEFAULT_PLAYERS: usize = 2;
pub const DEFAULT_ROUNDS: usize = 2;
pub const DEFAULT_ROUND_LENGTH_SECS: u32 = 30;

// Truth input
pub const MAX_TRUTH_CHARS: usize = 200;
