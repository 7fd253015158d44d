pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const DEFAULT_DIFFICULTY: usize = 4;
/// Max difficulty a SHA-256 hex digest can ever satisfy.
pub const MAX_DIFFICULTY: usize = HASH_HEX_SIZE;
/// Nonces tried between checks of the wall-clock deadline.
pub const DEADLINE_CHECK_INTERVAL: u64 = 1024;
