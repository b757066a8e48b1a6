use uuid::Uuid;

/// Wallet that receives platform fees. Crediting fees here keeps the sum of all wallets constant
/// across every wagering operation.
pub const PLATFORM_ACCOUNT: Uuid = Uuid::nil();

/// Basis-point denominator used by fee and split math.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Standard platform fee (10%).
pub const STANDARD_FEE_BPS: u32 = 1_000;
/// Reduced tournament fee for premium-tier winners (5%).
pub const PREMIUM_FEE_BPS: u32 = 500;

/// Minimum participants before a challenge may start.
pub const MIN_CHALLENGE_PARTICIPANTS: usize = 2;
/// Quorum required to move a tournament from registration into play.
pub const MIN_TOURNAMENT_PARTICIPANTS: usize = 2;
/// Number of non-terminal automated tournaments the orchestrator keeps alive.
pub const MIN_ACTIVE_TOURNAMENTS: usize = 2;

pub const MINUTE_MS: u64 = 60 * 1_000;
pub const HOUR_MS: u64 = 60 * MINUTE_MS;
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// Stuck-state safety net: maximum time a unit may stay `active`/`ongoing`.
pub const MAX_ACTIVE_DURATION_MS: u64 = 6 * HOUR_MS;

/// A pending dispute without evidence is dismissed after this long.
pub const DISPUTE_EVIDENCE_GRACE_MS: u64 = 48 * HOUR_MS;
/// Disputes about units that closed longer ago than this are stale.
pub const DISPUTE_STALE_AFTER_MS: u64 = 7 * DAY_MS;
/// Lookback for a successful transaction that settles a payment dispute.
pub const PAYMENT_LOOKBACK_MS: u64 = 7 * DAY_MS;

/// Challenge splits (basis points of the net pot, first place first).
pub const WINNER_TAKE_ALL_SPLIT_BPS: &[u32] = &[10_000];
pub const TOP3_SPLIT_BPS: &[u32] = &[6_000, 3_000, 1_000];

/// Tournament splits by field size.
pub const TOURNAMENT_LARGE_SPLIT_BPS: &[u32] = &[5_000, 3_000, 2_000];
pub const TOURNAMENT_MEDIUM_SPLIT_BPS: &[u32] = &[7_000, 3_000];
/// Fields of at least this size use the large split.
pub const TOURNAMENT_LARGE_FIELD: usize = 8;
/// Fields of at least this size use the medium split.
pub const TOURNAMENT_MEDIUM_FIELD: usize = 4;

/// Upper bound on participants for any single wagering unit.
pub const MAX_PARTICIPANTS: u32 = 256;
/// Maximum evidence URLs attached to one dispute.
pub const MAX_EVIDENCE_URLS: usize = 16;
