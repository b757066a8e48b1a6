use puosu_types::wager::{
    AuditEntry, AutomationType, Challenge, ChallengeResult, ChallengeStatus, ChallengeUpdate,
    ChallengeParticipant, Dispute, DisputeStatus, Game, MatchStats, Notification, ProofStatus,
    TestUser, Tournament, TournamentMatch, TournamentParticipant, TournamentStatus,
    TournamentUpdate, Wallet, WalletCredit, WalletTransaction,
};
use puosu_types::{ChallengeId, DisputeId, LedgerError, Money, TournamentId, UserId};
use std::future::Future;

pub type StoreResult<T> = Result<T, LedgerError>;

/// The durable record store and its atomic primitives.
///
/// Money only moves through [`Datastore::join_challenge_atomic`],
/// [`Datastore::join_tournament_atomic`] and [`Datastore::increment_wallet_balance`]. Each of
/// them is indivisible: on error no partial state is left behind. The `secure_settle_*` guards
/// and the `transition_*` methods are compare-and-set operations, which is the only exclusion the
/// orchestration layer relies on.
///
/// Implementations hold no per-invocation state; every sweep re-reads what it needs.
pub trait Datastore: Send + Sync + 'static {
    /// Debits the stake, inserts the participant row and grows the pot as one unit.
    fn join_challenge_atomic(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        stake: Money,
        now_ms: u64,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Escrows the entry fee into the prize pool and registers the user.
    fn join_tournament_atomic(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        now_ms: u64,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Marks the challenge settled. Returns `false` if it already was.
    fn secure_settle_challenge(
        &self,
        challenge_id: ChallengeId,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Marks the tournament settled. Returns `false` if it already was.
    fn secure_settle_tournament(
        &self,
        tournament_id: TournamentId,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Applies a signed balance change and records the transaction line. Returns the new
    /// balance. A debit that would go below zero fails with `InsufficientFunds`.
    fn increment_wallet_balance(
        &self,
        credit: WalletCredit,
        now_ms: u64,
    ) -> impl Future<Output = StoreResult<Money>> + Send;

    fn get_available_test_users(
        &self,
        min_balance: Money,
        max_users: usize,
    ) -> impl Future<Output = StoreResult<Vec<TestUser>>> + Send;

    fn detect_suspicious_stats(
        &self,
        user_id: UserId,
        stats: MatchStats,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn has_vip_access(&self, user_id: UserId) -> impl Future<Output = StoreResult<bool>> + Send;

    fn create_wallet(&self, wallet: Wallet) -> impl Future<Output = StoreResult<()>> + Send;

    fn wallet(&self, user_id: UserId) -> impl Future<Output = StoreResult<Option<Wallet>>> + Send;

    fn wallet_transactions(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = StoreResult<Vec<WalletTransaction>>> + Send;

    /// Whether the user has any positive, completed transaction at or after `since_ms`.
    fn has_completed_transaction_since(
        &self,
        user_id: UserId,
        since_ms: u64,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn insert_challenge(&self, challenge: Challenge)
        -> impl Future<Output = StoreResult<()>> + Send;

    fn challenge(
        &self,
        challenge_id: ChallengeId,
    ) -> impl Future<Output = StoreResult<Option<Challenge>>> + Send;

    fn challenges_with_status(
        &self,
        status: ChallengeStatus,
    ) -> impl Future<Output = StoreResult<Vec<Challenge>>> + Send;

    fn challenges_created_since(
        &self,
        since_ms: u64,
    ) -> impl Future<Output = StoreResult<Vec<Challenge>>> + Send;

    /// Moves `from -> to` and writes `update`, only if the current status is still `from`.
    fn transition_challenge(
        &self,
        challenge_id: ChallengeId,
        from: ChallengeStatus,
        to: ChallengeStatus,
        update: ChallengeUpdate,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn challenge_participants(
        &self,
        challenge_id: ChallengeId,
    ) -> impl Future<Output = StoreResult<Vec<ChallengeParticipant>>> + Send;

    /// Writes a result once; a second write for the same participant fails with
    /// `ResultAlreadyRecorded`.
    fn record_challenge_result(
        &self,
        result: ChallengeResult,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn challenge_results(
        &self,
        challenge_id: ChallengeId,
    ) -> impl Future<Output = StoreResult<Vec<ChallengeResult>>> + Send;

    fn set_result_status(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        status: ProofStatus,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn insert_tournament(
        &self,
        tournament: Tournament,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn tournament(
        &self,
        tournament_id: TournamentId,
    ) -> impl Future<Output = StoreResult<Option<Tournament>>> + Send;

    fn tournaments_with_status(
        &self,
        status: TournamentStatus,
    ) -> impl Future<Output = StoreResult<Vec<Tournament>>> + Send;

    /// Compare-and-set counterpart of [`Datastore::transition_challenge`].
    fn transition_tournament(
        &self,
        tournament_id: TournamentId,
        from: TournamentStatus,
        to: TournamentStatus,
        update: TournamentUpdate,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn tournament_participants(
        &self,
        tournament_id: TournamentId,
    ) -> impl Future<Output = StoreResult<Vec<TournamentParticipant>>> + Send;

    fn set_tournament_placements(
        &self,
        tournament_id: TournamentId,
        placements: Vec<(UserId, u32)>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn insert_matches(
        &self,
        matches: Vec<TournamentMatch>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn tournament_matches(
        &self,
        tournament_id: TournamentId,
    ) -> impl Future<Output = StoreResult<Vec<TournamentMatch>>> + Send;

    /// Cancels every `pending`/`in_progress` match of the tournament; returns how many changed.
    fn cancel_open_matches(
        &self,
        tournament_id: TournamentId,
    ) -> impl Future<Output = StoreResult<u32>> + Send;

    fn insert_dispute(&self, dispute: Dispute) -> impl Future<Output = StoreResult<()>> + Send;

    fn disputes_with_status(
        &self,
        status: DisputeStatus,
    ) -> impl Future<Output = StoreResult<Vec<Dispute>>> + Send;

    /// Closes a dispute only if it is still `pending`.
    fn resolve_dispute(
        &self,
        dispute_id: DisputeId,
        status: DisputeStatus,
        resolution: String,
        now_ms: u64,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn append_audit(&self, entry: AuditEntry) -> impl Future<Output = StoreResult<()>> + Send;

    fn latest_audit(
        &self,
        automation_type: AutomationType,
    ) -> impl Future<Output = StoreResult<Option<AuditEntry>>> + Send;

    fn audits_since(&self, since_ms: u64)
        -> impl Future<Output = StoreResult<Vec<AuditEntry>>> + Send;

    fn notify(&self, notification: Notification) -> impl Future<Output = StoreResult<()>> + Send;

    fn notifications(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = StoreResult<Vec<Notification>>> + Send;

    fn insert_game(&self, game: Game) -> impl Future<Output = StoreResult<()>> + Send;

    fn active_games(&self) -> impl Future<Output = StoreResult<Vec<Game>>> + Send;
}
