//! In-memory [`Datastore`] and fixtures for tests.
//!
//! Each primitive runs under a single lock, which gives the same all-or-nothing behaviour the
//! SQLite store gets from its transactions. Failures can be injected per user and reason to drive
//! the compensation paths.

use crate::anomaly;
use crate::store::{Datastore, StoreResult};
use puosu_types::wager::{
    AuditEntry, AutomationType, Challenge, ChallengeParticipant, ChallengeResult,
    ChallengeStatus, ChallengeType, ChallengeUpdate, Dispute, DisputeStatus, Game, MatchStats,
    MatchStatus, Notification, ProofStatus, TestUser, Tournament, TournamentMatch,
    TournamentParticipant, TournamentStatus, TournamentUpdate, TransactionReason, Wallet,
    WalletCredit, WalletTransaction, PLATFORM_ACCOUNT,
};
use puosu_types::{
    ChallengeId, DisputeId, GameId, LedgerError, Money, TournamentId, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    wallets: HashMap<UserId, Wallet>,
    transactions: Vec<WalletTransaction>,
    challenges: HashMap<ChallengeId, Challenge>,
    challenge_participants: Vec<ChallengeParticipant>,
    results: Vec<ChallengeResult>,
    tournaments: HashMap<TournamentId, Tournament>,
    tournament_participants: Vec<TournamentParticipant>,
    matches: Vec<TournamentMatch>,
    disputes: Vec<Dispute>,
    audits: Vec<AuditEntry>,
    notifications: Vec<Notification>,
    games: Vec<Game>,
    failing_credits: HashSet<(UserId, TransactionReason)>,
}

impl Inner {
    fn apply_credit(&mut self, credit: WalletCredit, now_ms: u64) -> StoreResult<Money> {
        if self
            .failing_credits
            .contains(&(credit.user_id, credit.reason))
        {
            return Err(LedgerError::Storage(format!(
                "injected failure for {} {}",
                credit.user_id, credit.reason
            )));
        }
        let wallet = self
            .wallets
            .get_mut(&credit.user_id)
            .ok_or(LedgerError::NotFound("wallet"))?;
        let next = wallet.balance + credit.amount;
        if next.is_negative() {
            return Err(LedgerError::InsufficientFunds {
                required: -credit.amount,
                available: wallet.balance,
            });
        }
        wallet.balance = next;
        self.transactions.push(WalletTransaction {
            id: Uuid::new_v4(),
            user_id: credit.user_id,
            amount: credit.amount,
            reason: credit.reason,
            challenge_id: credit.challenge_id,
            tournament_id: credit.tournament_id,
            requires_admin: credit.requires_admin,
            metadata: credit.metadata,
            created_at_ms: now_ms,
        });
        Ok(next)
    }
}

pub struct Memory {
    inner: Mutex<Inner>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    /// Empty store holding only the platform account.
    pub fn new() -> Self {
        let mut inner = Inner::default();
        inner.wallets.insert(
            PLATFORM_ACCOUNT,
            Wallet {
                user_id: PLATFORM_ACCOUNT,
                balance: Money::ZERO,
                is_test: false,
                vip: false,
            },
        );
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every `increment_wallet_balance` for `user_id` with `reason` fail.
    pub fn inject_credit_failure(&self, user_id: UserId, reason: TransactionReason) {
        self.lock().failing_credits.insert((user_id, reason));
    }

    pub fn clear_credit_failures(&self) {
        self.lock().failing_credits.clear();
    }

    pub fn balance(&self, user_id: UserId) -> Money {
        self.lock()
            .wallets
            .get(&user_id)
            .map(|w| w.balance)
            .unwrap_or(Money::ZERO)
    }

    /// Sum of every wallet, platform account included.
    pub fn total_balance(&self) -> Money {
        self.lock().wallets.values().map(|w| w.balance).sum()
    }

    pub fn audits(&self) -> Vec<AuditEntry> {
        self.lock().audits.clone()
    }

    pub fn disputes(&self) -> Vec<Dispute> {
        self.lock().disputes.clone()
    }
}

impl Datastore for Memory {
    async fn join_challenge_atomic(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        stake: Money,
        now_ms: u64,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let challenge = inner
            .challenges
            .get(&challenge_id)
            .ok_or(LedgerError::NotFound("challenge"))?;
        if challenge.status != ChallengeStatus::Open || challenge.settled {
            return Err(LedgerError::ChallengeNotOpen);
        }
        let max = challenge.max_participants as usize;
        let joined: Vec<_> = inner
            .challenge_participants
            .iter()
            .filter(|p| p.challenge_id == challenge_id)
            .collect();
        if joined.iter().any(|p| p.user_id == user_id) {
            return Err(LedgerError::AlreadyJoined);
        }
        if joined.len() >= max {
            return Err(LedgerError::ChallengeFull);
        }
        inner.apply_credit(
            WalletCredit::new(user_id, -stake, TransactionReason::ChallengeStake)
                .for_challenge(challenge_id),
            now_ms,
        )?;
        inner.challenge_participants.push(ChallengeParticipant {
            challenge_id,
            user_id,
            stake_paid: stake,
            joined_at_ms: now_ms,
        });
        if let Some(challenge) = inner.challenges.get_mut(&challenge_id) {
            challenge.total_pot += stake;
        }
        Ok(())
    }

    async fn join_tournament_atomic(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        now_ms: u64,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let tournament = inner
            .tournaments
            .get(&tournament_id)
            .ok_or(LedgerError::NotFound("tournament"))?;
        if tournament.status != TournamentStatus::RegistrationOpen
            || tournament.settled
            || now_ms >= tournament.registration_end_ms
        {
            return Err(LedgerError::RegistrationClosed);
        }
        if inner
            .tournament_participants
            .iter()
            .any(|p| p.tournament_id == tournament_id && p.user_id == user_id)
        {
            return Err(LedgerError::AlreadyJoined);
        }
        if tournament.current_participants >= tournament.max_participants {
            return Err(LedgerError::TournamentFull);
        }
        let fee = tournament.entry_fee;
        inner.apply_credit(
            WalletCredit::new(user_id, -fee, TransactionReason::TournamentEntry)
                .for_tournament(tournament_id),
            now_ms,
        )?;
        inner.tournament_participants.push(TournamentParticipant {
            tournament_id,
            user_id,
            entry_fee_paid: fee,
            registered_at_ms: now_ms,
            placement: None,
        });
        if let Some(tournament) = inner.tournaments.get_mut(&tournament_id) {
            tournament.current_participants += 1;
            tournament.prize_pool += fee;
        }
        Ok(())
    }

    async fn secure_settle_challenge(&self, challenge_id: ChallengeId) -> StoreResult<bool> {
        let mut inner = self.lock();
        let challenge = inner
            .challenges
            .get_mut(&challenge_id)
            .ok_or(LedgerError::NotFound("challenge"))?;
        if challenge.settled {
            return Ok(false);
        }
        challenge.settled = true;
        Ok(true)
    }

    async fn secure_settle_tournament(&self, tournament_id: TournamentId) -> StoreResult<bool> {
        let mut inner = self.lock();
        let tournament = inner
            .tournaments
            .get_mut(&tournament_id)
            .ok_or(LedgerError::NotFound("tournament"))?;
        if tournament.settled {
            return Ok(false);
        }
        tournament.settled = true;
        Ok(true)
    }

    async fn increment_wallet_balance(
        &self,
        credit: WalletCredit,
        now_ms: u64,
    ) -> StoreResult<Money> {
        self.lock().apply_credit(credit, now_ms)
    }

    async fn get_available_test_users(
        &self,
        min_balance: Money,
        max_users: usize,
    ) -> StoreResult<Vec<TestUser>> {
        let inner = self.lock();
        let mut users: Vec<TestUser> = inner
            .wallets
            .values()
            .filter(|w| w.is_test && w.balance >= min_balance)
            .map(|w| TestUser {
                user_id: w.user_id,
                wallet_balance: w.balance,
            })
            .collect();
        users.sort_by(|a, b| {
            b.wallet_balance
                .cmp(&a.wallet_balance)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        users.truncate(max_users);
        Ok(users)
    }

    async fn detect_suspicious_stats(
        &self,
        user_id: UserId,
        stats: MatchStats,
    ) -> StoreResult<bool> {
        let inner = self.lock();
        let history: Vec<MatchStats> = inner
            .results
            .iter()
            .filter(|r| r.user_id == user_id && r.status == ProofStatus::Verified)
            .map(|r| r.stats)
            .collect();
        Ok(anomaly::is_suspicious(&stats, &history))
    }

    async fn has_vip_access(&self, user_id: UserId) -> StoreResult<bool> {
        Ok(self.lock().wallets.get(&user_id).is_some_and(|w| w.vip))
    }

    async fn create_wallet(&self, wallet: Wallet) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.wallets.contains_key(&wallet.user_id) {
            return Err(LedgerError::Storage(format!(
                "wallet {} already exists",
                wallet.user_id
            )));
        }
        inner.wallets.insert(wallet.user_id, wallet);
        Ok(())
    }

    async fn wallet(&self, user_id: UserId) -> StoreResult<Option<Wallet>> {
        Ok(self.lock().wallets.get(&user_id).cloned())
    }

    async fn wallet_transactions(&self, user_id: UserId) -> StoreResult<Vec<WalletTransaction>> {
        Ok(self
            .lock()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn has_completed_transaction_since(
        &self,
        user_id: UserId,
        since_ms: u64,
    ) -> StoreResult<bool> {
        Ok(self.lock().transactions.iter().any(|t| {
            t.user_id == user_id && t.amount.is_positive() && t.created_at_ms >= since_ms
        }))
    }

    async fn insert_challenge(&self, challenge: Challenge) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.challenges.contains_key(&challenge.id) {
            return Err(LedgerError::Storage(format!(
                "challenge {} already exists",
                challenge.id
            )));
        }
        inner.challenges.insert(challenge.id, challenge);
        Ok(())
    }

    async fn challenge(&self, challenge_id: ChallengeId) -> StoreResult<Option<Challenge>> {
        Ok(self.lock().challenges.get(&challenge_id).cloned())
    }

    async fn challenges_with_status(&self, status: ChallengeStatus) -> StoreResult<Vec<Challenge>> {
        let inner = self.lock();
        let mut found: Vec<Challenge> = inner
            .challenges
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|c| (c.created_at_ms, c.id));
        Ok(found)
    }

    async fn challenges_created_since(&self, since_ms: u64) -> StoreResult<Vec<Challenge>> {
        let inner = self.lock();
        let mut found: Vec<Challenge> = inner
            .challenges
            .values()
            .filter(|c| c.created_at_ms >= since_ms)
            .cloned()
            .collect();
        found.sort_by_key(|c| (c.created_at_ms, c.id));
        Ok(found)
    }

    async fn transition_challenge(
        &self,
        challenge_id: ChallengeId,
        from: ChallengeStatus,
        to: ChallengeStatus,
        update: ChallengeUpdate,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        let challenge = inner
            .challenges
            .get_mut(&challenge_id)
            .ok_or(LedgerError::NotFound("challenge"))?;
        if challenge.status != from {
            return Ok(false);
        }
        challenge.status = to;
        if update.winner_id.is_some() {
            challenge.winner_id = update.winner_id;
        }
        if update.start_at_ms.is_some() {
            challenge.start_at_ms = update.start_at_ms;
        }
        if update.end_at_ms.is_some() {
            challenge.end_at_ms = update.end_at_ms;
        }
        Ok(true)
    }

    async fn challenge_participants(
        &self,
        challenge_id: ChallengeId,
    ) -> StoreResult<Vec<ChallengeParticipant>> {
        Ok(self
            .lock()
            .challenge_participants
            .iter()
            .filter(|p| p.challenge_id == challenge_id)
            .cloned()
            .collect())
    }

    async fn record_challenge_result(&self, result: ChallengeResult) -> StoreResult<()> {
        let mut inner = self.lock();
        if !inner.challenges.contains_key(&result.challenge_id) {
            return Err(LedgerError::NotFound("challenge"));
        }
        if inner
            .results
            .iter()
            .any(|r| r.challenge_id == result.challenge_id && r.user_id == result.user_id)
        {
            return Err(LedgerError::ResultAlreadyRecorded);
        }
        inner.results.push(result);
        Ok(())
    }

    async fn challenge_results(&self, challenge_id: ChallengeId) -> StoreResult<Vec<ChallengeResult>> {
        Ok(self
            .lock()
            .results
            .iter()
            .filter(|r| r.challenge_id == challenge_id)
            .cloned()
            .collect())
    }

    async fn set_result_status(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        status: ProofStatus,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        match inner
            .results
            .iter_mut()
            .find(|r| r.challenge_id == challenge_id && r.user_id == user_id)
        {
            Some(result) => {
                result.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_tournament(&self, tournament: Tournament) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.tournaments.contains_key(&tournament.id) {
            return Err(LedgerError::Storage(format!(
                "tournament {} already exists",
                tournament.id
            )));
        }
        inner.tournaments.insert(tournament.id, tournament);
        Ok(())
    }

    async fn tournament(&self, tournament_id: TournamentId) -> StoreResult<Option<Tournament>> {
        Ok(self.lock().tournaments.get(&tournament_id).cloned())
    }

    async fn tournaments_with_status(
        &self,
        status: TournamentStatus,
    ) -> StoreResult<Vec<Tournament>> {
        let inner = self.lock();
        let mut found: Vec<Tournament> = inner
            .tournaments
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|t| (t.created_at_ms, t.id));
        Ok(found)
    }

    async fn transition_tournament(
        &self,
        tournament_id: TournamentId,
        from: TournamentStatus,
        to: TournamentStatus,
        update: TournamentUpdate,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        let tournament = inner
            .tournaments
            .get_mut(&tournament_id)
            .ok_or(LedgerError::NotFound("tournament"))?;
        if tournament.status != from {
            return Ok(false);
        }
        tournament.status = to;
        if update.winner_id.is_some() {
            tournament.winner_id = update.winner_id;
        }
        if update.started_at_ms.is_some() {
            tournament.started_at_ms = update.started_at_ms;
        }
        if update.completed_at_ms.is_some() {
            tournament.completed_at_ms = update.completed_at_ms;
        }
        Ok(true)
    }

    async fn tournament_participants(
        &self,
        tournament_id: TournamentId,
    ) -> StoreResult<Vec<TournamentParticipant>> {
        Ok(self
            .lock()
            .tournament_participants
            .iter()
            .filter(|p| p.tournament_id == tournament_id)
            .cloned()
            .collect())
    }

    async fn set_tournament_placements(
        &self,
        tournament_id: TournamentId,
        placements: Vec<(UserId, u32)>,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        for (user_id, _) in &placements {
            if !inner
                .tournament_participants
                .iter()
                .any(|p| p.tournament_id == tournament_id && p.user_id == *user_id)
            {
                return Err(LedgerError::NotFound("tournament participant"));
            }
        }
        for (user_id, placement) in placements {
            if let Some(participant) = inner
                .tournament_participants
                .iter_mut()
                .find(|p| p.tournament_id == tournament_id && p.user_id == user_id)
            {
                participant.placement = Some(placement);
            }
        }
        Ok(())
    }

    async fn insert_matches(&self, matches: Vec<TournamentMatch>) -> StoreResult<()> {
        self.lock().matches.extend(matches);
        Ok(())
    }

    async fn tournament_matches(
        &self,
        tournament_id: TournamentId,
    ) -> StoreResult<Vec<TournamentMatch>> {
        let inner = self.lock();
        let mut found: Vec<TournamentMatch> = inner
            .matches
            .iter()
            .filter(|m| m.tournament_id == tournament_id)
            .cloned()
            .collect();
        found.sort_by_key(|m| (m.round, m.slot));
        Ok(found)
    }

    async fn cancel_open_matches(&self, tournament_id: TournamentId) -> StoreResult<u32> {
        let mut inner = self.lock();
        let mut cancelled = 0;
        for m in inner.matches.iter_mut().filter(|m| {
            m.tournament_id == tournament_id
                && matches!(m.status, MatchStatus::Pending | MatchStatus::InProgress)
        }) {
            m.status = MatchStatus::Cancelled;
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn insert_dispute(&self, dispute: Dispute) -> StoreResult<()> {
        self.lock().disputes.push(dispute);
        Ok(())
    }

    async fn disputes_with_status(&self, status: DisputeStatus) -> StoreResult<Vec<Dispute>> {
        Ok(self
            .lock()
            .disputes
            .iter()
            .filter(|d| d.status == status)
            .cloned()
            .collect())
    }

    async fn resolve_dispute(
        &self,
        dispute_id: DisputeId,
        status: DisputeStatus,
        resolution: String,
        now_ms: u64,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        let dispute = inner
            .disputes
            .iter_mut()
            .find(|d| d.id == dispute_id)
            .ok_or(LedgerError::NotFound("dispute"))?;
        if dispute.status != DisputeStatus::Pending {
            return Ok(false);
        }
        dispute.status = status;
        dispute.resolution = Some(resolution);
        dispute.resolved_at_ms = Some(now_ms);
        Ok(true)
    }

    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()> {
        self.lock().audits.push(entry);
        Ok(())
    }

    async fn latest_audit(
        &self,
        automation_type: AutomationType,
    ) -> StoreResult<Option<AuditEntry>> {
        Ok(self
            .lock()
            .audits
            .iter()
            .rev()
            .find(|e| e.automation_type == automation_type)
            .cloned())
    }

    async fn audits_since(&self, since_ms: u64) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .lock()
            .audits
            .iter()
            .filter(|e| e.timestamp_ms >= since_ms)
            .cloned()
            .collect())
    }

    async fn notify(&self, notification: Notification) -> StoreResult<()> {
        self.lock().notifications.push(notification);
        Ok(())
    }

    async fn notifications(&self, user_id: UserId) -> StoreResult<Vec<Notification>> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_game(&self, game: Game) -> StoreResult<()> {
        self.lock().games.push(game);
        Ok(())
    }

    async fn active_games(&self) -> StoreResult<Vec<Game>> {
        let inner = self.lock();
        let mut games: Vec<Game> = inner.games.iter().filter(|g| g.active).cloned().collect();
        games.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(games)
    }
}

/// Creates a funded wallet and returns its owner.
pub async fn funded_user<S: Datastore>(store: &S, balance: Money, is_test: bool) -> UserId {
    let user_id = Uuid::new_v4();
    store
        .create_wallet(Wallet {
            user_id,
            balance,
            is_test,
            vip: false,
        })
        .await
        .expect("create wallet");
    user_id
}

pub async fn funded_users<S: Datastore>(
    store: &S,
    count: usize,
    balance: Money,
    is_test: bool,
) -> Vec<UserId> {
    let mut users = Vec::with_capacity(count);
    for _ in 0..count {
        users.push(funded_user(store, balance, is_test).await);
    }
    users
}

pub async fn active_game<S: Datastore>(store: &S, name: &str) -> GameId {
    let id = Uuid::new_v4();
    store
        .insert_game(Game {
            id,
            name: name.to_string(),
            active: true,
        })
        .await
        .expect("insert game");
    id
}

/// Inserts an open challenge and joins `players` into it.
pub async fn joined_challenge<S: Datastore>(
    store: &S,
    challenge_type: ChallengeType,
    stake: Money,
    players: &[UserId],
    now_ms: u64,
) -> ChallengeId {
    let creator = players.first().copied().unwrap_or(PLATFORM_ACCOUNT);
    let challenge = Challenge::new(
        creator,
        Uuid::new_v4(),
        challenge_type,
        stake,
        players.len().max(2) as u32,
        now_ms,
    );
    let id = challenge.id;
    store.insert_challenge(challenge).await.expect("insert challenge");
    for user in players {
        store
            .join_challenge_atomic(id, *user, stake, now_ms)
            .await
            .expect("join challenge");
    }
    id
}

/// Records a verified result for each player in order, first player first.
pub async fn record_placements<S: Datastore>(
    store: &S,
    challenge_id: ChallengeId,
    ranked: &[UserId],
    now_ms: u64,
) {
    for (index, user_id) in ranked.iter().enumerate() {
        store
            .record_challenge_result(ChallengeResult {
                challenge_id,
                user_id: *user_id,
                placement: index as u32 + 1,
                stats: MatchStats {
                    score: 1_000 - index as i64 * 10,
                    kills: 5,
                    deaths: 5,
                    assists: 0,
                },
                proof_url: None,
                status: ProofStatus::Verified,
                submitted_at_ms: now_ms,
            })
            .await
            .expect("record result");
    }
}
