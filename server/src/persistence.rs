//! SQLite-backed [`Datastore`].
//!
//! A single connection sits behind a mutex and every call runs on the blocking pool. Primitives
//! that move money run inside an immediate transaction, so an error anywhere rolls the whole unit
//! back. Unique keys on the participant and result tables back the join-once and write-once rules.

use anyhow::Context;
use puosu_execution::anomaly;
use puosu_execution::{Datastore, StoreResult};
use puosu_types::wager::{
    AuditEntry, AutomationType, Challenge, ChallengeParticipant, ChallengeResult,
    ChallengeStatus, ChallengeUpdate, Dispute, DisputeStatus, Game, MatchStats, MatchStatus,
    Notification, ParseLabelError, ProofStatus, TestUser, Tournament, TournamentMatch,
    TournamentParticipant, TournamentStatus, TournamentUpdate, TransactionReason, Wallet,
    WalletCredit, WalletTransaction, PLATFORM_ACCOUNT,
};
use puosu_types::{ChallengeId, DisputeId, LedgerError, Money, TournamentId, UserId};
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Params, Row, Transaction,
    TransactionBehavior,
};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

const SCHEMA: &str = "
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;
    CREATE TABLE IF NOT EXISTS wallets (
        user_id TEXT PRIMARY KEY,
        balance_cents INTEGER NOT NULL,
        is_test INTEGER NOT NULL DEFAULT 0,
        vip INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS wallet_transactions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        amount_cents INTEGER NOT NULL,
        reason TEXT NOT NULL,
        challenge_id TEXT,
        tournament_id TEXT,
        requires_admin INTEGER NOT NULL DEFAULT 0,
        metadata TEXT NOT NULL DEFAULT 'null',
        created_at_ms INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS wallet_transactions_user
        ON wallet_transactions (user_id, created_at_ms);
    CREATE TABLE IF NOT EXISTS challenges (
        id TEXT PRIMARY KEY,
        creator_id TEXT NOT NULL,
        game_id TEXT NOT NULL,
        challenge_type TEXT NOT NULL,
        stake_cents INTEGER NOT NULL,
        max_participants INTEGER NOT NULL,
        status TEXT NOT NULL,
        total_pot_cents INTEGER NOT NULL DEFAULT 0,
        lobby_id TEXT NOT NULL,
        winner_id TEXT,
        settled INTEGER NOT NULL DEFAULT 0,
        is_simulation INTEGER NOT NULL DEFAULT 0,
        created_at_ms INTEGER NOT NULL,
        start_at_ms INTEGER,
        end_at_ms INTEGER
    );
    CREATE INDEX IF NOT EXISTS challenges_status ON challenges (status, created_at_ms);
    CREATE TABLE IF NOT EXISTS challenge_participants (
        challenge_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        stake_paid_cents INTEGER NOT NULL,
        joined_at_ms INTEGER NOT NULL,
        PRIMARY KEY (challenge_id, user_id)
    );
    CREATE TABLE IF NOT EXISTS challenge_results (
        challenge_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        placement INTEGER NOT NULL,
        score INTEGER NOT NULL,
        kills INTEGER NOT NULL,
        deaths INTEGER NOT NULL,
        assists INTEGER NOT NULL,
        proof_url TEXT,
        status TEXT NOT NULL,
        submitted_at_ms INTEGER NOT NULL,
        PRIMARY KEY (challenge_id, user_id)
    );
    CREATE TABLE IF NOT EXISTS tournaments (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        game_id TEXT NOT NULL,
        entry_fee_cents INTEGER NOT NULL,
        max_participants INTEGER NOT NULL,
        current_participants INTEGER NOT NULL DEFAULT 0,
        prize_pool_cents INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        registration_start_ms INTEGER NOT NULL,
        registration_end_ms INTEGER NOT NULL,
        tournament_start_ms INTEGER NOT NULL,
        started_at_ms INTEGER,
        completed_at_ms INTEGER,
        automation_enabled INTEGER NOT NULL DEFAULT 1,
        winner_id TEXT,
        settled INTEGER NOT NULL DEFAULT 0,
        created_at_ms INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS tournaments_status ON tournaments (status, created_at_ms);
    CREATE TABLE IF NOT EXISTS tournament_participants (
        tournament_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        entry_fee_paid_cents INTEGER NOT NULL,
        registered_at_ms INTEGER NOT NULL,
        placement INTEGER,
        PRIMARY KEY (tournament_id, user_id)
    );
    CREATE TABLE IF NOT EXISTS tournament_matches (
        id TEXT PRIMARY KEY,
        tournament_id TEXT NOT NULL,
        round INTEGER NOT NULL,
        slot INTEGER NOT NULL,
        player_a TEXT NOT NULL,
        player_b TEXT,
        status TEXT NOT NULL,
        winner_id TEXT
    );
    CREATE TABLE IF NOT EXISTS disputes (
        id TEXT PRIMARY KEY,
        raised_by TEXT NOT NULL,
        dispute_type TEXT NOT NULL,
        status TEXT NOT NULL,
        evidence_urls TEXT NOT NULL DEFAULT '[]',
        challenge_id TEXT,
        tournament_id TEXT,
        description TEXT NOT NULL,
        created_at_ms INTEGER NOT NULL,
        resolved_at_ms INTEGER,
        resolution TEXT
    );
    CREATE TABLE IF NOT EXISTS audit_log (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        automation_type TEXT NOT NULL,
        action_type TEXT NOT NULL,
        success INTEGER NOT NULL,
        action_data TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS audit_log_type ON audit_log (automation_type, seq);
    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        message TEXT NOT NULL,
        reference_id TEXT,
        created_at_ms INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS games (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1
    );
";

const CHALLENGE_COLUMNS: &str = "id, creator_id, game_id, challenge_type, stake_cents, \
    max_participants, status, total_pot_cents, lobby_id, winner_id, settled, is_simulation, \
    created_at_ms, start_at_ms, end_at_ms";

const TOURNAMENT_COLUMNS: &str = "id, name, game_id, entry_fee_cents, max_participants, \
    current_participants, prize_pool_cents, status, registration_start_ms, registration_end_ms, \
    tournament_start_ms, started_at_ms, completed_at_ms, automation_enabled, winner_id, settled, \
    created_at_ms";

const RESULT_COLUMNS: &str = "challenge_id, user_id, placement, score, kills, deaths, assists, \
    proof_url, status, submitted_at_ms";

const DISPUTE_COLUMNS: &str = "id, raised_by, dispute_type, status, evidence_urls, challenge_id, \
    tournament_id, description, created_at_ms, resolved_at_ms, resolution";

const AUDIT_COLUMNS: &str =
    "id, automation_type, action_type, success, action_data, timestamp_ms";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open datastore {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory datastore")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA).context("init datastore schema")?;
        conn.execute(
            "INSERT OR IGNORE INTO wallets (user_id, balance_cents) VALUES (?1, 0)",
            params![PLATFORM_ACCOUNT.to_string()],
        )
        .context("create platform account")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut conn)
        })
        .await
        .map_err(|err| LedgerError::Storage(format!("datastore task failed: {err}")))?
    }
}

fn storage(err: rusqlite::Error) -> LedgerError {
    LedgerError::Storage(err.to_string())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

fn immediate(conn: &mut Connection) -> StoreResult<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(storage)
}

fn ms(value: u64) -> i64 {
    value as i64
}

fn opt_ms(value: Option<u64>) -> Option<i64> {
    value.map(ms)
}

fn opt_id(value: Option<Uuid>) -> Option<String> {
    value.map(|id| id.to_string())
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|err| conversion(idx, err))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| Uuid::parse_str(&text).map_err(|err| conversion(idx, err)))
        .transpose()
}

fn label_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseLabelError>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|err| conversion(idx, err))
}

fn money_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Money> {
    row.get(idx).map(Money::from_cents)
}

fn ms_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    row.get::<_, i64>(idx).map(|value| value as u64)
}

fn opt_ms_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|value| value as u64))
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|err| conversion(idx, err))
}

fn wallet_row(row: &Row<'_>) -> rusqlite::Result<Wallet> {
    Ok(Wallet {
        user_id: uuid_at(row, 0)?,
        balance: money_at(row, 1)?,
        is_test: row.get(2)?,
        vip: row.get(3)?,
    })
}

fn transaction_row(row: &Row<'_>) -> rusqlite::Result<WalletTransaction> {
    Ok(WalletTransaction {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        amount: money_at(row, 2)?,
        reason: label_at(row, 3)?,
        challenge_id: opt_uuid_at(row, 4)?,
        tournament_id: opt_uuid_at(row, 5)?,
        requires_admin: row.get(6)?,
        metadata: json_at(row, 7)?,
        created_at_ms: ms_at(row, 8)?,
    })
}

fn challenge_row(row: &Row<'_>) -> rusqlite::Result<Challenge> {
    Ok(Challenge {
        id: uuid_at(row, 0)?,
        creator_id: uuid_at(row, 1)?,
        game_id: uuid_at(row, 2)?,
        challenge_type: label_at(row, 3)?,
        stake: money_at(row, 4)?,
        max_participants: row.get(5)?,
        status: label_at(row, 6)?,
        total_pot: money_at(row, 7)?,
        lobby_id: row.get(8)?,
        winner_id: opt_uuid_at(row, 9)?,
        settled: row.get(10)?,
        is_simulation: row.get(11)?,
        created_at_ms: ms_at(row, 12)?,
        start_at_ms: opt_ms_at(row, 13)?,
        end_at_ms: opt_ms_at(row, 14)?,
    })
}

fn participant_row(row: &Row<'_>) -> rusqlite::Result<ChallengeParticipant> {
    Ok(ChallengeParticipant {
        challenge_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        stake_paid: money_at(row, 2)?,
        joined_at_ms: ms_at(row, 3)?,
    })
}

fn result_row(row: &Row<'_>) -> rusqlite::Result<ChallengeResult> {
    Ok(ChallengeResult {
        challenge_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        placement: row.get(2)?,
        stats: MatchStats {
            score: row.get(3)?,
            kills: row.get(4)?,
            deaths: row.get(5)?,
            assists: row.get(6)?,
        },
        proof_url: row.get(7)?,
        status: label_at(row, 8)?,
        submitted_at_ms: ms_at(row, 9)?,
    })
}

fn tournament_row(row: &Row<'_>) -> rusqlite::Result<Tournament> {
    Ok(Tournament {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        game_id: uuid_at(row, 2)?,
        entry_fee: money_at(row, 3)?,
        max_participants: row.get(4)?,
        current_participants: row.get(5)?,
        prize_pool: money_at(row, 6)?,
        status: label_at(row, 7)?,
        registration_start_ms: ms_at(row, 8)?,
        registration_end_ms: ms_at(row, 9)?,
        tournament_start_ms: ms_at(row, 10)?,
        started_at_ms: opt_ms_at(row, 11)?,
        completed_at_ms: opt_ms_at(row, 12)?,
        automation_enabled: row.get(13)?,
        winner_id: opt_uuid_at(row, 14)?,
        settled: row.get(15)?,
        created_at_ms: ms_at(row, 16)?,
    })
}

fn registrant_row(row: &Row<'_>) -> rusqlite::Result<TournamentParticipant> {
    Ok(TournamentParticipant {
        tournament_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        entry_fee_paid: money_at(row, 2)?,
        registered_at_ms: ms_at(row, 3)?,
        placement: row.get(4)?,
    })
}

fn match_row(row: &Row<'_>) -> rusqlite::Result<TournamentMatch> {
    Ok(TournamentMatch {
        id: uuid_at(row, 0)?,
        tournament_id: uuid_at(row, 1)?,
        round: row.get(2)?,
        slot: row.get(3)?,
        player_a: uuid_at(row, 4)?,
        player_b: opt_uuid_at(row, 5)?,
        status: label_at(row, 6)?,
        winner_id: opt_uuid_at(row, 7)?,
    })
}

fn dispute_row(row: &Row<'_>) -> rusqlite::Result<Dispute> {
    Ok(Dispute {
        id: uuid_at(row, 0)?,
        raised_by: uuid_at(row, 1)?,
        dispute_type: label_at(row, 2)?,
        status: label_at(row, 3)?,
        evidence_urls: json_at(row, 4)?,
        challenge_id: opt_uuid_at(row, 5)?,
        tournament_id: opt_uuid_at(row, 6)?,
        description: row.get(7)?,
        created_at_ms: ms_at(row, 8)?,
        resolved_at_ms: opt_ms_at(row, 9)?,
        resolution: row.get(10)?,
    })
}

fn audit_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: uuid_at(row, 0)?,
        automation_type: label_at(row, 1)?,
        action_type: row.get(2)?,
        success: row.get(3)?,
        action_data: json_at(row, 4)?,
        timestamp_ms: ms_at(row, 5)?,
    })
}

fn notification_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        kind: row.get(2)?,
        message: row.get(3)?,
        reference_id: opt_uuid_at(row, 4)?,
        created_at_ms: ms_at(row, 5)?,
    })
}

fn game_row(row: &Row<'_>) -> rusqlite::Result<Game> {
    Ok(Game {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        active: row.get(2)?,
    })
}

fn collect<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> StoreResult<Vec<T>> {
    let mut stmt = conn.prepare_cached(sql).map_err(storage)?;
    let rows = stmt.query_map(params, map).map_err(storage)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage)
}

fn fetch_one<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> StoreResult<Option<T>> {
    conn.query_row(sql, params, map).optional().map_err(storage)
}

fn exists(conn: &Connection, sql: &str, id: &str) -> StoreResult<bool> {
    conn.query_row(sql, params![id], |row| row.get(0))
        .map_err(storage)
}

/// Balance change plus its transaction line. Callers own the surrounding transaction.
fn apply_credit(conn: &Connection, credit: &WalletCredit, now_ms: u64) -> StoreResult<Money> {
    let user_id = credit.user_id.to_string();
    let balance = conn
        .query_row(
            "SELECT balance_cents FROM wallets WHERE user_id = ?1",
            params![user_id],
            |row| money_at(row, 0),
        )
        .optional()
        .map_err(storage)?
        .ok_or(LedgerError::NotFound("wallet"))?;
    let next = balance + credit.amount;
    if next.is_negative() {
        return Err(LedgerError::InsufficientFunds {
            required: -credit.amount,
            available: balance,
        });
    }
    conn.execute(
        "UPDATE wallets SET balance_cents = ?2 WHERE user_id = ?1",
        params![user_id, next.cents()],
    )
    .map_err(storage)?;
    conn.execute(
        "INSERT INTO wallet_transactions
            (id, user_id, amount_cents, reason, challenge_id, tournament_id, requires_admin,
             metadata, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            Uuid::new_v4().to_string(),
            user_id,
            credit.amount.cents(),
            credit.reason.as_str(),
            opt_id(credit.challenge_id),
            opt_id(credit.tournament_id),
            credit.requires_admin,
            credit.metadata.to_string(),
            ms(now_ms),
        ],
    )
    .map_err(storage)?;
    Ok(next)
}

impl Datastore for SqliteStore {
    async fn join_challenge_atomic(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        stake: Money,
        now_ms: u64,
    ) -> StoreResult<()> {
        self.run(move |conn| {
            let tx = immediate(conn)?;
            let cid = challenge_id.to_string();
            let uid = user_id.to_string();
            let (status, max, settled): (String, u32, bool) = tx
                .query_row(
                    "SELECT status, max_participants, settled FROM challenges WHERE id = ?1",
                    params![cid],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(storage)?
                .ok_or(LedgerError::NotFound("challenge"))?;
            if status != ChallengeStatus::Open.as_str() || settled {
                return Err(LedgerError::ChallengeNotOpen);
            }
            let (joined, already): (u32, bool) = tx
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(user_id = ?2), 0) > 0
                     FROM challenge_participants WHERE challenge_id = ?1",
                    params![cid, uid],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(storage)?;
            if already {
                return Err(LedgerError::AlreadyJoined);
            }
            if joined >= max {
                return Err(LedgerError::ChallengeFull);
            }
            apply_credit(
                &tx,
                &WalletCredit::new(user_id, -stake, TransactionReason::ChallengeStake)
                    .for_challenge(challenge_id),
                now_ms,
            )?;
            tx.execute(
                "INSERT INTO challenge_participants
                    (challenge_id, user_id, stake_paid_cents, joined_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![cid, uid, stake.cents(), ms(now_ms)],
            )
            .map_err(|err| {
                if is_constraint_violation(&err) {
                    LedgerError::AlreadyJoined
                } else {
                    storage(err)
                }
            })?;
            tx.execute(
                "UPDATE challenges SET total_pot_cents = total_pot_cents + ?2 WHERE id = ?1",
                params![cid, stake.cents()],
            )
            .map_err(storage)?;
            tx.commit().map_err(storage)
        })
        .await
    }

    async fn join_tournament_atomic(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        now_ms: u64,
    ) -> StoreResult<()> {
        self.run(move |conn| {
            let tx = immediate(conn)?;
            let tid = tournament_id.to_string();
            let uid = user_id.to_string();
            let (status, registration_end_ms, max, current, fee, settled): (
                String,
                u64,
                u32,
                u32,
                Money,
                bool,
            ) = tx
                .query_row(
                    "SELECT status, registration_end_ms, max_participants, current_participants,
                            entry_fee_cents, settled
                     FROM tournaments WHERE id = ?1",
                    params![tid],
                    |row| {
                        Ok((
                            row.get(0)?,
                            ms_at(row, 1)?,
                            row.get(2)?,
                            row.get(3)?,
                            money_at(row, 4)?,
                            row.get(5)?,
                        ))
                    },
                )
                .optional()
                .map_err(storage)?
                .ok_or(LedgerError::NotFound("tournament"))?;
            if status != TournamentStatus::RegistrationOpen.as_str()
                || settled
                || now_ms >= registration_end_ms
            {
                return Err(LedgerError::RegistrationClosed);
            }
            let already: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM tournament_participants
                                   WHERE tournament_id = ?1 AND user_id = ?2)",
                    params![tid, uid],
                    |row| row.get(0),
                )
                .map_err(storage)?;
            if already {
                return Err(LedgerError::AlreadyJoined);
            }
            if current >= max {
                return Err(LedgerError::TournamentFull);
            }
            apply_credit(
                &tx,
                &WalletCredit::new(user_id, -fee, TransactionReason::TournamentEntry)
                    .for_tournament(tournament_id),
                now_ms,
            )?;
            tx.execute(
                "INSERT INTO tournament_participants
                    (tournament_id, user_id, entry_fee_paid_cents, registered_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![tid, uid, fee.cents(), ms(now_ms)],
            )
            .map_err(|err| {
                if is_constraint_violation(&err) {
                    LedgerError::AlreadyJoined
                } else {
                    storage(err)
                }
            })?;
            tx.execute(
                "UPDATE tournaments
                 SET current_participants = current_participants + 1,
                     prize_pool_cents = prize_pool_cents + ?2
                 WHERE id = ?1",
                params![tid, fee.cents()],
            )
            .map_err(storage)?;
            tx.commit().map_err(storage)
        })
        .await
    }

    async fn secure_settle_challenge(&self, challenge_id: ChallengeId) -> StoreResult<bool> {
        self.run(move |conn| {
            let id = challenge_id.to_string();
            let changed = conn
                .execute(
                    "UPDATE challenges SET settled = 1 WHERE id = ?1 AND settled = 0",
                    params![id],
                )
                .map_err(storage)?;
            if changed == 1 {
                return Ok(true);
            }
            if !exists(conn, "SELECT EXISTS(SELECT 1 FROM challenges WHERE id = ?1)", &id)? {
                return Err(LedgerError::NotFound("challenge"));
            }
            Ok(false)
        })
        .await
    }

    async fn secure_settle_tournament(&self, tournament_id: TournamentId) -> StoreResult<bool> {
        self.run(move |conn| {
            let id = tournament_id.to_string();
            let changed = conn
                .execute(
                    "UPDATE tournaments SET settled = 1 WHERE id = ?1 AND settled = 0",
                    params![id],
                )
                .map_err(storage)?;
            if changed == 1 {
                return Ok(true);
            }
            if !exists(conn, "SELECT EXISTS(SELECT 1 FROM tournaments WHERE id = ?1)", &id)? {
                return Err(LedgerError::NotFound("tournament"));
            }
            Ok(false)
        })
        .await
    }

    async fn increment_wallet_balance(
        &self,
        credit: WalletCredit,
        now_ms: u64,
    ) -> StoreResult<Money> {
        self.run(move |conn| {
            let tx = immediate(conn)?;
            let balance = apply_credit(&tx, &credit, now_ms)?;
            tx.commit().map_err(storage)?;
            Ok(balance)
        })
        .await
    }

    async fn get_available_test_users(
        &self,
        min_balance: Money,
        max_users: usize,
    ) -> StoreResult<Vec<TestUser>> {
        self.run(move |conn| {
            collect(
                conn,
                "SELECT user_id, balance_cents FROM wallets
                 WHERE is_test = 1 AND balance_cents >= ?1
                 ORDER BY balance_cents DESC, user_id ASC
                 LIMIT ?2",
                params![min_balance.cents(), max_users as i64],
                |row| {
                    Ok(TestUser {
                        user_id: uuid_at(row, 0)?,
                        wallet_balance: money_at(row, 1)?,
                    })
                },
            )
        })
        .await
    }

    async fn detect_suspicious_stats(
        &self,
        user_id: UserId,
        stats: MatchStats,
    ) -> StoreResult<bool> {
        self.run(move |conn| {
            let history = collect(
                conn,
                "SELECT score, kills, deaths, assists FROM challenge_results
                 WHERE user_id = ?1 AND status = ?2
                 ORDER BY submitted_at_ms",
                params![user_id.to_string(), ProofStatus::Verified.as_str()],
                |row| {
                    Ok(MatchStats {
                        score: row.get(0)?,
                        kills: row.get(1)?,
                        deaths: row.get(2)?,
                        assists: row.get(3)?,
                    })
                },
            )?;
            Ok(anomaly::is_suspicious(&stats, &history))
        })
        .await
    }

    async fn has_vip_access(&self, user_id: UserId) -> StoreResult<bool> {
        self.run(move |conn| {
            Ok(fetch_one(
                conn,
                "SELECT vip FROM wallets WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| row.get::<_, bool>(0),
            )?
            .unwrap_or(false))
        })
        .await
    }

    async fn create_wallet(&self, wallet: Wallet) -> StoreResult<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO wallets (user_id, balance_cents, is_test, vip) VALUES (?1, ?2, ?3, ?4)",
                params![
                    wallet.user_id.to_string(),
                    wallet.balance.cents(),
                    wallet.is_test,
                    wallet.vip
                ],
            )
            .map_err(|err| {
                if is_constraint_violation(&err) {
                    LedgerError::Storage(format!("wallet {} already exists", wallet.user_id))
                } else {
                    storage(err)
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn wallet(&self, user_id: UserId) -> StoreResult<Option<Wallet>> {
        self.run(move |conn| {
            fetch_one(
                conn,
                "SELECT user_id, balance_cents, is_test, vip FROM wallets WHERE user_id = ?1",
                params![user_id.to_string()],
                wallet_row,
            )
        })
        .await
    }

    async fn wallet_transactions(&self, user_id: UserId) -> StoreResult<Vec<WalletTransaction>> {
        self.run(move |conn| {
            collect(
                conn,
                "SELECT id, user_id, amount_cents, reason, challenge_id, tournament_id,
                        requires_admin, metadata, created_at_ms
                 FROM wallet_transactions WHERE user_id = ?1
                 ORDER BY rowid",
                params![user_id.to_string()],
                transaction_row,
            )
        })
        .await
    }

    async fn has_completed_transaction_since(
        &self,
        user_id: UserId,
        since_ms: u64,
    ) -> StoreResult<bool> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM wallet_transactions
                               WHERE user_id = ?1 AND amount_cents > 0 AND created_at_ms >= ?2)",
                params![user_id.to_string(), ms(since_ms)],
                |row| row.get(0),
            )
            .map_err(storage)
        })
        .await
    }

    async fn insert_challenge(&self, challenge: Challenge) -> StoreResult<()> {
        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO challenges ({CHALLENGE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    challenge.id.to_string(),
                    challenge.creator_id.to_string(),
                    challenge.game_id.to_string(),
                    challenge.challenge_type.as_str(),
                    challenge.stake.cents(),
                    challenge.max_participants,
                    challenge.status.as_str(),
                    challenge.total_pot.cents(),
                    challenge.lobby_id,
                    opt_id(challenge.winner_id),
                    challenge.settled,
                    challenge.is_simulation,
                    ms(challenge.created_at_ms),
                    opt_ms(challenge.start_at_ms),
                    opt_ms(challenge.end_at_ms),
                ],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn challenge(&self, challenge_id: ChallengeId) -> StoreResult<Option<Challenge>> {
        self.run(move |conn| {
            fetch_one(
                conn,
                &format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = ?1"),
                params![challenge_id.to_string()],
                challenge_row,
            )
        })
        .await
    }

    async fn challenges_with_status(&self, status: ChallengeStatus) -> StoreResult<Vec<Challenge>> {
        self.run(move |conn| {
            collect(
                conn,
                &format!(
                    "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE status = ?1
                     ORDER BY created_at_ms, id"
                ),
                params![status.as_str()],
                challenge_row,
            )
        })
        .await
    }

    async fn challenges_created_since(&self, since_ms: u64) -> StoreResult<Vec<Challenge>> {
        self.run(move |conn| {
            collect(
                conn,
                &format!(
                    "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE created_at_ms >= ?1
                     ORDER BY created_at_ms, id"
                ),
                params![ms(since_ms)],
                challenge_row,
            )
        })
        .await
    }

    async fn transition_challenge(
        &self,
        challenge_id: ChallengeId,
        from: ChallengeStatus,
        to: ChallengeStatus,
        update: ChallengeUpdate,
    ) -> StoreResult<bool> {
        self.run(move |conn| {
            let id = challenge_id.to_string();
            let changed = conn
                .execute(
                    "UPDATE challenges
                     SET status = ?3,
                         winner_id = COALESCE(?4, winner_id),
                         start_at_ms = COALESCE(?5, start_at_ms),
                         end_at_ms = COALESCE(?6, end_at_ms)
                     WHERE id = ?1 AND status = ?2",
                    params![
                        id,
                        from.as_str(),
                        to.as_str(),
                        opt_id(update.winner_id),
                        opt_ms(update.start_at_ms),
                        opt_ms(update.end_at_ms),
                    ],
                )
                .map_err(storage)?;
            if changed == 0
                && !exists(conn, "SELECT EXISTS(SELECT 1 FROM challenges WHERE id = ?1)", &id)?
            {
                return Err(LedgerError::NotFound("challenge"));
            }
            Ok(changed == 1)
        })
        .await
    }

    async fn challenge_participants(
        &self,
        challenge_id: ChallengeId,
    ) -> StoreResult<Vec<ChallengeParticipant>> {
        self.run(move |conn| {
            collect(
                conn,
                "SELECT challenge_id, user_id, stake_paid_cents, joined_at_ms
                 FROM challenge_participants WHERE challenge_id = ?1
                 ORDER BY joined_at_ms, rowid",
                params![challenge_id.to_string()],
                participant_row,
            )
        })
        .await
    }

    async fn record_challenge_result(&self, result: ChallengeResult) -> StoreResult<()> {
        self.run(move |conn| {
            let cid = result.challenge_id.to_string();
            if !exists(conn, "SELECT EXISTS(SELECT 1 FROM challenges WHERE id = ?1)", &cid)? {
                return Err(LedgerError::NotFound("challenge"));
            }
            conn.execute(
                &format!(
                    "INSERT INTO challenge_results ({RESULT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    cid,
                    result.user_id.to_string(),
                    result.placement,
                    result.stats.score,
                    result.stats.kills,
                    result.stats.deaths,
                    result.stats.assists,
                    result.proof_url,
                    result.status.as_str(),
                    ms(result.submitted_at_ms),
                ],
            )
            .map_err(|err| {
                if is_constraint_violation(&err) {
                    LedgerError::ResultAlreadyRecorded
                } else {
                    storage(err)
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn challenge_results(&self, challenge_id: ChallengeId) -> StoreResult<Vec<ChallengeResult>> {
        self.run(move |conn| {
            collect(
                conn,
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM challenge_results WHERE challenge_id = ?1
                     ORDER BY rowid"
                ),
                params![challenge_id.to_string()],
                result_row,
            )
        })
        .await
    }

    async fn set_result_status(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        status: ProofStatus,
    ) -> StoreResult<bool> {
        self.run(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE challenge_results SET status = ?3
                     WHERE challenge_id = ?1 AND user_id = ?2",
                    params![challenge_id.to_string(), user_id.to_string(), status.as_str()],
                )
                .map_err(storage)?;
            Ok(changed == 1)
        })
        .await
    }

    async fn insert_tournament(&self, tournament: Tournament) -> StoreResult<()> {
        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO tournaments ({TOURNAMENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                             ?16, ?17)"
                ),
                params![
                    tournament.id.to_string(),
                    tournament.name,
                    tournament.game_id.to_string(),
                    tournament.entry_fee.cents(),
                    tournament.max_participants,
                    tournament.current_participants,
                    tournament.prize_pool.cents(),
                    tournament.status.as_str(),
                    ms(tournament.registration_start_ms),
                    ms(tournament.registration_end_ms),
                    ms(tournament.tournament_start_ms),
                    opt_ms(tournament.started_at_ms),
                    opt_ms(tournament.completed_at_ms),
                    tournament.automation_enabled,
                    opt_id(tournament.winner_id),
                    tournament.settled,
                    ms(tournament.created_at_ms),
                ],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn tournament(&self, tournament_id: TournamentId) -> StoreResult<Option<Tournament>> {
        self.run(move |conn| {
            fetch_one(
                conn,
                &format!("SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE id = ?1"),
                params![tournament_id.to_string()],
                tournament_row,
            )
        })
        .await
    }

    async fn tournaments_with_status(
        &self,
        status: TournamentStatus,
    ) -> StoreResult<Vec<Tournament>> {
        self.run(move |conn| {
            collect(
                conn,
                &format!(
                    "SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE status = ?1
                     ORDER BY created_at_ms, id"
                ),
                params![status.as_str()],
                tournament_row,
            )
        })
        .await
    }

    async fn transition_tournament(
        &self,
        tournament_id: TournamentId,
        from: TournamentStatus,
        to: TournamentStatus,
        update: TournamentUpdate,
    ) -> StoreResult<bool> {
        self.run(move |conn| {
            let id = tournament_id.to_string();
            let changed = conn
                .execute(
                    "UPDATE tournaments
                     SET status = ?3,
                         winner_id = COALESCE(?4, winner_id),
                         started_at_ms = COALESCE(?5, started_at_ms),
                         completed_at_ms = COALESCE(?6, completed_at_ms)
                     WHERE id = ?1 AND status = ?2",
                    params![
                        id,
                        from.as_str(),
                        to.as_str(),
                        opt_id(update.winner_id),
                        opt_ms(update.started_at_ms),
                        opt_ms(update.completed_at_ms),
                    ],
                )
                .map_err(storage)?;
            if changed == 0
                && !exists(conn, "SELECT EXISTS(SELECT 1 FROM tournaments WHERE id = ?1)", &id)?
            {
                return Err(LedgerError::NotFound("tournament"));
            }
            Ok(changed == 1)
        })
        .await
    }

    async fn tournament_participants(
        &self,
        tournament_id: TournamentId,
    ) -> StoreResult<Vec<TournamentParticipant>> {
        self.run(move |conn| {
            collect(
                conn,
                "SELECT tournament_id, user_id, entry_fee_paid_cents, registered_at_ms, placement
                 FROM tournament_participants WHERE tournament_id = ?1
                 ORDER BY registered_at_ms, rowid",
                params![tournament_id.to_string()],
                registrant_row,
            )
        })
        .await
    }

    async fn set_tournament_placements(
        &self,
        tournament_id: TournamentId,
        placements: Vec<(UserId, u32)>,
    ) -> StoreResult<()> {
        self.run(move |conn| {
            let tx = immediate(conn)?;
            let tid = tournament_id.to_string();
            for (user_id, placement) in placements {
                let changed = tx
                    .execute(
                        "UPDATE tournament_participants SET placement = ?3
                         WHERE tournament_id = ?1 AND user_id = ?2",
                        params![tid, user_id.to_string(), placement],
                    )
                    .map_err(storage)?;
                if changed == 0 {
                    return Err(LedgerError::NotFound("tournament participant"));
                }
            }
            tx.commit().map_err(storage)
        })
        .await
    }

    async fn insert_matches(&self, matches: Vec<TournamentMatch>) -> StoreResult<()> {
        self.run(move |conn| {
            let tx = immediate(conn)?;
            for m in matches {
                tx.execute(
                    "INSERT INTO tournament_matches
                        (id, tournament_id, round, slot, player_a, player_b, status, winner_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        m.id.to_string(),
                        m.tournament_id.to_string(),
                        m.round,
                        m.slot,
                        m.player_a.to_string(),
                        opt_id(m.player_b),
                        m.status.as_str(),
                        opt_id(m.winner_id),
                    ],
                )
                .map_err(storage)?;
            }
            tx.commit().map_err(storage)
        })
        .await
    }

    async fn tournament_matches(
        &self,
        tournament_id: TournamentId,
    ) -> StoreResult<Vec<TournamentMatch>> {
        self.run(move |conn| {
            collect(
                conn,
                "SELECT id, tournament_id, round, slot, player_a, player_b, status, winner_id
                 FROM tournament_matches WHERE tournament_id = ?1
                 ORDER BY round, slot",
                params![tournament_id.to_string()],
                match_row,
            )
        })
        .await
    }

    async fn cancel_open_matches(&self, tournament_id: TournamentId) -> StoreResult<u32> {
        self.run(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tournament_matches SET status = ?2
                     WHERE tournament_id = ?1 AND status IN (?3, ?4)",
                    params![
                        tournament_id.to_string(),
                        MatchStatus::Cancelled.as_str(),
                        MatchStatus::Pending.as_str(),
                        MatchStatus::InProgress.as_str(),
                    ],
                )
                .map_err(storage)?;
            Ok(changed as u32)
        })
        .await
    }

    async fn insert_dispute(&self, dispute: Dispute) -> StoreResult<()> {
        self.run(move |conn| {
            let evidence = serde_json::to_string(&dispute.evidence_urls)
                .map_err(|err| LedgerError::Storage(err.to_string()))?;
            conn.execute(
                &format!(
                    "INSERT INTO disputes ({DISPUTE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    dispute.id.to_string(),
                    dispute.raised_by.to_string(),
                    dispute.dispute_type.as_str(),
                    dispute.status.as_str(),
                    evidence,
                    opt_id(dispute.challenge_id),
                    opt_id(dispute.tournament_id),
                    dispute.description,
                    ms(dispute.created_at_ms),
                    opt_ms(dispute.resolved_at_ms),
                    dispute.resolution,
                ],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn disputes_with_status(&self, status: DisputeStatus) -> StoreResult<Vec<Dispute>> {
        self.run(move |conn| {
            collect(
                conn,
                &format!(
                    "SELECT {DISPUTE_COLUMNS} FROM disputes WHERE status = ?1
                     ORDER BY created_at_ms, id"
                ),
                params![status.as_str()],
                dispute_row,
            )
        })
        .await
    }

    async fn resolve_dispute(
        &self,
        dispute_id: DisputeId,
        status: DisputeStatus,
        resolution: String,
        now_ms: u64,
    ) -> StoreResult<bool> {
        self.run(move |conn| {
            let id = dispute_id.to_string();
            let changed = conn
                .execute(
                    "UPDATE disputes SET status = ?2, resolution = ?3, resolved_at_ms = ?4
                     WHERE id = ?1 AND status = ?5",
                    params![
                        id,
                        status.as_str(),
                        resolution,
                        ms(now_ms),
                        DisputeStatus::Pending.as_str(),
                    ],
                )
                .map_err(storage)?;
            if changed == 0
                && !exists(conn, "SELECT EXISTS(SELECT 1 FROM disputes WHERE id = ?1)", &id)?
            {
                return Err(LedgerError::NotFound("dispute"));
            }
            Ok(changed == 1)
        })
        .await
    }

    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()> {
        self.run(move |conn| {
            conn.execute(
                &format!("INSERT INTO audit_log ({AUDIT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    entry.id.to_string(),
                    entry.automation_type.as_str(),
                    entry.action_type,
                    entry.success,
                    entry.action_data.to_string(),
                    ms(entry.timestamp_ms),
                ],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn latest_audit(
        &self,
        automation_type: AutomationType,
    ) -> StoreResult<Option<AuditEntry>> {
        self.run(move |conn| {
            fetch_one(
                conn,
                &format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE automation_type = ?1
                     ORDER BY seq DESC LIMIT 1"
                ),
                params![automation_type.as_str()],
                audit_row,
            )
        })
        .await
    }

    async fn audits_since(&self, since_ms: u64) -> StoreResult<Vec<AuditEntry>> {
        self.run(move |conn| {
            collect(
                conn,
                &format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE timestamp_ms >= ?1 ORDER BY seq"
                ),
                params![ms(since_ms)],
                audit_row,
            )
        })
        .await
    }

    async fn notify(&self, notification: Notification) -> StoreResult<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, kind, message, reference_id, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    notification.id.to_string(),
                    notification.user_id.to_string(),
                    notification.kind,
                    notification.message,
                    opt_id(notification.reference_id),
                    ms(notification.created_at_ms),
                ],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn notifications(&self, user_id: UserId) -> StoreResult<Vec<Notification>> {
        self.run(move |conn| {
            collect(
                conn,
                "SELECT id, user_id, kind, message, reference_id, created_at_ms
                 FROM notifications WHERE user_id = ?1 ORDER BY rowid",
                params![user_id.to_string()],
                notification_row,
            )
        })
        .await
    }

    async fn insert_game(&self, game: Game) -> StoreResult<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO games (id, name, active) VALUES (?1, ?2, ?3)",
                params![game.id.to_string(), game.name, game.active],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn active_games(&self) -> StoreResult<Vec<Game>> {
        self.run(move |conn| {
            collect(
                conn,
                "SELECT id, name, active FROM games WHERE active = 1 ORDER BY name",
                [],
                game_row,
            )
        })
        .await
    }
}
