//! Fee and split arithmetic.
//!
//! Everything here is pure. A [`PayoutPlan`] always satisfies
//! `sum(lines) + fee == gross` to the cent: shares are floored, and whatever the floor and any
//! unclaimed places leave over goes to first place.

use crate::error::{ExecutionError, ExecutionResult};
use puosu_types::wager::{
    ChallengeResult, ChallengeType, BPS_DENOMINATOR, TOP3_SPLIT_BPS, TOURNAMENT_LARGE_FIELD,
    TOURNAMENT_LARGE_SPLIT_BPS, TOURNAMENT_MEDIUM_FIELD, TOURNAMENT_MEDIUM_SPLIT_BPS,
    WINNER_TAKE_ALL_SPLIT_BPS,
};
use puosu_types::{Money, UserId};

/// Split of the net pot for a challenge, first place first.
pub fn challenge_split(challenge_type: ChallengeType) -> &'static [u32] {
    match challenge_type {
        ChallengeType::OneVsOne => WINNER_TAKE_ALL_SPLIT_BPS,
        ChallengeType::Top3 => TOP3_SPLIT_BPS,
    }
}

/// Split of the net prize pool for a tournament with `field` participants.
pub fn tournament_split(field: usize) -> &'static [u32] {
    if field >= TOURNAMENT_LARGE_FIELD {
        TOURNAMENT_LARGE_SPLIT_BPS
    } else if field >= TOURNAMENT_MEDIUM_FIELD {
        TOURNAMENT_MEDIUM_SPLIT_BPS
    } else {
        WINNER_TAKE_ALL_SPLIT_BPS
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedLine {
    pub user_id: UserId,
    /// 1-based.
    pub placement: u32,
    pub amount: Money,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayoutPlan {
    pub gross: Money,
    pub fee: Money,
    pub fee_bps: u32,
    pub lines: Vec<PlannedLine>,
}

impl PayoutPlan {
    pub fn net(&self) -> Money {
        self.gross - self.fee
    }

    pub fn winner(&self) -> Option<UserId> {
        self.lines.first().map(|line| line.user_id)
    }

    pub fn distributed(&self) -> Money {
        self.lines.iter().map(|line| line.amount).sum::<Money>() + self.fee
    }
}

/// Computes the payout lines for `ranked` (best first) over a `gross` pot.
pub fn plan_payout(
    gross: Money,
    fee_bps: u32,
    split: &[u32],
    ranked: &[UserId],
) -> ExecutionResult<PayoutPlan> {
    if fee_bps > BPS_DENOMINATOR {
        return Err(ExecutionError::InvalidRequest(format!(
            "fee rate {fee_bps} bps exceeds 100%"
        )));
    }
    if gross.is_negative() {
        return Err(ExecutionError::InvalidRequest(format!(
            "negative pot {gross}"
        )));
    }
    if ranked.is_empty() || split.is_empty() {
        return Err(ExecutionError::NoParticipants);
    }

    let fee = gross.fee_at(fee_bps);
    let net = gross - fee;
    let places = split.len().min(ranked.len());

    let mut lines = Vec::with_capacity(places);
    let mut lower = Money::ZERO;
    for (index, bps) in split.iter().enumerate().take(places).skip(1) {
        let amount = net.share_at(*bps);
        lower += amount;
        lines.push(PlannedLine {
            user_id: ranked[index],
            placement: index as u32 + 1,
            amount,
        });
    }
    lines.insert(
        0,
        PlannedLine {
            user_id: ranked[0],
            placement: 1,
            amount: net - lower,
        },
    );

    Ok(PayoutPlan {
        gross,
        fee,
        fee_bps,
        lines,
    })
}

/// Orders results best first: placement, then higher score, then user id.
pub fn rank_results(results: &[ChallengeResult]) -> Vec<UserId> {
    let mut ordered: Vec<&ChallengeResult> = results.iter().collect();
    ordered.sort_by(|a, b| {
        a.placement
            .cmp(&b.placement)
            .then_with(|| b.stats.score.cmp(&a.stats.score))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    ordered.into_iter().map(|result| result.user_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use puosu_types::wager::{MatchStats, ProofStatus, STANDARD_FEE_BPS};
    use uuid::Uuid;

    fn users(n: usize) -> Vec<UserId> {
        (0..n).map(|i| Uuid::from_u128(i as u128 + 1)).collect()
    }

    #[test]
    fn test_top3_forty_dollar_pot() {
        let ranked = users(8);
        let plan = plan_payout(
            Money::from_units(40),
            STANDARD_FEE_BPS,
            challenge_split(ChallengeType::Top3),
            &ranked,
        )
        .unwrap();

        assert_eq!(plan.fee, Money::from_units(4));
        let amounts: Vec<i64> = plan.lines.iter().map(|l| l.amount.cents()).collect();
        assert_eq!(amounts, vec![2160, 1080, 360]);
        assert_eq!(plan.winner(), Some(ranked[0]));
        assert_eq!(plan.distributed(), plan.gross);
    }

    #[test]
    fn test_one_vs_one_takes_net() {
        let ranked = users(2);
        let plan = plan_payout(
            Money::from_units(20),
            STANDARD_FEE_BPS,
            challenge_split(ChallengeType::OneVsOne),
            &ranked,
        )
        .unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].amount, Money::from_units(18));
        assert_eq!(plan.fee, Money::from_units(2));
    }

    #[test]
    fn test_unclaimed_places_go_to_first() {
        let ranked = users(2);
        let plan = plan_payout(Money::from_units(10), 0, TOP3_SPLIT_BPS, &ranked).unwrap();
        assert_eq!(plan.lines.len(), 2);
        assert_eq!(plan.lines[0].amount, Money::from_units(7));
        assert_eq!(plan.lines[1].amount, Money::from_units(3));
    }

    #[test]
    fn test_remainder_cents_go_to_first() {
        let ranked = users(3);
        let plan = plan_payout(Money::from_cents(1001), 0, TOP3_SPLIT_BPS, &ranked).unwrap();
        // 1001 * 0.3 = 300.3 -> 300, 1001 * 0.1 = 100.1 -> 100
        let amounts: Vec<i64> = plan.lines.iter().map(|l| l.amount.cents()).collect();
        assert_eq!(amounts, vec![601, 300, 100]);
    }

    #[test]
    fn test_tournament_split_by_field() {
        assert_eq!(tournament_split(2), WINNER_TAKE_ALL_SPLIT_BPS);
        assert_eq!(tournament_split(3), WINNER_TAKE_ALL_SPLIT_BPS);
        assert_eq!(tournament_split(4), TOURNAMENT_MEDIUM_SPLIT_BPS);
        assert_eq!(tournament_split(7), TOURNAMENT_MEDIUM_SPLIT_BPS);
        assert_eq!(tournament_split(8), TOURNAMENT_LARGE_SPLIT_BPS);
        assert_eq!(tournament_split(64), TOURNAMENT_LARGE_SPLIT_BPS);
    }

    #[test]
    fn test_rejects_empty_and_bad_rate() {
        assert_eq!(
            plan_payout(Money::from_units(1), 1000, TOP3_SPLIT_BPS, &[]),
            Err(ExecutionError::NoParticipants)
        );
        assert!(matches!(
            plan_payout(Money::from_units(1), 10_001, TOP3_SPLIT_BPS, &users(1)),
            Err(ExecutionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_rank_results_breaks_ties() {
        let ids = users(3);
        let result = |user_id, placement, score| ChallengeResult {
            challenge_id: Uuid::nil(),
            user_id,
            placement,
            stats: MatchStats {
                score,
                ..MatchStats::default()
            },
            proof_url: None,
            status: ProofStatus::Verified,
            submitted_at_ms: 0,
        };
        let results = vec![result(ids[2], 1, 10), result(ids[0], 2, 5), result(ids[1], 1, 50)];
        assert_eq!(rank_results(&results), vec![ids[1], ids[2], ids[0]]);
    }

    proptest! {
        #[test]
        fn prop_plan_conserves_gross(
            cents in 0i64..10_000_000,
            fee_bps in 0u32..=2_000,
            players in 1usize..20,
        ) {
            let ranked = users(players);
            for split in [WINNER_TAKE_ALL_SPLIT_BPS, TOP3_SPLIT_BPS, tournament_split(players)] {
                let plan = plan_payout(Money::from_cents(cents), fee_bps, split, &ranked).unwrap();
                prop_assert_eq!(plan.distributed(), plan.gross);
                prop_assert!(plan.lines.iter().all(|l| !l.amount.is_negative()));
                prop_assert!(plan.lines.len() <= split.len().min(players));
            }
        }
    }
}
