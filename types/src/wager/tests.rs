use super::*;
use proptest::prelude::*;
use std::str::FromStr;

#[test]
fn test_money_display() {
    assert_eq!(Money::from_cents(2_160).to_string(), "$21.60");
    assert_eq!(Money::from_cents(-1_000).to_string(), "-$10.00");
    assert_eq!(Money::from_cents(5).to_string(), "$0.05");
}

#[test]
fn test_money_from_decimal_rounds_to_cents() {
    assert_eq!(Money::from_decimal(21.6), Some(Money::from_cents(2_160)));
    assert_eq!(Money::from_decimal(0.125), Some(Money::from_cents(13)));
    assert_eq!(Money::from_decimal(f64::NAN), None);
    assert_eq!(Money::from_decimal(f64::INFINITY), None);
}

#[test]
fn test_fee_rounds_half_up() {
    assert_eq!(Money::from_units(40).fee_at(STANDARD_FEE_BPS), Money::from_units(4));
    // 10% of $0.05 is half a cent.
    assert_eq!(Money::from_cents(5).fee_at(STANDARD_FEE_BPS), Money::from_cents(1));
    assert_eq!(Money::from_cents(4).fee_at(STANDARD_FEE_BPS), Money::ZERO);
}

#[test]
fn test_share_floors() {
    assert_eq!(Money::from_units(36).share_at(6_000), Money::from_cents(2_160));
    assert_eq!(Money::from_cents(101).share_at(5_000), Money::from_cents(50));
}

#[test]
fn test_money_json_rejects_non_numbers() {
    assert!(serde_json::from_str::<Money>("\"ten\"").is_err());
    assert_eq!(serde_json::from_str::<Money>("10").unwrap(), Money::from_units(10));
}

#[test]
fn test_challenge_transitions() {
    use ChallengeStatus::*;
    assert!(Open.can_transition_to(Active));
    assert!(Open.can_transition_to(Cancelled));
    assert!(Active.can_transition_to(Completed));
    assert!(Active.can_transition_to(Cancelled));
    assert!(!Open.can_transition_to(Completed));
    assert!(!Completed.can_transition_to(Cancelled));
    assert!(!Cancelled.can_transition_to(Active));
}

#[test]
fn test_challenge_status_accepts_in_progress_alias() {
    let status: ChallengeStatus = serde_json::from_str("\"in_progress\"").unwrap();
    assert_eq!(status, ChallengeStatus::Active);
    assert_eq!(serde_json::to_string(&status).unwrap(), "\"active\"");
}

#[test]
fn test_tournament_transitions() {
    use TournamentStatus::*;
    assert!(Upcoming.can_transition_to(RegistrationOpen));
    assert!(RegistrationOpen.can_transition_to(Ongoing));
    assert!(Ongoing.can_transition_to(Completed));
    for status in [Upcoming, RegistrationOpen, Ongoing] {
        assert!(status.can_transition_to(Cancelled), "{status} must be cancellable");
    }
    assert!(!Upcoming.can_transition_to(Ongoing));
    assert!(!Completed.can_transition_to(Cancelled));
    assert!(!Cancelled.can_transition_to(Cancelled));
}

#[test]
fn test_labels_roundtrip() {
    for status in TournamentStatus::ALL {
        assert_eq!(TournamentStatus::from_str(status.as_str()).unwrap(), *status);
        let json = serde_json::to_string(status).unwrap();
        assert_eq!(json, format!("\"{}\"", status.as_str()));
    }
    for kind in ChallengeType::ALL {
        let json = serde_json::to_string(kind).unwrap();
        assert_eq!(json, format!("\"{}\"", kind.as_str()));
    }
    let err = ProofStatus::from_str("maybe").unwrap_err();
    assert_eq!(err.kind, "proof status");
}

#[test]
fn test_dispute_evidence_ignores_blank_urls() {
    let mut dispute = Dispute::new(uuid::Uuid::new_v4(), DisputeType::Result, "wrong winner", 0);
    assert!(!dispute.has_evidence());
    dispute.evidence_urls.push("  ".to_string());
    assert!(!dispute.has_evidence());
    dispute.evidence_urls.push("https://clips.example/1".to_string());
    assert!(dispute.has_evidence());
}

#[test]
fn test_kd_ratio_floors_deaths() {
    let stats = MatchStats {
        score: 0,
        kills: 12,
        deaths: 0,
        assists: 0,
    };
    assert_eq!(stats.kd_ratio(), 12.0);
}

proptest! {
    #[test]
    fn prop_fee_plus_net_is_gross(cents in 0i64..1_000_000_000, bps in 0u32..=BPS_DENOMINATOR) {
        let gross = Money::from_cents(cents);
        let fee = gross.fee_at(bps);
        prop_assert!(fee <= gross);
        prop_assert!(!fee.is_negative());
        prop_assert_eq!(fee + (gross - fee), gross);
    }

    #[test]
    fn prop_share_never_exceeds_whole(cents in 0i64..1_000_000_000, bps in 0u32..=BPS_DENOMINATOR) {
        let whole = Money::from_cents(cents);
        let share = whole.share_at(bps);
        prop_assert!(share <= whole);
        prop_assert!(!share.is_negative());
    }
}
