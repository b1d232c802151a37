//! Tier matching
//!
//! Picks the ladder rung that best describes the current state, either by
//! distance to a rung's average-price threshold or by distance to its target
//! holding, and derives drift-adjusted order sizes from the match.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::NoTierMatch;
use crate::types::{DriftRecord, Ladder, LadderRung, MatchBasis, PositionSnapshot};

/// Which matching rule the engine uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Match holdings against rung targets (drift is meaningful)
    #[default]
    Quantity,
    /// Match price against rung average-price thresholds
    Price,
    /// Price matching only while holding nothing and no rung targets zero
    Auto,
}

/// A matched rung and its position in the ladder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierMatch<'a> {
    pub index: usize,
    pub rung: &'a LadderRung,
}

/// Outcome of resolving a ladder against a position snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct TierResolution {
    pub index: usize,
    pub rung: LadderRung,
    pub basis: MatchBasis,
    pub drift: DriftRecord,
    /// `|raw_difference|` is above the warning threshold
    pub drift_exceeded: bool,
}

/// Rung with minimum `|price - threshold|`; rungs without a threshold are skipped
pub fn match_by_price(ladder: &Ladder, price: f64) -> Result<TierMatch<'_>, NoTierMatch> {
    let mut best: Option<(TierMatch<'_>, f64)> = None;

    for (index, rung) in ladder.rungs().iter().enumerate() {
        let Some(threshold) = rung.price_threshold() else {
            continue;
        };
        let distance = (price - threshold).abs();
        // strict < keeps the first-seen rung on ties
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((TierMatch { index, rung }, distance));
        }
    }

    best.map(|(m, _)| m).ok_or(NoTierMatch {
        basis: MatchBasis::Price,
        value: price,
    })
}

/// Rung with minimum `|quantity - target|`, stopping at the first exact match
pub fn match_by_quantity(ladder: &Ladder, quantity: i64) -> Result<TierMatch<'_>, NoTierMatch> {
    let mut best: Option<(TierMatch<'_>, i64)> = None;

    for (index, rung) in ladder.rungs().iter().enumerate() {
        let distance = (quantity - rung.target_quantity).abs();
        if distance == 0 {
            return Ok(TierMatch { index, rung });
        }
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((TierMatch { index, rung }, distance));
        }
    }

    best.map(|(m, _)| m).ok_or(NoTierMatch {
        basis: MatchBasis::Quantity,
        value: quantity as f64,
    })
}

/// Drift of actual holdings against a matched rung
pub fn compute_drift(rung: &LadderRung, actual_quantity: i64) -> DriftRecord {
    DriftRecord::between(rung, actual_quantity)
}

/// Configured matcher used by the reconciliation loop
#[derive(Debug, Clone, Copy)]
pub struct TierMatcher {
    mode: MatchMode,
    drift_warning_threshold: i64,
}

impl TierMatcher {
    pub fn new(mode: MatchMode, drift_warning_threshold: i64) -> Self {
        Self {
            mode,
            drift_warning_threshold: drift_warning_threshold.max(0),
        }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn drift_exceeds(&self, drift: &DriftRecord) -> bool {
        drift.raw_difference.abs() > self.drift_warning_threshold
    }

    fn basis_for(&self, ladder: &Ladder, position: &PositionSnapshot) -> MatchBasis {
        match self.mode {
            MatchMode::Quantity => MatchBasis::Quantity,
            MatchMode::Price => MatchBasis::Price,
            MatchMode::Auto => {
                if position.actual_quantity == 0 && !ladder.has_flat_rung() {
                    MatchBasis::Price
                } else {
                    MatchBasis::Quantity
                }
            }
        }
    }

    /// Match the ladder against the position and size both sides
    ///
    /// Price matches carry a neutral drift: the rung's own buy and sell
    /// quantities are used unchanged.
    pub fn resolve(
        &self,
        ladder: &Ladder,
        position: &PositionSnapshot,
    ) -> Result<TierResolution, NoTierMatch> {
        let basis = self.basis_for(ladder, position);

        let (matched, drift) = match basis {
            MatchBasis::Quantity => {
                let m = match_by_quantity(ladder, position.actual_quantity)?;
                (m, compute_drift(m.rung, position.actual_quantity))
            }
            MatchBasis::Price => {
                let m = match_by_price(ladder, position.current_price)?;
                (m, DriftRecord::neutral(m.rung))
            }
        };

        let drift_exceeded = self.drift_exceeds(&drift);
        if drift_exceeded {
            warn!(
                "Holdings drift {} vs tier {} exceeds threshold {} (actual={}, target={})",
                drift.raw_difference,
                matched.rung.tier_id,
                self.drift_warning_threshold,
                position.actual_quantity,
                matched.rung.target_quantity
            );
        }

        debug!(
            "Matched tier {} by {} (raw={}, buy_qty={}, sell_qty={})",
            matched.rung.tier_id,
            basis,
            drift.raw_difference,
            drift.adjusted_buy_quantity,
            drift.adjusted_sell_quantity
        );

        Ok(TierResolution {
            index: matched.index,
            rung: matched.rung.clone(),
            basis,
            drift,
            drift_exceeded,
        })
    }
}

impl Default for TierMatcher {
    fn default() -> Self {
        Self::new(MatchMode::Quantity, 50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rung(tier: &str, threshold: Option<f64>, target: i64, buy_q: i64, sell_q: i64) -> LadderRung {
        LadderRung {
            tier_id: tier.to_string(),
            avg_price_threshold: threshold,
            target_quantity: target,
            buy_price: 10.0,
            buy_quantity: buy_q,
            sell_price: 12.0,
            sell_quantity: sell_q,
        }
    }

    fn ladder(rungs: Vec<LadderRung>) -> Ladder {
        let (ladder, issues) = Ladder::from_rows(rungs);
        assert!(issues.is_empty());
        ladder
    }

    fn position(actual: i64, price: f64) -> PositionSnapshot {
        PositionSnapshot {
            actual_quantity: actual,
            last_known_quantity: actual,
            current_price: price,
            average_cost: 100.0,
        }
    }

    #[test]
    fn test_exact_quantity_match_short_circuits() {
        // a later exact match never beats the earlier one
        let l = ladder(vec![
            rung("A", None, 0, 5, 0),
            rung("B", None, 10, 5, 5),
            rung("C", None, 10, 7, 7),
        ]);
        let m = match_by_quantity(&l, 10).unwrap();
        assert_eq!(m.rung.tier_id, "B");
        assert_eq!(m.index, 1);
        assert_eq!(compute_drift(m.rung, 10).raw_difference, 0);
    }

    #[test]
    fn test_quantity_tie_keeps_first_seen() {
        let l = ladder(vec![rung("A", None, 0, 5, 0), rung("B", None, 10, 5, 5)]);
        assert_eq!(match_by_quantity(&l, 5).unwrap().rung.tier_id, "A");
    }

    #[test]
    fn test_quantity_empty_ladder_is_no_match() {
        let err = match_by_quantity(&Ladder::default(), 3).unwrap_err();
        assert_eq!(err.basis, MatchBasis::Quantity);
    }

    #[test]
    fn test_price_match_skips_undefined_and_zero_thresholds() {
        let l = ladder(vec![
            rung("A", None, 0, 5, 0),
            rung("B", Some(0.0), 10, 5, 5),
            rung("C", Some(95.0), 20, 5, 5),
            rung("D", Some(105.0), 30, 5, 5),
        ]);
        assert_eq!(match_by_price(&l, 99.0).unwrap().rung.tier_id, "C");
        assert_eq!(match_by_price(&l, 0.5).unwrap().rung.tier_id, "C");
        // tie keeps the first seen
        assert_eq!(match_by_price(&l, 100.0).unwrap().rung.tier_id, "C");
    }

    #[test]
    fn test_price_match_without_thresholds_is_no_match() {
        let l = ladder(vec![rung("A", None, 0, 5, 0), rung("B", Some(0.0), 10, 5, 5)]);
        let err = match_by_price(&l, 10.0).unwrap_err();
        assert_eq!(err.basis, MatchBasis::Price);
    }

    #[test]
    fn test_tier_b_scenarios() {
        let l = ladder(vec![
            LadderRung {
                tier_id: "A".to_string(),
                avg_price_threshold: None,
                target_quantity: 0,
                buy_price: 10.0,
                buy_quantity: 5,
                sell_price: 12.0,
                sell_quantity: 5,
            },
            LadderRung {
                tier_id: "B".to_string(),
                avg_price_threshold: None,
                target_quantity: 5,
                buy_price: 9.0,
                buy_quantity: 5,
                sell_price: 13.0,
                sell_quantity: 5,
            },
        ]);

        // holding 5 lands exactly on B
        let m = match_by_quantity(&l, 5).unwrap();
        assert_eq!(m.rung.tier_id, "B");
        assert_eq!(m.index, 1);
        let d = compute_drift(m.rung, 5);
        assert_eq!(d.raw_difference, 0);
        assert_eq!(d.adjusted_buy_quantity, 5);
        assert_eq!(d.adjusted_sell_quantity, 5);

        // holding 8: B is 3 away, A is 8 away
        let m = match_by_quantity(&l, 8).unwrap();
        assert_eq!(m.rung.tier_id, "B");
        let d = compute_drift(m.rung, 8);
        assert_eq!(d.raw_difference, 3);
        assert_eq!(d.adjusted_buy_quantity, 2);
        assert_eq!(d.adjusted_sell_quantity, 8);

        let r = TierMatcher::new(MatchMode::Quantity, 50)
            .resolve(&l, &position(8, 9.5))
            .unwrap();
        assert_eq!(r.rung.buy_price, 9.0);
        assert_eq!(r.rung.sell_price, 13.0);
        assert!(!r.drift_exceeded);
    }

    #[test]
    fn test_quantity_tie_prefers_lower_tier() {
        let l = ladder(vec![rung("A", None, 0, 5, 0), rung("B", None, 10, 5, 5)]);

        // holding 5: A wins the tie, drift +5 wipes out its buy
        let m = match_by_quantity(&l, 5).unwrap();
        assert_eq!(m.rung.tier_id, "A");
        let d = compute_drift(m.rung, 5);
        assert_eq!(d.raw_difference, 5);
        assert_eq!(d.adjusted_buy_quantity, 0);
        assert_eq!(d.adjusted_sell_quantity, 5);

        // holding 8: B is nearer, shortfall of 2 boosts the buy
        let m = match_by_quantity(&l, 8).unwrap();
        assert_eq!(m.rung.tier_id, "B");
        let d = compute_drift(m.rung, 8);
        assert_eq!(d.raw_difference, -2);
        assert_eq!(d.adjusted_buy_quantity, 7);
        assert_eq!(d.adjusted_sell_quantity, 3);
    }

    #[test]
    fn test_resolve_flags_drift_over_threshold() {
        let l = ladder(vec![rung("A", None, 0, 5, 0), rung("B", None, 100, 5, 5)]);
        let matcher = TierMatcher::new(MatchMode::Quantity, 50);

        let r = matcher.resolve(&l, &position(49, 10.0)).unwrap();
        assert_eq!(r.rung.tier_id, "B");
        assert_eq!(r.drift.raw_difference, -51);
        assert!(r.drift_exceeded);

        let r = matcher.resolve(&l, &position(100, 10.0)).unwrap();
        assert!(!r.drift_exceeded);

        // exactly at the threshold is not a warning
        let r = matcher.resolve(&l, &position(150, 10.0)).unwrap();
        assert_eq!(r.drift.raw_difference, 50);
        assert!(!r.drift_exceeded);
    }

    #[test]
    fn test_price_mode_uses_neutral_drift() {
        let l = ladder(vec![rung("A", Some(9.0), 0, 5, 0), rung("B", Some(11.0), 100, 6, 4)]);
        let matcher = TierMatcher::new(MatchMode::Price, 50);

        let r = matcher.resolve(&l, &position(30, 10.8)).unwrap();
        assert_eq!(r.basis, MatchBasis::Price);
        assert_eq!(r.rung.tier_id, "B");
        assert_eq!(r.drift.raw_difference, 0);
        assert_eq!(r.drift.adjusted_buy_quantity, 6);
        assert_eq!(r.drift.adjusted_sell_quantity, 4);
    }

    #[test]
    fn test_auto_mode_prefers_quantity_when_flat_rung_exists() {
        let matcher = TierMatcher::new(MatchMode::Auto, 50);

        let with_flat = ladder(vec![rung("A", Some(9.0), 0, 5, 0), rung("B", Some(11.0), 10, 5, 5)]);
        assert_eq!(
            matcher.resolve(&with_flat, &position(0, 11.0)).unwrap().basis,
            MatchBasis::Quantity
        );

        let no_flat = ladder(vec![rung("A", Some(9.0), 5, 5, 0), rung("B", Some(11.0), 10, 5, 5)]);
        let r = matcher.resolve(&no_flat, &position(0, 11.0)).unwrap();
        assert_eq!(r.basis, MatchBasis::Price);
        assert_eq!(r.rung.tier_id, "B");

        // holding something always goes by quantity
        assert_eq!(
            matcher.resolve(&no_flat, &position(6, 11.0)).unwrap().basis,
            MatchBasis::Quantity
        );
    }
}
