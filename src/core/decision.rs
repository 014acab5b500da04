use crate::core::workers::CpuPool;
use crate::domain::dataset::{parse_decimal, NumericCell};
use crate::domain::model::{CatalogRow, Exclusion, Outcome, PriceDecision};
use crate::utils::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

pub const EMPTY_FLOOR_REASON: &str = "empty floor price";
pub const CONDITIONS_NOT_MET_REASON: &str = "does not satisfy price-change conditions";

/// Increment range applied above the floor when a price sits below it.
const BELOW_FLOOR_BUMP: (i64, i64) = (20, 50);
const DISCOUNT_BASE_FACTORS: (f64, f64) = (1.3, 1.6);

/// Which rows may be repriced at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityMode {
    /// `current > market reference > floor`.
    #[default]
    Strict,
    /// Any row with a numeric floor; lets the corrective branch raise prices.
    FloorOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingPolicy {
    pub own_shops: HashSet<String>,
    pub min_delta: i64,
    pub max_delta: i64,
    pub eligibility: EligibilityMode,
}

impl PricingPolicy {
    pub fn new(own_shops: impl IntoIterator<Item = String>, min_delta: i64, max_delta: i64) -> Self {
        Self {
            own_shops: own_shops
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            min_delta,
            max_delta,
            eligibility: EligibilityMode::Strict,
        }
    }

    pub fn with_eligibility(mut self, eligibility: EligibilityMode) -> Self {
        self.eligibility = eligibility;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceInputs {
    pub current: f64,
    pub market_reference: f64,
    pub floor: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PriceSelection {
    Keep { reason: String },
    Set { price: f64, reason: String },
}

fn uniform_int<R: Rng + ?Sized>(rng: &mut R, a: i64, b: i64) -> i64 {
    rng.gen_range(a.min(b)..=a.max(b))
}

/// Uniform value in `[price*1.3, price*1.6]`, rounded to the nearest integer.
pub fn discount_base<R: Rng + ?Sized>(price: f64, rng: &mut R) -> i64 {
    let a = price * DISCOUNT_BASE_FACTORS.0;
    let b = price * DISCOUNT_BASE_FACTORS.1;
    rng.gen_range(a.min(b)..=a.max(b)).round() as i64
}

/// Price-selection strategy for a row that already passed the eligibility gate.
/// Pure apart from the random source, so a seeded RNG makes it deterministic.
pub fn select_price<R: Rng + ?Sized>(
    inputs: &PriceInputs,
    best_price_holder: &str,
    policy: &PricingPolicy,
    rng: &mut R,
) -> PriceSelection {
    let PriceInputs {
        current,
        market_reference,
        floor,
    } = *inputs;
    let floor_int = floor.ceil();

    if current < floor {
        let price = floor_int + uniform_int(rng, BELOW_FLOOR_BUMP.0, BELOW_FLOOR_BUMP.1) as f64;
        return PriceSelection::Set {
            price,
            reason: format!(
                "Price raised from {:.2} to {:.2}: below floor {:.2}",
                current, price, floor
            ),
        };
    }

    if market_reference - current > policy.max_delta as f64 {
        let cut = uniform_int(rng, policy.min_delta, policy.max_delta) as f64;
        let price = (market_reference - cut).floor().max(floor_int);
        return PriceSelection::Set {
            price,
            reason: format!(
                "Price raised from {:.2} to {:.2}: far below market reference {:.2}",
                current, price, market_reference
            ),
        };
    }

    let holder = best_price_holder.trim();
    if !holder.is_empty() && policy.own_shops.contains(holder) {
        return PriceSelection::Keep {
            reason: format!(
                "Price unchanged: own shop '{}' already holds the minimum market price",
                holder
            ),
        };
    }

    let (low, high) = if current - market_reference > policy.max_delta as f64 {
        (
            (market_reference - policy.max_delta as f64).max(floor),
            market_reference - policy.min_delta as f64,
        )
    } else {
        (
            (market_reference - policy.min_delta as f64).max(floor),
            market_reference - 1.0,
        )
    };

    let invalid_range = || PriceSelection::Keep {
        reason: format!(
            "Price unchanged: invalid price range (current {:.2}, market reference {:.2}, floor {:.2})",
            current, market_reference, floor
        ),
    };
    if low >= high {
        return invalid_range();
    }
    let (low_int, high_int) = (low.ceil() as i64, high.floor() as i64);
    if low_int > high_int {
        return invalid_range();
    }

    let price = (rng.gen_range(low_int..=high_int) as f64).max(floor_int);
    PriceSelection::Set {
        price,
        reason: format!(
            "Price changed from {:.2} to {:.2} (market reference {:.2}, range {:.2} - {:.2})",
            current, price, market_reference, low, high
        ),
    }
}

fn eligibility_failure(inputs: &PriceInputs, mode: EligibilityMode) -> Option<String> {
    match mode {
        EligibilityMode::FloorOnly => None,
        EligibilityMode::Strict => {
            if inputs.current > inputs.market_reference && inputs.market_reference > inputs.floor {
                None
            } else if inputs.market_reference <= inputs.floor {
                Some(format!(
                    "{}: market reference price {:.2} is at or below floor {:.2}",
                    CONDITIONS_NOT_MET_REASON, inputs.market_reference, inputs.floor
                ))
            } else {
                Some(CONDITIONS_NOT_MET_REASON.to_string())
            }
        }
    }
}

fn describe_bad_cells(row: &CatalogRow, cells: &[(&str, NumericCell, &str)]) -> String {
    let bad: Vec<String> = cells
        .iter()
        .filter(|(_, cell, _)| cell.value().is_none())
        .map(|(name, _, raw)| format!("{} '{}'", name, raw))
        .collect();
    format!(
        "data quality: non-numeric {} for SKU {}",
        bad.join(", "),
        row.sku
    )
}

/// Decides the new price for one reconciled row.
pub fn decide<R: Rng + ?Sized>(row: &CatalogRow, policy: &PricingPolicy, rng: &mut R) -> PriceDecision {
    let current = parse_decimal(&row.current_price);
    let market_reference = parse_decimal(&row.market_reference_price);
    let floor = parse_decimal(&row.floor_price);

    let mut decision = PriceDecision {
        sku: row.sku.clone(),
        old_price: current.value(),
        new_price: current.value(),
        market_reference_price: market_reference.value(),
        floor_price: floor.value(),
        outcome: Outcome::Unchanged,
        reason: String::new(),
        discount_base: None,
    };

    if floor == NumericCell::Absent {
        decision.outcome = Outcome::Excluded(Exclusion::EmptyFloor);
        decision.reason = EMPTY_FLOOR_REASON.to_string();
        return decision;
    }

    let (NumericCell::Value(current), NumericCell::Value(market_reference), NumericCell::Value(floor)) =
        (current, market_reference, floor)
    else {
        decision.outcome = Outcome::Excluded(Exclusion::DataQuality);
        decision.reason = describe_bad_cells(
            row,
            &[
                ("current price", current, row.current_price.as_str()),
                (
                    "market reference price",
                    market_reference,
                    row.market_reference_price.as_str(),
                ),
                ("floor price", floor, row.floor_price.as_str()),
            ],
        );
        return decision;
    };

    let inputs = PriceInputs {
        current,
        market_reference,
        floor,
    };
    if let Some(reason) = eligibility_failure(&inputs, policy.eligibility) {
        decision.outcome = Outcome::Excluded(Exclusion::ConditionsNotMet);
        decision.reason = reason;
        return decision;
    }

    match select_price(&inputs, &row.best_price_holder, policy, rng) {
        PriceSelection::Keep { reason } => {
            decision.reason = reason;
        }
        PriceSelection::Set { price, .. } if price == current => {
            decision.reason = format!("Price unchanged: selected price equals current {:.2}", current);
        }
        PriceSelection::Set { price, reason } => {
            let base = discount_base(price, rng);
            decision.outcome = Outcome::Changed;
            decision.new_price = Some(price);
            decision.discount_base = Some(base);
            decision.reason = format!("{}; new discount base {}", reason, base);
        }
    }
    decision
}

/// Decides every row, fanning chunks out over the worker pool. Each chunk draws
/// from its own RNG seeded by `rng`, so a seeded master gives reproducible output.
/// Results come back in input order.
pub async fn decide_all(
    pool: &CpuPool,
    rows: Vec<CatalogRow>,
    policy: Arc<PricingPolicy>,
    rng: &mut StdRng,
) -> Result<Vec<(CatalogRow, PriceDecision)>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let chunk_size = rows.len().div_ceil(pool.workers());
    let mut remaining = rows;
    let mut jobs = Vec::new();
    while !remaining.is_empty() {
        let tail = remaining.split_off(chunk_size.min(remaining.len()));
        let chunk = std::mem::replace(&mut remaining, tail);
        let seed: u64 = rng.gen();
        let policy = policy.clone();
        jobs.push(pool.run(move || {
            let mut chunk_rng = StdRng::seed_from_u64(seed);
            chunk
                .into_iter()
                .map(|row| {
                    let decision = decide(&row, &policy, &mut chunk_rng);
                    (row, decision)
                })
                .collect::<Vec<_>>()
        }));
    }

    let decided = futures::future::try_join_all(jobs).await?;
    Ok(decided.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(sku: &str, price: &str, floor: &str, reference: &str, holder: &str) -> CatalogRow {
        CatalogRow {
            sku: sku.to_string(),
            current_price: price.to_string(),
            floor_price: floor.to_string(),
            market_reference_price: reference.to_string(),
            best_price_holder: holder.to_string(),
            ..Default::default()
        }
    }

    fn policy() -> PricingPolicy {
        PricingPolicy::new(vec!["MyShop".to_string(), " Outlet ".to_string()], 10, 50)
    }

    #[test]
    fn test_empty_floor_is_never_changed() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let decision = decide(&row("1", "150", "  ", "120", "x"), &policy(), &mut rng);
            assert_eq!(decision.outcome, Outcome::Excluded(Exclusion::EmptyFloor));
            assert_eq!(decision.reason, EMPTY_FLOOR_REASON);
            assert!(!decision.is_changed());
            assert!(decision.discount_base.is_none());
        }
    }

    #[test]
    fn test_non_numeric_price_is_data_quality() {
        let mut rng = StdRng::seed_from_u64(1);
        let decision = decide(&row("7", "abc", "100", "120", ""), &policy(), &mut rng);

        assert_eq!(decision.outcome, Outcome::Excluded(Exclusion::DataQuality));
        assert!(decision.reason.contains("current price 'abc'"));
        assert_eq!(decision.floor_price, Some(100.0));
        assert_eq!(decision.old_price, None);
    }

    #[test]
    fn test_invalid_floor_is_data_quality_not_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        let decision = decide(&row("7", "150", "n/a", "120", ""), &policy(), &mut rng);
        assert_eq!(decision.outcome, Outcome::Excluded(Exclusion::DataQuality));
    }

    #[test]
    fn test_price_below_reference_is_not_eligible() {
        let mut rng = StdRng::seed_from_u64(1);
        let decision = decide(&row("1", "110", "100", "120", ""), &policy(), &mut rng);

        assert_eq!(decision.outcome, Outcome::Excluded(Exclusion::ConditionsNotMet));
        assert_eq!(decision.reason, CONDITIONS_NOT_MET_REASON);
        assert_eq!(decision.new_price, Some(110.0));
    }

    #[test]
    fn test_reference_at_floor_gets_specific_reason() {
        let mut rng = StdRng::seed_from_u64(1);
        let decision = decide(&row("1", "150", "120", "120", ""), &policy(), &mut rng);

        assert_eq!(decision.outcome, Outcome::Excluded(Exclusion::ConditionsNotMet));
        assert!(decision.reason.starts_with(CONDITIONS_NOT_MET_REASON));
        assert!(decision.reason.contains("at or below floor"));
    }

    #[test]
    fn test_near_reference_samples_just_below_it() {
        // 150 - 120 = 30 is within max_delta, so the window is [max(120-10, 100), 120-1]
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let decision = decide(&row("123", "150", "100", "120", "competitor"), &policy(), &mut rng);

            assert_eq!(decision.outcome, Outcome::Changed);
            let price = decision.new_price.unwrap();
            assert!((110.0..=119.0).contains(&price), "price {} out of window", price);
            assert_eq!(price.fract(), 0.0);
        }
    }

    #[test]
    fn test_far_above_reference_samples_deeper_window() {
        // 200 - 120 = 80 exceeds max_delta: window is [max(120-50, 100), 120-10]
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let decision = decide(&row("123", "200", "100", "120", "competitor"), &policy(), &mut rng);

            let price = decision.new_price.unwrap();
            assert!((100.0..=110.0).contains(&price), "price {} out of window", price);
        }
    }

    #[test]
    fn test_discount_base_is_derived_from_new_price() {
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let decision = decide(&row("1", "150", "100", "120", ""), &policy(), &mut rng);

            let price = decision.new_price.unwrap();
            let base = decision.discount_base.unwrap() as f64;
            assert!(base >= (price * 1.3).round() && base <= (price * 1.6).round());
            assert!(decision.reason.contains("new discount base"));
        }
    }

    #[test]
    fn test_own_shop_holding_best_price_keeps_price() {
        let mut rng = StdRng::seed_from_u64(3);
        let decision = decide(&row("1", "150", "100", "120", "Outlet"), &policy(), &mut rng);

        assert_eq!(decision.outcome, Outcome::Unchanged);
        assert!(decision.reason.contains("'Outlet' already holds the minimum market price"));
        assert_eq!(decision.new_price, decision.old_price);
    }

    #[test]
    fn test_collapsed_window_is_invalid_range() {
        // window [max(101-10, 100), 101-1] = [100, 100]
        let mut rng = StdRng::seed_from_u64(3);
        let decision = decide(&row("1", "150", "100", "101", ""), &policy(), &mut rng);

        assert_eq!(decision.outcome, Outcome::Unchanged);
        assert!(decision.reason.contains("invalid price range"));
    }

    #[test]
    fn test_fractional_floor_is_respected() {
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let decision = decide(&row("1", "150", "100,4", "105", ""), &policy(), &mut rng);
            let price = decision.new_price.unwrap();
            assert!((101.0..=104.0).contains(&price));
        }
    }

    #[test]
    fn test_changed_prices_differ_and_respect_floor() {
        let mut gen = StdRng::seed_from_u64(42);
        let policy = policy();
        for _ in 0..2000 {
            let floor = gen.gen_range(1..500) as f64;
            let reference = floor + gen.gen_range(0..300) as f64;
            let current = reference + gen.gen_range(-50..400) as f64;
            let row = row("p", &current.to_string(), &floor.to_string(), &reference.to_string(), "");

            let decision = decide(&row, &policy, &mut gen);
            if decision.is_changed() {
                let new_price = decision.new_price.unwrap();
                assert_ne!(Some(new_price), decision.old_price);
                assert!(new_price >= floor);
            }
        }
    }

    #[test]
    fn test_floor_only_mode_raises_price_below_floor() {
        let policy = policy().with_eligibility(EligibilityMode::FloorOnly);
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let decision = decide(&row("1", "90", "100", "95", ""), &policy, &mut rng);

            assert_eq!(decision.outcome, Outcome::Changed);
            let price = decision.new_price.unwrap();
            assert!((120.0..=150.0).contains(&price));
            assert!(decision.reason.contains("below floor"));
        }
    }

    #[test]
    fn test_floor_only_mode_lifts_far_below_reference() {
        let policy = policy().with_eligibility(EligibilityMode::FloorOnly);
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let decision = decide(&row("1", "100", "50", "400", ""), &policy, &mut rng);

            let price = decision.new_price.unwrap();
            assert!((350.0..=390.0).contains(&price), "price {}", price);
        }
    }

    #[test]
    fn test_same_seed_same_decision() {
        let row = row("1", "150", "100", "120", "");
        let a = decide(&row, &policy(), &mut StdRng::seed_from_u64(9));
        let b = decide(&row, &policy(), &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_decide_all_keeps_order_and_is_reproducible() {
        let pool = CpuPool::new(4);
        let rows: Vec<CatalogRow> = (0..37)
            .map(|i| row(&i.to_string(), "150", "100", "120", ""))
            .collect();
        let policy = Arc::new(policy());

        let first = decide_all(&pool, rows.clone(), policy.clone(), &mut StdRng::seed_from_u64(5))
            .await
            .unwrap();
        let second = decide_all(&pool, rows, policy, &mut StdRng::seed_from_u64(5))
            .await
            .unwrap();

        assert_eq!(first.len(), 37);
        for (i, (row, decision)) in first.iter().enumerate() {
            assert_eq!(row.sku, i.to_string());
            assert_eq!(decision.sku, row.sku);
        }
        assert_eq!(first, second);
    }
}
