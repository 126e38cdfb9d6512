// The XP curve engine. Everything in this file is pure math over explicit
// inputs - no storage, no Discord types, no async. The service layer feeds it
// XP totals and a CurveSpec and decides what to do with the results.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use super::LevelingError;

/// How far the threshold table extends when a guild has no level cap.
/// Level 200 on the default curve is ~2M XP, far beyond what any member
/// reaches organically.
pub const DEFAULT_LEVEL_HORIZON: u32 = 200;

/// Shape of the XP-required-per-level progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveKind {
    Linear,
    Exponential,
    Constant,
}

impl CurveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurveKind::Linear => "linear",
            CurveKind::Exponential => "exponential",
            CurveKind::Constant => "constant",
        }
    }
}

impl FromStr for CurveKind {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to `Linear`. This mirrors how guild admins
    /// actually configure curves (free-text historically) and keeps old
    /// stored configs loadable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "exponential" => CurveKind::Exponential,
            "constant" => CurveKind::Constant,
            _ => CurveKind::Linear,
        })
    }
}

/// Per-guild curve configuration.
///
/// The engine trusts these values: `multiplier` must be positive and
/// `linear_base`/`linear_inc` non-negative. The service validates at
/// configuration time (`set_curve_spec`) so nothing unsound is ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveSpec {
    pub curve: CurveKind,
    /// Uniform scale on every per-level requirement. Must be > 0.
    pub multiplier: f64,
    /// Level ceiling; 0 means uncapped.
    pub max_level: u32,
    /// Requirement for level 1 on the linear curve.
    pub linear_base: f64,
    /// Added per level on the linear curve.
    pub linear_inc: f64,
}

impl Default for CurveSpec {
    fn default() -> Self {
        Self {
            curve: CurveKind::Linear,
            multiplier: 1.0,
            max_level: 0,
            linear_base: 83.2,
            linear_inc: 100.433,
        }
    }
}

/// Result of awarding XP: level before, level after, and the new total.
/// A level-up happened exactly when `new_level > old_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwardOutcome {
    pub old_level: u32,
    pub new_level: u32,
    pub new_xp: u64,
}

impl CurveSpec {
    fn cap(&self) -> u32 {
        if self.max_level > 0 {
            self.max_level
        } else {
            DEFAULT_LEVEL_HORIZON
        }
    }

    /// XP needed to go from level `n-1` to level `n`.
    fn requirement(&self, n: u32) -> f64 {
        let raw = match self.curve {
            CurveKind::Constant => 100.0 * self.multiplier,
            CurveKind::Exponential => 100.0 * 1.25f64.powi(n as i32 - 1) * self.multiplier,
            CurveKind::Linear => {
                (self.linear_base + self.linear_inc * (n as f64 - 1.0)) * self.multiplier
            }
        };
        raw.max(0.0)
    }

    /// Build the cumulative threshold table `T[0..=cap]`, `T[0] = 0`.
    ///
    /// Requirements are accumulated in floating point and each stored entry
    /// rounds the *running total*. Rounding each increment separately would
    /// drift the level boundaries, so don't.
    pub fn thresholds(&self) -> Vec<u64> {
        let cap = self.cap();
        let mut table = Vec::with_capacity(cap as usize + 1);
        table.push(0);

        let mut total = 0.0f64;
        for n in 1..=cap {
            total += self.requirement(n);
            table.push(total.round() as u64);
        }
        table
    }

    /// Level reached with `xp` total XP. 0 below the level-1 threshold.
    pub fn level_at(&self, xp: u64) -> u32 {
        level_in_table(xp, &self.thresholds(), self.max_level)
    }

    /// Apply an XP award. `amount <= 0` is a pure probe: nothing changes and
    /// both levels report the current one. There is no upper bound on XP.
    pub fn award(&self, current_xp: u64, amount: i64) -> AwardOutcome {
        if amount <= 0 {
            let level = self.level_at(current_xp);
            return AwardOutcome {
                old_level: level,
                new_level: level,
                new_xp: current_xp,
            };
        }

        let new_xp = current_xp.saturating_add(amount as u64);
        let table = self.thresholds();
        AwardOutcome {
            old_level: level_in_table(current_xp, &table, self.max_level),
            new_level: level_in_table(new_xp, &table, self.max_level),
            new_xp,
        }
    }
}

/// Binary-search a threshold table for the highest level whose cumulative
/// requirement is satisfied by `xp`. `table` must be the non-decreasing
/// output of [`CurveSpec::thresholds`] (so `table[0] == 0` and the search
/// always lands somewhere).
pub fn level_in_table(xp: u64, table: &[u64], max_level: u32) -> u32 {
    // partition_point gives the first index NOT satisfied; the level is the
    // one before it. table[0] = 0 is always satisfied.
    let level = table.partition_point(|&t| t <= xp).saturating_sub(1) as u32;
    if max_level > 0 {
        level.min(max_level)
    } else {
        level
    }
}

/// Solve for linear curve parameters `(base, inc)` from two observed
/// (level, cumulative XP) samples.
///
/// Cumulative XP at level L on a linear curve is the arithmetic series
/// `L*b + d*L*(L-1)/2`, so two samples pin down both unknowns:
/// `a_i = 2*XP_i/L_i = 2b + d*(L_i - 1)`.
///
/// A negative recovered base or a non-positive increment means the samples
/// describe a non-increasing curve; that is rejected rather than stored.
pub fn calibrate_linear(
    l1: u32,
    xp1: u64,
    l2: u32,
    xp2: u64,
) -> Result<(f64, f64), LevelingError> {
    if l1 == 0 || l2 == 0 || l1 == l2 {
        return Err(LevelingError::InvalidCalibration {
            base: f64::NAN,
            inc: f64::NAN,
        });
    }

    let a1 = 2.0 * xp1 as f64 / l1 as f64;
    let a2 = 2.0 * xp2 as f64 / l2 as f64;
    let inc = (a1 - a2) / (l1 as f64 - l2 as f64);
    let base = (a1 - (l1 as f64 - 1.0) * inc) / 2.0;

    // `<= 0.0` and not `< 0.0`: flat samples come out as IEEE -0.0, which a
    // plain negativity check would wave through as a valid increment.
    if inc <= 0.0 || base < 0.0 || !inc.is_finite() || !base.is_finite() {
        return Err(LevelingError::InvalidCalibration { base, inc });
    }

    Ok((base, inc))
}

// ============================================================================
// THRESHOLD CACHE
// ============================================================================

/// Bit-exact cache key over every field of a CurveSpec. f64 fields are keyed
/// by their bit patterns so two specs share a table only when they are
/// literally the same numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CurveKey {
    curve: CurveKind,
    multiplier: u64,
    max_level: u32,
    linear_base: u64,
    linear_inc: u64,
}

impl From<&CurveSpec> for CurveKey {
    fn from(spec: &CurveSpec) -> Self {
        Self {
            curve: spec.curve,
            multiplier: spec.multiplier.to_bits(),
            max_level: spec.max_level,
            linear_base: spec.linear_base.to_bits(),
            linear_inc: spec.linear_inc.to_bits(),
        }
    }
}

/// Memoized threshold tables, shared across guilds that use the same spec
/// (most guilds run the default curve).
///
/// Tables are installed once and handed out behind `Arc` - they are never
/// mutated after insertion, so concurrent readers can't observe a partial
/// table.
#[derive(Default)]
pub struct ThresholdCache {
    tables: dashmap::DashMap<CurveKey, Arc<Vec<u64>>>,
}

impl ThresholdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table for `spec`, computing and installing it on first use.
    pub fn table(&self, spec: &CurveSpec) -> Arc<Vec<u64>> {
        self.tables
            .entry(CurveKey::from(spec))
            .or_insert_with(|| Arc::new(spec.thresholds()))
            .clone()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_spec() -> CurveSpec {
        CurveSpec {
            curve: CurveKind::Linear,
            multiplier: 1.0,
            max_level: 0,
            linear_base: 83.2,
            linear_inc: 100.433,
        }
    }

    #[test]
    fn linear_thresholds_round_the_running_total() {
        let table = linear_spec().thresholds();

        assert_eq!(table[0], 0);
        // round(83.2)
        assert_eq!(table[1], 83);
        // round(83.2 + 183.633) = round(266.833)
        assert_eq!(table[2], 267);
        assert_eq!(table.len(), DEFAULT_LEVEL_HORIZON as usize + 1);
    }

    #[test]
    fn linear_level_boundaries() {
        let spec = linear_spec();

        assert_eq!(spec.level_at(0), 0);
        assert_eq!(spec.level_at(82), 0);
        assert_eq!(spec.level_at(83), 1);
        assert_eq!(spec.level_at(266), 1);
        assert_eq!(spec.level_at(267), 2);
    }

    #[test]
    fn exponential_thresholds() {
        let spec = CurveSpec {
            curve: CurveKind::Exponential,
            multiplier: 1.0,
            ..CurveSpec::default()
        };
        let table = spec.thresholds();

        // Level 1 costs 100, level 2 costs 125.
        assert_eq!(table[1], 100);
        assert_eq!(table[2], 225);
        assert_eq!(spec.level_at(224), 1);
        assert_eq!(spec.level_at(225), 2);
    }

    #[test]
    fn constant_thresholds_scale_with_multiplier() {
        let spec = CurveSpec {
            curve: CurveKind::Constant,
            multiplier: 2.5,
            ..CurveSpec::default()
        };
        let table = spec.thresholds();

        assert_eq!(table[1], 250);
        assert_eq!(table[2], 500);
        assert_eq!(table[10], 2500);
    }

    #[test]
    fn thresholds_are_monotonic() {
        let specs = [
            linear_spec(),
            CurveSpec {
                curve: CurveKind::Exponential,
                multiplier: 0.3,
                ..CurveSpec::default()
            },
            CurveSpec {
                curve: CurveKind::Constant,
                multiplier: 7.7,
                max_level: 50,
                ..CurveSpec::default()
            },
            CurveSpec {
                curve: CurveKind::Linear,
                multiplier: 1.0,
                max_level: 0,
                linear_base: 0.0,
                linear_inc: 0.0,
            },
        ];

        for spec in specs {
            let table = spec.thresholds();
            for pair in table.windows(2) {
                assert!(pair[0] <= pair[1], "non-monotonic table for {:?}", spec);
            }
        }
    }

    #[test]
    fn level_is_monotonic_in_xp() {
        let spec = linear_spec();
        let mut last = 0;
        for xp in (0..50_000).step_by(137) {
            let level = spec.level_at(xp);
            assert!(level >= last);
            last = level;
        }
    }

    #[test]
    fn max_level_caps_arbitrarily_large_xp() {
        let spec = CurveSpec {
            max_level: 10,
            ..linear_spec()
        };

        assert_eq!(spec.level_at(u64::MAX), 10);
        assert_eq!(spec.thresholds().len(), 11);
    }

    #[test]
    fn zero_requirement_curve_still_respects_cap() {
        // base and inc of 0 makes every threshold 0; everyone satisfies all
        // of them, so the level is the cap (or the horizon when uncapped).
        let spec = CurveSpec {
            curve: CurveKind::Linear,
            multiplier: 1.0,
            max_level: 5,
            linear_base: 0.0,
            linear_inc: 0.0,
        };
        assert_eq!(spec.level_at(0), 5);
    }

    #[test]
    fn award_adds_exactly() {
        let spec = linear_spec();
        let outcome = spec.award(80, 10);

        assert_eq!(outcome.new_xp, 90);
        assert_eq!(outcome.old_level, 0);
        assert_eq!(outcome.new_level, 1);
    }

    #[test]
    fn non_positive_award_is_a_probe() {
        let spec = linear_spec();

        for amount in [0, -1, -500] {
            let outcome = spec.award(300, amount);
            assert_eq!(outcome.new_xp, 300);
            assert_eq!(outcome.old_level, spec.level_at(300));
            assert_eq!(outcome.new_level, outcome.old_level);
        }
    }

    #[test]
    fn award_without_level_change() {
        let spec = linear_spec();
        let outcome = spec.award(83, 10);

        assert_eq!(outcome.old_level, 1);
        assert_eq!(outcome.new_level, 1);
        assert_eq!(outcome.new_xp, 93);
    }

    #[test]
    fn calibration_recovers_linear_parameters() {
        let spec = linear_spec();
        let table = spec.thresholds();

        let (base, inc) = calibrate_linear(5, table[5], 10, table[10]).unwrap();

        // Samples come from the rounded table, so recovery is close but not
        // exact: inc within 1e-2, base absorbs the rounding of both samples.
        assert!((inc - 100.433).abs() < 1e-2, "inc = {}", inc);
        assert!((base - 83.2).abs() < 0.1, "base = {}", base);
    }

    #[test]
    fn calibration_from_exact_samples_is_tight() {
        // Unrounded cumulative XP at levels 5 and 10 for base=83.2,
        // inc=100.433: L*b + d*L*(L-1)/2.
        let xp5 = (5.0_f64 * 83.2 + 100.433 * 10.0).round() as u64; // 1420
        let xp10 = (10.0_f64 * 83.2 + 100.433 * 45.0).round() as u64; // 5351

        let (base, inc) = calibrate_linear(5, xp5, 10, xp10).unwrap();
        assert!((inc - 100.433).abs() < 1e-1);
        assert!((base - 83.2).abs() < 0.5);
    }

    #[test]
    fn calibration_rejects_decreasing_curves() {
        // Level 10 with barely more XP than level 5 implies negative growth.
        let err = calibrate_linear(5, 1, 10, 2).unwrap_err();
        assert!(matches!(err, LevelingError::InvalidCalibration { .. }));
    }

    #[test]
    fn calibration_rejects_flat_curves() {
        // Equal per-level cost at both samples recovers inc == -0.0, which
        // must be treated as non-increasing and rejected.
        let err = calibrate_linear(1, 100, 2, 200).unwrap_err();
        assert!(matches!(err, LevelingError::InvalidCalibration { .. }));
    }

    #[test]
    fn calibration_rejects_degenerate_samples() {
        assert!(calibrate_linear(0, 100, 5, 500).is_err());
        assert!(calibrate_linear(5, 100, 5, 500).is_err());
    }

    #[test]
    fn unknown_curve_names_parse_as_linear() {
        assert_eq!("exponential".parse::<CurveKind>().unwrap(), CurveKind::Exponential);
        assert_eq!("Constant".parse::<CurveKind>().unwrap(), CurveKind::Constant);
        assert_eq!("parabolic".parse::<CurveKind>().unwrap(), CurveKind::Linear);
        assert_eq!("".parse::<CurveKind>().unwrap(), CurveKind::Linear);
    }

    #[test]
    fn cache_returns_the_same_table_for_equal_specs() {
        let cache = ThresholdCache::new();
        let spec = linear_spec();

        let a = cache.table(&spec);
        let b = cache.table(&spec);
        assert!(Arc::ptr_eq(&a, &b));

        let other = CurveSpec {
            multiplier: 2.0,
            ..spec
        };
        let c = cache.table(&other);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(*a, spec.thresholds());
    }
}
