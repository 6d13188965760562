use std::collections::BTreeSet;

use tracing::warn;

/// Setting name whose grants bound an island's protection range.
pub const RANGE_CAPABILITY: &str = "island.range";

const WILDCARD_SUFFIX: &str = "*";

/// The capability strings held by one identity.
///
/// Backed by an ordered set so aggregation visits grants in the same order
/// regardless of how the host enumerated them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantSet {
    grants: BTreeSet<String>,
}

impl GrantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, grant: impl Into<String>) -> bool {
        self.grants.insert(grant.into())
    }

    pub fn remove(&mut self, grant: &str) -> bool {
        self.grants.remove(grant)
    }

    pub fn contains(&self, grant: &str) -> bool {
        self.grants.contains(grant)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.grants.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for GrantSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            grants: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: Into<String>> Extend<S> for GrantSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.grants.extend(iter.into_iter().map(Into::into));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidGrantReason {
    EmptySuffix,
    NotDigits,
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidGrant {
    pub grant: String,
    pub reason: InvalidGrantReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundResolution {
    /// Aggregated bound, clamped to at least 1.
    pub value: u32,
    /// At least one numeric or wildcard grant for the prefix was present.
    pub matched: bool,
    /// The scan stopped at a `<prefix>.*` grant.
    pub wildcard: bool,
    pub invalid: Vec<InvalidGrant>,
}

impl BoundResolution {
    pub fn even_value(&self) -> u32 {
        round_down_to_even(self.value)
    }
}

/// Resolves the bound `holder` may have for the capability `prefix`.
///
/// Starts from `baseline` and raises it to the largest numeric suffix among
/// `<prefix>.<digits>` grants. Malformed suffixes are reported and skipped.
/// A `<prefix>.*` grant stops the scan without raising the result. The
/// returned value is never below 1.
pub fn resolve_bound(holder: &str, grants: &GrantSet, prefix: &str, baseline: u32) -> u32 {
    resolve_bound_detailed(holder, grants, prefix, baseline).value
}

pub fn resolve_bound_detailed(
    holder: &str,
    grants: &GrantSet,
    prefix: &str,
    baseline: u32,
) -> BoundResolution {
    let scoped = format!("{prefix}.");
    let mut resolution = BoundResolution {
        value: baseline,
        matched: false,
        wildcard: false,
        invalid: Vec::new(),
    };

    for grant in grants.iter() {
        let Some(suffix) = grant.strip_prefix(scoped.as_str()) else {
            continue;
        };
        if suffix == WILDCARD_SUFFIX {
            // Wildcard ends the pass; it does not lift the bound.
            resolution.matched = true;
            resolution.wildcard = true;
            break;
        }
        match parse_suffix(suffix) {
            Ok(value) => {
                resolution.matched = true;
                resolution.value = resolution.value.max(value);
            }
            Err(reason) => {
                warn!(
                    holder,
                    grant,
                    reason = ?reason,
                    "invalid_capability_grant_last_part_must_be_a_number"
                );
                resolution.invalid.push(InvalidGrant {
                    grant: grant.to_string(),
                    reason,
                });
            }
        }
    }

    if resolution.value < 1 {
        resolution.value = 1;
    }
    resolution
}

pub fn round_down_to_even(value: u32) -> u32 {
    value - (value % 2)
}

fn parse_suffix(suffix: &str) -> Result<u32, InvalidGrantReason> {
    if suffix.is_empty() {
        return Err(InvalidGrantReason::EmptySuffix);
    }
    if !suffix.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(InvalidGrantReason::NotDigits);
    }
    suffix
        .parse::<u32>()
        .map_err(|_| InvalidGrantReason::OutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "bskyblock.island.range";

    fn grants(values: &[&str]) -> GrantSet {
        values.iter().copied().collect()
    }

    #[test]
    fn empty_set_returns_baseline() {
        assert_eq!(resolve_bound("a", &GrantSet::new(), PREFIX, 80), 80);
    }

    #[test]
    fn empty_set_clamps_baseline_to_one() {
        assert_eq!(resolve_bound("a", &GrantSet::new(), PREFIX, 0), 1);
    }

    #[test]
    fn largest_numeric_grant_wins() {
        let set = grants(&[
            "bskyblock.island.range.50",
            "bskyblock.island.range.300",
            "bskyblock.island.range.120",
        ]);
        assert_eq!(resolve_bound("a", &set, PREFIX, 80), 300);
    }

    #[test]
    fn grants_below_baseline_do_not_lower_it() {
        let set = grants(&["bskyblock.island.range.20"]);
        let resolution = resolve_bound_detailed("a", &set, PREFIX, 80);
        assert_eq!(resolution.value, 80);
        assert!(resolution.matched);
    }

    #[test]
    fn adding_a_larger_grant_never_decreases_the_result() {
        let mut set = grants(&["bskyblock.island.range.90", "other.perm"]);
        let mut previous = resolve_bound("a", &set, PREFIX, 10);
        for suffix in [40, 90, 91, 500, 501] {
            set.insert(format!("{PREFIX}.{suffix}"));
            let next = resolve_bound("a", &set, PREFIX, 10);
            assert!(next >= previous, "{next} < {previous}");
            previous = next;
        }
        assert_eq!(previous, 501);
    }

    #[test]
    fn unrelated_and_duplicate_grants_are_ignored() {
        let mut set = grants(&[
            "bskyblock.island.rangefinder.999",
            "bskyblock.island.maxhomes.9",
            "island.range.400",
        ]);
        set.insert("bskyblock.island.range.100");
        set.insert("bskyblock.island.range.100");
        let resolution = resolve_bound_detailed("a", &set, PREFIX, 80);
        assert_eq!(resolution.value, 100);
        assert!(resolution.invalid.is_empty());
    }

    #[test]
    fn non_digit_suffix_is_skipped_and_reported() {
        let set = grants(&["bskyblock.island.range.abc", "bskyblock.island.range.120"]);
        let resolution = resolve_bound_detailed("a", &set, PREFIX, 80);
        assert_eq!(resolution.value, 120);
        assert_eq!(
            resolution.invalid,
            vec![InvalidGrant {
                grant: "bskyblock.island.range.abc".to_string(),
                reason: InvalidGrantReason::NotDigits,
            }]
        );
    }

    #[test]
    fn only_invalid_grants_leave_result_at_baseline_and_unmatched() {
        let set = grants(&["bskyblock.island.range.-5", "bskyblock.island.range."]);
        let resolution = resolve_bound_detailed("a", &set, PREFIX, 80);
        assert_eq!(resolution.value, 80);
        assert!(!resolution.matched);
        assert_eq!(resolution.invalid.len(), 2);
    }

    #[test]
    fn suffix_too_large_for_bound_is_invalid() {
        let set = grants(&["bskyblock.island.range.99999999999"]);
        let resolution = resolve_bound_detailed("a", &set, PREFIX, 80);
        assert_eq!(resolution.value, 80);
        assert_eq!(resolution.invalid[0].reason, InvalidGrantReason::OutOfRange);
    }

    // Documented ambiguity: the wildcard stops the scan instead of acting
    // as "unlimited". Because grants are visited in order and '*' sorts
    // before every digit, numeric grants next to a wildcard are never seen.
    #[test]
    fn wildcard_short_circuits_without_raising() {
        let set = grants(&["bskyblock.island.range.*", "bskyblock.island.range.500"]);
        let resolution = resolve_bound_detailed("a", &set, PREFIX, 80);
        assert_eq!(resolution.value, 80);
        assert!(resolution.wildcard);
        assert!(resolution.matched);
    }

    #[test]
    fn wildcard_result_is_still_clamped() {
        let set = grants(&["bskyblock.island.range.*"]);
        assert_eq!(resolve_bound("a", &set, PREFIX, 0), 1);
    }

    #[test]
    fn even_rounding_decrements_odd_values() {
        for value in [1u32, 3, 77, 101, u32::MAX] {
            let rounded = round_down_to_even(value);
            assert_eq!(rounded, value - 1);
            assert_eq!(rounded % 2, 0);
        }
        assert_eq!(round_down_to_even(0), 0);
        assert_eq!(round_down_to_even(100), 100);
    }

    #[test]
    fn even_value_applies_rounding_to_resolution() {
        let set = grants(&["bskyblock.island.range.151"]);
        let resolution = resolve_bound_detailed("a", &set, PREFIX, 80);
        assert_eq!(resolution.value, 151);
        assert_eq!(resolution.even_value(), 150);
    }
}
