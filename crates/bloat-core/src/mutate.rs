//! Per-type mutation strategies.
//!
//! Each strategy is a pure function from an [`Input`] to a new literal
//! string. Strategies are fallible: a literal the strategy cannot handle
//! (e.g. `INFINITY` fed to Perturb) surfaces as an error and the caller
//! falls back to Random. Selection is probabilistic and driven by the
//! configured [`StrategyWeights`]; the registry is an explicit value, not
//! ambient global state.

use crate::template::Input;
use bloat_common::config::StrategyWeights;
use bloat_common::ctype::{CType, CHARACTERS};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Names of the available mutation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Uniform draw over the type's full representable range.
    Random,
    /// Draw from a small per-type edge-condition set.
    Boundary,
    /// Bounded random delta applied to the existing value.
    Perturb,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Random => "random",
            StrategyKind::Boundary => "boundary",
            StrategyKind::Perturb => "perturb",
        };
        write!(f, "{s}")
    }
}

/// Why a strategy could not produce a value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MutateError {
    /// The input never resolved a concrete type; it is unusable for mutation.
    #[error("input `{0}` has no resolved type")]
    UntypedInput(String),

    /// The current literal cannot be interpreted by this strategy
    /// (e.g. `INFINITY` is not a parsable number).
    #[error("literal `{0}` is not supported by this strategy")]
    UnsupportedLiteral(String),
}

/// A mutation strategy: `Input -> new literal`.
pub trait MutationStrategy: Send + Sync {
    /// Which strategy this is, for telemetry.
    fn kind(&self) -> StrategyKind;

    /// Produce a new literal for `input`.
    ///
    /// # Errors
    ///
    /// Returns [`MutateError`] when the input's type or current literal is
    /// outside what the strategy supports.
    fn mutate(&self, input: &Input, rng: &mut dyn RngCore) -> Result<String, MutateError>;
}

fn random_char(rng: &mut dyn RngCore) -> char {
    let bytes = CHARACTERS.as_bytes();
    bytes[rng.gen_range(0..bytes.len())] as char
}

fn require_type(input: &Input) -> Result<CType, MutateError> {
    input
        .ty
        .ok_or_else(|| MutateError::UntypedInput(input.name.clone()))
}

/// Whether the input should receive an aggregate (brace/quote) literal.
fn aggregate_len(input: &Input) -> Option<usize> {
    if input.is_declared {
        input.length
    } else {
        None
    }
}

/// Uniform draw over the type's full representable range.
#[derive(Debug, Default, Clone, Copy)]
pub struct Random;

impl Random {
    fn scalar(ty: CType, rng: &mut dyn RngCore) -> String {
        if let Some((lo, hi)) = ty.int_range() {
            rng.gen_range(lo..=hi).to_string()
        } else if let Some((lo, hi)) = ty.float_range() {
            format!("{:e}", rng.gen_range(lo..=hi))
        } else {
            format!("'{}'", random_char(rng))
        }
    }
}

impl MutationStrategy for Random {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }

    fn mutate(&self, input: &Input, rng: &mut dyn RngCore) -> Result<String, MutateError> {
        let ty = require_type(input)?;
        let Some(len) = aggregate_len(input) else {
            return Ok(Self::scalar(ty, rng));
        };
        if ty == CType::Char {
            // One random character per byte, minus the terminating NUL.
            let content: String = (0..len.saturating_sub(1)).map(|_| random_char(rng)).collect();
            Ok(format!("\"{content}\""))
        } else {
            let items: Vec<String> = (0..len).map(|_| Self::scalar(ty, rng)).collect();
            Ok(format!("{{{}}}", items.join(", ")))
        }
    }
}

/// Draw from a small fixed per-type set to probe edge conditions.
#[derive(Debug, Default, Clone, Copy)]
pub struct Boundary;

impl Boundary {
    fn scalar(ty: CType, rng: &mut dyn RngCore) -> String {
        if let Some((lo, hi)) = ty.int_range() {
            let set = [lo, hi, -1, 0, 1];
            set[rng.gen_range(0..set.len())].to_string()
        } else if let Some((lo, hi)) = ty.float_range() {
            // Near-unit edges differ per precision.
            let (below, above) = if ty == CType::Double {
                (-1.1514, 1.1515)
            } else {
                (-1.15, 1.15)
            };
            let set = [lo, hi, below, 0.0, above];
            format!("{:e}", set[rng.gen_range(0..set.len())])
        } else {
            // NUL probes string-termination edge conditions.
            "'\\0'".to_string()
        }
    }
}

impl MutationStrategy for Boundary {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Boundary
    }

    fn mutate(&self, input: &Input, rng: &mut dyn RngCore) -> Result<String, MutateError> {
        let ty = require_type(input)?;
        let Some(len) = aggregate_len(input) else {
            return Ok(Self::scalar(ty, rng));
        };
        if ty == CType::Char {
            let content = "\\0".repeat(len.saturating_sub(1));
            Ok(format!("\"{content}\""))
        } else {
            // One boundary value repeated across all elements.
            let value = Self::scalar(ty, rng);
            let items = vec![value; len];
            Ok(format!("{{{}}}", items.join(", ")))
        }
    }
}

/// Add a bounded random delta to the existing value.
#[derive(Debug, Clone, Copy)]
pub struct Perturb {
    /// Retries for an out-of-range delta before giving up.
    pub max_tries: u32,
}

impl Default for Perturb {
    fn default() -> Self {
        Self { max_tries: 10 }
    }
}

impl Perturb {
    fn perturb_int(
        &self,
        literal: &str,
        lo: i64,
        hi: i64,
        rng: &mut dyn RngCore,
    ) -> Result<String, MutateError> {
        let value: i64 = literal
            .trim()
            .parse()
            .map_err(|_| MutateError::UnsupportedLiteral(literal.to_string()))?;
        for _ in 0..self.max_tries {
            let delta = rng.gen_range(lo..=hi);
            if let Some(sum) = value.checked_add(delta) {
                if (lo..=hi).contains(&sum) {
                    return Ok(sum.to_string());
                }
            }
        }
        Err(MutateError::UnsupportedLiteral(literal.to_string()))
    }

    fn perturb_float(
        &self,
        literal: &str,
        lo: f64,
        hi: f64,
        rng: &mut dyn RngCore,
    ) -> Result<String, MutateError> {
        let value: f64 = literal
            .trim()
            .parse()
            .map_err(|_| MutateError::UnsupportedLiteral(literal.to_string()))?;
        if !value.is_finite() {
            return Err(MutateError::UnsupportedLiteral(literal.to_string()));
        }
        for _ in 0..self.max_tries {
            let delta = rng.gen_range(lo..=hi);
            let sum = value + delta;
            if sum.is_finite() && (lo..=hi).contains(&sum) {
                return Ok(format!("{sum:e}"));
            }
        }
        Err(MutateError::UnsupportedLiteral(literal.to_string()))
    }

    fn perturb_scalar(
        &self,
        ty: CType,
        literal: &str,
        rng: &mut dyn RngCore,
    ) -> Result<String, MutateError> {
        if let Some((lo, hi)) = ty.int_range() {
            self.perturb_int(literal, lo, hi, rng)
        } else if let Some((lo, hi)) = ty.float_range() {
            self.perturb_float(literal, lo, hi, rng)
        } else {
            Ok(format!("'{}'", random_char(rng)))
        }
    }

    /// Single-character edit: append while under the declared length,
    /// otherwise substitute at a random index.
    fn edit_string(literal: &str, max_len: usize, rng: &mut dyn RngCore) -> String {
        let content = literal.trim().trim_matches('"');
        let mut chars: Vec<char> = content.chars().collect();
        let edit = random_char(rng);
        if chars.len() + 1 < max_len {
            chars.push(edit);
        } else if !chars.is_empty() {
            let index = rng.gen_range(0..chars.len());
            chars[index] = edit;
        } else {
            chars.push(edit);
        }
        let edited: String = chars.into_iter().collect();
        format!("\"{edited}\"")
    }
}

impl MutationStrategy for Perturb {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Perturb
    }

    fn mutate(&self, input: &Input, rng: &mut dyn RngCore) -> Result<String, MutateError> {
        let ty = require_type(input)?;
        let Some(len) = aggregate_len(input) else {
            return self.perturb_scalar(ty, &input.value, rng);
        };
        if ty == CType::Char {
            return Ok(Self::edit_string(&input.value, len, rng));
        }
        let trimmed = input.value.trim();
        let Some(body) = trimmed
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
        else {
            return Err(MutateError::UnsupportedLiteral(input.value.clone()));
        };
        let items: Result<Vec<String>, MutateError> = body
            .split(',')
            .map(|item| self.perturb_scalar(ty, item, rng))
            .collect();
        Ok(format!("{{{}}}", items?.join(", ")))
    }
}

/// The strategy registry plus the probabilistic selector.
///
/// A continuous draw in [0,1] maps to Random for the bottom of the mass,
/// Boundary for the next band, and Perturb for the remainder. Any strategy
/// failure falls back to Random, which only depends on the input's type.
pub struct Mutator {
    random: Random,
    boundary: Boundary,
    perturb: Perturb,
    weights: StrategyWeights,
}

impl Mutator {
    /// Build a registry with the given selection weights and Perturb budget.
    pub fn new(weights: StrategyWeights, perturb_max_tries: u32) -> Self {
        Self {
            random: Random,
            boundary: Boundary,
            perturb: Perturb {
                max_tries: perturb_max_tries,
            },
            weights,
        }
    }

    fn strategy(&self, kind: StrategyKind) -> &dyn MutationStrategy {
        match kind {
            StrategyKind::Random => &self.random,
            StrategyKind::Boundary => &self.boundary,
            StrategyKind::Perturb => &self.perturb,
        }
    }

    /// Weighted strategy selection.
    pub fn choose(&self, rng: &mut dyn RngCore) -> StrategyKind {
        let draw: f64 = rng.gen_range(0.0..1.0);
        if draw < self.weights.random {
            StrategyKind::Random
        } else if draw < self.weights.random + self.weights.boundary {
            StrategyKind::Boundary
        } else {
            StrategyKind::Perturb
        }
    }

    /// Mutate with a specific strategy.
    ///
    /// # Errors
    ///
    /// Propagates the strategy's [`MutateError`] without falling back.
    pub fn mutate_with(
        &self,
        kind: StrategyKind,
        input: &Input,
        rng: &mut dyn RngCore,
    ) -> Result<String, MutateError> {
        self.strategy(kind).mutate(input, rng)
    }

    /// Mutate with a weighted-random strategy, falling back to Random on
    /// any strategy failure. Returns the new literal and the strategy that
    /// actually produced it.
    pub fn mutate(&self, input: &Input, rng: &mut dyn RngCore) -> (String, StrategyKind) {
        let kind = self.choose(rng);
        match self.mutate_with(kind, input, rng) {
            Ok(value) => (value, kind),
            Err(_) => match self.mutate_with(StrategyKind::Random, input, rng) {
                Ok(value) => (value, StrategyKind::Random),
                Err(e) => {
                    // Only reachable for untyped inputs, which the loader
                    // filters out before seeding.
                    warn!(input = %input.name, error = %e, "mutation failed, keeping value");
                    (input.value.clone(), StrategyKind::Random)
                }
            },
        }
    }
}

impl Default for Mutator {
    fn default() -> Self {
        Self::new(StrategyWeights::default(), Perturb::default().max_tries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Scope;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn scalar_input(ty: CType, value: &str) -> Input {
        Input::new("x", value, Scope::Global, true, Some(ty), None, false)
    }

    fn array_input(ty: CType, value: &str, len: usize) -> Input {
        Input::new("arr", value, Scope::Global, true, Some(ty), Some(len), true)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0x00b1_0a7f)
    }

    #[test]
    fn test_random_int_stays_in_range() {
        // Random values must lie within the type's documented range.
        let mut rng = rng();
        for ty in [CType::Int, CType::Short, CType::Long] {
            let (lo, hi) = ty.int_range().unwrap();
            let input = scalar_input(ty, "0");
            for _ in 0..200 {
                let value = Random.mutate(&input, &mut rng).unwrap();
                let parsed: i64 = value.parse().unwrap();
                assert!((lo..=hi).contains(&parsed), "{ty}: {parsed} out of range");
            }
        }
    }

    #[test]
    fn test_random_float_stays_in_range() {
        let mut rng = rng();
        for ty in [CType::Float, CType::Double] {
            let (lo, hi) = ty.float_range().unwrap();
            let input = scalar_input(ty, "0.0");
            for _ in 0..200 {
                let value = Random.mutate(&input, &mut rng).unwrap();
                let parsed: f64 = value.parse().unwrap();
                assert!((lo..=hi).contains(&parsed), "{ty}: {parsed} out of range");
            }
        }
    }

    #[test]
    fn test_random_array_and_string_shapes() {
        let mut rng = rng();
        let arr = Random
            .mutate(&array_input(CType::Int, "{0, 0, 0}", 3), &mut rng)
            .unwrap();
        assert!(arr.starts_with('{') && arr.ends_with('}'));
        assert_eq!(arr.matches(',').count(), 2);

        let s = Random
            .mutate(&array_input(CType::Char, "\"abcdefg\"", 8), &mut rng)
            .unwrap();
        assert!(s.starts_with('"') && s.ends_with('"'));
        assert_eq!(s.len(), 2 + 7); // quotes + (len - 1) characters
    }

    #[test]
    fn test_boundary_draws_from_fixed_set() {
        let mut rng = rng();
        let input = scalar_input(CType::Int, "5");
        let set: Vec<i64> = vec![
            bloat_common::ctype::INT_MIN,
            bloat_common::ctype::INT_MAX,
            -1,
            0,
            1,
        ];
        for _ in 0..100 {
            let value: i64 = Boundary.mutate(&input, &mut rng).unwrap().parse().unwrap();
            assert!(set.contains(&value), "{value} is not a boundary value");
        }
    }

    #[test]
    fn test_boundary_float_sets_differ_by_precision() {
        let mut rng = rng();
        let float_set = [
            bloat_common::ctype::FLOAT_MIN,
            bloat_common::ctype::FLOAT_MAX,
            -1.15,
            0.0,
            1.15,
        ];
        let double_set = [
            bloat_common::ctype::DOUBLE_MIN,
            bloat_common::ctype::DOUBLE_MAX,
            -1.1514,
            0.0,
            1.1515,
        ];
        for (ty, set) in [(CType::Float, float_set), (CType::Double, double_set)] {
            let input = scalar_input(ty, "0.0");
            for _ in 0..100 {
                let value: f64 = Boundary.mutate(&input, &mut rng).unwrap().parse().unwrap();
                assert!(set.contains(&value), "{ty}: {value} is not a boundary value");
            }
        }
    }

    #[test]
    fn test_boundary_char_is_nul() {
        let mut rng = rng();
        let scalar = Boundary
            .mutate(&scalar_input(CType::Char, "'a'"), &mut rng)
            .unwrap();
        assert_eq!(scalar, "'\\0'");
        let string = Boundary
            .mutate(&array_input(CType::Char, "\"abc\"", 4), &mut rng)
            .unwrap();
        assert_eq!(string, "\"\\0\\0\\0\"");
    }

    #[test]
    fn test_perturb_stays_in_range() {
        let mut rng = rng();
        let input = scalar_input(CType::Short, "100");
        for _ in 0..100 {
            if let Ok(value) = Perturb::default().mutate(&input, &mut rng) {
                let parsed: i64 = value.parse().unwrap();
                assert!((bloat_common::ctype::SHORT_MIN..=bloat_common::ctype::SHORT_MAX)
                    .contains(&parsed));
            }
        }
    }

    #[test]
    fn test_perturb_rejects_unparsable_literal() {
        let mut rng = rng();
        let input = scalar_input(CType::Double, "INFINITY");
        let err = Perturb::default().mutate(&input, &mut rng).unwrap_err();
        assert_eq!(err, MutateError::UnsupportedLiteral("INFINITY".to_string()));
    }

    #[test]
    fn test_perturb_string_edit_respects_length() {
        let mut rng = rng();
        // Room to grow: append one character.
        let grown = Perturb::edit_string("\"ab\"", 8, &mut rng);
        assert_eq!(grown.len(), 2 + 3);
        // At capacity (3 chars + NUL in length 4): substitute instead.
        let edited = Perturb::edit_string("\"abc\"", 4, &mut rng);
        assert_eq!(edited.len(), 2 + 3);
    }

    #[test]
    fn test_untyped_input_is_rejected() {
        let mut rng = rng();
        let input = Input::new("x", "0", Scope::Local, false, None, None, false);
        assert!(matches!(
            Random.mutate(&input, &mut rng),
            Err(MutateError::UntypedInput(_))
        ));
    }

    #[test]
    fn test_mutator_falls_back_to_random() {
        let mut rng = rng();
        // All weight on Perturb, which cannot handle INFINITY; the registry
        // must fall back to Random rather than failing the round.
        let weights = StrategyWeights {
            random: 0.0,
            boundary: 0.0,
        };
        let mutator = Mutator::new(weights, 10);
        let input = scalar_input(CType::Double, "INFINITY");
        let (value, kind) = mutator.mutate(&input, &mut rng);
        assert_eq!(kind, StrategyKind::Random);
        assert!(value.parse::<f64>().is_ok());
    }

    #[test]
    fn test_weighted_choice_distribution() {
        let mut rng = rng();
        let mutator = Mutator::default();
        let mut counts = [0u32; 3];
        for _ in 0..2000 {
            match mutator.choose(&mut rng) {
                StrategyKind::Random => counts[0] += 1,
                StrategyKind::Boundary => counts[1] += 1,
                StrategyKind::Perturb => counts[2] += 1,
            }
        }
        // Coarse sanity on the 0.60 / 0.15 / 0.25 split.
        assert!(counts[0] > counts[1]);
        assert!(counts[0] > counts[2]);
        assert!(counts[1] > 0 && counts[2] > 0);
    }
}
