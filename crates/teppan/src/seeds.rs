//! Seed specifications.
//!
//! A seed is both the key of a sample's random generator and the stem of the file it
//! is written to. Seed specs are either an explicit list, passed through untouched,
//! or text such as `1,2,5-10`.

use std::fmt;
use std::str::FromStr;
use crate::error::{GenerationError, Result};

/// Identifies one reproducible sample.
pub type Seed = u64;

/// Seeds requested for a run, either as a list or in the textual range grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedSpec {
    /// Used as is, duplicates and order included
    List(Vec<Seed>),

    /// Comma separated tokens, each `N` or an inclusive range `A-B`
    Text(String),
}

impl SeedSpec {
    /// Expand the seed spec into the ordered seed sequence it names.
    pub fn parse(&self) -> Result<Vec<Seed>> {
        match self {
            SeedSpec::List(seeds) => Ok(seeds.clone()),
            SeedSpec::Text(text) => parse_seeds(text),
        }
    }
}

impl Default for SeedSpec {
    fn default() -> Self {
        SeedSpec::Text("0-63".to_string())
    }
}

impl From<Vec<Seed>> for SeedSpec {
    fn from(seeds: Vec<Seed>) -> Self {
        SeedSpec::List(seeds)
    }
}

impl From<&str> for SeedSpec {
    fn from(text: &str) -> Self {
        SeedSpec::Text(text.to_string())
    }
}

impl From<String> for SeedSpec {
    fn from(text: String) -> Self {
        SeedSpec::Text(text)
    }
}

/// Parsing validates eagerly, so a spec obtained this way always expands.
impl FromStr for SeedSpec {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self> {
        parse_seeds(s)?;
        Ok(SeedSpec::Text(s.to_string()))
    }
}

impl fmt::Display for SeedSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedSpec::Text(text) => f.write_str(text),
            SeedSpec::List(seeds) => {
                let joined = seeds.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(",");
                f.write_str(&joined)
            }
        }
    }
}

/// Parse a comma separated list of seeds and inclusive ranges.
///
/// `"1,2,5-7"` yields `[1, 2, 5, 6, 7]`. Pieces are concatenated in textual order
/// without sorting or deduplication. Any malformed token fails the whole parse.
pub fn parse_seeds(spec: &str) -> Result<Vec<Seed>> {
    let mut seeds = Vec::new();
    for piece in spec.split(',') {
        let token = piece.trim();
        match token.split_once('-') {
            Some((start, end)) => {
                let start = parse_bound(token, start)?;
                let end = parse_bound(token, end)?;
                if start > end {
                    return Err(GenerationError::InvalidSeedSpec {
                        token: token.to_string(),
                        reason: "range start exceeds range end",
                    });
                }
                seeds.extend(start..=end);
            }
            None => seeds.push(parse_bound(token, token)?),
        }
    }
    Ok(seeds)
}

fn parse_bound(token: &str, digits: &str) -> Result<Seed> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GenerationError::InvalidSeedSpec {
            token: token.to_string(),
            reason: "expected a non-negative integer or a range A-B",
        });
    }
    digits.parse::<Seed>().map_err(|_| GenerationError::InvalidSeedSpec {
        token: token.to_string(),
        reason: "seed does not fit in 64 bits",
    })
}
