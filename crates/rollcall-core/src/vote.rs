//! Winner resolution over ranked gallery-search candidates.
//!
//! A search can return several rows for the same student (one per enrolled
//! image that matched), so picking the winner is a policy decision rather
//! than a top-1 lookup.

use crate::types::MatchCandidate;
use std::str::FromStr;

/// How to collapse a candidate list into a single winning identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VotePolicy {
    /// Statistical mode over all candidate rows; ties broken by
    /// first-encountered order. Robust when students have several
    /// enrolled shots.
    #[default]
    Majority,
    /// Best-distance row wins. The degraded policy for matchers that only
    /// surface a single row per search.
    Closest,
}

impl FromStr for VotePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "majority" => Ok(VotePolicy::Majority),
            "closest" => Ok(VotePolicy::Closest),
            other => Err(format!("unknown vote policy '{other}' (expected 'majority' or 'closest')")),
        }
    }
}

/// Resolve the winning identity for one face, or `None` when there are no
/// candidates to vote over.
pub fn resolve_identity(candidates: &[MatchCandidate], policy: VotePolicy) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }

    match policy {
        VotePolicy::Majority => {
            // First-encountered order doubles as the tie-break, so count in
            // an order-preserving list rather than a hash map.
            let mut tally: Vec<(&str, usize)> = Vec::new();
            for candidate in candidates {
                match tally.iter_mut().find(|(id, _)| *id == candidate.identity) {
                    Some((_, count)) => *count += 1,
                    None => tally.push((&candidate.identity, 1)),
                }
            }
            // Strict > keeps the earliest entry on a tied count.
            let mut winner: Option<(&str, usize)> = None;
            for &(id, count) in &tally {
                if winner.map_or(true, |(_, best)| count > best) {
                    winner = Some((id, count));
                }
            }
            winner.map(|(id, _)| id.to_string())
        }
        VotePolicy::Closest => candidates
            .iter()
            .min_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|c| c.identity.clone()),
    }
}
