//! Minority-report divergence detection.
//!
//! A consensus ranking is built from the Borda scores the rating engine
//! already computes; each ballot's Spearman footrule distance from that
//! consensus measures how much one voter disagreed with the room. A
//! session gets a minority report when at least one ballot's distance
//! clears the tunable threshold `⌊n·(n−1)/4⌋`.

use crate::models::Vote;
use std::collections::BTreeMap;

/// Sorts labels by descending Borda score, breaking ties lexicographically
/// by label so the ordering is total and reproducible.
pub fn consensus_ranking(borda: &BTreeMap<String, f64>) -> Vec<String> {
    let mut ranked: Vec<(&String, &f64)> = borda.iter().collect();
    ranked.sort_by(|(label_a, score_a), (label_b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| label_a.cmp(label_b))
    });
    ranked.into_iter().map(|(label, _)| label.clone()).collect()
}

/// The default divergence threshold for `n` ranked labels.
pub fn default_threshold(n: usize) -> u64 {
    (n * n.saturating_sub(1) / 4) as u64
}

/// Spearman footrule distance between a ballot and the consensus ranking,
/// restricted to labels present in both.
fn footrule_distance(consensus: &[String], ballot: &[String]) -> u64 {
    let positions: BTreeMap<&String, usize> =
        consensus.iter().enumerate().map(|(i, label)| (label, i)).collect();

    ballot
        .iter()
        .enumerate()
        .filter_map(|(ballot_pos, label)| {
            positions
                .get(label)
                .map(|&consensus_pos| (ballot_pos as i64 - consensus_pos as i64).unsigned_abs())
        })
        .sum()
}

#[derive(Debug, Clone)]
pub struct DivergenceResult {
    pub consensus: Vec<String>,
    pub diverging_voters: Vec<String>,
    pub distances: BTreeMap<String, u64>,
}

impl DivergenceResult {
    pub fn has_minority_report(&self) -> bool {
        !self.diverging_voters.is_empty()
    }
}

pub fn detect_minority_report(
    consensus: &[String],
    votes: &[Vote],
    threshold: u64,
) -> DivergenceResult {
    let mut diverging_voters = Vec::new();
    let mut distances = BTreeMap::new();

    for vote in votes {
        let distance = footrule_distance(consensus, &vote.ranked_responses);
        distances.insert(vote.voter_id.clone(), distance);
        if distance > threshold {
            diverging_voters.push(vote.voter_id.clone());
        }
    }

    DivergenceResult {
        consensus: consensus.to_vec(),
        diverging_voters,
        distances,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionId, VoterType};
    use chrono::Utc;

    fn vote(voter_id: &str, ranked: &[&str]) -> Vote {
        Vote {
            id: 0,
            session_id: SessionId::nil(),
            voter_type: VoterType::User,
            voter_id: voter_id.to_string(),
            ranked_responses: ranked.iter().map(|s| s.to_string()).collect(),
            weight: 1.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn identical_ballot_has_zero_distance_from_consensus() {
        let consensus = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let ballots = vec![vote("v1", &["A", "B", "C"])];
        let result = detect_minority_report(&consensus, &ballots, default_threshold(3));
        assert_eq!(result.distances["v1"], 0);
        assert!(!result.has_minority_report());
    }

    #[test]
    fn fully_reversed_ballot_triggers_minority_report() {
        let consensus = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let ballots = vec![vote("v1", &["C", "B", "A"])];
        let result = detect_minority_report(&consensus, &ballots, default_threshold(3));
        assert!(result.has_minority_report());
        assert!(result.diverging_voters.contains(&"v1".to_string()));
    }

    #[test]
    fn consensus_ranking_breaks_ties_lexicographically() {
        let mut borda = BTreeMap::new();
        borda.insert("B".to_string(), 5.0);
        borda.insert("A".to_string(), 5.0);
        assert_eq!(consensus_ranking(&borda), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn default_threshold_matches_the_floor_formula() {
        assert_eq!(default_threshold(4), 3);
        assert_eq!(default_threshold(3), 1);
        assert_eq!(default_threshold(2), 0);
    }

    #[test]
    fn two_label_unanimous_ballots_do_not_trigger_a_minority_report() {
        // default_threshold(2) floors to 0 -- a strict `>` comparison is
        // load-bearing here, since `>=` would flag every zero-distance
        // ballot in every 2-participant session (including every
        // tournament 1v1 match).
        let consensus = vec!["A".to_string(), "B".to_string()];
        let ballots = vec![vote("v1", &["A", "B"]), vote("v2", &["A", "B"])];
        let result = detect_minority_report(&consensus, &ballots, default_threshold(2));
        assert!(!result.has_minority_report());
    }
}
