//! Elo-style pairwise rating engine.
//!
//! Every unordered pair of participants is scored directly off the ballots
//! that rank both of them: count how many of those ballots put A above B
//! versus B above A, divide by how many ballots contributed, and fold that
//! fractional score into each participant's Elo rating as one accumulated
//! (summed, not averaged) update. Every function here is pure and
//! deterministic given its inputs, so the engine is exercised entirely
//! through unit tests without a store or provider in the loop.

use crate::models::{Matchup, ModelId, ModelRating, RatingChangeReason, Vote};
use crate::store::RatingUpdate;
use std::collections::BTreeMap;

/// Pairwise match outcome derived from the consensus ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Win,
    Loss,
    Draw,
}

pub struct RatingEngine {
    pub k_provisional: f64,
    pub k_elite: f64,
    pub k_standard: f64,
    pub provisional_games_threshold: u32,
    pub elite_rating_threshold: i64,
}

impl RatingEngine {
    pub fn new(
        k_provisional: f64,
        k_elite: f64,
        k_standard: f64,
        provisional_games_threshold: u32,
        elite_rating_threshold: i64,
    ) -> Self {
        Self {
            k_provisional,
            k_elite,
            k_standard,
            provisional_games_threshold,
            elite_rating_threshold,
        }
    }

    /// Step 4: the K-factor widens for newcomers and narrows for the
    /// established elite so a handful of sessions can't swing a veteran's
    /// rating as much as a freshly-seen model's.
    fn k_factor(&self, games_played: u64, rating: i64) -> f64 {
        if games_played < self.provisional_games_threshold as u64 {
            self.k_provisional
        } else if rating >= self.elite_rating_threshold {
            self.k_elite
        } else {
            self.k_standard
        }
    }

    /// Step 2: `Σ(|ranks| − position) · voter_weight` per label, summed
    /// across every ballot that mentions it.
    pub fn borda_scores(votes: &[Vote]) -> BTreeMap<String, f64> {
        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        for vote in votes {
            let n = vote.ranked_responses.len();
            for (position, label) in vote.ranked_responses.iter().enumerate() {
                let points = (n - position) as f64 * vote.weight;
                *scores.entry(label.clone()).or_insert(0.0) += points;
            }
        }
        scores
    }

    /// Step 3: expected score of `a` against `b` from the current Elo
    /// ratings: `E(A,B) = 1 / (1 + 10^((R_B - R_A)/400))`.
    pub fn expected_score(rating_a: i64, rating_b: i64) -> f64 {
        1.0 / (1.0 + 10f64.powf((rating_b - rating_a) as f64 / 400.0))
    }

    /// Steps 1-2: tallies every ballot that ranks both `label_a` and
    /// `label_b`, and returns `(sA, sB)` -- the fraction of those ballots
    /// that ranked each one above the other -- or `None` if no ballot
    /// ranks both (the pair never faced each other and contributes no
    /// score, not a tie).
    fn pairwise_score(label_a: &str, label_b: &str, votes: &[Vote]) -> Option<(f64, f64)> {
        let mut wins_a = 0u64;
        let mut wins_b = 0u64;
        for vote in votes {
            let pos_a = vote.ranked_responses.iter().position(|l| l == label_a);
            let pos_b = vote.ranked_responses.iter().position(|l| l == label_b);
            if let (Some(pos_a), Some(pos_b)) = (pos_a, pos_b) {
                if pos_a < pos_b {
                    wins_a += 1;
                } else {
                    wins_b += 1;
                }
            }
        }
        let n = wins_a + wins_b;
        if n == 0 {
            None
        } else {
            Some((wins_a as f64 / n as f64, wins_b as f64 / n as f64))
        }
    }

    /// Steps 5-9: given each participant's current rating and the
    /// ballots cast this session, compute the absolute replacement
    /// rating for every participant plus the matchup deltas that the
    /// head-to-head comparisons imply.
    pub fn compute_session_update(
        &self,
        participants: &[ModelId],
        labels: &BTreeMap<ModelId, String>,
        current: &BTreeMap<ModelId, ModelRating>,
        votes: &[Vote],
        session_id: Option<crate::models::SessionId>,
        category_id: Option<&str>,
    ) -> (Vec<RatingUpdate>, Vec<Matchup>) {
        let mut deltas: BTreeMap<ModelId, Vec<f64>> = BTreeMap::new();
        let mut wld: BTreeMap<ModelId, (u64, u64, u64)> = BTreeMap::new();
        let mut matchups = Vec::new();

        for i in 0..participants.len() {
            for j in (i + 1)..participants.len() {
                let (model_a, model_b) = (&participants[i], &participants[j]);
                let (Some(label_a), Some(label_b)) = (labels.get(model_a), labels.get(model_b))
                else {
                    continue;
                };
                // No ballot ranked both of them -- they never faced each
                // other this session, so the pair contributes nothing.
                let Some((score_a, score_b)) = Self::pairwise_score(label_a, label_b, votes)
                else {
                    continue;
                };

                let rating_a = current.get(model_a).map(|r| r.rating).unwrap_or(1500);
                let rating_b = current.get(model_b).map(|r| r.rating).unwrap_or(1500);

                // Step 7: classify by the fractional score, not a binary
                // win/loss -- a narrow majority is a draw.
                let outcome = if score_a > 0.6 {
                    Outcome::Win
                } else if score_a < 0.4 {
                    Outcome::Loss
                } else {
                    Outcome::Draw
                };

                let expected_a = Self::expected_score(rating_a, rating_b);

                let games_a = current.get(model_a).map(|r| r.games_played()).unwrap_or(0);
                let games_b = current.get(model_b).map(|r| r.games_played()).unwrap_or(0);
                let k_a = self.k_factor(games_a, rating_a);
                let k_b = self.k_factor(games_b, rating_b);

                deltas
                    .entry(model_a.clone())
                    .or_default()
                    .push(k_a * (score_a - expected_a));
                deltas
                    .entry(model_b.clone())
                    .or_default()
                    .push(k_b * (score_b - (1.0 - expected_a)));

                let entry = wld.entry(model_a.clone()).or_insert((0, 0, 0));
                match outcome {
                    Outcome::Win => entry.0 += 1,
                    Outcome::Loss => entry.1 += 1,
                    Outcome::Draw => entry.2 += 1,
                }
                let entry_b = wld.entry(model_b.clone()).or_insert((0, 0, 0));
                match outcome {
                    Outcome::Win => entry_b.1 += 1,
                    Outcome::Loss => entry_b.0 += 1,
                    Outcome::Draw => entry_b.2 += 1,
                }

                let (lo, hi) = if model_a < model_b {
                    (model_a.clone(), model_b.clone())
                } else {
                    (model_b.clone(), model_a.clone())
                };
                let (wins_lo, wins_hi) = match (outcome, model_a < model_b) {
                    (Outcome::Win, true) | (Outcome::Loss, false) => (1, 0),
                    (Outcome::Loss, true) | (Outcome::Win, false) => (0, 1),
                    (Outcome::Draw, _) => (0, 0),
                };
                matchups.push(Matchup {
                    model_a: lo,
                    model_b: hi,
                    category_id: category_id.map(str::to_string),
                    wins_a: wins_lo,
                    wins_b: wins_hi,
                    draws: if outcome == Outcome::Draw { 1 } else { 0 },
                });
            }
        }

        let mut updates = Vec::new();
        for model in participants {
            let old_rating = current.get(model).map(|r| r.rating).unwrap_or(1500);
            let deltas_for_model = deltas.get(model).cloned().unwrap_or_default();
            // Step 6: accumulate every pair's delta -- an average would
            // understate the swing for anyone who played more than one
            // opponent this session.
            let total_delta: f64 = deltas_for_model.iter().sum();
            let new_rating = (old_rating + total_delta.round() as i64).max(0);
            let (w, l, d) = wld.get(model).copied().unwrap_or((0, 0, 0));
            let reason = if w > l {
                RatingChangeReason::Win
            } else if l > w {
                RatingChangeReason::Loss
            } else {
                RatingChangeReason::Draw
            };
            updates.push(RatingUpdate {
                model_id: model.clone(),
                category_id: category_id.map(str::to_string),
                old_rating,
                new_rating,
                reason,
            });
        }

        let _ = session_id;
        (updates, matchups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionId, VoterType};
    use chrono::Utc;

    fn vote(ranked: &[&str], weight: f64) -> Vote {
        Vote {
            id: 0,
            session_id: SessionId::nil(),
            voter_type: VoterType::User,
            voter_id: "voter".into(),
            ranked_responses: ranked.iter().map(|s| s.to_string()).collect(),
            weight,
            created_at: Utc::now(),
        }
    }

    fn engine() -> RatingEngine {
        RatingEngine::new(25.0, 10.0, 15.0, 30, 2000)
    }

    #[test]
    fn expected_score_is_symmetric_around_half() {
        let e = RatingEngine::expected_score(1500, 1500);
        assert!((e - 0.5).abs() < 1e-9);

        let higher = RatingEngine::expected_score(1600, 1400);
        assert!(higher > 0.5);
    }

    #[test]
    fn borda_count_rewards_first_place() {
        let votes = vec![vote(&["A", "B", "C"], 1.0), vote(&["A", "C", "B"], 1.0)];
        let scores = RatingEngine::borda_scores(&votes);
        assert!(scores["A"] > scores["B"]);
        assert!(scores["A"] > scores["C"]);
    }

    #[test]
    fn winner_gains_rating_loser_loses_rating() {
        let mut labels = BTreeMap::new();
        labels.insert("gpt".to_string(), "A".to_string());
        labels.insert("claude".to_string(), "B".to_string());

        let mut current = BTreeMap::new();
        current.insert(
            "gpt".to_string(),
            ModelRating::fresh("gpt".to_string(), None, 1500),
        );
        current.insert(
            "claude".to_string(),
            ModelRating::fresh("claude".to_string(), None, 1500),
        );

        let votes = vec![vote(&["A", "B"], 1.0)];
        let participants = vec!["gpt".to_string(), "claude".to_string()];

        let (updates, matchups) = engine().compute_session_update(
            &participants,
            &labels,
            &current,
            &votes,
            None,
            None,
        );

        let gpt = updates.iter().find(|u| u.model_id == "gpt").unwrap();
        let claude = updates.iter().find(|u| u.model_id == "claude").unwrap();
        assert!(gpt.new_rating > gpt.old_rating);
        assert!(claude.new_rating < claude.old_rating);
        assert_eq!(matchups.len(), 1);
        assert_eq!(matchups[0].wins_a + matchups[0].wins_b, 1);
    }

    #[test]
    fn a_pair_with_no_shared_ballot_gets_no_matchup_and_no_rating_change() {
        let mut labels = BTreeMap::new();
        labels.insert("gpt".to_string(), "A".to_string());
        labels.insert("claude".to_string(), "B".to_string());

        let current = BTreeMap::new();
        let votes: Vec<Vote> = vec![];
        let participants = vec!["gpt".to_string(), "claude".to_string()];

        let (updates, matchups) = engine().compute_session_update(
            &participants,
            &labels,
            &current,
            &votes,
            None,
            None,
        );

        assert!(matchups.is_empty());
        for u in &updates {
            assert_eq!(u.new_rating, u.old_rating);
            assert_eq!(u.reason, RatingChangeReason::Draw);
        }
    }

    #[test]
    fn an_even_split_of_ballots_is_a_draw() {
        let mut labels = BTreeMap::new();
        labels.insert("gpt".to_string(), "A".to_string());
        labels.insert("claude".to_string(), "B".to_string());

        let current = BTreeMap::new();
        let votes = vec![vote(&["A", "B"], 1.0), vote(&["B", "A"], 1.0)];
        let participants = vec!["gpt".to_string(), "claude".to_string()];

        let (updates, matchups) = engine().compute_session_update(
            &participants,
            &labels,
            &current,
            &votes,
            None,
            None,
        );

        for u in &updates {
            assert_eq!(u.reason, RatingChangeReason::Draw);
        }
        assert_eq!(matchups[0].draws, 1);
    }

    /// A 3-voter Condorcet cycle -- ballots `[A,B,C]`, `[B,C,A]`, `[C,A,B]`
    /// -- gives every label an identical Borda sum, but each *pairwise*
    /// tally is a clean 2:1: A beats B, B beats C, C beats A. A rating
    /// engine that scored off aggregate Borda sums would call every pair
    /// a draw; the real per-pair tally must not.
    #[test]
    fn a_condorcet_cycle_still_yields_real_pairwise_deltas() {
        let mut labels = BTreeMap::new();
        labels.insert("gpt".to_string(), "A".to_string());
        labels.insert("claude".to_string(), "B".to_string());
        labels.insert("gemini".to_string(), "C".to_string());

        let current = BTreeMap::new();
        let votes = vec![
            vote(&["A", "B", "C"], 1.0),
            vote(&["B", "C", "A"], 1.0),
            vote(&["C", "A", "B"], 1.0),
        ];
        let participants = vec!["gpt".to_string(), "claude".to_string(), "gemini".to_string()];

        let (updates, matchups) = engine().compute_session_update(
            &participants,
            &labels,
            &current,
            &votes,
            None,
            None,
        );

        // Every pair is a real 2:1 result, never a draw -- a rating engine
        // that scored off the tied aggregate Borda sums would report
        // `draws: 1` for all three matchups instead.
        assert_eq!(matchups.len(), 3);
        for m in &matchups {
            assert_eq!(m.wins_a + m.wins_b, 1, "every pair has a 2:1 winner, not a draw");
            assert_eq!(m.draws, 0);
        }
        // The cycle is perfectly symmetric (equal ratings, equal K-factors,
        // one win and one loss of identical magnitude each), so the net
        // rating movement per participant is zero -- this is the
        // conservation-of-mass property, not evidence the pairwise scoring
        // was a no-op.
        for u in &updates {
            assert_eq!(u.new_rating, u.old_rating);
        }
    }

    #[test]
    fn k_factor_shrinks_for_established_elite_models() {
        let e = engine();
        assert_eq!(e.k_factor(5, 1500), e.k_provisional);
        assert_eq!(e.k_factor(100, 2100), e.k_elite);
        assert_eq!(e.k_factor(100, 1800), e.k_standard);
    }
}
