//! Role assignment.
//!
//! Three optional roles are carved out of the participant pool before a
//! session starts responding:
//!
//! - **Mystery judge**: removed from the responding set but still casts a
//!   vote — it never answers the question, only ranks the others.
//! - **Devil's advocate**: stays in the responding set but is briefed to
//!   argue against the expected consensus.
//! - **Chairperson**: synthesizes the final answer. Defaults, absent an
//!   explicit override, to the responding participant with the highest
//!   *global* rating (`category_id = None`).
//!
//! Selection of the mystery judge and devil's advocate is seeded so the
//! same `rng_seed` always reproduces the same assignment.

use crate::models::{ModelId, ModelRating, SessionConfig};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

const MYSTERY_JUDGE_SEED_OFFSET: u64 = 0x6D6A; // "mj"
const DEVILS_ADVOCATE_SEED_OFFSET: u64 = 0x6461; // "da"

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleAssignment {
    pub responding_models: Vec<ModelId>,
    pub mystery_judge: Option<ModelId>,
    pub devils_advocate: Option<ModelId>,
    pub chairperson: Option<ModelId>,
}

pub fn assign_roles(
    participants: &[ModelId],
    config: &SessionConfig,
    seed: u64,
    explicit_chairperson: Option<&str>,
    global_ratings: &BTreeMap<ModelId, ModelRating>,
) -> RoleAssignment {
    let mut responding_models = participants.to_vec();
    let mut mystery_judge = None;

    if config.mystery_judge_enabled && responding_models.len() > 2 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(MYSTERY_JUDGE_SEED_OFFSET));
        let index = rng.gen_range(0..responding_models.len());
        mystery_judge = Some(responding_models.remove(index));
    }

    let devils_advocate = if config.devils_advocate_enabled && !responding_models.is_empty() {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(DEVILS_ADVOCATE_SEED_OFFSET));
        let index = rng.gen_range(0..responding_models.len());
        Some(responding_models[index].clone())
    } else {
        None
    };

    let chairperson = explicit_chairperson
        .map(str::to_string)
        .or_else(|| highest_rated(&responding_models, global_ratings));

    RoleAssignment {
        responding_models,
        mystery_judge,
        devils_advocate,
        chairperson,
    }
}

fn highest_rated(
    candidates: &[ModelId],
    global_ratings: &BTreeMap<ModelId, ModelRating>,
) -> Option<ModelId> {
    candidates
        .iter()
        .max_by_key(|model_id| {
            let rating = global_ratings.get(*model_id).map(|r| r.rating).unwrap_or(1500);
            // Tie-break lexicographically descending so the comparison stays
            // total; reversed so the lexicographically-first id wins ties.
            (rating, std::cmp::Reverse((*model_id).clone()))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mystery_judge: bool, devils_advocate: bool) -> SessionConfig {
        SessionConfig {
            mystery_judge_enabled: mystery_judge,
            devils_advocate_enabled: devils_advocate,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn mystery_judge_is_removed_from_responding_set() {
        let participants = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let assignment = assign_roles(&participants, &config(true, false), 1, None, &BTreeMap::new());

        assert_eq!(assignment.responding_models.len(), 2);
        let judge = assignment.mystery_judge.unwrap();
        assert!(!assignment.responding_models.contains(&judge));
    }

    #[test]
    fn assignment_is_deterministic_for_a_fixed_seed() {
        let participants = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let first = assign_roles(&participants, &config(true, true), 99, None, &BTreeMap::new());
        let second = assign_roles(&participants, &config(true, true), 99, None, &BTreeMap::new());
        assert_eq!(first, second);
    }

    #[test]
    fn chairperson_defaults_to_highest_global_rating() {
        let participants = vec!["a".to_string(), "b".to_string()];
        let mut ratings = BTreeMap::new();
        ratings.insert("a".to_string(), ModelRating::fresh("a".to_string(), None, 1500));
        ratings.insert("b".to_string(), ModelRating::fresh("b".to_string(), None, 1700));

        let assignment = assign_roles(&participants, &config(false, false), 1, None, &ratings);
        assert_eq!(assignment.chairperson.as_deref(), Some("b"));
    }

    #[test]
    fn explicit_chairperson_override_wins() {
        let participants = vec!["a".to_string(), "b".to_string()];
        let assignment =
            assign_roles(&participants, &config(false, false), 1, Some("a"), &BTreeMap::new());
        assert_eq!(assignment.chairperson.as_deref(), Some("a"));
    }
}
