//! Deterministic anonymous-label assignment.
//!
//! Every session gets a `model_id -> label` mapping drawn from a fixed
//! alphabet (`A`, `B`, `C`, ...) and permuted by a seeded RNG so the same
//! `rng_seed` always reproduces the same assignment, which keeps tests
//! and post-hoc audits deterministic.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn label_for_index(index: usize) -> String {
    // Base-26 labels: A..Z, then AA, AB, ... matching spreadsheet column naming.
    let mut n = index;
    let mut chars = Vec::new();
    loop {
        chars.push(ALPHABET[n % 26]);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    chars.reverse();
    String::from_utf8(chars).expect("ASCII alphabet")
}

/// Assigns each model a label, shuffled by `seed` so two sessions with the
/// same seed and participant list get the same mapping, but the mapping
/// does not trivially follow submission order.
pub fn assign_labels(participants: &[String], seed: u64) -> BTreeMap<String, String> {
    let mut order: Vec<usize> = (0..participants.len()).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    participants
        .iter()
        .cloned()
        .zip(order.into_iter().map(label_for_index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_and_participants_is_deterministic() {
        let participants = vec!["gpt".to_string(), "claude".to_string(), "gemini".to_string()];
        let first = assign_labels(&participants, 7);
        let second = assign_labels(&participants, 7);
        assert_eq!(first, second);
    }

    #[test]
    fn different_seeds_can_produce_different_assignments() {
        let participants = vec!["gpt".to_string(), "claude".to_string(), "gemini".to_string()];
        let a = assign_labels(&participants, 1);
        let b = assign_labels(&participants, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn every_participant_gets_a_unique_label() {
        let participants: Vec<String> = (0..30).map(|i| format!("model-{i}")).collect();
        let labels = assign_labels(&participants, 42);
        let mut seen: Vec<&String> = labels.values().collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), participants.len());
    }

    #[test]
    fn labels_extend_past_z_like_spreadsheet_columns() {
        assert_eq!(label_for_index(0), "A");
        assert_eq!(label_for_index(25), "Z");
        assert_eq!(label_for_index(26), "AA");
    }
}
