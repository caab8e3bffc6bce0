use std::collections::HashSet;

use rand::{Rng, SeedableRng, rngs::StdRng};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Seeded generator so pools and document streams are reproducible.
pub fn rng_for_seed(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

fn generate_word(word_length: usize, rng: &mut impl Rng) -> String {
    let mut word = String::with_capacity(word_length);
    for _ in 0..word_length {
        word.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
    }
    word
}

/// Generate `distinct_word_count` distinct fixed-length lowercase words.
/// Duplicates are discarded and do not count toward the target, so the
/// caller must pick parameters that admit at least that many distinct
/// words — otherwise this never terminates. Deterministic per seed;
/// insertion-ordered.
pub fn generate_word_pool(
    word_length: usize,
    distinct_word_count: usize,
    seed: u64,
) -> Vec<String> {
    let mut rng = rng_for_seed(seed);
    let mut seen = HashSet::with_capacity(distinct_word_count);
    let mut pool = Vec::with_capacity(distinct_word_count);
    while pool.len() < distinct_word_count {
        let word = generate_word(word_length, &mut rng);
        if seen.insert(word.clone()) {
            pool.push(word);
        }
    }
    pool
}

/// Draw `count` words uniformly with replacement and join them with single
/// spaces, trailing space included.
pub fn concat_random_words(pool: &[String], rng: &mut impl Rng, count: usize) -> String {
    let mut out = String::new();
    for _ in 0..count {
        out.push_str(&pool[rng.gen_range(0..pool.len())]);
        out.push(' ');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_has_exact_count_of_distinct_words() {
        let pool = generate_word_pool(15, 1_000, 42);
        assert_eq!(pool.len(), 1_000);
        let distinct: HashSet<&String> = pool.iter().collect();
        assert_eq!(distinct.len(), 1_000);
    }

    #[test]
    fn pool_words_have_exact_length() {
        let pool = generate_word_pool(7, 50, 42);
        assert!(pool.iter().all(|w| w.len() == 7));
        assert!(
            pool.iter()
                .all(|w| w.bytes().all(|b| b.is_ascii_lowercase()))
        );
    }

    #[test]
    fn pool_is_deterministic_per_seed() {
        let first = generate_word_pool(10, 200, 42);
        let second = generate_word_pool(10, 200, 42);
        assert_eq!(first, second);
        let other_seed = generate_word_pool(10, 200, 43);
        assert_ne!(first, other_seed);
    }

    #[test]
    fn pool_survives_tight_parameter_space() {
        // 26 possible one-letter words; ask for all of them.
        let pool = generate_word_pool(1, 26, 7);
        assert_eq!(pool.len(), 26);
    }

    #[test]
    fn concat_draws_exactly_count_words_with_trailing_space() {
        let pool = generate_word_pool(5, 20, 42);
        let mut rng = rng_for_seed(1);
        let value = concat_random_words(&pool, &mut rng, 12);
        assert!(value.ends_with(' '));
        let tokens: Vec<&str> = value.split_whitespace().collect();
        assert_eq!(tokens.len(), 12);
        assert!(tokens.iter().all(|t| pool.iter().any(|w| w == t)));
    }

    #[test]
    fn concat_of_zero_words_is_empty() {
        let pool = generate_word_pool(5, 3, 42);
        let mut rng = rng_for_seed(1);
        assert_eq!(concat_random_words(&pool, &mut rng, 0), "");
    }
}
