/// Initial value of the operation id hash.
const HASH_SEED: i32 = 5381;

/// Inputs shorter than this are repeated to spread their hash.
const MIN_HASH_INPUT_LEN: usize = 8;

/// Returns the sampling score of an item in `[0, 100)`.
///
/// Items of the same operation share a score, so they are kept or dropped together. The score
/// is derived from a 32-bit djb2 hash over the UTF-16 code units of the operation id, which
/// matches the scoring of other SDKs so that distributed operations sample consistently across
/// processes. Items without an operation id get a random score.
pub fn sampling_score(operation_id: Option<&str>) -> f64 {
    match operation_id {
        Some(id) if !id.is_empty() => hash_score(sampling_hash(id)),
        _ => rand::random::<f64>() * 100.0,
    }
}

/// Scales a hash in `[0, i32::MAX]` to `[0, 100)`.
fn hash_score(hash: i32) -> f64 {
    f64::from(hash) / (f64::from(i32::MAX) + 1.0) * 100.0
}

/// Hashes a non-empty operation id into `[0, i32::MAX]`.
fn sampling_hash(id: &str) -> i32 {
    let units: Vec<u16> = id.encode_utf16().collect();
    let repeat = MIN_HASH_INPUT_LEN.div_ceil(units.len()).next_power_of_two();

    let hash = units
        .iter()
        .cycle()
        .take(units.len() * repeat)
        .fold(HASH_SEED, |hash, unit| {
            (hash << 5).wrapping_add(hash).wrapping_add(i32::from(*unit))
        });

    match hash {
        i32::MIN => i32::MAX,
        hash => hash.abs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_is_stable() {
        let first = sampling_score(Some("b0ae1c3c4d0f4e9b"));
        for _ in 0..10 {
            assert_eq!(sampling_score(Some("b0ae1c3c4d0f4e9b")), first);
        }
    }

    #[test]
    fn test_score_range() {
        for i in 0..1000 {
            let score = sampling_score(Some(&format!("operation-{i}")));
            assert!((0.0..100.0).contains(&score), "{score}");
        }

        let score = sampling_score(None);
        assert!((0.0..100.0).contains(&score));
    }

    #[test]
    fn test_largest_hash_scores_below_hundred() {
        assert_eq!(hash_score(0), 0.0);
        assert!(hash_score(i32::MAX) < 100.0);
        assert!(hash_score(i32::MAX) > 99.99);
    }

    #[test]
    fn test_short_inputs_repeat() {
        // Doubling until at least eight characters: "abc" hashes as "abcabcabcabc".
        assert_eq!(sampling_hash("abc"), sampling_hash("abcabcabcabc"));
        assert_eq!(sampling_hash("abcdefgh"), {
            let hash = "abcdefgh".bytes().fold(5381i32, |hash, byte| {
                (hash << 5).wrapping_add(hash).wrapping_add(i32::from(byte))
            });
            hash.abs()
        });
    }
}
