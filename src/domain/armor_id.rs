//! Helpers for the OCR-resistant block identifier format XXXX-XXXX-XXX.
//! Vision models echo these back with case changes, dropped separators or
//! single-character errors; matching is done over the normalized form, and a
//! length window tolerates one inserted or dropped character.

/// Nominal payload length of an armor id with separators stripped.
pub const ARMOR_ID_LEN: usize = 11;

/// Uppercase and drop everything that is not alphanumeric.
pub fn normalize_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Does the candidate look like a block id? OCR may add or drop a character,
/// so anything within one of the nominal length passes.
pub fn is_armor_format(raw: &str) -> bool {
    let clean = normalize_id(raw);
    (ARMOR_ID_LEN - 1..=ARMOR_ID_LEN + 1).contains(&clean.len())
}

/// Plain Levenshtein edit distance, two-row rolling buffer. Inputs are short
/// (block ids), so no banding is needed.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_separators_and_uppercases() {
        assert_eq!(normalize_id("xyz3-aaaa-34f"), "XYZ3AAAA34F");
        assert_eq!(normalize_id("XYZ3 AAAA 34F"), "XYZ3AAAA34F");
    }

    #[test]
    fn armor_format_detection() {
        assert!(is_armor_format("AAAA-BBBB-001"));
        assert!(is_armor_format("aaaa-bbbb-001"));
        // One character short or long still counts: OCR drops and inserts.
        assert!(is_armor_format("XYZ-AAAA-001"));
        assert!(is_armor_format("AAAA-BBBB-0012"));
        assert!(!is_armor_format("AAAA-BBBB"));
        assert!(!is_armor_format("a block of prose"));
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("AAAACCCCDDD", "AAAACCCCDDE"), 1);
        assert_eq!(levenshtein("AAAACCCCDDD", "AAAACCCCED"), 2);
    }
}
