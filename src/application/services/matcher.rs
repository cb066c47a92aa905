//! Reconciles model-emitted block identifiers against the requested id set.
//!
//! Vision models reformat ids freely: case changes, dropped separators,
//! single-character substitutions. Matching runs exact → normalized → fuzzy
//! and claims each requested id at most once, preferring the better match.

use std::collections::HashMap;

use crate::domain::{is_armor_format, levenshtein, normalize_id};

/// How a response id was tied to a requested id. Ordering is by quality:
/// exact beats normalized beats fuzzy, and a smaller edit distance beats a
/// larger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchQuality {
    /// Levenshtein distance over normalized forms (lower is better).
    Fuzzy(usize),
    Normalized,
    Exact,
}

impl MatchQuality {
    fn rank(&self) -> (u8, i64) {
        match self {
            MatchQuality::Fuzzy(distance) => (0, -(*distance as i64)),
            MatchQuality::Normalized => (1, 0),
            MatchQuality::Exact => (2, 0),
        }
    }
}

impl PartialOrd for MatchQuality {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MatchQuality {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Find the best member of `requested` for a model-emitted id.
pub fn match_response_id<'a>(
    candidate: &str,
    requested: &'a [String],
    fuzzy_threshold: usize,
) -> Option<(&'a str, MatchQuality)> {
    if let Some(exact) = requested.iter().find(|r| r.as_str() == candidate) {
        return Some((exact, MatchQuality::Exact));
    }

    let candidate_norm = normalize_id(candidate);
    if let Some(norm) = requested
        .iter()
        .find(|r| normalize_id(r) == candidate_norm)
    {
        return Some((norm, MatchQuality::Normalized));
    }

    let mut best: Option<(&'a str, usize)> = None;
    for req in requested {
        let distance = levenshtein(&candidate_norm, &normalize_id(req));
        if distance <= fuzzy_threshold {
            match best {
                Some((_, d)) if d <= distance => {}
                _ => best = Some((req, distance)),
            }
        }
    }
    best.map(|(id, d)| (id, MatchQuality::Fuzzy(d)))
}

/// Split a batch response on `BLOCK: XXXX-XXXX-XXX` markers and assign each
/// segment to a requested block id.
///
/// Blocks absent from the result map count as missing and go to the
/// verification pass. A marker-less response for a single requested block is
/// the whole text; for multiple blocks it falls back to assigning everything
/// to the first block.
pub fn parse_batch_response(
    requested_ids: &[String],
    response: &str,
    fuzzy_threshold: usize,
) -> HashMap<String, String> {
    let mut results: HashMap<String, String> = HashMap::new();
    if requested_ids.is_empty() {
        return results;
    }

    let markers = find_block_markers(response);

    if markers.is_empty() {
        if requested_ids.len() == 1 {
            results.insert(requested_ids[0].clone(), response.trim().to_string());
        } else if !response.trim().is_empty() {
            tracing::warn!(
                blocks = requested_ids.len(),
                "Batch response without BLOCK markers; whole text assigned to first block"
            );
            results.insert(requested_ids[0].clone(), response.trim().to_string());
        }
        return results;
    }

    // (claimed id -> quality) so a later, better match can displace a worse one.
    let mut claims: HashMap<String, MatchQuality> = HashMap::new();

    for (i, marker) in markers.iter().enumerate() {
        let segment_start = marker.text_start;
        let segment_end = markers
            .get(i + 1)
            .map(|next| next.marker_start)
            .unwrap_or(response.len());
        let text = response[segment_start..segment_end].trim().to_string();

        match match_response_id(&marker.id, requested_ids, fuzzy_threshold) {
            Some((matched, quality)) => {
                let take = match claims.get(matched) {
                    Some(existing) => quality > *existing,
                    None => true,
                };
                if take {
                    claims.insert(matched.to_string(), quality);
                    results.insert(matched.to_string(), text);
                }
            }
            None => {
                tracing::warn!(marker = %marker.id, "Response marker matched no requested block");
            }
        }
    }

    results
}

/// Strip any `BLOCK:` marker echoed back into a single-block response.
pub fn strip_block_markers(response: &str) -> String {
    response
        .lines()
        .filter(|line| parse_marker_line(line).is_none())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

struct Marker {
    id: String,
    marker_start: usize,
    text_start: usize,
}

fn find_block_markers(response: &str) -> Vec<Marker> {
    let mut markers = Vec::new();
    let mut offset = 0;
    for line in response.split_inclusive('\n') {
        if let Some(id) = parse_marker_line(line) {
            markers.push(Marker {
                id,
                marker_start: offset,
                text_start: offset + line.len(),
            });
        }
        offset += line.len();
    }
    markers
}

/// A marker line is `BLOCK: <candidate>` where the candidate normalizes to
/// the 11-character armor format.
fn parse_marker_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let rest = trimmed
        .strip_prefix("BLOCK:")
        .or_else(|| trimmed.strip_prefix("block:"))?;
    let candidate = rest.trim();
    if candidate.is_empty() || !is_armor_format(candidate) {
        return None;
    }
    Some(candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_wins() {
        let requested = ids(&["XYZ3-AAAA-34F"]);
        let (id, quality) = match_response_id("XYZ3-AAAA-34F", &requested, 2).unwrap();
        assert_eq!(id, "XYZ3-AAAA-34F");
        assert_eq!(quality, MatchQuality::Exact);
    }

    #[test]
    fn lowercase_matches_by_normalization() {
        let requested = ids(&["XYZ3-AAAA-34F"]);
        let (id, quality) = match_response_id("xyz3-aaaa-34f", &requested, 2).unwrap();
        assert_eq!(id, "XYZ3-AAAA-34F");
        assert_eq!(quality, MatchQuality::Normalized);
    }

    #[test]
    fn typo_matches_by_fuzzy_distance() {
        let requested = ids(&["XYZ3-AAAA-34F", "XYZ3-AAAA-34G"]);
        let (id, quality) = match_response_id("XYZ3-AAAA-94F", &requested, 2).unwrap();
        assert_eq!(id, "XYZ3-AAAA-34F");
        assert!(matches!(quality, MatchQuality::Fuzzy(1)));
    }

    #[test]
    fn distance_beyond_threshold_is_unassigned() {
        let requested = ids(&["XYZ3-AAAA-34F"]);
        assert!(match_response_id("MMMM-NNNN-PPP", &requested, 2).is_none());
    }

    #[test]
    fn batch_parse_splits_on_markers() {
        let requested = ids(&["AAAA-CCCC-DDD", "EEEE-FFFF-GGG"]);
        let response = "BLOCK: AAAA-CCCC-DDD\nfirst text\n\nBLOCK: EEEE-FFFF-GGG\nsecond text";
        let parsed = parse_batch_response(&requested, response, 2);
        assert_eq!(parsed["AAAA-CCCC-DDD"], "first text");
        assert_eq!(parsed["EEEE-FFFF-GGG"], "second text");
    }

    #[test]
    fn batch_parse_without_markers_goes_to_first_block() {
        let requested = ids(&["AAAA-CCCC-DDD", "EEEE-FFFF-GGG"]);
        let parsed = parse_batch_response(&requested, "just a wall of text", 2);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["AAAA-CCCC-DDD"], "just a wall of text");
    }

    #[test]
    fn single_block_markers_are_stripped() {
        let cleaned = strip_block_markers("BLOCK: AAAA-CCCC-DDD\nthe text");
        assert_eq!(cleaned, "the text");
    }
}
