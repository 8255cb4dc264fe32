use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::document::to_utf16;

/// Scores at or below this are never reported as substring candidates.
const MIN_WINDOW_SCORE: f64 = 0.3;
const MIN_MATCH_LEN: usize = 3;
const WINDOW_SCALES: [f64; 4] = [1.0, 0.8, 1.2, 1.5];
const CONTEXT_HASH_MAX_LEN: usize = 100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstringMatch {
    pub start: u32,
    pub end: u32,
    pub score: f64,
}

/// Levenshtein-derived similarity over UTF-16 code units, in `[0, 1]`.
pub fn compute_text_similarity(a: &str, b: &str) -> f64 {
    text_similarity(&to_utf16(a), &to_utf16(b))
}

/// Non-overlapping windows of `haystack` resembling `needle`, ordered by start.
pub fn find_substring_matches(needle: &str, haystack: &str) -> Vec<SubstringMatch> {
    find_substring_matches_utf16(&to_utf16(needle), &to_utf16(haystack))
}

pub fn compute_ngram_similarity(a: &str, b: &str, n: Option<usize>) -> f64 {
    ngram_similarity(&to_utf16(a), &to_utf16(b), n.unwrap_or(3).max(1))
}

/// FNV-1a digest of the normalized text around an anchor (`prefix|suffix`).
pub fn compute_fuzzy_context_hash(prefix: &str, suffix: &str) -> String {
    let mut combined = normalize_for_context(prefix);
    combined.push('|' as u16);
    combined.extend(normalize_for_context(suffix));
    format!("{:08x}", fnv1a_utf16(&combined))
}

pub(crate) fn text_similarity(a: &[u16], b: &[u16]) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let longest = a.len().max(b.len());
    1.0 - levenshtein_distance(a, b) as f64 / longest as f64
}

fn levenshtein_distance(a: &[u16], b: &[u16]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for (i, a_unit) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, b_unit) in b.iter().enumerate() {
            let cost = usize::from(a_unit != b_unit);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[derive(Clone)]
struct RankedWindow {
    discovered: usize,
    start: usize,
    end: usize,
    score: f64,
}

pub(crate) fn find_substring_matches_utf16(needle: &[u16], haystack: &[u16]) -> Vec<SubstringMatch> {
    if needle.len() < MIN_MATCH_LEN || haystack.len() < MIN_MATCH_LEN {
        return Vec::new();
    }

    let mut window_sizes: Vec<usize> = Vec::with_capacity(WINDOW_SCALES.len());
    for scale in WINDOW_SCALES {
        let size = (needle.len() as f64 * scale).floor() as usize;
        if size >= MIN_MATCH_LEN && size <= haystack.len() && !window_sizes.contains(&size) {
            window_sizes.push(size);
        }
    }

    let mut windows: Vec<RankedWindow> = Vec::new();
    for size in window_sizes {
        for start in 0..=haystack.len() - size {
            let score = text_similarity(needle, &haystack[start..start + size]);
            if score > MIN_WINDOW_SCORE {
                windows.push(RankedWindow {
                    discovered: windows.len(),
                    start,
                    end: start + size,
                    score,
                });
            }
        }
    }

    select_non_overlapping(windows)
}

/// Greedy best-first selection; ties keep discovery order so results are
/// stable across replicas.
fn select_non_overlapping(mut windows: Vec<RankedWindow>) -> Vec<SubstringMatch> {
    windows.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.discovered.cmp(&b.discovered))
    });

    let mut kept: Vec<RankedWindow> = Vec::new();
    for candidate in windows {
        let overlaps = kept
            .iter()
            .any(|existing| candidate.start < existing.end && existing.start < candidate.end);
        if !overlaps {
            kept.push(candidate);
        }
    }

    kept.sort_by_key(|window| window.start);
    kept.into_iter()
        .map(|window| SubstringMatch {
            start: window.start as u32,
            end: window.end as u32,
            score: window.score,
        })
        .collect()
}

/// Every start index where `needle` occurs verbatim.
pub(crate) fn find_exact_utf16(needle: &[u16], haystack: &[u16]) -> Vec<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(start, _)| start)
        .collect()
}

fn normalize_for_context(text: &str) -> Vec<u16> {
    let lower = text.to_lowercase();
    let collapsed = lower.split_whitespace().collect::<Vec<_>>().join(" ");
    let units = to_utf16(&collapsed);
    if units.len() <= CONTEXT_HASH_MAX_LEN {
        return units;
    }
    units[units.len() - CONTEXT_HASH_MAX_LEN..].to_vec()
}

fn fnv1a_utf16(data: &[u16]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for unit in data {
        hash ^= u32::from(*unit);
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

fn ngram_similarity(a: &[u16], b: &[u16], n: usize) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.len() < n || b.len() < n {
        return 0.0;
    }

    let grams_a: HashSet<&[u16]> = a.windows(n).collect();
    let grams_b: HashSet<&[u16]> = b.windows(n).collect();
    let shared = grams_a.intersection(&grams_b).count();
    let union = grams_a.len() + grams_b.len() - shared;
    if union == 0 {
        return 0.0;
    }
    shared as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(value: f64, expected: f64) {
        let delta = (value - expected).abs();
        assert!(delta < 1e-9, "Expected {expected}, got {value}");
    }

    #[test]
    fn similarity_bounds() {
        assert_close(compute_text_similarity("brown fox", "brown fox"), 1.0);
        assert_close(compute_text_similarity("brown fox", ""), 0.0);
        assert_close(compute_text_similarity("", "brown fox"), 0.0);
        assert_close(compute_text_similarity("", ""), 1.0);
        assert_close(compute_text_similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn similarity_counts_edits() {
        assert_close(compute_text_similarity("kitten", "sitting"), 1.0 - 3.0 / 7.0);
    }

    #[test]
    fn finds_exact_window_first() {
        let matches = find_substring_matches("brown fox", "The quick brown fox jumps over");
        let best = matches
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
            .expect("match");
        assert_eq!((best.start, best.end), (10, 19));
        assert_close(best.score, 1.0);
    }

    #[test]
    fn short_inputs_produce_no_matches() {
        assert!(find_substring_matches("ab", "abcdef").is_empty());
        assert!(find_substring_matches("abcdef", "ab").is_empty());
    }

    #[test]
    fn selected_matches_do_not_overlap() {
        let matches = find_substring_matches("abcab", "abcabcabcabc");
        for pair in matches.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn exact_search_reports_all_occurrences() {
        let needle = to_utf16("ab");
        let haystack = to_utf16("abxab");
        assert_eq!(find_exact_utf16(&needle, &haystack), vec![0, 3]);
        assert!(find_exact_utf16(&[], &haystack).is_empty());
    }

    #[test]
    fn context_hash_ignores_case_and_spacing() {
        assert_eq!(
            compute_fuzzy_context_hash("Hello   World", "tail"),
            compute_fuzzy_context_hash("hello world", "TAIL")
        );
        assert_ne!(
            compute_fuzzy_context_hash("hello", "world"),
            compute_fuzzy_context_hash("hello", "there")
        );
        assert_eq!(compute_fuzzy_context_hash("", "").len(), 8);
    }

    #[test]
    fn ngram_similarity_is_jaccard() {
        assert_close(compute_ngram_similarity("abcd", "abcd", None), 1.0);
        assert_close(compute_ngram_similarity("abcd", "bcde", Some(3)), 1.0 / 3.0);
        assert_close(compute_ngram_similarity("ab", "abcd", Some(3)), 0.0);
    }
}
