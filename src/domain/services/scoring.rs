#[cfg(test)]
#[path = "scoring_test.rs"]
mod tests;

use crate::domain::models::EvalSummary;
use crate::domain::models::MatchMode;
use crate::domain::models::Sample;

const COLORS: [&str; 12] = [
    "red", "orange", "yellow", "green", "blue", "indigo", "violet", "purple", "pink", "brown",
    "black", "white",
];

const NUMBER_WORDS: [&str; 28] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
    "twenty",
    "thirty",
    "forty",
    "fifty",
    "sixty",
    "seventy",
    "eighty",
    "ninety",
];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Score {
    pub pass: bool,
    pub hits: usize,
    pub total: usize,
}

/// Lowercases, trims, and collapses whitespace runs into single spaces.
pub fn normalize(text: &str) -> String {
    return text
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase();
}

pub fn contains_all(text: &str, needles: &[String]) -> bool {
    let normalized = normalize(text);
    return needles
        .iter()
        .all(|needle| return normalized.contains(&normalize(needle)));
}

/// Scores an output against its needles, inferring the match mode.
pub fn score_contains_all(output: &str, needles: &[String]) -> Score {
    return score_with_mode(output, needles, None);
}

/// Scores an output against its needles. An explicit mode wins over the
/// alternatives heuristic.
pub fn score_with_mode(output: &str, needles: &[String], mode: Option<MatchMode>) -> Score {
    let normalized = normalize(output);
    let hits = needles
        .iter()
        .filter(|needle| return normalized.contains(&normalize(needle)))
        .count();

    let mode = mode.unwrap_or_else(|| {
        if is_alternatives_list(needles) {
            return MatchMode::Any;
        }
        return MatchMode::All;
    });

    let pass = match mode {
        MatchMode::Any => hits > 0,
        MatchMode::All => contains_all(output, needles),
    };

    return Score {
        pass,
        hits,
        total: needles.len(),
    };
}

fn is_word(item: &str) -> bool {
    return !item.is_empty()
        && item
            .chars()
            .all(|c| return c.is_ascii_alphanumeric() || c == '_');
}

fn is_number(item: &str) -> bool {
    return !item.is_empty() && item.chars().all(|c| return c.is_ascii_digit());
}

/// Best effort guess at whether a needle list enumerates acceptable
/// alternatives rather than required facts. Matches three or more single
/// tokens, a numeral paired with a spelled out number, or three or more
/// color names.
pub fn is_alternatives_list(items: &[String]) -> bool {
    if items.len() <= 1 {
        return false;
    }

    let trimmed = items
        .iter()
        .map(|item| return item.trim().to_lowercase())
        .collect::<Vec<String>>();

    if trimmed.len() > 2 && trimmed.iter().all(|item| return is_word(item)) {
        return true;
    }

    if trimmed.len() == 2 {
        let has_numeral = trimmed.iter().any(|item| return is_number(item));
        let has_number_word = trimmed
            .iter()
            .any(|item| return NUMBER_WORDS.contains(&item.as_str()));
        if has_numeral && has_number_word {
            return true;
        }
    }

    let color_count = trimmed
        .iter()
        .filter(|item| return COLORS.contains(&item.as_str()))
        .count();

    return color_count >= 3;
}

/// Linear interpolation between the closest ranks of an ascending slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let index = p * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }

    let weight = index - lower as f64;
    return sorted[lower] * (1.0 - weight) + sorted[upper] * weight;
}

pub fn compute_stats(samples: &[Sample]) -> EvalSummary {
    let count = samples.len();
    if count == 0 {
        return EvalSummary {
            count: 0,
            pass_rate: f64::NAN,
            p50: f64::NAN,
            p95: f64::NAN,
            avg_tokens: None,
            total_tokens: None,
        };
    }

    let passed = samples.iter().filter(|sample| return sample.pass).count();

    let mut latencies = samples
        .iter()
        .map(|sample| return sample.latency_ms)
        .collect::<Vec<f64>>();
    latencies.sort_by(|a, b| return a.total_cmp(b));

    let tokens = samples
        .iter()
        .filter_map(|sample| return sample.tokens_used)
        .collect::<Vec<u64>>();
    let (avg_tokens, total_tokens) = if tokens.is_empty() {
        (None, None)
    } else {
        let total = tokens.iter().sum::<u64>();
        (Some(total as f64 / tokens.len() as f64), Some(total))
    };

    return EvalSummary {
        count,
        pass_rate: passed as f64 / count as f64,
        p50: percentile(&latencies, 0.5),
        p95: percentile(&latencies, 0.95),
        avg_tokens,
        total_tokens,
    };
}
