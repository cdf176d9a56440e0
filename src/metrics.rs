use serde::{Deserialize, Serialize};

/// Rough token estimate: `ceil(words * 1.3)`.
///
/// This is a word-count heuristic, not a tokenizer; callers should present it
/// as approximate.
pub fn estimate_tokens(text: &str) -> u64 {
    let words = text.split_whitespace().count() as u64;
    (words * 13).div_ceil(10)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMetrics {
    pub latency_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Missing fields read as zero, so a conversation stored before its first
/// completed turn (`{}`) loads as empty metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub turns: Vec<TurnMetrics>,
}

impl Metrics {
    pub fn record(&mut self, turn: TurnMetrics) {
        self.total_input_tokens += turn.input_tokens;
        self.total_output_tokens += turn.output_tokens;
        self.turns.push(turn);
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }

    pub fn last_turn(&self) -> Option<&TurnMetrics> {
        self.turns.last()
    }

    pub fn clear(&mut self) {
        *self = Metrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_empty() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   \n\t "), 0);
    }

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens("one"), 2);
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
        assert_eq!(estimate_tokens("a b c"), 4);
    }

    #[test]
    fn test_estimate_monotonic_in_word_count() {
        let mut text = String::new();
        let mut previous = 0;
        for _ in 0..200 {
            text.push_str("word ");
            let current = estimate_tokens(&text);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn test_record_accumulates() {
        let mut metrics = Metrics::default();
        metrics.record(TurnMetrics {
            latency_ms: 120,
            input_tokens: 10,
            output_tokens: 4,
        });
        metrics.record(TurnMetrics {
            latency_ms: 80,
            input_tokens: 7,
            output_tokens: 3,
        });
        assert_eq!(metrics.total_input_tokens, 17);
        assert_eq!(metrics.total_output_tokens, 7);
        assert_eq!(metrics.total_tokens(), 24);
        assert_eq!(metrics.last_turn().map(|t| t.latency_ms), Some(80));

        metrics.clear();
        assert!(metrics.turns.is_empty());
        assert_eq!(metrics.total_tokens(), 0);
    }

    #[test]
    fn test_empty_object_reads_as_default() {
        let metrics: Metrics = serde_json::from_str("{}").unwrap();
        assert_eq!(metrics, Metrics::default());

        let partial: Metrics = serde_json::from_str(r#"{"total_output_tokens":5}"#).unwrap();
        assert_eq!(partial.total_output_tokens, 5);
        assert!(partial.turns.is_empty());
    }
}
