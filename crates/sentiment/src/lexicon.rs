use coinpulse_core::SentimentScorer;

/// Word-list sentiment scorer tuned to crypto social chatter.
///
/// Counts positive and negative hits over lowercased word tokens and
/// returns `(pos - neg) / (pos + neg)`, so output stays in [-1, 1]. Text
/// with no hits scores 0. A model-backed scorer can replace this behind
/// the same trait.
pub struct LexiconScorer;

const POSITIVE: &[&str] = &[
    "moon", "mooning", "moonshot", "pump", "pumping", "bullish", "bull", "gem", "buy", "hodl",
    "hold", "lfg", "rocket", "gains", "win", "winner", "good", "great", "huge", "massive", "ath",
    "breakout", "rally", "undervalued", "early", "alpha", "legit", "solid", "profit", "green",
];

const NEGATIVE: &[&str] = &[
    "dump", "dumping", "rug", "rugged", "rugpull", "scam", "scammer", "bearish", "bear", "sell",
    "selling", "crash", "crashing", "rekt", "down", "bad", "loss", "losses", "dead", "exit",
    "avoid", "warning", "honeypot", "overvalued", "red", "bleeding", "fud", "ponzi",
];

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> f64 {
        let mut positive = 0u32;
        let mut negative = 0u32;

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            if POSITIVE.contains(&word.as_str()) {
                positive += 1;
            } else if NEGATIVE.contains(&word.as_str()) {
                negative += 1;
            }
        }

        let total = positive + negative;
        if total == 0 {
            0.0
        } else {
            (f64::from(positive) - f64::from(negative)) / f64::from(total)
        }
    }
}
