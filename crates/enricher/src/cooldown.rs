use crate::provider::ProviderKind;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-provider cool-down clocks. A provider that signalled a rate limit
/// is skipped until its window elapses.
pub struct CooldownTracker {
    window: Duration,
    until: Mutex<HashMap<ProviderKind, Instant>>,
}

impl CooldownTracker {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            until: Mutex::new(HashMap::new()),
        }
    }

    /// Starts (or restarts) the provider's cool-down.
    pub fn note_rate_limit(&self, kind: ProviderKind) {
        let until = Instant::now() + self.window;
        self.until
            .lock()
            .expect("cooldown lock poisoned")
            .insert(kind, until);
        tracing::warn!(provider = %kind, cooldown_secs = self.window.as_secs(), "provider on cool-down");
    }

    /// Whether the provider is currently cooling. Expired entries are
    /// cleaned up as a side effect.
    #[must_use]
    pub fn is_cooling(&self, kind: ProviderKind) -> bool {
        let mut until = self.until.lock().expect("cooldown lock poisoned");
        match until.get(&kind) {
            Some(t) if *t > Instant::now() => true,
            Some(_) => {
                until.remove(&kind);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooling_until_window_elapses() {
        let tracker = CooldownTracker::new(Duration::from_millis(50));
        assert!(!tracker.is_cooling(ProviderKind::DexScreener));

        tracker.note_rate_limit(ProviderKind::DexScreener);
        assert!(tracker.is_cooling(ProviderKind::DexScreener));
        // Other providers are unaffected.
        assert!(!tracker.is_cooling(ProviderKind::Moralis));

        std::thread::sleep(Duration::from_millis(60));
        assert!(!tracker.is_cooling(ProviderKind::DexScreener));
    }
}
