//! Long-poll configuration.

use std::time::Duration;

/// Bounds on how long a poll request may block.
///
/// Clients can ask for a different wait with the max-ttl header; the server
/// never waits longer than `max_ttl`, whatever is asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait used when the client does not send an override, or sends one
    /// that can't be parsed.
    ///
    /// Default: 25 seconds, below common proxy idle timeouts.
    pub default_ttl: Duration,

    /// Hard ceiling on any wait.
    ///
    /// Default: 60 seconds.
    pub max_ttl: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(25),
            max_ttl: Duration::from_secs(60),
        }
    }
}

impl PollConfig {
    /// Returns a copy with `max_ttl` raised to at least `default_ttl`.
    pub fn validated(mut self) -> Self {
        if self.max_ttl < self.default_ttl {
            self.max_ttl = self.default_ttl;
        }
        self
    }

    /// Resolves the wait for one poll from the raw header value, in whole
    /// seconds. A zero request makes the poll non-blocking.
    pub fn ttl_for(&self, requested: Option<&str>) -> Duration {
        match requested.map(|raw| raw.trim().parse::<u64>()) {
            Some(Ok(secs)) => Duration::from_secs(secs).min(self.max_ttl),
            _ => self.default_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_for_absent_or_garbage_uses_default() {
        let config = PollConfig::default();
        assert_eq!(config.ttl_for(None), Duration::from_secs(25));
        assert_eq!(config.ttl_for(Some("soon")), Duration::from_secs(25));
        assert_eq!(config.ttl_for(Some("-3")), Duration::from_secs(25));
    }

    #[test]
    fn test_ttl_for_clamps_to_max() {
        let config = PollConfig::default();
        assert_eq!(config.ttl_for(Some(" 5 ")), Duration::from_secs(5));
        assert_eq!(config.ttl_for(Some("0")), Duration::ZERO);
        assert_eq!(config.ttl_for(Some("3600")), Duration::from_secs(60));
    }

    #[test]
    fn test_validated_raises_max_to_default() {
        let config = PollConfig {
            default_ttl: Duration::from_secs(30),
            max_ttl: Duration::from_secs(10),
        }
        .validated();
        assert_eq!(config.max_ttl, Duration::from_secs(30));
    }
}
