//! Request-scoped inputs to the engine.
//!
//! Everything that would otherwise be ambient state (timezone, the active
//! personality, "now", the cache-busting nonce) travels in one immutable
//! [`RequestContext`] handed to every stage of the pipeline.

use chorus_config::ContextConfig;
use chorus_core::Personality;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

// ── Engine options ────────────────────────────────────────────────────────

/// Immutable engine settings, derived once from [`ContextConfig`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Default context window when the personality has no override
    pub context_window_tokens: usize,
    /// Characters per token for the selection-time estimate
    pub chars_per_token: usize,
    /// Tokens reserved for the history wrapper markup
    pub wrapper_overhead_tokens: usize,
    /// Gap between consecutive entries that earns a time-gap marker
    pub time_gap: chrono::Duration,
    /// Share of the window held back for history while sizing memories
    pub history_reserve_ratio: f32,
    pub cross_channel_enabled: bool,
    pub warn_overrun_ratio: f32,
    pub max_overrun_ratio: f32,
    pub memory_limit: usize,
    pub memory_min_score: f32,
    pub platform_constraints: String,
    pub output_constraints: String,
    pub behavior_protocol: String,
    /// Timezone used when a request names none (or an invalid one)
    pub default_timezone: Tz,
}

impl From<&ContextConfig> for EngineOptions {
    fn from(config: &ContextConfig) -> Self {
        Self {
            context_window_tokens: config.context_window_tokens,
            chars_per_token: config.history.chars_per_token.max(1),
            wrapper_overhead_tokens: config.history.wrapper_overhead_tokens,
            time_gap: chrono::Duration::minutes(config.history.time_gap_minutes),
            history_reserve_ratio: config.history.reserve_ratio,
            cross_channel_enabled: config.cross_channel.enabled,
            warn_overrun_ratio: config.cross_channel.warn_overrun_ratio,
            max_overrun_ratio: config.cross_channel.max_overrun_ratio,
            memory_limit: config.memory.limit,
            memory_min_score: config.memory.min_score,
            platform_constraints: config.prompt.platform_constraints.clone(),
            output_constraints: config.prompt.output_constraints.clone(),
            behavior_protocol: config.prompt.behavior_protocol.clone(),
            default_timezone: config.default_timezone.parse().unwrap_or(Tz::UTC),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

impl EngineOptions {
    /// Window for a personality, honoring its override.
    pub fn window_for(&self, personality: &Personality) -> usize {
        personality
            .context_window_tokens
            .unwrap_or(self.context_window_tokens)
    }
}

// ── Request context ───────────────────────────────────────────────────────

/// Where the conversation is happening.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    /// Server / guild name, absent for direct messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Channel display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    /// Channel topic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub direct_message: bool,
}

/// Immutable per-request context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The personality being prompted
    pub personality: Personality,
    /// Requester's timezone; every rendered timestamp uses it
    pub timezone: Tz,
    /// The instant the request is assembled at
    pub now: DateTime<Utc>,
    /// Per-request nonce. Rendered into the prompt so identical inputs
    /// never hit an upstream response cache.
    pub request_id: String,
    pub location: Option<Location>,
}

impl RequestContext {
    pub fn new(personality: Personality) -> Self {
        Self {
            personality,
            timezone: Tz::UTC,
            now: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            location: None,
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Parse an IANA name, falling back to `fallback` when it is unknown.
    pub fn with_timezone_name(mut self, name: &str, fallback: Tz) -> Self {
        self.timezone = match name.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(timezone = %name, fallback = %fallback, "Unknown timezone, using fallback");
                fallback
            }
        };
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn personality_name(&self) -> &str {
        &self.personality.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_config() {
        let mut config = ContextConfig::default();
        config.context_window_tokens = 8000;
        config.history.time_gap_minutes = 30;
        config.default_timezone = "Europe/Berlin".into();

        let options = EngineOptions::from(&config);
        assert_eq!(options.context_window_tokens, 8000);
        assert_eq!(options.time_gap, chrono::Duration::minutes(30));
        assert_eq!(options.default_timezone, chrono_tz::Europe::Berlin);
    }

    #[test]
    fn personality_window_override() {
        let options = EngineOptions::default();
        let mut lila = Personality::new("lila", "Lila");
        assert_eq!(options.window_for(&lila), 131_072);
        lila.context_window_tokens = Some(32_000);
        assert_eq!(options.window_for(&lila), 32_000);
    }

    #[test]
    fn unknown_timezone_falls_back() {
        let ctx = RequestContext::new(Personality::new("lila", "Lila"))
            .with_timezone_name("Nowhere/Atlantis", Tz::UTC);
        assert_eq!(ctx.timezone, Tz::UTC);

        let ctx = ctx.with_timezone_name("America/New_York", Tz::UTC);
        assert_eq!(ctx.timezone, chrono_tz::America::New_York);
    }

    #[test]
    fn each_request_gets_a_fresh_nonce() {
        let a = RequestContext::new(Personality::new("lila", "Lila"));
        let b = RequestContext::new(Personality::new("lila", "Lila"));
        assert_ne!(a.request_id, b.request_id);
    }
}
