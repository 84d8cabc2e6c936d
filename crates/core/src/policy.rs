//! Run-time limits and guardrails shared by the agent loop and the tools.
//!
//! A [`Policy`] is built once at startup (from defaults plus environment
//! overrides) and is read-only afterwards.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{active_profile, profiled_env_opt, profiled_env_u32};

/// Error codes a tool returns when the run should stop and explain itself
/// rather than try another approach.
pub const HARD_STOP_CODES: &[&str] = &["captcha_detected", "invalid_domain"];

/// Appended to tool output that was cut before being fed back to the model.
pub const TRUNCATION_MARKER: &str = "…[truncated]";

static TIME_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)tomorrow|next|in \d+ (min|hour|hours)|am|pm").expect("valid time hint regex")
});

static WEB_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(login|log in|sign in|dashboard|website|url)").expect("valid web hint regex")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Maximum number of model turns per run.
    pub max_steps: usize,
    /// Wall-clock budget for a run, checked only after an empty model reply.
    #[serde(with = "duration_ms")]
    pub overall_timeout: Duration,
    pub truncation: TruncationPolicy,
    pub email: EmailPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationPolicy {
    /// Characters of serialized tool output fed back to the model.
    pub tool_result_max_chars: usize,
    /// Characters of tool output kept in log summaries.
    pub tool_summary_max_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailPolicy {
    /// Lower-cased recipient domains allowed to receive mail. Empty = any.
    pub allow_domains: Vec<String>,
    pub max_per_minute: u32,
}

/// Advisory routing flags derived from the goal text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingHints {
    pub prefer_time_parse: bool,
    pub prefer_web: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_steps: 6,
            overall_timeout: Duration::from_millis(25_000),
            truncation: TruncationPolicy {
                tool_result_max_chars: 1200,
                tool_summary_max_chars: 300,
            },
            email: EmailPolicy {
                allow_domains: Vec::new(),
                max_per_minute: 60,
            },
        }
    }
}

impl Policy {
    /// Defaults overridden by environment (profile-aware, like [`crate::Config`]).
    pub fn from_env() -> Self {
        Self::for_profile(&active_profile())
    }

    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let defaults = Self::default();
        Self {
            max_steps: profiled_env_u32(p, "AGENT_MAX_STEPS", defaults.max_steps as u32) as usize,
            overall_timeout: Duration::from_millis(u64::from(profiled_env_u32(
                p,
                "AGENT_TIMEOUT_MS",
                defaults.overall_timeout.as_millis() as u32,
            ))),
            truncation: TruncationPolicy {
                tool_result_max_chars: profiled_env_u32(
                    p,
                    "TOOL_RESULT_MAX_CHARS",
                    defaults.truncation.tool_result_max_chars as u32,
                ) as usize,
                tool_summary_max_chars: profiled_env_u32(
                    p,
                    "TOOL_SUMMARY_MAX_CHARS",
                    defaults.truncation.tool_summary_max_chars as u32,
                ) as usize,
            },
            email: EmailPolicy {
                allow_domains: profiled_env_opt(p, "EMAIL_DOMAIN_ALLOW")
                    .map(|raw| parse_domain_list(&raw))
                    .unwrap_or_default(),
                max_per_minute: profiled_env_u32(
                    p,
                    "EMAIL_MAX_PER_MIN",
                    defaults.email.max_per_minute,
                ),
            },
        }
    }

    /// Case-insensitive pattern match over the goal. The flags never change
    /// control flow; they only frame the system prompt.
    pub fn hints(goal: &str) -> RoutingHints {
        RoutingHints {
            prefer_time_parse: TIME_HINT.is_match(goal),
            prefer_web: WEB_HINT.is_match(goal),
        }
    }

    pub fn is_hard_stop(code: &str) -> bool {
        HARD_STOP_CODES.contains(&code)
    }
}

impl EmailPolicy {
    /// True when the address's domain is allowed (always true with an empty list).
    pub fn allows(&self, address: &str) -> bool {
        if self.allow_domains.is_empty() {
            return true;
        }
        match address.rsplit_once('@') {
            Some((_, domain)) => {
                let domain = domain.trim().trim_end_matches('>').to_lowercase();
                self.allow_domains.iter().any(|d| *d == domain)
            }
            None => false,
        }
    }
}

/// Comma-separated list, trimmed and lower-cased, blanks dropped.
pub fn parse_domain_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let policy = Policy::default();
        assert_eq!(policy.max_steps, 6);
        assert_eq!(policy.overall_timeout, Duration::from_secs(25));
        assert_eq!(policy.truncation.tool_result_max_chars, 1200);
        assert_eq!(policy.truncation.tool_summary_max_chars, 300);
        assert_eq!(policy.email.max_per_minute, 60);
        assert!(policy.email.allow_domains.is_empty());
    }

    #[test]
    fn domain_list_is_trimmed_lowercased_and_compacted() {
        assert_eq!(
            parse_domain_list(" Example.com, ,acme.IO ,,"),
            vec!["example.com".to_string(), "acme.io".to_string()]
        );
        assert!(parse_domain_list("").is_empty());
    }

    #[test]
    fn env_overrides_are_profile_aware() {
        std::env::set_var("POLTESTA_AGENT_MAX_STEPS", "3");
        std::env::set_var("POLTESTA_EMAIL_DOMAIN_ALLOW", "Corp.example, partner.example");
        let policy = Policy::for_profile("poltesta");
        assert_eq!(policy.max_steps, 3);
        assert_eq!(policy.email.allow_domains, vec!["corp.example", "partner.example"]);
    }

    #[test]
    fn time_hint_matches_relative_expressions() {
        assert!(Policy::hints("remind me tomorrow").prefer_time_parse);
        assert!(Policy::hints("ping me IN 5 MIN").prefer_time_parse);
        assert!(Policy::hints("call at 7 pm").prefer_time_parse);
        assert!(!Policy::hints("send the report").prefer_time_parse);
    }

    #[test]
    fn web_hint_matches_site_words() {
        let hints = Policy::hints("Log in to the dashboard");
        assert!(hints.prefer_web);
        assert!(!Policy::hints("email bob").prefer_web);
    }

    #[test]
    fn email_allowlist_checks_recipient_domain() {
        let email = EmailPolicy {
            allow_domains: vec!["example.com".into()],
            max_per_minute: 60,
        };
        assert!(email.allows("bob@Example.com"));
        assert!(!email.allows("bob@evil.com"));
        assert!(!email.allows("not-an-address"));

        let open = EmailPolicy { allow_domains: vec![], max_per_minute: 60 };
        assert!(open.allows("anyone@anywhere.org"));
    }

    #[test]
    fn hard_stop_codes_are_recognized() {
        assert!(Policy::is_hard_stop("captcha_detected"));
        assert!(Policy::is_hard_stop("invalid_domain"));
        assert!(!Policy::is_hard_stop("selector_timeout"));
    }
}
