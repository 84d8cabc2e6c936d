//! Natural-language time resolution.
//!
//! Recognized forms, tried in order:
//! - "just before/after 1 pm" (ten seconds either side, today)
//! - "31st october [2025] [at] 3:58 pm [ist]" (rolls to next year when past)
//! - "in 5 minutes", "in 2 hours"
//! - "tomorrow 7[:30] [am|pm]"
//! - "next friday [6 pm]" (the weekday in the following week, 09:00 default)
//! - "7[:30] am|pm" (tomorrow when already past)
//! - "7[:30] ... morning|afternoon|evening|night"

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use regex::{Captures, Regex};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::tool::{Tool, ToolError, ToolInput, ToolOutcome};

pub const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";

const WEEKDAYS: [&str; 7] = [
    "sunday", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
];

static JUST_NEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"just\s+(before|after)\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b")
        .expect("valid just-near regex")
});

static EXPLICIT_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?:on\s+|at\s+)?(\d{1,2})(?:st|nd|rd|th)?\s+",
        r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t|tember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)",
        r"(?:\s+(\d{4}))?(?:\s+at)?\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?(?:\s*ist)?\b",
    ))
    .expect("valid explicit date regex")
});

static IN_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^in\s+(\d+)\s*(min|mins|minute|minutes|hour|hours)$").expect("valid duration regex")
});

static TOMORROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^tomorrow\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$").expect("valid tomorrow regex")
});

static NEXT_WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^next\s+([a-z]+)(?:\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?)?$")
        .expect("valid next weekday regex")
});

static CLOCK_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})(?::(\d{2}))?\s*(am|pm)$").expect("valid clock time regex")
});

static DAYPART_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})(?::(\d{2}))?\b.*\b(morning|afternoon|evening|night)\b")
        .expect("valid daypart regex")
});

fn default_tz() -> String {
    DEFAULT_TIMEZONE.to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TimeParseInput {
    /// The human-readable time expression, e.g. "tomorrow 7am" or "just before 1 pm".
    pub text: String,
    /// ISO timestamp to interpret relative expressions from. Defaults to now.
    pub now_iso: Option<String>,
    /// IANA time zone, e.g. "Asia/Kolkata".
    #[serde(default = "default_tz")]
    pub tz: String,
}

impl ToolInput for TimeParseInput {}

/// A resolved instant and how sure the parser is about it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTime {
    pub when: DateTime<Tz>,
    pub confidence: f64,
}

pub struct TimeParseTool;

#[async_trait]
impl Tool for TimeParseTool {
    type Input = TimeParseInput;

    fn name(&self) -> &str {
        "time_parse"
    }

    fn description(&self) -> &str {
        "Resolve natural language time to ISO timestamp in a timezone (defaults to Asia/Kolkata)."
    }

    async fn execute(&self, input: TimeParseInput) -> Result<ToolOutcome, ToolError> {
        let Ok(tz) = input.tz.parse::<Tz>() else {
            return Ok(ToolOutcome::failure_with("invalid_timezone", input.tz));
        };
        let now = match input.now_iso.as_deref() {
            Some(raw) => match parse_now(raw, tz) {
                Some(now) => now,
                None => return Ok(ToolOutcome::failure_with("invalid_now", raw)),
            },
            None => Utc::now().with_timezone(&tz),
        };

        match resolve(&input.text, now) {
            Some(resolved) => {
                debug!(text = %input.text, when = %resolved.when, "time resolved");
                Ok(ToolOutcome::ok(json!({
                    "when_iso": resolved.when.to_rfc3339_opts(SecondsFormat::Millis, false),
                    "confidence": resolved.confidence,
                    "tz": tz.name(),
                })))
            }
            None => Ok(ToolOutcome::failure("ambiguous_time")),
        }
    }
}

/// RFC 3339 with offset, or a naive local timestamp interpreted in `tz`.
fn parse_now(raw: &str, tz: Tz) -> Option<DateTime<Tz>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&tz));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
}

/// Resolve `text` relative to `now`. `None` means the expression is ambiguous.
pub fn resolve(text: &str, now: DateTime<Tz>) -> Option<ResolvedTime> {
    let lower = text.trim().to_lowercase();
    let found = |when: DateTime<Tz>, confidence: f64| ResolvedTime { when, confidence };

    if let Some(c) = JUST_NEAR.captures(&lower) {
        let hour = to_24h(num(&c, 2)?, c.get(4).map(|m| m.as_str()))?;
        let base = at(now.timezone(), now.date_naive(), hour, opt_num(&c, 3))?;
        let offset = Duration::seconds(10);
        let when = if &c[1] == "before" { base - offset } else { base + offset };
        return Some(found(when, 0.95));
    }

    if let Some(when) = explicit_date(&lower, now) {
        return Some(found(when, 0.98));
    }

    if let Some(c) = IN_DURATION.captures(&lower) {
        let n: i64 = c[1].parse().ok()?;
        let delta = if c[2].starts_with("hour") {
            Duration::try_hours(n)?
        } else {
            Duration::try_minutes(n)?
        };
        return now.checked_add_signed(delta).map(|when| found(when, 0.95));
    }

    if let Some(c) = TOMORROW.captures(&lower) {
        let hour = to_24h(num(&c, 1)?, c.get(3).map(|m| m.as_str()))?;
        let date = now.date_naive().succ_opt()?;
        return at(now.timezone(), date, hour, opt_num(&c, 2)).map(|when| found(when, 0.9));
    }

    if let Some(c) = NEXT_WEEKDAY.captures(&lower) {
        if let Some(target) = WEEKDAYS.iter().position(|d| *d == &c[1]) {
            let today = now.weekday().num_days_from_sunday() as i64;
            let date = now.date_naive() + Duration::days(target as i64 + 7 - today);
            let (hour, minute) = match c.get(2) {
                Some(_) => (to_24h(num(&c, 2)?, c.get(4).map(|m| m.as_str()))?, opt_num(&c, 3)),
                None => (9, 0),
            };
            return at(now.timezone(), date, hour, minute).map(|when| found(when, 0.85));
        }
    }

    if let Some(c) = CLOCK_TIME.captures(&lower) {
        let hour = to_24h(num(&c, 1)?, c.get(3).map(|m| m.as_str()))?;
        return next_occurrence(now, hour, opt_num(&c, 2)).map(|when| found(when, 0.8));
    }

    if let Some(c) = DAYPART_TIME.captures(&lower) {
        let raw_hour = num(&c, 1)?;
        if raw_hour <= 12 {
            let meridiem = if &c[3] == "morning" { "am" } else { "pm" };
            let hour = to_24h(raw_hour, Some(meridiem))?;
            return next_occurrence(now, hour, opt_num(&c, 2)).map(|when| found(when, 0.8));
        }
    }

    None
}

fn explicit_date(lower: &str, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
    let c = EXPLICIT_DATE.captures(lower)?;
    let day = num(&c, 1)?;
    let month = month_number(&c[2])?;
    let explicit_year = c.get(3).and_then(|m| m.as_str().parse::<i32>().ok());
    let hour = to_24h(num(&c, 4)?, c.get(6).map(|m| m.as_str()))?;
    let minute = opt_num(&c, 5);

    let year = explicit_year.unwrap_or_else(|| now.year());
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let when = at(now.timezone(), date, hour, minute)?;

    if explicit_year.is_none() && when < now {
        let next_year = NaiveDate::from_ymd_opt(year + 1, month, day)?;
        return at(now.timezone(), next_year, hour, minute);
    }
    Some(when)
}

/// Today at `hour:minute`, or tomorrow when that moment has passed.
fn next_occurrence(now: DateTime<Tz>, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    let today = at(now.timezone(), now.date_naive(), hour, minute)?;
    if today < now {
        at(now.timezone(), now.date_naive().succ_opt()?, hour, minute)
    } else {
        Some(today)
    }
}

fn at(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    tz.from_local_datetime(&naive).earliest()
}

fn to_24h(hour: u32, meridiem: Option<&str>) -> Option<u32> {
    let hour = match meridiem {
        Some("pm") if hour < 12 => hour + 12,
        Some("am") if hour == 12 => 0,
        _ => hour,
    };
    (hour < 24).then_some(hour)
}

fn num(c: &Captures<'_>, group: usize) -> Option<u32> {
    c.get(group)?.as_str().parse().ok()
}

fn opt_num(c: &Captures<'_>, group: usize) -> u32 {
    num(c, group).unwrap_or(0)
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2025-10-15T10:00:00+05:30";

    fn now() -> DateTime<Tz> {
        parse_now(NOW, chrono_tz::Asia::Kolkata).unwrap()
    }

    fn iso(text: &str) -> String {
        resolve(text, now())
            .unwrap_or_else(|| panic!("'{text}' should resolve"))
            .when
            .to_rfc3339_opts(SecondsFormat::Millis, false)
    }

    #[test]
    fn relative_durations() {
        assert_eq!(iso("in 5 min"), "2025-10-15T10:05:00.000+05:30");
        assert_eq!(iso("In 2 hours"), "2025-10-15T12:00:00.000+05:30");
    }

    #[test]
    fn tomorrow_with_and_without_meridiem() {
        assert_eq!(iso("tomorrow 7am"), "2025-10-16T07:00:00.000+05:30");
        assert_eq!(iso("tomorrow 6:30 pm"), "2025-10-16T18:30:00.000+05:30");
        assert_eq!(iso("tomorrow 12 am"), "2025-10-16T00:00:00.000+05:30");
    }

    #[test]
    fn next_weekday_lands_in_the_following_week() {
        // 2025-10-15 is a Wednesday.
        assert_eq!(iso("next friday"), "2025-10-24T09:00:00.000+05:30");
        assert_eq!(iso("next monday 6 pm"), "2025-10-20T18:00:00.000+05:30");
        assert!(resolve("next fortnight", now()).is_none());
    }

    #[test]
    fn clock_time_rolls_over_when_past() {
        assert_eq!(iso("7 pm"), "2025-10-15T19:00:00.000+05:30");
        assert_eq!(iso("9:15am"), "2025-10-16T09:15:00.000+05:30");
    }

    #[test]
    fn just_before_and_after() {
        assert_eq!(iso("just before 1 pm"), "2025-10-15T12:59:50.000+05:30");
        assert_eq!(iso("remind me just after 8:30 pm"), "2025-10-15T20:30:10.000+05:30");
    }

    #[test]
    fn explicit_dates() {
        assert_eq!(iso("31st october 3:58 pm ist"), "2025-10-31T15:58:00.000+05:30");
        assert_eq!(iso("on 2nd jan 2026 at 9 am"), "2026-01-02T09:00:00.000+05:30");
        // Already past this year without an explicit year.
        assert_eq!(iso("1st march at 10:00 am"), "2026-03-01T10:00:00.000+05:30");
        let resolved = resolve("31st october 3:58 pm", now()).unwrap();
        assert_eq!(resolved.confidence, 0.98);
    }

    #[test]
    fn daypart_words_pick_the_meridiem() {
        assert_eq!(iso("at 8 in the evening"), "2025-10-15T20:00:00.000+05:30");
        assert_eq!(iso("6 tomorrow morning"), "2025-10-16T06:00:00.000+05:30");
    }

    #[test]
    fn vague_text_is_ambiguous() {
        assert!(resolve("sometime soon", now()).is_none());
        assert!(resolve("in a bit", now()).is_none());
        assert!(resolve("25 pm", now()).is_none());
    }

    #[tokio::test]
    async fn tool_reports_iso_confidence_and_zone() {
        let input = TimeParseInput {
            text: "in 5 min".into(),
            now_iso: Some(NOW.into()),
            tz: DEFAULT_TIMEZONE.into(),
        };
        let outcome = TimeParseTool.execute(input).await.unwrap();
        assert_eq!(
            outcome.to_value(),
            json!({"when_iso": "2025-10-15T10:05:00.000+05:30", "confidence": 0.95, "tz": "Asia/Kolkata"})
        );
    }

    #[tokio::test]
    async fn tool_converts_now_into_the_requested_zone() {
        let input = TimeParseInput {
            text: "in 1 hour".into(),
            now_iso: Some("2025-10-15T04:30:00Z".into()),
            tz: "Europe/London".into(),
        };
        let outcome = TimeParseTool.execute(input).await.unwrap();
        assert_eq!(outcome.to_value()["when_iso"], "2025-10-15T06:30:00.000+01:00");
    }

    #[tokio::test]
    async fn tool_failure_codes() {
        let bad_zone = TimeParseInput {
            text: "in 5 min".into(),
            now_iso: None,
            tz: "Mars/Olympus".into(),
        };
        let outcome = TimeParseTool.execute(bad_zone).await.unwrap();
        assert_eq!(outcome.error_code(), Some("invalid_timezone"));

        let bad_now = TimeParseInput {
            text: "in 5 min".into(),
            now_iso: Some("yesterday-ish".into()),
            tz: DEFAULT_TIMEZONE.into(),
        };
        let outcome = TimeParseTool.execute(bad_now).await.unwrap();
        assert_eq!(outcome.error_code(), Some("invalid_now"));

        let vague = TimeParseInput {
            text: "whenever".into(),
            now_iso: Some(NOW.into()),
            tz: DEFAULT_TIMEZONE.into(),
        };
        let outcome = TimeParseTool.execute(vague).await.unwrap();
        assert_eq!(outcome.to_value(), json!({"error": "ambiguous_time"}));
    }
}
