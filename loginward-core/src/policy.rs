//! Lockout policy: thresholds, escalation schedule and the lockout message.
//!
//! A [`LockoutPolicy`] is read-only to the tracker. It is either built in code
//! with the `with_*` setters or loaded from [`PolicySettings`], the serde shape
//! a host application keeps in its own configuration store.
//!
//! # Example
//!
//! ```rust
//! use chrono::Duration;
//! use loginward_core::policy::{LockoutPolicy, LockoutSchedule};
//!
//! let policy = LockoutPolicy::default()
//!     .with_max_failures(5)
//!     .with_schedule(LockoutSchedule::Flat(Duration::minutes(30)));
//! assert!(policy.validate().is_ok());
//! ```

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Placeholder replaced with the lockout expiry when rendering the message.
pub const LOCKOUT_PLACEHOLDER: &str = "{{locked_out_until}}";

pub const DEFAULT_MESSAGE_TEMPLATE: &str =
    "Too many failed login attempts. Please try again after {{locked_out_until}}.";

/// Upper bound, in days, for lockout tiers, the rolling window and retention.
pub const MAX_POLICY_DAYS: i64 = 3650;

/// Long month, day, year and 12-hour clock, e.g. `October 18, 2026 3:04 pm`.
const DISPLAY_FORMAT: &str = "%B %-d, %Y %-I:%M %P";

/// Maps a lockout occurrence to how long that lockout lasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockoutSchedule {
    /// Every lockout lasts the same time.
    Flat(Duration),
    /// The n-th lockout uses the n-th entry; the last entry repeats.
    Escalating(Vec<Duration>),
}

impl LockoutSchedule {
    /// Duration of the given 1-based lockout occurrence.
    pub fn duration_for(&self, occurrence: u32) -> Duration {
        self.tiers()
            .get(self.tier_index(occurrence))
            .copied()
            .unwrap_or_else(Duration::zero)
    }

    fn tier_index(&self, occurrence: u32) -> usize {
        match self {
            LockoutSchedule::Flat(_) => 0,
            LockoutSchedule::Escalating(tiers) => {
                (occurrence.max(1) as usize - 1).min(tiers.len().saturating_sub(1))
            }
        }
    }

    pub fn tiers(&self) -> &[Duration] {
        match self {
            LockoutSchedule::Flat(duration) => std::slice::from_ref(duration),
            LockoutSchedule::Escalating(tiers) => tiers,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let tiers = self.tiers();
        if tiers.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }
        if let Some(index) = tiers.iter().position(|d| *d <= Duration::zero()) {
            return Err(ConfigError::NonPositiveDuration(index));
        }
        if let Some(index) = tiers.iter().position(|d| *d > max_policy_duration()) {
            return Err(ConfigError::DurationTooLong(index));
        }
        Ok(())
    }
}

/// Which failures count toward the threshold.
///
/// Failures are always counted after the most recent success or lockout;
/// a rolling window additionally drops failures older than its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureWindow {
    SinceLastSuccess,
    Rolling(Duration),
}

impl FailureWindow {
    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            FailureWindow::SinceLastSuccess => None,
            // Saturates to no lower bound at the start of representable time.
            FailureWindow::Rolling(length) => now.checked_sub_signed(*length),
        }
    }
}

/// What the gate does when the lockout lookup itself fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupFailureMode {
    /// Treat the pair as not locked and hand the error back with the verdict.
    #[default]
    FailOpen,
    /// Return the error instead of a verdict.
    FailClosed,
}

/// Lockout message with a [`LOCKOUT_PLACEHOLDER`] slot for the expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTemplate(String);

impl MessageTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn render(&self, until: DateTime<Utc>, offset: FixedOffset) -> String {
        let formatted = until.with_timezone(&offset).format(DISPLAY_FORMAT).to_string();
        self.0.replace(LOCKOUT_PLACEHOLDER, &formatted)
    }
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_TEMPLATE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// When false the tracker never records and never locks.
    pub enabled: bool,
    pub max_failures: u32,
    pub schedule: LockoutSchedule,
    pub window: FailureWindow,
    pub message_template: MessageTemplate,
    /// Offset the lockout expiry is displayed in.
    pub display_offset: FixedOffset,
    pub lookup_failure: LookupFailureMode,
    /// How long attempt records are kept by the cleanup task.
    pub retention_period: Duration,
    /// Record bot and challenge rejections as failed attempts.
    pub count_rejections_as_failures: bool,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failures: 3,
            schedule: LockoutSchedule::Escalating(vec![
                Duration::minutes(15),
                Duration::hours(1),
                Duration::hours(24),
            ]),
            window: FailureWindow::SinceLastSuccess,
            message_template: MessageTemplate::default(),
            display_offset: utc_offset(),
            lookup_failure: LookupFailureMode::FailOpen,
            retention_period: Duration::days(7),
            count_rejections_as_failures: false,
        }
    }
}

impl LockoutPolicy {
    /// A policy that turns lockout tracking off entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_schedule(mut self, schedule: LockoutSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_window(mut self, window: FailureWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_message_template(mut self, template: impl Into<String>) -> Self {
        self.message_template = MessageTemplate::new(template);
        self
    }

    pub fn with_display_offset(mut self, offset: FixedOffset) -> Self {
        self.display_offset = offset;
        self
    }

    pub fn with_lookup_failure(mut self, mode: LookupFailureMode) -> Self {
        self.lookup_failure = mode;
        self
    }

    pub fn with_retention_period(mut self, retention: Duration) -> Self {
        self.retention_period = retention;
        self
    }

    pub fn with_count_rejections_as_failures(mut self, count: bool) -> Self {
        self.count_rejections_as_failures = count;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_failures == 0 {
            return Err(ConfigError::InvalidThreshold(self.max_failures));
        }
        self.schedule.validate()?;
        if let FailureWindow::Rolling(length) = self.window {
            if length <= Duration::zero() || length > max_policy_duration() {
                return Err(ConfigError::InvalidWindow);
            }
        }
        if self.retention_period <= Duration::zero() || self.retention_period > max_policy_duration()
        {
            return Err(ConfigError::InvalidRetention);
        }
        Ok(())
    }

    pub fn lockout_duration(&self, occurrence: u32) -> Duration {
        self.schedule.duration_for(occurrence)
    }

    /// End of the given lockout occurrence when it starts at `now`.
    pub fn lockout_until(
        &self,
        now: DateTime<Utc>,
        occurrence: u32,
    ) -> Result<DateTime<Utc>, ConfigError> {
        now.checked_add_signed(self.lockout_duration(occurrence))
            .ok_or(ConfigError::DurationTooLong(self.schedule.tier_index(occurrence)))
    }

    pub fn render_message(&self, until: DateTime<Utc>) -> String {
        self.message_template.render(until, self.display_offset)
    }

    /// Parse and validate policy settings stored as JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: PolicySettings =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::try_from(settings)
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

fn max_policy_duration() -> Duration {
    Duration::days(MAX_POLICY_DAYS)
}

/// Serialized form of a [`LockoutPolicy`], using plain integers for durations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub enabled: bool,
    pub max_failures: u32,
    /// One entry gives a flat schedule, more give an escalating one.
    pub lockout_minutes: Vec<i64>,
    /// Rolling window length; absent means "since last success".
    pub window_minutes: Option<i64>,
    pub message_template: String,
    pub utc_offset_minutes: i32,
    pub lookup_failure: LookupFailureMode,
    pub retention_days: i64,
    pub count_rejections_as_failures: bool,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failures: 3,
            lockout_minutes: vec![15, 60, 1440],
            window_minutes: None,
            message_template: DEFAULT_MESSAGE_TEMPLATE.to_string(),
            utc_offset_minutes: 0,
            lookup_failure: LookupFailureMode::FailOpen,
            retention_days: 7,
            count_rejections_as_failures: false,
        }
    }
}

impl TryFrom<PolicySettings> for LockoutPolicy {
    type Error = ConfigError;

    fn try_from(settings: PolicySettings) -> Result<Self, Self::Error> {
        if let Some(index) = settings.lockout_minutes.iter().position(|m| *m <= 0) {
            return Err(ConfigError::NonPositiveDuration(index));
        }
        let mut tiers = settings
            .lockout_minutes
            .iter()
            .enumerate()
            .map(|(index, m)| {
                Duration::try_minutes(*m).ok_or(ConfigError::DurationTooLong(index))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let schedule = match tiers.len() {
            0 => return Err(ConfigError::EmptySchedule),
            1 => LockoutSchedule::Flat(tiers.remove(0)),
            _ => LockoutSchedule::Escalating(tiers),
        };

        let window = match settings.window_minutes {
            None => FailureWindow::SinceLastSuccess,
            Some(minutes) if minutes > 0 => FailureWindow::Rolling(
                Duration::try_minutes(minutes).ok_or(ConfigError::InvalidWindow)?,
            ),
            Some(_) => return Err(ConfigError::InvalidWindow),
        };

        let display_offset = settings
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::InvalidOffset(settings.utc_offset_minutes))?;

        let retention_period =
            Duration::try_days(settings.retention_days).ok_or(ConfigError::InvalidRetention)?;

        let policy = LockoutPolicy {
            enabled: settings.enabled,
            max_failures: settings.max_failures,
            schedule,
            window,
            message_template: MessageTemplate::new(settings.message_template),
            display_offset,
            lookup_failure: settings.lookup_failure,
            retention_period,
            count_rejections_as_failures: settings.count_rejections_as_failures,
        };
        policy.validate()?;
        Ok(policy)
    }
}
