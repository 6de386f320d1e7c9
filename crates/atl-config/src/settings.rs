//! Typed view of the merged configuration tree.
//!
//! Every field has a default so an empty config boots a working workshop.

use anyhow::{anyhow, bail, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkshopConfig {
    pub workshop: WorkshopSettings,
    pub workflow: WorkflowSettings,
    pub penalty: PenaltySettings,
    pub sweep: SweepSettings,
    pub outbox: OutboxSettings,
    pub push: PushSettings,
    pub daemon: DaemonSettings,
}

impl WorkshopConfig {
    pub fn validate(&self) -> Result<()> {
        self.workshop.tz()?;
        if self.workflow.reminder_hour > 23 {
            bail!("workflow.reminder_hour must be 0..=23");
        }
        for (name, bps) in [
            ("penalty.remuneration_share_bps", self.penalty.remuneration_share_bps),
            ("penalty.delay_penalty_bps", self.penalty.delay_penalty_bps),
            (
                "penalty.non_conformite_penalty_bps",
                self.penalty.non_conformite_penalty_bps,
            ),
        ] {
            if !(0..=10_000).contains(&bps) {
                bail!("{name} must be within 0..=10000 (got {bps})");
            }
        }
        if self.penalty.delay_grace_days < 0 {
            bail!("penalty.delay_grace_days must be >= 0");
        }
        if self.penalty.non_conformite_sla_hours <= 0 {
            bail!("penalty.non_conformite_sla_hours must be > 0");
        }
        if self.sweep.interval_secs == 0 {
            bail!("sweep.interval_secs must be > 0");
        }
        if self.outbox.batch_size == 0 || self.outbox.max_attempts == 0 {
            bail!("outbox.batch_size and outbox.max_attempts must be > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkshopSettings {
    /// IANA timezone used for calendar-day arithmetic.
    pub timezone: String,
}

impl Default for WorkshopSettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
        }
    }
}

impl WorkshopSettings {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("workshop.timezone '{}' is not a valid IANA zone: {e}", self.timezone))
    }
}

/// When an employee gets their availability flag back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeRelease {
    /// Quality control passed (`PRET`).
    #[default]
    OnReady,
    /// Order handed over (`LIVRE`).
    OnDelivered,
    /// Never released automatically.
    Never,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Days before the due date at which reminders are scheduled on creation.
    pub reminder_offsets_days: Vec<i64>,
    /// Local hour of day at which scheduled reminders fire.
    pub reminder_hour: u32,
    pub require_measurements_before_production: bool,
    pub employee_release: EmployeeRelease,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            reminder_offsets_days: vec![3, 2, 1, 0],
            reminder_hour: 8,
            require_measurements_before_production: false,
            employee_release: EmployeeRelease::OnReady,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltySettings {
    pub remuneration_share_bps: i64,
    pub delay_penalty_bps: i64,
    pub non_conformite_penalty_bps: i64,
    /// Days past the due date tolerated before the delay penalty applies.
    pub delay_grace_days: i64,
    pub non_conformite_sla_hours: i64,
}

impl Default for PenaltySettings {
    fn default() -> Self {
        Self {
            remuneration_share_bps: 4_000,
            delay_penalty_bps: 2_000,
            non_conformite_penalty_bps: 1_000,
            delay_grace_days: 3,
            non_conformite_sla_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub interval_secs: u64,
    /// Days-until-due values that raise a reminder during a sweep.
    pub reminder_days: Vec<i64>,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval_secs: 86_400,
            reminder_days: vec![2, 1, 0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    pub batch_size: u32,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    /// A CLAIMED row older than this is considered abandoned and re-claimable.
    pub stale_claim_secs: i64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval_ms: 1_000,
            max_attempts: 5,
            stale_claim_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSettings {
    pub enabled: bool,
    pub base_url: String,
    /// Name of the env var holding the optional Expo access token.
    pub access_token_env: String,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://exp.host/--/api/v2/push/send".to_string(),
            access_token_env: "ATL_EXPO_ACCESS_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub bind_addr: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8898".to_string(),
        }
    }
}
