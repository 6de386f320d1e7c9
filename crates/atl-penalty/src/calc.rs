//! Pure penalty and remuneration math. No IO, no clock.

use atl_config::PenaltySettings;
use atl_schemas::{apply_bps, Amount};
use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenaltyRates {
    /// Employee share of the order price.
    pub remuneration_share_bps: i64,
    pub delay_penalty_bps: i64,
    pub non_conformite_penalty_bps: i64,
    /// Days past the due date tolerated before the delay penalty applies.
    pub delay_grace_days: i64,
    /// Hours an order may sit in NON_CONFORME before escalation.
    pub non_conformite_sla_hours: i64,
}

impl Default for PenaltyRates {
    fn default() -> Self {
        Self::from(&PenaltySettings::default())
    }
}

impl From<&PenaltySettings> for PenaltyRates {
    fn from(s: &PenaltySettings) -> Self {
        Self {
            remuneration_share_bps: s.remuneration_share_bps,
            delay_penalty_bps: s.delay_penalty_bps,
            non_conformite_penalty_bps: s.non_conformite_penalty_bps,
            delay_grace_days: s.delay_grace_days,
            non_conformite_sla_hours: s.non_conformite_sla_hours,
        }
    }
}

/// `max(price * share - penalties, 0)`.
pub fn remuneration_amount(price: Amount, penalties_total: Amount, rates: &PenaltyRates) -> Amount {
    let base = apply_bps(price, rates.remuneration_share_bps);
    base.saturating_sub(penalties_total).max(0)
}

pub fn delay_penalty_amount(price: Amount, rates: &PenaltyRates) -> Amount {
    apply_bps(price, rates.delay_penalty_bps)
}

pub fn non_conformite_penalty_amount(price: Amount, rates: &PenaltyRates) -> Amount {
    apply_bps(price, rates.non_conformite_penalty_bps)
}

/// Whole calendar days from `today` to `due`; negative once overdue.
pub fn days_until_due(due: NaiveDate, today: NaiveDate) -> i64 {
    (due - today).num_days()
}

/// Strictly more than the grace window past the due date.
pub fn delay_breached(due: NaiveDate, today: NaiveDate, rates: &PenaltyRates) -> bool {
    days_until_due(due, today) < -rates.delay_grace_days
}

/// `true` once `since` is at least the SLA in the past.
pub fn non_conformite_sla_elapsed(
    since: DateTime<Utc>,
    now: DateTime<Utc>,
    rates: &PenaltyRates,
) -> bool {
    (now - since).num_hours() >= rates.non_conformite_sla_hours
}

/// Remuneration after a late penalty. Clamped at zero: pay is never negative.
pub fn decrement_remuneration(current: Amount, penalty: Amount) -> Amount {
    current.saturating_sub(penalty).max(0)
}
