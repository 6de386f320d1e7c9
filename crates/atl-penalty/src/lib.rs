//! atl-penalty
//!
//! Financial consequences of the order lifecycle: remuneration owed to the
//! assigned employee, the delay penalty, and the non-conformity penalty.
//!
//! [`calc`] is deterministic integer math with no I/O. [`apply`] runs the
//! same rules inside a caller-owned unit of work so the penalty, the status
//! change, the remuneration adjustment and the notification commit together.

pub mod apply;
pub mod calc;

pub use apply::{
    apply_delay_penalty, apply_non_conformite_penalty, generate_remuneration,
    update_remuneration_after_penalite, RemunerationSkip,
};
pub use calc::{
    days_until_due, decrement_remuneration, delay_breached, delay_penalty_amount,
    non_conformite_penalty_amount, non_conformite_sla_elapsed, remuneration_amount,
    PenaltyRates,
};
