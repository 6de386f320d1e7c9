//! Delivery reminder wording and dedupe keys.
//!
//! Reminders scheduled at creation and reminders raised by the sweep share
//! one key per (due date, days before), so a given reminder exists at most
//! once per order. Moving the due date yields fresh keys.

use chrono::NaiveDate;
use uuid::Uuid;

pub fn reminder_dedupe_key(due_date: NaiveDate, days_before: i64) -> String {
    format!("rappel:{due_date}:D-{days_before}")
}

pub fn reminder_message(commande_id: Uuid, days_before: i64) -> String {
    match days_before {
        0 => format!("Rappel : la commande {commande_id} doit être livrée aujourd'hui."),
        1 => format!("Rappel : la commande {commande_id} doit être livrée demain."),
        n => format!("Rappel : la commande {commande_id} doit être livrée dans {n} jours."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_changes_with_the_due_date() {
        let a = NaiveDate::from_ymd_opt(2025, 5, 10).unwrap();
        let b = NaiveDate::from_ymd_opt(2025, 5, 12).unwrap();
        assert_eq!(reminder_dedupe_key(a, 2), "rappel:2025-05-10:D-2");
        assert_ne!(reminder_dedupe_key(a, 2), reminder_dedupe_key(b, 2));
    }
}
