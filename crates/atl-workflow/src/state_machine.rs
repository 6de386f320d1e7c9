//! Commande lifecycle state machine.
//!
//! # State diagram
//!
//! ```text
//!  EN_ATTENTE ─accept─► ASSIGNEE ─measure─► MESURE_ENREGISTREE
//!                          │                      │
//!                          └──confirm preparation─┴──► EN_PRODUCTION
//!                                                          │
//!                     ┌────────── ready for control ───────┘
//!                     ▼
//!                EN_CONTROLE ─control ok─► PRET ─deliver─► LIVRE (term.)
//!                     │  ▲
//!            control ko  └── ready for control ── NON_CONFORME | RETOUCHE
//!                     ▼
//!                NON_CONFORME ──(sweep, SLA)──► RETOUCHE
//!
//!  any pre-delivery state ──(sweep, grace window)──► RETARD ─deliver─► LIVRE
//! ```
//!
//! The sweep-driven edges (RETOUCHE, RETARD) are applied by the penalty
//! calculator through a status compare-and-set and are not events here.
//!
//! RETARD keeps the stage the order had reached. Events on a late order
//! follow the diagram from that stage and advance it while the status
//! stays RETARD; only delivery, which needs the stage to be PRET, leaves it.

use atl_schemas::CommandeStatus;

/// Caller-driven events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandeEvent {
    Accept,
    RecordMeasurements,
    ConfirmPreparation,
    ReadyForControl,
    Control { conforme: bool },
    Deliver,
}

impl CommandeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CommandeEvent::Accept => "accepter",
            CommandeEvent::RecordMeasurements => "enregistrer les mesures",
            CommandeEvent::ConfirmPreparation => "confirmer la préparation",
            CommandeEvent::ReadyForControl => "envoyer au contrôle",
            CommandeEvent::Control { .. } => "contrôler",
            CommandeEvent::Deliver => "livrer",
        }
    }
}

/// The event is not legal from the order's current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: CommandeStatus,
    pub event: CommandeEvent,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Action « {} » impossible sur une commande au statut {}.",
            self.event.name(),
            self.from
        )
    }
}

impl std::error::Error for TransitionError {}

/// Next status for `event` applied in `from`.
///
/// `Ok(None)` means the event is allowed but leaves the status unchanged
/// (measurements recorded after production started).
pub fn next_status(
    from: CommandeStatus,
    event: CommandeEvent,
) -> Result<Option<CommandeStatus>, TransitionError> {
    use CommandeStatus::*;

    let to = match (from, event) {
        (EnAttente, CommandeEvent::Accept) => Some(Assignee),

        (Assignee, CommandeEvent::RecordMeasurements) => Some(MesureEnregistree),
        (
            MesureEnregistree | EnProduction | EnControle | NonConforme | Retouche,
            CommandeEvent::RecordMeasurements,
        ) => None,

        (Assignee | MesureEnregistree, CommandeEvent::ConfirmPreparation) => Some(EnProduction),

        (EnProduction | NonConforme | Retouche, CommandeEvent::ReadyForControl) => {
            Some(EnControle)
        }

        (EnControle, CommandeEvent::Control { conforme: true }) => Some(Pret),
        (EnControle, CommandeEvent::Control { conforme: false }) => Some(NonConforme),

        (Pret, CommandeEvent::Deliver) => Some(Livre),

        _ => return Err(TransitionError { from, event }),
    };
    Ok(to)
}

/// Where an event takes an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Allowed, nothing moves.
    Unchanged,
    /// `status` moves.
    Status(CommandeStatus),
    /// The order stays RETARD; its late stage moves.
    LateStage(CommandeStatus),
}

/// [`next_status`] for an order that may be late.
///
/// A RETARD order without a recorded stage accepts no event.
pub fn transition(
    status: CommandeStatus,
    late_stage: Option<CommandeStatus>,
    event: CommandeEvent,
) -> Result<Transition, TransitionError> {
    if status != CommandeStatus::Retard {
        return Ok(match next_status(status, event)? {
            Some(to) => Transition::Status(to),
            None => Transition::Unchanged,
        });
    }
    let refused = TransitionError {
        from: status,
        event,
    };
    let stage = late_stage.ok_or_else(|| refused.clone())?;
    match next_status(stage, event) {
        Ok(None) => Ok(Transition::Unchanged),
        Ok(Some(CommandeStatus::Livre)) => Ok(Transition::Status(CommandeStatus::Livre)),
        Ok(Some(to)) => Ok(Transition::LateStage(to)),
        Err(_) => Err(refused),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CommandeStatus::*;

    const ALL: [CommandeStatus; 10] = [
        EnAttente,
        Assignee,
        MesureEnregistree,
        EnProduction,
        EnControle,
        Pret,
        NonConforme,
        Retouche,
        Retard,
        Livre,
    ];

    #[test]
    fn happy_path_walks_to_delivery() {
        let steps = [
            (EnAttente, CommandeEvent::Accept, Assignee),
            (Assignee, CommandeEvent::ConfirmPreparation, EnProduction),
            (EnProduction, CommandeEvent::ReadyForControl, EnControle),
            (EnControle, CommandeEvent::Control { conforme: true }, Pret),
            (Pret, CommandeEvent::Deliver, Livre),
        ];
        for (from, ev, to) in steps {
            assert_eq!(next_status(from, ev), Ok(Some(to)), "{from} + {ev:?}");
        }
    }

    #[test]
    fn failed_control_loops_back_through_retouch() {
        assert_eq!(
            next_status(EnControle, CommandeEvent::Control { conforme: false }),
            Ok(Some(NonConforme))
        );
        assert_eq!(
            next_status(NonConforme, CommandeEvent::ReadyForControl),
            Ok(Some(EnControle))
        );
        assert_eq!(
            next_status(Retouche, CommandeEvent::ReadyForControl),
            Ok(Some(EnControle))
        );
    }

    #[test]
    fn delivered_is_terminal() {
        for ev in [
            CommandeEvent::Accept,
            CommandeEvent::RecordMeasurements,
            CommandeEvent::ConfirmPreparation,
            CommandeEvent::ReadyForControl,
            CommandeEvent::Control { conforme: true },
            CommandeEvent::Deliver,
        ] {
            assert!(next_status(Livre, ev).is_err(), "{ev:?}");
        }
    }

    #[test]
    fn accept_only_from_en_attente() {
        for s in ALL {
            let r = next_status(s, CommandeEvent::Accept);
            assert_eq!(r.is_ok(), s == EnAttente, "{s}");
        }
    }

    #[test]
    fn late_measurements_keep_the_status() {
        assert_eq!(
            next_status(Assignee, CommandeEvent::RecordMeasurements),
            Ok(Some(MesureEnregistree))
        );
        assert_eq!(next_status(EnProduction, CommandeEvent::RecordMeasurements), Ok(None));
        assert!(next_status(EnAttente, CommandeEvent::RecordMeasurements).is_err());
    }

    #[test]
    fn late_orders_are_closed_only_once_ready() {
        assert_eq!(
            transition(Retard, Some(Pret), CommandeEvent::Deliver),
            Ok(Transition::Status(Livre))
        );
        for stage in [EnAttente, Assignee, EnProduction, EnControle, NonConforme] {
            assert!(
                transition(Retard, Some(stage), CommandeEvent::Deliver).is_err(),
                "{stage}"
            );
        }
        assert!(transition(Retard, None, CommandeEvent::Deliver).is_err());
        assert!(next_status(EnControle, CommandeEvent::Deliver).is_err());
    }

    #[test]
    fn late_orders_keep_working_from_their_stage() {
        assert_eq!(
            transition(Retard, Some(EnAttente), CommandeEvent::Accept),
            Ok(Transition::LateStage(Assignee))
        );
        assert_eq!(
            transition(Retard, Some(EnProduction), CommandeEvent::ReadyForControl),
            Ok(Transition::LateStage(EnControle))
        );
        assert_eq!(
            transition(Retard, Some(EnControle), CommandeEvent::Control { conforme: true }),
            Ok(Transition::LateStage(Pret))
        );
        assert_eq!(
            transition(Retard, Some(EnProduction), CommandeEvent::RecordMeasurements),
            Ok(Transition::Unchanged)
        );
    }

    #[test]
    fn late_orders_never_skip_a_stage() {
        for stage in [EnAttente, Assignee, MesureEnregistree, Pret] {
            let e = transition(Retard, Some(stage), CommandeEvent::ReadyForControl).unwrap_err();
            assert_eq!(e.from, Retard, "{stage}");
        }
    }

    #[test]
    fn transition_outside_retard_matches_next_status() {
        for s in ALL.into_iter().filter(|s| *s != Retard) {
            for ev in [
                CommandeEvent::Accept,
                CommandeEvent::RecordMeasurements,
                CommandeEvent::ConfirmPreparation,
                CommandeEvent::ReadyForControl,
                CommandeEvent::Control { conforme: false },
                CommandeEvent::Deliver,
            ] {
                let expected = next_status(s, ev).map(|to| match to {
                    Some(to) => Transition::Status(to),
                    None => Transition::Unchanged,
                });
                assert_eq!(transition(s, None, ev), expected, "{s} + {ev:?}");
            }
        }
    }

    #[test]
    fn error_names_the_event_and_status() {
        let e = next_status(Pret, CommandeEvent::Accept).unwrap_err();
        assert_eq!(
            e.to_string(),
            "Action « accepter » impossible sur une commande au statut PRET."
        );
    }
}
