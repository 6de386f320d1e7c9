//! atl-workflow
//!
//! The commande lifecycle: state machine, role guards, and the
//! transactional operations that move an order from creation to delivery.
//! Callers pass the authenticated [`atl_schemas::Actor`] explicitly to every
//! operation.

pub mod clock;
mod engine;
mod error;
pub mod reminders;
pub mod state_machine;
mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::Workflow;
pub use error::{WorkflowError, WorkflowResult};
pub use reminders::{reminder_dedupe_key, reminder_message};
pub use state_machine::{next_status, transition, CommandeEvent, Transition, TransitionError};
pub use types::{
    ClientRef, CommandeDetail, ControlVerdict, CreateCommande, NewFourniture, NewMeasurements,
    NewPayment, NewUser, Receipt, StyleRef, UpdateCommande,
};
