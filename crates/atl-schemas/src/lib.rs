//! atl-schemas
//!
//! Shared entity types for the tailoring workshop back office. Pure data:
//! no persistence, no I/O. Every other crate speaks these types.

mod entities;
mod enums;
mod error_kind;
mod money;

pub use entities::{
    is_expo_push_token, Actor, Client, Commande, CommandeImage, Controle, Fourniture, Mesure,
    MesureValeur, NewClient, Notification, Paiement, Penalite, Remuneration, Style, User,
};
pub use enums::{
    CommandeStatus, Gender, ImageKind, NotificationKind, PaymentMode, PaymentStatus,
    PenaliteKind, RemunerationStatus, Role, UnknownVariant,
};
pub use error_kind::ErrorKind;
pub use money::{apply_bps, Amount, BPS_DENOMINATOR};
