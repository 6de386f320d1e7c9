//! Closed vocabularies persisted as upper-case text columns.
//!
//! Every enum round-trips through `as_str` / `parse` so the store and the
//! HTTP layer agree on one spelling. Serde uses the same spelling.

use serde::{Deserialize, Serialize};

/// Returned by the `parse` constructors when the text is not a known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

fn unknown(kind: &'static str, value: &str) -> UnknownVariant {
    UnknownVariant {
        kind,
        value: value.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// A staff member holds exactly one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Employee,
    Controlleur,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Employee => "EMPLOYEE",
            Role::Controlleur => "CONTROLLEUR",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "EMPLOYEE" => Ok(Role::Employee),
            "CONTROLLEUR" => Ok(Role::Controlleur),
            other => Err(unknown("role", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandeStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a commande. Transitions live in `atl-workflow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandeStatus {
    /// Created; an employee is selected but has not accepted yet.
    EnAttente,
    /// The selected employee accepted the order.
    Assignee,
    /// Measurements recorded (legacy spelling `EN_COURS`).
    MesureEnregistree,
    EnProduction,
    EnControle,
    /// Control passed; ready for delivery.
    Pret,
    NonConforme,
    /// Non-conformity escalated after the retouch SLA.
    Retouche,
    /// Due date breached beyond the grace window.
    Retard,
    /// Delivered. **Terminal.**
    Livre,
}

impl CommandeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandeStatus::EnAttente => "EN_ATTENTE",
            CommandeStatus::Assignee => "ASSIGNEE",
            CommandeStatus::MesureEnregistree => "MESURE_ENREGISTREE",
            CommandeStatus::EnProduction => "EN_PRODUCTION",
            CommandeStatus::EnControle => "EN_CONTROLE",
            CommandeStatus::Pret => "PRET",
            CommandeStatus::NonConforme => "NON_CONFORME",
            CommandeStatus::Retouche => "RETOUCHE",
            CommandeStatus::Retard => "RETARD",
            CommandeStatus::Livre => "LIVRE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "EN_ATTENTE" => Ok(CommandeStatus::EnAttente),
            "ASSIGNEE" => Ok(CommandeStatus::Assignee),
            "MESURE_ENREGISTREE" | "EN_COURS" => Ok(CommandeStatus::MesureEnregistree),
            "EN_PRODUCTION" => Ok(CommandeStatus::EnProduction),
            "EN_CONTROLE" => Ok(CommandeStatus::EnControle),
            "PRET" => Ok(CommandeStatus::Pret),
            "NON_CONFORME" => Ok(CommandeStatus::NonConforme),
            "RETOUCHE" => Ok(CommandeStatus::Retouche),
            "RETARD" => Ok(CommandeStatus::Retard),
            "LIVRE" => Ok(CommandeStatus::Livre),
            other => Err(unknown("commande status", other)),
        }
    }

    /// `true` once the garment has been handed over.
    pub fn is_delivered(&self) -> bool {
        matches!(self, CommandeStatus::Livre)
    }

    /// States in which the accepted employee is still working on the order.
    pub fn holds_employee(&self) -> bool {
        matches!(
            self,
            CommandeStatus::Assignee
                | CommandeStatus::MesureEnregistree
                | CommandeStatus::EnProduction
                | CommandeStatus::EnControle
                | CommandeStatus::NonConforme
                | CommandeStatus::Retouche
        )
    }
}

impl std::fmt::Display for CommandeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// NotificationKind
// ---------------------------------------------------------------------------

/// One variant per workflow event that addresses a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// New order assigned to an employee.
    Assignation,
    /// Employee accepted an order (to admin).
    Acceptation,
    /// Preparation confirmed, production started (to admin).
    Preparation,
    /// Order awaits quality control (to controller or admin).
    Controle,
    /// Control passed (to employee).
    Validation,
    /// Control failed, retouch required (to employee).
    NonConforme,
    /// Order ready for delivery (to admin).
    LivraisonPret,
    /// Order delivered (to employee).
    Livree,
    RappelLivraison,
    Retard,
    Penalite,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Assignation => "ASSIGNATION",
            NotificationKind::Acceptation => "ACCEPTATION",
            NotificationKind::Preparation => "PREPARATION",
            NotificationKind::Controle => "CONTROLE",
            NotificationKind::Validation => "VALIDATION",
            NotificationKind::NonConforme => "NON_CONFORME",
            NotificationKind::LivraisonPret => "LIVRAISON_PRET",
            NotificationKind::Livree => "LIVREE",
            NotificationKind::RappelLivraison => "RAPPEL_LIVRAISON",
            NotificationKind::Retard => "RETARD",
            NotificationKind::Penalite => "PENALITE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "ASSIGNATION" => Ok(NotificationKind::Assignation),
            "ACCEPTATION" => Ok(NotificationKind::Acceptation),
            "PREPARATION" => Ok(NotificationKind::Preparation),
            "CONTROLE" => Ok(NotificationKind::Controle),
            "VALIDATION" => Ok(NotificationKind::Validation),
            "NON_CONFORME" => Ok(NotificationKind::NonConforme),
            "LIVRAISON_PRET" => Ok(NotificationKind::LivraisonPret),
            "LIVREE" => Ok(NotificationKind::Livree),
            "RAPPEL_LIVRAISON" => Ok(NotificationKind::RappelLivraison),
            "RETARD" => Ok(NotificationKind::Retard),
            "PENALITE" => Ok(NotificationKind::Penalite),
            other => Err(unknown("notification kind", other)),
        }
    }

    /// Title shown on mobile push messages.
    pub fn push_title(&self) -> &'static str {
        match self {
            NotificationKind::Assignation => "Nouvelle commande assignée",
            NotificationKind::Acceptation => "Commande acceptée",
            NotificationKind::Preparation => "Commande en production",
            NotificationKind::Controle => "Contrôle qualité requis",
            NotificationKind::Validation => "Commande validée",
            NotificationKind::NonConforme => "Commande non conforme",
            NotificationKind::LivraisonPret => "Commande prête à livrer",
            NotificationKind::Livree => "Commande livrée",
            NotificationKind::RappelLivraison => "Rappel de livraison",
            NotificationKind::Retard => "Commande en retard",
            NotificationKind::Penalite => "Pénalité appliquée",
        }
    }
}

// ---------------------------------------------------------------------------
// Small vocabularies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PenaliteKind {
    Retard,
    NonConforme,
}

impl PenaliteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PenaliteKind::Retard => "RETARD",
            PenaliteKind::NonConforme => "NON_CONFORME",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "RETARD" => Ok(PenaliteKind::Retard),
            "NON_CONFORME" => Ok(PenaliteKind::NonConforme),
            other => Err(unknown("penalite kind", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMode {
    Especes,
    MobileMoney,
    Carte,
    Virement,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Especes => "ESPECES",
            PaymentMode::MobileMoney => "MOBILE_MONEY",
            PaymentMode::Carte => "CARTE",
            PaymentMode::Virement => "VIREMENT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "ESPECES" => Ok(PaymentMode::Especes),
            "MOBILE_MONEY" => Ok(PaymentMode::MobileMoney),
            "CARTE" => Ok(PaymentMode::Carte),
            "VIREMENT" => Ok(PaymentMode::Virement),
            other => Err(unknown("payment mode", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Valide,
    EnAttente,
    Annule,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Valide => "VALIDE",
            PaymentStatus::EnAttente => "EN_ATTENTE",
            PaymentStatus::Annule => "ANNULE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "VALIDE" => Ok(PaymentStatus::Valide),
            "EN_ATTENTE" => Ok(PaymentStatus::EnAttente),
            "ANNULE" => Ok(PaymentStatus::Annule),
            other => Err(unknown("payment status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemunerationStatus {
    EnAttente,
    Payee,
}

impl RemunerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemunerationStatus::EnAttente => "EN_ATTENTE",
            RemunerationStatus::Payee => "PAYEE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "EN_ATTENTE" => Ok(RemunerationStatus::EnAttente),
            "PAYEE" => Ok(RemunerationStatus::Payee),
            other => Err(unknown("remuneration status", other)),
        }
    }
}

/// Tag on an image attached to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageKind {
    Model,
    Tissu,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Model => "MODEL",
            ImageKind::Tissu => "TISSU",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "MODEL" => Ok(ImageKind::Model),
            "TISSU" => Ok(ImageKind::Tissu),
            other => Err(unknown("image kind", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    M,
    F,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::M => "M",
            Gender::F => "F",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "M" => Ok(Gender::M),
            "F" => Ok(Gender::F),
            other => Err(unknown("gender", other)),
        }
    }
}
