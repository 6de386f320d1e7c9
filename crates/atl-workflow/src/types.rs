//! Operation inputs and results.

use atl_schemas::{
    Amount, Client, Commande, CommandeImage, CommandeStatus, Controle, Fourniture, Mesure,
    MesureValeur, NewClient, Notification, Paiement, PaymentMode, PaymentStatus, Penalite,
    Remuneration, Role, Style,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Existing client, or first-or-create from a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRef {
    Existing(Uuid),
    New(NewClient),
}

/// Existing style, or upsert by unique name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleRef {
    Existing(Uuid),
    Named(String),
}

fn default_mode() -> PaymentMode {
    PaymentMode::Especes
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCommande {
    pub client: ClientRef,
    pub style: StyleRef,
    pub due_date: NaiveDate,
    pub price: Amount,
    #[serde(default)]
    pub advance: Amount,
    /// Mode of the advance payment, when there is one.
    #[serde(default = "default_mode")]
    pub payment_mode: PaymentMode,
    #[serde(default)]
    pub description: Option<String>,
    /// URL returned by the object store.
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub images: Vec<CommandeImage>,
}

/// Field edits; `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateCommande {
    pub price: Option<Amount>,
    /// May only grow; the difference is recorded as a payment.
    pub advance: Option<Amount>,
    /// Mode of that top-up payment. Defaults to cash.
    pub payment_mode: Option<PaymentMode>,
    pub due_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub audio_url: Option<String>,
    pub images: Option<Vec<CommandeImage>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMeasurements {
    #[serde(default)]
    pub label: Option<String>,
    pub valeurs: Vec<MesureValeur>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlVerdict {
    pub conforme: bool,
    #[serde(default)]
    pub remarques: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub amount: Amount,
    #[serde(default = "default_mode")]
    pub mode: PaymentMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFourniture {
    pub designation: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub external_id: Option<String>,
    /// Defaults to EMPLOYEE. Any other role needs an ADMIN caller.
    #[serde(default)]
    pub role: Option<Role>,
}

/// What one operation changed. Returned only after commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub commande: Commande,
    /// Status before the operation, when it changed.
    pub previous_status: Option<CommandeStatus>,
    pub notifications: Vec<Notification>,
    pub paiement: Option<Paiement>,
    pub controle: Option<Controle>,
    pub mesure: Option<Mesure>,
    pub fourniture: Option<Fourniture>,
    pub remuneration: Option<Remuneration>,
    /// The assigned employee got their availability back.
    pub employee_released: bool,
}

impl Receipt {
    pub(crate) fn new(commande: Commande) -> Self {
        Self {
            commande,
            previous_status: None,
            notifications: Vec::new(),
            paiement: None,
            controle: None,
            mesure: None,
            fourniture: None,
            remuneration: None,
            employee_released: false,
        }
    }
}

/// Full view of one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandeDetail {
    pub commande: Commande,
    pub client: Option<Client>,
    pub style: Option<Style>,
    pub notifications: Vec<Notification>,
    pub paiements: Vec<Paiement>,
    pub controles: Vec<Controle>,
    pub penalites: Vec<Penalite>,
    pub remuneration: Option<Remuneration>,
    pub mesures: Vec<Mesure>,
    pub fournitures: Vec<Fourniture>,
}

impl CommandeDetail {
    /// Most recent verdict; earlier ones are history.
    pub fn active_controle(&self) -> Option<&Controle> {
        self.controles.last()
    }

    /// Sum of payments that were not cancelled.
    pub fn total_paid(&self) -> Amount {
        self.paiements
            .iter()
            .filter(|p| p.status != PaymentStatus::Annule)
            .map(|p| p.amount)
            .sum()
    }
}
