//! Postgres implementation of the store boundary.
//!
//! One [`PgTx`] wraps one `sqlx` transaction. Rows are mapped by hand with
//! `try_get`; enum columns go through the schema `parse` constructors so an
//! unknown spelling in the table surfaces as an error rather than a default.

use anyhow::Context;
use async_trait::async_trait;
use atl_schemas::{
    Amount, Client, Commande, CommandeImage, CommandeStatus, Controle, Fourniture, Gender, Mesure,
    MesureValeur, Notification, NotificationKind, Paiement, PaymentMode, PaymentStatus, Penalite,
    PenaliteKind, Remuneration, RemunerationStatus, Role, Style, User,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::store::{
    ClaimRequest, OutboxRow, OutboxStatus, Store, StoreError, StoreResult, StoreTx,
};

/// Postgres-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err(e, "begin transaction failed"))?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

/// Map a sqlx error, surfacing unique violations (SQLSTATE 23505) by
/// constraint name.
fn db_err(e: sqlx::Error, what: &'static str) -> StoreError {
    let unique = match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            db.constraint().map(str::to_string)
        }
        _ => None,
    };
    match unique {
        Some(constraint) => StoreError::UniqueViolation { constraint },
        None => StoreError::Backend(anyhow::Error::new(e).context(what)),
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const USER_COLUMNS: &str =
    "id, external_id, email, first_name, last_name, role, disponibilite, push_token, created_at";

const COMMANDE_COLUMNS: &str = "id, status, price, advance, due_date, description, audio_url, \
     images, client_id, style_id, created_by, assigned_to, controleur_id, created_at, \
     updated_at, status_changed_at, late_stage";

const NOTIFICATION_COLUMNS: &str =
    "id, commande_id, recipient_id, kind, message, dedupe_key, scheduled_for, created_at";

const OUTBOX_COLUMNS: &str = "notification_id, status, attempts, available_at, claimed_by, \
     claimed_at, sent_at, last_error, created_at";

fn user_from_row(row: &PgRow) -> anyhow::Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role: Role::parse(&row.try_get::<String, _>("role")?)?,
        disponibilite: row.try_get("disponibilite")?,
        push_token: row.try_get("push_token")?,
        created_at: row.try_get("created_at")?,
    })
}

fn client_from_row(row: &PgRow) -> anyhow::Result<Client> {
    Ok(Client {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        telephone: row.try_get("telephone")?,
        adresse: row.try_get("adresse")?,
        gender: Gender::parse(&row.try_get::<String, _>("gender")?)?,
        image_url: row.try_get("image_url")?,
        created_at: row.try_get("created_at")?,
    })
}

fn style_from_row(row: &PgRow) -> anyhow::Result<Style> {
    Ok(Style {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn commande_from_row(row: &PgRow) -> anyhow::Result<Commande> {
    let images: Vec<CommandeImage> =
        serde_json::from_value(row.try_get::<Value, _>("images")?).context("commande images")?;
    Ok(Commande {
        id: row.try_get("id")?,
        status: CommandeStatus::parse(&row.try_get::<String, _>("status")?)?,
        price: row.try_get("price")?,
        advance: row.try_get("advance")?,
        due_date: row.try_get("due_date")?,
        description: row.try_get("description")?,
        audio_url: row.try_get("audio_url")?,
        images,
        client_id: row.try_get("client_id")?,
        style_id: row.try_get("style_id")?,
        created_by: row.try_get("created_by")?,
        assigned_to: row.try_get("assigned_to")?,
        controleur_id: row.try_get("controleur_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        status_changed_at: row.try_get("status_changed_at")?,
        late_stage: row
            .try_get::<Option<String>, _>("late_stage")?
            .map(|s| CommandeStatus::parse(&s))
            .transpose()?,
    })
}

fn notification_from_row(row: &PgRow) -> anyhow::Result<Notification> {
    Ok(Notification {
        id: row.try_get("id")?,
        commande_id: row.try_get("commande_id")?,
        recipient_id: row.try_get("recipient_id")?,
        kind: NotificationKind::parse(&row.try_get::<String, _>("kind")?)?,
        message: row.try_get("message")?,
        dedupe_key: row.try_get("dedupe_key")?,
        scheduled_for: row.try_get("scheduled_for")?,
        created_at: row.try_get("created_at")?,
    })
}

fn outbox_from_row(row: &PgRow) -> anyhow::Result<OutboxRow> {
    Ok(OutboxRow {
        notification_id: row.try_get("notification_id")?,
        status: OutboxStatus::parse(&row.try_get::<String, _>("status")?)?,
        attempts: row.try_get("attempts")?,
        available_at: row.try_get("available_at")?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
        sent_at: row.try_get("sent_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
    })
}

fn paiement_from_row(row: &PgRow) -> anyhow::Result<Paiement> {
    Ok(Paiement {
        id: row.try_get("id")?,
        commande_id: row.try_get("commande_id")?,
        client_id: row.try_get("client_id")?,
        amount: row.try_get("amount")?,
        mode: PaymentMode::parse(&row.try_get::<String, _>("mode")?)?,
        status: PaymentStatus::parse(&row.try_get::<String, _>("status")?)?,
        created_at: row.try_get("created_at")?,
    })
}

fn controle_from_row(row: &PgRow) -> anyhow::Result<Controle> {
    Ok(Controle {
        id: row.try_get("id")?,
        commande_id: row.try_get("commande_id")?,
        controleur_id: row.try_get("controleur_id")?,
        conforme: row.try_get("conforme")?,
        remarques: row.try_get("remarques")?,
        created_at: row.try_get("created_at")?,
    })
}

fn penalite_from_row(row: &PgRow) -> anyhow::Result<Penalite> {
    Ok(Penalite {
        id: row.try_get("id")?,
        commande_id: row.try_get("commande_id")?,
        employe_id: row.try_get("employe_id")?,
        kind: PenaliteKind::parse(&row.try_get::<String, _>("kind")?)?,
        amount: row.try_get("amount")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

fn remuneration_from_row(row: &PgRow) -> anyhow::Result<Remuneration> {
    Ok(Remuneration {
        id: row.try_get("id")?,
        commande_id: row.try_get("commande_id")?,
        employe_id: row.try_get("employe_id")?,
        amount: row.try_get("amount")?,
        status: RemunerationStatus::parse(&row.try_get::<String, _>("status")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn mesure_from_row(row: &PgRow) -> anyhow::Result<Mesure> {
    let valeurs: Vec<MesureValeur> =
        serde_json::from_value(row.try_get::<Value, _>("valeurs")?).context("mesure valeurs")?;
    Ok(Mesure {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        commande_id: row.try_get("commande_id")?,
        label: row.try_get("label")?,
        valeurs,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn fourniture_from_row(row: &PgRow) -> anyhow::Result<Fourniture> {
    Ok(Fourniture {
        id: row.try_get("id")?,
        commande_id: row.try_get("commande_id")?,
        designation: row.try_get("designation")?,
        quantity: row.try_get("quantity")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_all<T>(rows: &[PgRow], f: fn(&PgRow) -> anyhow::Result<T>) -> StoreResult<Vec<T>> {
    rows.iter()
        .map(f)
        .collect::<anyhow::Result<Vec<T>>>()
        .map_err(StoreError::from)
}

fn map_opt<T>(row: Option<PgRow>, f: fn(&PgRow) -> anyhow::Result<T>) -> StoreResult<Option<T>> {
    row.as_ref().map(f).transpose().map_err(StoreError::from)
}

// ---------------------------------------------------------------------------
// StoreTx
// ---------------------------------------------------------------------------

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_err(e, "commit failed"))
    }

    // --- users -------------------------------------------------------------

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into users (
              id, external_id, email, first_name, last_name, role, disponibilite, push_token, created_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.id)
        .bind(&user.external_id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.disponibilite)
        .bind(&user.push_token)
        .bind(user.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "insert_user failed"))?;
        Ok(())
    }

    async fn fetch_user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("select {USER_COLUMNS} from users where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "fetch_user failed"))?;
        map_opt(row, user_from_row)
    }

    async fn fetch_user_by_external_id(&mut self, external_id: &str) -> StoreResult<Option<User>> {
        let sql = format!("select {USER_COLUMNS} from users where external_id = $1");
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "fetch_user_by_external_id failed"))?;
        map_opt(row, user_from_row)
    }

    async fn list_users_by_role(&mut self, role: Role) -> StoreResult<Vec<User>> {
        let sql =
            format!("select {USER_COLUMNS} from users where role = $1 order by created_at, id");
        let rows = sqlx::query(&sql)
            .bind(role.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "list_users_by_role failed"))?;
        map_all(&rows, user_from_row)
    }

    async fn first_available_employee(&mut self) -> StoreResult<Option<User>> {
        let sql = format!(
            "select {USER_COLUMNS} from users \
             where role = 'EMPLOYEE' and disponibilite \
             order by created_at, id limit 1"
        );
        let row = sqlx::query(&sql)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "first_available_employee failed"))?;
        map_opt(row, user_from_row)
    }

    async fn set_user_availability(&mut self, id: Uuid, disponibilite: bool) -> StoreResult<bool> {
        let res = sqlx::query("update users set disponibilite = $2 where id = $1")
            .bind(id)
            .bind(disponibilite)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "set_user_availability failed"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_user_role(&mut self, id: Uuid, role: Role) -> StoreResult<bool> {
        let res = sqlx::query("update users set role = $2 where id = $1")
            .bind(id)
            .bind(role.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "set_user_role failed"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_push_token(&mut self, id: Uuid, token: Option<&str>) -> StoreResult<bool> {
        let res = sqlx::query("update users set push_token = $2 where id = $1")
            .bind(id)
            .bind(token)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "set_push_token failed"))?;
        Ok(res.rows_affected() == 1)
    }

    // --- clients & styles --------------------------------------------------

    async fn insert_client(&mut self, client: &Client) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into clients (
              id, first_name, last_name, telephone, adresse, gender, image_url, created_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(client.id)
        .bind(&client.first_name)
        .bind(&client.last_name)
        .bind(&client.telephone)
        .bind(&client.adresse)
        .bind(client.gender.as_str())
        .bind(&client.image_url)
        .bind(client.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "insert_client failed"))?;
        Ok(())
    }

    async fn fetch_client(&mut self, id: Uuid) -> StoreResult<Option<Client>> {
        let row = sqlx::query(
            r#"
            select id, first_name, last_name, telephone, adresse, gender, image_url, created_at
            from clients
            where id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "fetch_client failed"))?;
        map_opt(row, client_from_row)
    }

    async fn insert_style(&mut self, style: &Style) -> StoreResult<()> {
        // A failed statement poisons the whole transaction in Postgres; the
        // savepoint keeps the unit of work usable after a name collision.
        sqlx::query("savepoint style_upsert")
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "style savepoint failed"))?;

        let res = sqlx::query("insert into styles (id, name, created_at) values ($1, $2, $3)")
            .bind(style.id)
            .bind(&style.name)
            .bind(style.created_at)
            .execute(&mut *self.tx)
            .await;

        match res {
            Ok(_) => {
                sqlx::query("release savepoint style_upsert")
                    .execute(&mut *self.tx)
                    .await
                    .map_err(|e| db_err(e, "style savepoint release failed"))?;
                Ok(())
            }
            Err(e) => {
                sqlx::query("rollback to savepoint style_upsert")
                    .execute(&mut *self.tx)
                    .await
                    .map_err(|e| db_err(e, "style savepoint rollback failed"))?;
                Err(db_err(e, "insert_style failed"))
            }
        }
    }

    async fn fetch_style(&mut self, id: Uuid) -> StoreResult<Option<Style>> {
        let row = sqlx::query("select id, name, created_at from styles where id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "fetch_style failed"))?;
        map_opt(row, style_from_row)
    }

    async fn fetch_style_by_name(&mut self, name: &str) -> StoreResult<Option<Style>> {
        let row = sqlx::query("select id, name, created_at from styles where name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "fetch_style_by_name failed"))?;
        map_opt(row, style_from_row)
    }

    async fn link_client_style(&mut self, client_id: Uuid, style_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into client_styles (client_id, style_id)
            values ($1, $2)
            on conflict do nothing
            "#,
        )
        .bind(client_id)
        .bind(style_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "link_client_style failed"))?;
        Ok(())
    }

    // --- commandes ---------------------------------------------------------

    async fn insert_commande(&mut self, c: &Commande) -> StoreResult<()> {
        let images = serde_json::to_value(&c.images).context("serialize commande images")?;
        sqlx::query(
            r#"
            insert into commandes (
              id, status, price, advance, due_date, description, audio_url, images,
              client_id, style_id, created_by, assigned_to, controleur_id,
              created_at, updated_at, status_changed_at, late_stage
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17
            )
            "#,
        )
        .bind(c.id)
        .bind(c.status.as_str())
        .bind(c.price)
        .bind(c.advance)
        .bind(c.due_date)
        .bind(&c.description)
        .bind(&c.audio_url)
        .bind(images)
        .bind(c.client_id)
        .bind(c.style_id)
        .bind(c.created_by)
        .bind(c.assigned_to)
        .bind(c.controleur_id)
        .bind(c.created_at)
        .bind(c.updated_at)
        .bind(c.status_changed_at)
        .bind(c.late_stage.map(|s| s.as_str()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "insert_commande failed"))?;
        Ok(())
    }

    async fn fetch_commande(&mut self, id: Uuid) -> StoreResult<Option<Commande>> {
        let sql = format!("select {COMMANDE_COLUMNS} from commandes where id = $1 for update");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "fetch_commande failed"))?;
        map_opt(row, commande_from_row)
    }

    async fn update_commande_status(
        &mut self,
        id: Uuid,
        from: CommandeStatus,
        to: CommandeStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            update commandes
            set status = $3,
                late_stage = case when $3 = 'RETARD' then $2 else null end,
                updated_at = $4,
                status_changed_at = $4
            where id = $1
              and status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "update_commande_status failed"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_late_stage(
        &mut self,
        id: Uuid,
        from: CommandeStatus,
        to: CommandeStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            update commandes
            set late_stage = $3,
                updated_at = $4
            where id = $1
              and status = 'RETARD'
              and late_stage = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "update_late_stage failed"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_commande_details(&mut self, c: &Commande) -> StoreResult<bool> {
        let images = serde_json::to_value(&c.images).context("serialize commande images")?;
        let res = sqlx::query(
            r#"
            update commandes
            set price = $2,
                advance = $3,
                due_date = $4,
                description = $5,
                audio_url = $6,
                images = $7,
                client_id = $8,
                style_id = $9,
                assigned_to = $10,
                controleur_id = $11,
                updated_at = $12
            where id = $1
            "#,
        )
        .bind(c.id)
        .bind(c.price)
        .bind(c.advance)
        .bind(c.due_date)
        .bind(&c.description)
        .bind(&c.audio_url)
        .bind(images)
        .bind(c.client_id)
        .bind(c.style_id)
        .bind(c.assigned_to)
        .bind(c.controleur_id)
        .bind(c.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "update_commande_details failed"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_commande(&mut self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("delete from commandes where id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "delete_commande failed"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn list_commandes_not_delivered(&mut self) -> StoreResult<Vec<Commande>> {
        let sql = format!(
            "select {COMMANDE_COLUMNS} from commandes where status <> 'LIVRE' order by created_at, id"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "list_commandes_not_delivered failed"))?;
        map_all(&rows, commande_from_row)
    }

    async fn list_commandes_by_status(
        &mut self,
        status: CommandeStatus,
    ) -> StoreResult<Vec<Commande>> {
        let sql = format!(
            "select {COMMANDE_COLUMNS} from commandes where status = $1 order by created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "list_commandes_by_status failed"))?;
        map_all(&rows, commande_from_row)
    }

    async fn list_commandes_assigned_to(&mut self, user_id: Uuid) -> StoreResult<Vec<Commande>> {
        let sql = format!(
            "select {COMMANDE_COLUMNS} from commandes \
             where assigned_to = $1 or controleur_id = $1 \
             order by created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "list_commandes_assigned_to failed"))?;
        map_all(&rows, commande_from_row)
    }

    async fn count_in_flight_for_employee(
        &mut self,
        employee_id: Uuid,
        excluding: Uuid,
    ) -> StoreResult<i64> {
        let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
            r#"
            select count(*)::bigint
            from commandes
            where assigned_to = $1
              and id <> $2
              and coalesce(late_stage, status) in (
                    'ASSIGNEE','MESURE_ENREGISTREE','EN_PRODUCTION',
                    'EN_CONTROLE','NON_CONFORME','RETOUCHE')
            "#,
        )
        .bind(employee_id)
        .bind(excluding)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "count_in_flight_for_employee failed"))?;
        Ok(n)
    }

    // --- notifications & outbox -------------------------------------------

    async fn insert_notification(&mut self, n: &Notification) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            insert into notifications (
              id, commande_id, recipient_id, kind, message, dedupe_key, scheduled_for, created_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8)
            on conflict (commande_id, dedupe_key) where dedupe_key is not null do nothing
            "#,
        )
        .bind(n.id)
        .bind(n.commande_id)
        .bind(n.recipient_id)
        .bind(n.kind.as_str())
        .bind(&n.message)
        .bind(&n.dedupe_key)
        .bind(n.scheduled_for)
        .bind(n.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "insert_notification failed"))?;

        if res.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            insert into notification_outbox (
              notification_id, status, attempts, available_at, created_at
            ) values ($1, 'PENDING', 0, $2, $3)
            "#,
        )
        .bind(n.id)
        .bind(n.scheduled_for.unwrap_or(n.created_at))
        .bind(n.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "insert_notification outbox row failed"))?;

        Ok(true)
    }

    async fn delete_pending_notifications(
        &mut self,
        commande_id: Uuid,
        kind: NotificationKind,
        after: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let res = sqlx::query(
            r#"
            delete from notifications n
            using notification_outbox o
            where o.notification_id = n.id
              and o.status = 'PENDING'
              and n.commande_id = $1
              and n.kind = $2
              and o.available_at > $3
            "#,
        )
        .bind(commande_id)
        .bind(kind.as_str())
        .bind(after)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "delete_pending_notifications failed"))?;
        Ok(res.rows_affected())
    }

    async fn fetch_notification(&mut self, id: Uuid) -> StoreResult<Option<Notification>> {
        let sql = format!("select {NOTIFICATION_COLUMNS} from notifications where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "fetch_notification failed"))?;
        map_opt(row, notification_from_row)
    }

    async fn list_notifications_for_user(
        &mut self,
        user_id: Uuid,
        limit: u32,
    ) -> StoreResult<Vec<Notification>> {
        let sql = format!(
            "select {NOTIFICATION_COLUMNS} from notifications \
             where recipient_id = $1 \
             order by created_at desc, id desc limit $2"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(i64::from(limit))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "list_notifications_for_user failed"))?;
        map_all(&rows, notification_from_row)
    }

    async fn list_notifications_for_commande(
        &mut self,
        commande_id: Uuid,
    ) -> StoreResult<Vec<Notification>> {
        let sql = format!(
            "select {NOTIFICATION_COLUMNS} from notifications \
             where commande_id = $1 order by created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(commande_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "list_notifications_for_commande failed"))?;
        map_all(&rows, notification_from_row)
    }

    async fn outbox_claim_batch(&mut self, req: &ClaimRequest<'_>) -> StoreResult<Vec<OutboxRow>> {
        // SKIP LOCKED: a concurrent dispatcher never sees rows this one holds.
        let sql = r#"
            with picked as (
              select notification_id
              from notification_outbox
              where (status = 'PENDING' and available_at <= $1)
                 or (status = 'CLAIMED' and claimed_at < $2)
              order by available_at, notification_id
              limit $3
              for update skip locked
            )
            update notification_outbox o
            set status = 'CLAIMED',
                claimed_by = $4,
                claimed_at = $1
            from picked
            where o.notification_id = picked.notification_id
            returning o.*
            "#;
        let rows = sqlx::query(sql)
            .bind(req.now)
            .bind(req.stale_before)
            .bind(i64::from(req.limit))
            .bind(req.dispatcher_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "outbox_claim_batch failed"))?;

        let mut claimed = map_all(&rows, outbox_from_row)?;
        claimed.sort_by(|a, b| {
            (a.available_at, a.notification_id).cmp(&(b.available_at, b.notification_id))
        });
        Ok(claimed)
    }

    async fn outbox_mark_sent(
        &mut self,
        notification_id: Uuid,
        at: DateTime<Utc>,
        delivery_error: Option<&str>,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            update notification_outbox
            set status = 'SENT',
                sent_at = $2,
                last_error = $3
            where notification_id = $1
              and status = 'CLAIMED'
            "#,
        )
        .bind(notification_id)
        .bind(at)
        .bind(delivery_error)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "outbox_mark_sent failed"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn outbox_release(
        &mut self,
        notification_id: Uuid,
        error: &str,
        max_attempts: u32,
    ) -> StoreResult<Option<OutboxStatus>> {
        let row = sqlx::query(
            r#"
            update notification_outbox
            set attempts = attempts + 1,
                status = case when attempts + 1 >= $3 then 'FAILED' else 'PENDING' end,
                last_error = $2,
                claimed_by = null,
                claimed_at = null
            where notification_id = $1
            returning status
            "#,
        )
        .bind(notification_id)
        .bind(error)
        .bind(i64::from(max_attempts))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "outbox_release failed"))?;

        match row {
            Some(r) => {
                let s: String = r
                    .try_get("status")
                    .map_err(|e| db_err(e, "outbox_release status decode failed"))?;
                Ok(Some(OutboxStatus::parse(&s)?))
            }
            None => Ok(None),
        }
    }

    async fn outbox_fetch(&mut self, notification_id: Uuid) -> StoreResult<Option<OutboxRow>> {
        let sql =
            format!("select {OUTBOX_COLUMNS} from notification_outbox where notification_id = $1");
        let row = sqlx::query(&sql)
            .bind(notification_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "outbox_fetch failed"))?;
        map_opt(row, outbox_from_row)
    }

    // --- money & quality ---------------------------------------------------

    async fn insert_paiement(&mut self, p: &Paiement) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into paiements (id, commande_id, client_id, amount, mode, status, created_at)
            values ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(p.id)
        .bind(p.commande_id)
        .bind(p.client_id)
        .bind(p.amount)
        .bind(p.mode.as_str())
        .bind(p.status.as_str())
        .bind(p.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "insert_paiement failed"))?;
        Ok(())
    }

    async fn list_paiements(&mut self, commande_id: Uuid) -> StoreResult<Vec<Paiement>> {
        let rows = sqlx::query(
            r#"
            select id, commande_id, client_id, amount, mode, status, created_at
            from paiements
            where commande_id = $1
            order by created_at, id
            "#,
        )
        .bind(commande_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "list_paiements failed"))?;
        map_all(&rows, paiement_from_row)
    }

    async fn insert_controle(&mut self, c: &Controle) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into controles (id, commande_id, controleur_id, conforme, remarques, created_at)
            values ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(c.id)
        .bind(c.commande_id)
        .bind(c.controleur_id)
        .bind(c.conforme)
        .bind(&c.remarques)
        .bind(c.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "insert_controle failed"))?;
        Ok(())
    }

    async fn list_controles(&mut self, commande_id: Uuid) -> StoreResult<Vec<Controle>> {
        let rows = sqlx::query(
            r#"
            select id, commande_id, controleur_id, conforme, remarques, created_at
            from controles
            where commande_id = $1
            order by created_at, id
            "#,
        )
        .bind(commande_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "list_controles failed"))?;
        map_all(&rows, controle_from_row)
    }

    async fn insert_penalite(&mut self, p: &Penalite) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into penalites (id, commande_id, employe_id, kind, amount, reason, created_at)
            values ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(p.id)
        .bind(p.commande_id)
        .bind(p.employe_id)
        .bind(p.kind.as_str())
        .bind(p.amount)
        .bind(&p.reason)
        .bind(p.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "insert_penalite failed"))?;
        Ok(())
    }

    async fn list_penalites(&mut self, commande_id: Uuid) -> StoreResult<Vec<Penalite>> {
        let rows = sqlx::query(
            r#"
            select id, commande_id, employe_id, kind, amount, reason, created_at
            from penalites
            where commande_id = $1
            order by created_at, id
            "#,
        )
        .bind(commande_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "list_penalites failed"))?;
        map_all(&rows, penalite_from_row)
    }

    async fn insert_remuneration(&mut self, r: &Remuneration) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into remunerations (id, commande_id, employe_id, amount, status, created_at, updated_at)
            values ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(r.id)
        .bind(r.commande_id)
        .bind(r.employe_id)
        .bind(r.amount)
        .bind(r.status.as_str())
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "insert_remuneration failed"))?;
        Ok(())
    }

    async fn fetch_remuneration_for_commande(
        &mut self,
        commande_id: Uuid,
    ) -> StoreResult<Option<Remuneration>> {
        let row = sqlx::query(
            r#"
            select id, commande_id, employe_id, amount, status, created_at, updated_at
            from remunerations
            where commande_id = $1
            "#,
        )
        .bind(commande_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "fetch_remuneration_for_commande failed"))?;
        map_opt(row, remuneration_from_row)
    }

    async fn update_remuneration_amount(
        &mut self,
        id: Uuid,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let res = sqlx::query("update remunerations set amount = $2, updated_at = $3 where id = $1")
            .bind(id)
            .bind(amount)
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err(e, "update_remuneration_amount failed"))?;
        Ok(res.rows_affected() == 1)
    }

    // --- production records -----------------------------------------------

    async fn insert_mesure(&mut self, m: &Mesure) -> StoreResult<()> {
        let valeurs = serde_json::to_value(&m.valeurs).context("serialize mesure valeurs")?;
        sqlx::query(
            r#"
            insert into mesures (id, client_id, commande_id, label, valeurs, created_by, created_at)
            values ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(m.id)
        .bind(m.client_id)
        .bind(m.commande_id)
        .bind(&m.label)
        .bind(valeurs)
        .bind(m.created_by)
        .bind(m.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "insert_mesure failed"))?;
        Ok(())
    }

    async fn list_mesures_for_commande(&mut self, commande_id: Uuid) -> StoreResult<Vec<Mesure>> {
        let rows = sqlx::query(
            r#"
            select id, client_id, commande_id, label, valeurs, created_by, created_at
            from mesures
            where commande_id = $1
            order by created_at, id
            "#,
        )
        .bind(commande_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "list_mesures_for_commande failed"))?;
        map_all(&rows, mesure_from_row)
    }

    async fn insert_fourniture(&mut self, f: &Fourniture) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into fournitures (id, commande_id, designation, quantity, created_at)
            values ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(f.id)
        .bind(f.commande_id)
        .bind(&f.designation)
        .bind(f.quantity)
        .bind(f.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "insert_fourniture failed"))?;
        Ok(())
    }

    async fn list_fournitures(&mut self, commande_id: Uuid) -> StoreResult<Vec<Fourniture>> {
        let rows = sqlx::query(
            r#"
            select id, commande_id, designation, quantity, created_at
            from fournitures
            where commande_id = $1
            order by created_at, id
            "#,
        )
        .bind(commande_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_err(e, "list_fournitures failed"))?;
        map_all(&rows, fourniture_from_row)
    }
}
