use std::collections::HashMap;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::import::ImportBatch;
use crate::models::{
    CustomerRecord, CustomerTimeline, HistoryEntry, MetricRating, MetricSlot, MetricValues,
};
use crate::survey::SubmissionPlan;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn metric_columns() -> String {
    MetricSlot::ALL
        .iter()
        .map(|slot| slot.key())
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|index| format!("${index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn bind_metrics<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    metrics: &MetricValues,
) -> Query<'q, Postgres, PgArguments> {
    for (_, rating) in metrics.iter() {
        query = query.bind(rating.as_str());
    }
    query
}

fn metrics_from_row(row: &PgRow) -> Result<MetricValues, sqlx::Error> {
    let mut metrics = MetricValues::default();
    for slot in MetricSlot::ALL {
        let raw: Option<String> = row.try_get(slot.key())?;
        metrics.set(slot, MetricRating::parse(raw.as_deref().unwrap_or("")));
    }
    Ok(metrics)
}

fn customer_from_row(row: &PgRow) -> Result<CustomerRecord, sqlx::Error> {
    Ok(CustomerRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        segment: row.try_get("segment")?,
        owner: row.try_get("owner")?,
        metrics: metrics_from_row(row)?,
        notes: row.try_get("notes")?,
        is_active: row.try_get("is_active")?,
    })
}

async fn insert_history<'e, E>(
    executor: E,
    customer_id: Uuid,
    snapshot_date: NaiveDate,
    metrics: &MetricValues,
) -> anyhow::Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "INSERT INTO health.customer_history (id, customer_id, snapshot_date, {}) VALUES ($1, $2, $3, {})",
        metric_columns(),
        placeholders(4, MetricSlot::COUNT),
    );
    let query = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(customer_id)
        .bind(snapshot_date);
    bind_metrics(query, metrics).execute(executor).await?;
    Ok(())
}

/// Counts of rows written by [`apply_import`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub customers_created: usize,
    pub history_created: usize,
}

/// Writes an import batch in a single transaction.
pub async fn apply_import(pool: &PgPool, batch: &ImportBatch) -> anyhow::Result<ImportSummary> {
    let customer_sql = format!(
        "INSERT INTO health.customers (id, name, segment, owner, notes, is_active, {}) \
         VALUES ($1, $2, $3, $4, $5, $6, {})",
        metric_columns(),
        placeholders(7, MetricSlot::COUNT),
    );

    let mut tx = pool.begin().await?;
    let mut summary = ImportSummary::default();

    for imported in &batch.customers {
        let customer = &imported.customer;
        let customer_id = Uuid::new_v4();
        let query = sqlx::query(&customer_sql)
            .bind(customer_id)
            .bind(&customer.name)
            .bind(&customer.segment)
            .bind(&customer.owner)
            .bind(&customer.notes)
            .bind(customer.is_active);
        bind_metrics(query, &customer.metrics)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to create customer {}", customer.name))?;
        summary.customers_created += 1;

        for snapshot in &imported.history {
            insert_history(&mut *tx, customer_id, snapshot.snapshot_date, &snapshot.metrics)
                .await?;
            summary.history_created += 1;
        }
        debug!(customer = %customer.name, history = imported.history.len(), "imported customer");
    }

    tx.commit().await?;
    info!(
        customers = summary.customers_created,
        history = summary.history_created,
        "import committed"
    );
    Ok(summary)
}

pub async fn fetch_customer(pool: &PgPool, customer_id: Uuid) -> anyhow::Result<Option<CustomerRecord>> {
    let row = sqlx::query("SELECT * FROM health.customers WHERE id = $1")
        .bind(customer_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(customer_from_row).transpose()?)
}

/// Current records only, optionally for one owner, ordered by name.
pub async fn fetch_customers(
    pool: &PgPool,
    owner: Option<&str>,
) -> anyhow::Result<Vec<CustomerRecord>> {
    let mut query = String::from("SELECT * FROM health.customers");
    if owner.is_some() {
        query.push_str(" WHERE owner = $1");
    }
    query.push_str(" ORDER BY name");

    let mut rows = sqlx::query(&query);
    if let Some(value) = owner {
        rows = rows.bind(value);
    }

    let customers = rows
        .fetch_all(pool)
        .await?
        .iter()
        .map(customer_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(customers)
}

async fn fetch_history(
    pool: &PgPool,
    ids: &[Uuid],
) -> anyhow::Result<HashMap<Uuid, Vec<HistoryEntry>>> {
    let rows = sqlx::query(
        "SELECT * FROM health.customer_history \
         WHERE customer_id = ANY($1) \
         ORDER BY customer_id, snapshot_date DESC, created_at DESC",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    let mut history: HashMap<Uuid, Vec<HistoryEntry>> = HashMap::new();
    for row in &rows {
        let customer_id: Uuid = row.try_get("customer_id")?;
        history.entry(customer_id).or_default().push(HistoryEntry {
            snapshot_date: row.try_get("snapshot_date")?,
            metrics: metrics_from_row(row)?,
        });
    }
    Ok(history)
}

/// Customers (optionally for one owner) with history ordered newest-first.
pub async fn fetch_timelines(
    pool: &PgPool,
    owner: Option<&str>,
) -> anyhow::Result<Vec<CustomerTimeline>> {
    let customers = fetch_customers(pool, owner).await?;
    let ids: Vec<Uuid> = customers.iter().map(|c| c.id).collect();
    let mut history = fetch_history(pool, &ids).await?;

    debug!(
        customers = customers.len(),
        with_history = history.len(),
        "loaded customer timelines"
    );

    Ok(customers
        .into_iter()
        .map(|customer| {
            let history = history.remove(&customer.id).unwrap_or_default();
            CustomerTimeline { customer, history }
        })
        .collect())
}

/// One customer with its history, newest-first.
pub async fn fetch_timeline(
    pool: &PgPool,
    customer_id: Uuid,
) -> anyhow::Result<Option<CustomerTimeline>> {
    let Some(customer) = fetch_customer(pool, customer_id).await? else {
        return Ok(None);
    };
    let history = fetch_history(pool, &[customer.id])
        .await?
        .remove(&customer.id)
        .unwrap_or_default();
    Ok(Some(CustomerTimeline { customer, history }))
}

/// Applies survey submissions: overwrite live ratings, then append history.
pub async fn apply_submission(pool: &PgPool, plans: &[SubmissionPlan]) -> anyhow::Result<usize> {
    let assignments = MetricSlot::ALL
        .iter()
        .enumerate()
        .map(|(offset, slot)| format!("{} = ${}", slot.key(), offset + 3))
        .collect::<Vec<_>>()
        .join(", ");
    let update_sql = format!(
        "UPDATE health.customers SET notes = $2, updated_at = now(), {assignments} WHERE id = $1"
    );

    let mut tx = pool.begin().await?;
    for plan in plans {
        let query = sqlx::query(&update_sql)
            .bind(plan.update.customer_id)
            .bind(&plan.update.notes);
        let result = bind_metrics(query, &plan.update.metrics)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("customer {} not found", plan.update.customer_id);
        }

        insert_history(
            &mut *tx,
            plan.customer_id(),
            plan.history.snapshot_date,
            &plan.history.metrics,
        )
        .await?;
    }
    tx.commit().await?;

    info!(customers = plans.len(), "survey submission saved");
    Ok(plans.len())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    use MetricRating::{High, Low, Medium};

    let customers = vec![
        (
            Uuid::parse_str("5b0d7c1e-4a8e-4c62-9f0b-0f4a2b7d9c11")?,
            "Northwind Staffing",
            "1",
            "Brooke",
            [High, High, Medium, High, High, High],
        ),
        (
            Uuid::parse_str("a3f6e2d4-1c55-4f7e-8b9d-6e2c1a0b3d22")?,
            "Harbor Logistics",
            "2",
            "Ryan",
            [Medium, Low, Medium, Medium, Low, High],
        ),
        (
            Uuid::parse_str("c81e9b57-77a2-4d13-a6f4-92d0e5b8a433")?,
            "Summit Health",
            "2",
            "Natalie",
            [Low, Low, Low, Medium, Low, Low],
        ),
    ];

    let months = [
        NaiveDate::from_ymd_opt(2026, 1, 5).context("invalid date")?,
        NaiveDate::from_ymd_opt(2026, 2, 3).context("invalid date")?,
        NaiveDate::from_ymd_opt(2026, 3, 4).context("invalid date")?,
    ];

    let customer_sql = format!(
        "INSERT INTO health.customers (id, name, segment, owner, {}) VALUES ($1, $2, $3, $4, {}) \
         ON CONFLICT (id) DO NOTHING",
        metric_columns(),
        placeholders(5, MetricSlot::COUNT),
    );

    for (id, name, segment, owner, required) in customers {
        let mut metrics = MetricValues::default();
        let required_slots = MetricSlot::ALL.into_iter().filter(|slot| !slot.is_optional());
        for (slot, rating) in required_slots.zip(required) {
            metrics.set(slot, rating);
        }

        let query = sqlx::query(&customer_sql)
            .bind(id)
            .bind(name)
            .bind(segment)
            .bind(owner);
        let inserted = bind_metrics(query, &metrics).execute(pool).await?;
        if inserted.rows_affected() == 0 {
            continue;
        }

        for month in months {
            insert_history(pool, id, month, &metrics).await?;
        }
    }

    Ok(())
}
