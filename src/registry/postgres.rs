use std::str::FromStr;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::registry::models::{parse_address, Amount, ContractKind, ContractRecord};
use crate::registry::store::ContractStore;

/// Postgres-backed contract store. Addresses and amounts are TEXT so 256-bit values survive.
pub struct PgContractStore {
    pub pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct ContractRow {
    address: String,
    kind: String,
    counterparty_long: Option<String>,
    counterparty_short: Option<String>,
    strike_price: String,
    notional_size: String,
    premium: String,
    expiry_timestamp: Option<i64>,
    is_funded: bool,
    is_active: bool,
    is_exercised: bool,
    is_resolved: bool,
    price_at_expiry: Option<String>,
    created_at: DateTime<Utc>,
    funded_at: Option<DateTime<Utc>>,
    entered_at: Option<DateTime<Utc>>,
    exercised_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<ContractRow> for ContractRecord {
    type Error = AppError;

    fn try_from(row: ContractRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, e: AppError| {
            AppError::Internal(format!("Corrupt {} for contract {}: {}", field, row.address, e))
        };

        Ok(ContractRecord {
            address: parse_address(&row.address).map_err(|e| corrupt("address", e))?,
            kind: ContractKind::from_str(&row.kind).map_err(|e| corrupt("kind", e))?,
            counterparty_long: row
                .counterparty_long
                .as_deref()
                .map(parse_address)
                .transpose()
                .map_err(|e| corrupt("counterparty_long", e))?,
            counterparty_short: row
                .counterparty_short
                .as_deref()
                .map(parse_address)
                .transpose()
                .map_err(|e| corrupt("counterparty_short", e))?,
            strike_price: Amount::from_str(&row.strike_price)
                .map_err(|e| corrupt("strike_price", e))?,
            notional_size: Amount::from_str(&row.notional_size)
                .map_err(|e| corrupt("notional_size", e))?,
            premium: Amount::from_str(&row.premium).map_err(|e| corrupt("premium", e))?,
            expiry_timestamp: row.expiry_timestamp.filter(|t| *t > 0).map(|t| t as u64),
            is_funded: row.is_funded,
            is_active: row.is_active,
            is_exercised: row.is_exercised,
            is_resolved: row.is_resolved,
            price_at_expiry: row
                .price_at_expiry
                .as_deref()
                .map(Amount::from_str)
                .transpose()
                .map_err(|e| corrupt("price_at_expiry", e))?,
            created_at: row.created_at,
            funded_at: row.funded_at,
            entered_at: row.entered_at,
            exercised_at: row.exercised_at,
            resolved_at: row.resolved_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT address, kind, counterparty_long, counterparty_short, strike_price, notional_size,
           premium, expiry_timestamp, is_funded, is_active, is_exercised, is_resolved,
           price_at_expiry, created_at, funded_at, entered_at, exercised_at, resolved_at
    FROM contracts
"#;

fn address_key(address: Address) -> String {
    format!("{:#x}", address)
}

fn expiry_column(expiry: Option<u64>) -> Option<i64> {
    expiry.map(|t| i64::try_from(t).unwrap_or(i64::MAX))
}

impl PgContractStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContractStore for PgContractStore {
    async fn insert(&self, record: &ContractRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO contracts (
                address, kind, counterparty_long, counterparty_short, strike_price,
                notional_size, premium, expiry_timestamp, is_funded, is_active,
                is_exercised, is_resolved, price_at_expiry, created_at, funded_at,
                entered_at, exercised_at, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (address) DO NOTHING
            "#,
        )
        .bind(address_key(record.address))
        .bind(record.kind.as_str())
        .bind(record.counterparty_long.map(address_key))
        .bind(record.counterparty_short.map(address_key))
        .bind(record.strike_price.to_string())
        .bind(record.notional_size.to_string())
        .bind(record.premium.to_string())
        .bind(expiry_column(record.expiry_timestamp))
        .bind(record.is_funded)
        .bind(record.is_active)
        .bind(record.is_exercised)
        .bind(record.is_resolved)
        .bind(record.price_at_expiry.map(|p| p.to_string()))
        .bind(record.created_at)
        .bind(record.funded_at)
        .bind(record.entered_at)
        .bind(record.exercised_at)
        .bind(record.resolved_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::AlreadyRegistered(record.address));
        }
        Ok(())
    }

    async fn get(&self, address: Address) -> AppResult<Option<ContractRecord>> {
        let row = sqlx::query_as::<_, ContractRow>(&format!("{} WHERE address = $1", SELECT_COLUMNS))
            .bind(address_key(address))
            .fetch_optional(&self.pool)
            .await?;

        row.map(ContractRecord::try_from).transpose()
    }

    async fn update(&self, record: &ContractRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE contracts
            SET counterparty_long = $2,
                counterparty_short = $3,
                expiry_timestamp = $4,
                is_funded = $5,
                is_active = $6,
                is_exercised = $7,
                is_resolved = $8,
                price_at_expiry = $9,
                funded_at = $10,
                entered_at = $11,
                exercised_at = $12,
                resolved_at = $13,
                updated_at = NOW()
            WHERE address = $1
            "#,
        )
        .bind(address_key(record.address))
        .bind(record.counterparty_long.map(address_key))
        .bind(record.counterparty_short.map(address_key))
        .bind(expiry_column(record.expiry_timestamp))
        .bind(record.is_funded)
        .bind(record.is_active)
        .bind(record.is_exercised)
        .bind(record.is_resolved)
        .bind(record.price_at_expiry.map(|p| p.to_string()))
        .bind(record.funded_at)
        .bind(record.entered_at)
        .bind(record.exercised_at)
        .bind(record.resolved_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Contract {} not found", record.address)));
        }
        Ok(())
    }

    async fn list(&self) -> AppResult<Vec<ContractRecord>> {
        let rows = sqlx::query_as::<_, ContractRow>(&format!(
            "{} ORDER BY created_at ASC, address ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ContractRecord::try_from).collect()
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
