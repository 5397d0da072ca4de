use chrono::{DateTime, Utc};
use permit_core::{Contact, InspectionResult, Location, PermitRecord};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use thiserror::Error;

pub const PERMIT_SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredPermit {
    pub record: PermitRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable copy of source permits that could not be fully dispatched.
pub struct PermitStore {
    conn: Connection,
}

impl PermitStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > PERMIT_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: PERMIT_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_permit_fallback.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_inspection_results.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 2", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    /// Insert or overwrite the permit keyed by its identifier. `created_at`
    /// survives overwrites.
    pub fn upsert_permit(
        &self,
        record: &PermitRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let contact = record.contact.as_ref();
        let inspection = record.inspection.as_ref();
        let ts = now.to_rfc3339();

        self.conn.execute(
            "
            INSERT INTO permits (
                id,
                application_number,
                permit_type,
                status,
                filed_date,
                issued_date,
                completed_date,
                description,
                estimated_cost,
                revised_cost,
                existing_use,
                proposed_use,
                plansets,
                address,
                block,
                lot,
                zipcode,
                applicant_name,
                applicant_address,
                inspector_name,
                inspection_date,
                inspection_status,
                created_at,
                updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?23
            )
            ON CONFLICT(id) DO UPDATE SET
                application_number=excluded.application_number,
                permit_type=excluded.permit_type,
                status=excluded.status,
                filed_date=excluded.filed_date,
                issued_date=excluded.issued_date,
                completed_date=excluded.completed_date,
                description=excluded.description,
                estimated_cost=excluded.estimated_cost,
                revised_cost=excluded.revised_cost,
                existing_use=excluded.existing_use,
                proposed_use=excluded.proposed_use,
                plansets=excluded.plansets,
                address=excluded.address,
                block=excluded.block,
                lot=excluded.lot,
                zipcode=excluded.zipcode,
                applicant_name=excluded.applicant_name,
                applicant_address=excluded.applicant_address,
                inspector_name=excluded.inspector_name,
                inspection_date=excluded.inspection_date,
                inspection_status=excluded.inspection_status,
                updated_at=excluded.updated_at
            ",
            params![
                record.id,
                record.application_number,
                record.permit_type,
                record.status,
                record.filed_date,
                record.issued_date,
                record.completed_date,
                record.description,
                record.estimated_cost,
                record.revised_cost,
                record.existing_use,
                record.proposed_use,
                record.plansets,
                record.location.address,
                record.location.block,
                record.location.lot,
                record.location.zipcode,
                contact.map(|contact| contact.applicant_name.as_str()),
                contact.and_then(|contact| contact.applicant_address.as_deref()),
                inspection.and_then(|inspection| inspection.inspector_name.as_deref()),
                inspection.and_then(|inspection| inspection.inspection_date.as_deref()),
                inspection.and_then(|inspection| inspection.inspection_status.as_deref()),
                ts,
            ],
        )?;

        Ok(())
    }

    pub fn permit(&self, id: &str) -> Result<Option<StoredPermit>, StorageError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT
                    id,
                    application_number,
                    permit_type,
                    status,
                    filed_date,
                    issued_date,
                    completed_date,
                    description,
                    estimated_cost,
                    revised_cost,
                    existing_use,
                    proposed_use,
                    plansets,
                    address,
                    block,
                    lot,
                    zipcode,
                    applicant_name,
                    applicant_address,
                    inspector_name,
                    inspection_date,
                    inspection_status,
                    created_at,
                    updated_at
                FROM permits
                WHERE id = ?1
                ",
                params![id],
                read_permit_row,
            )
            .optional()?;

        let Some((record, created_at, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(StoredPermit {
            record,
            created_at: parse_timestamp(created_at)?,
            updated_at: parse_timestamp(updated_at)?,
        }))
    }

    pub fn permit_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM permits", [], |row| row.get(0))?)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }
}

fn read_permit_row(row: &Row<'_>) -> rusqlite::Result<(PermitRecord, String, String)> {
    let applicant_name: Option<String> = row.get(17)?;
    let applicant_address: Option<String> = row.get(18)?;
    let inspector_name: Option<String> = row.get(19)?;
    let inspection_date: Option<String> = row.get(20)?;
    let inspection_status: Option<String> = row.get(21)?;

    let inspection = if inspector_name.is_none()
        && inspection_date.is_none()
        && inspection_status.is_none()
    {
        None
    } else {
        Some(InspectionResult {
            inspector_name,
            inspection_date,
            inspection_status,
        })
    };

    let record = PermitRecord {
        id: row.get(0)?,
        application_number: row.get(1)?,
        permit_type: row.get(2)?,
        status: row.get(3)?,
        filed_date: row.get(4)?,
        issued_date: row.get(5)?,
        completed_date: row.get(6)?,
        description: row.get(7)?,
        estimated_cost: row.get(8)?,
        revised_cost: row.get(9)?,
        existing_use: row.get(10)?,
        proposed_use: row.get(11)?,
        plansets: row.get(12)?,
        location: Location {
            address: row.get(13)?,
            block: row.get(14)?,
            lot: row.get(15)?,
            zipcode: row.get(16)?,
        },
        contact: applicant_name.map(|applicant_name| Contact {
            applicant_name,
            applicant_address,
        }),
        inspection,
    };

    Ok((record, row.get(22)?, row.get(23)?))
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(format!("{value}: {err}")))
}
