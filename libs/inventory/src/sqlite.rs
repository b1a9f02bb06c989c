//! SQLite-backed inventory.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use revive_id::{HostId, InstanceUuid};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::{HostHeartbeat, Instance, Inventory, InventoryError};

/// Milliseconds a statement waits on a lock held by another process.
const BUSY_TIMEOUT_MS: u32 = 1000;

/// SQLite inventory store.
///
/// The `Inventory` methods run their statements on the blocking thread
/// pool, so a lock held by the other service stalls only the caller.
pub struct SqliteInventory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteInventory {
    /// Open or create an inventory at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, InventoryError> {
        let conn = Connection::open(path)?;

        // Both services may open the same file
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS.into()))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory inventory (for testing).
    pub fn open_in_memory() -> Result<Self, InventoryError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, InventoryError> {
        self.conn.lock().map_err(|_| InventoryError::Poisoned)
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, InventoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, InventoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| InventoryError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| InventoryError::Task(e.to_string()))?
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), InventoryError> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS services (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host TEXT NOT NULL,
                topic TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER,
                UNIQUE (host, topic)
            );

            CREATE INDEX IF NOT EXISTS idx_services_topic ON services(topic);

            CREATE TABLE IF NOT EXISTS instances (
                uuid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                host TEXT,
                launched_on TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_instances_host ON instances(host);

            CREATE TABLE IF NOT EXISTS instance_info_caches (
                instance_uuid TEXT PRIMARY KEY REFERENCES instances(uuid),
                network_info TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Inventory schema initialized");
        Ok(())
    }

    /// Register a service that has not reported yet.
    pub fn register_service(
        &self,
        host: &HostId,
        topic: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), InventoryError> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO services (host, topic, created_at) VALUES (?1, ?2, ?3)",
            params![host.as_str(), topic, created_at.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Insert or replace an instance.
    pub fn insert_instance(&self, instance: &Instance) -> Result<(), InventoryError> {
        self.conn()?.execute(
            r#"
            INSERT OR REPLACE INTO instances (uuid, name, host, launched_on)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                instance.uuid.to_string(),
                instance.name,
                instance.host.as_ref().map(HostId::as_str),
                instance.launched_on.as_ref().map(HostId::as_str),
            ],
        )?;
        Ok(())
    }

    /// Store the serialized network descriptor of an instance.
    pub fn set_network_info(
        &self,
        uuid: &InstanceUuid,
        network_info: &str,
    ) -> Result<(), InventoryError> {
        self.conn()?.execute(
            r#"
            INSERT INTO instance_info_caches (instance_uuid, network_info) VALUES (?1, ?2)
            ON CONFLICT(instance_uuid) DO UPDATE SET network_info = excluded.network_info
            "#,
            params![uuid.to_string(), network_info],
        )?;
        Ok(())
    }

    /// Get an instance by UUID.
    pub fn get_instance(&self, uuid: &InstanceUuid) -> Result<Option<Instance>, InventoryError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT uuid, name, host, launched_on FROM instances WHERE uuid = ?1")?;

        let raw = stmt
            .query_row(params![uuid.to_string()], RawInstance::from_row)
            .optional()?;

        raw.map(RawInstance::into_instance).transpose()
    }
}

#[async_trait]
impl Inventory for SqliteInventory {
    async fn list_services_by_topic(&self, topic: &str) -> Result<Vec<HostHeartbeat>, InventoryError> {
        let topic = topic.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT host, topic, created_at, updated_at FROM services WHERE topic = ?1 ORDER BY id",
            )?;

            let rows = stmt.query_map(params![topic], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })?;

            let mut services = Vec::new();
            for row in rows {
                let (host, topic, created_at, updated_at) = row?;
                match heartbeat_from_row(&host, topic, created_at, updated_at) {
                    Ok(heartbeat) => services.push(heartbeat),
                    Err(e) => warn!(host = %host, error = %e, "Skipping invalid service row"),
                }
            }

            Ok(services)
        })
        .await
    }

    async fn list_instances_by_host(&self, host: &HostId) -> Result<Vec<Instance>, InventoryError> {
        let host = host.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT uuid, name, host, launched_on FROM instances WHERE host = ?1 ORDER BY uuid",
            )?;

            let rows = stmt.query_map(params![host.as_str()], RawInstance::from_row)?;

            let mut instances = Vec::new();
            for row in rows {
                let raw = row?;
                let uuid = raw.uuid.clone();
                match raw.into_instance() {
                    Ok(instance) => instances.push(instance),
                    Err(e) => warn!(
                        host = %host,
                        vm_uuid = %uuid,
                        error = %e,
                        "Skipping invalid instance row"
                    ),
                }
            }

            Ok(instances)
        })
        .await
    }

    async fn get_network_info(&self, uuid: &InstanceUuid) -> Result<String, InventoryError> {
        let uuid = *uuid;
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT network_info FROM instance_info_caches WHERE instance_uuid = ?1",
                params![uuid.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| InventoryError::NotFound(format!("network info for instance {uuid}")))
        })
        .await
    }

    async fn update_instance_host(
        &self,
        uuid: &InstanceUuid,
        host: &HostId,
    ) -> Result<(), InventoryError> {
        let (uuid, host) = (*uuid, host.clone());
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE instances SET host = ?1, launched_on = ?1 WHERE uuid = ?2",
                params![host.as_str(), uuid.to_string()],
            )?;

            if updated == 0 {
                return Err(InventoryError::NotFound(format!("instance {uuid}")));
            }

            debug!(vm_uuid = %uuid, host = %host, "Instance placement updated");
            Ok(())
        })
        .await
    }

    async fn report_service_heartbeat(
        &self,
        host: &HostId,
        topic: &str,
        now: DateTime<Utc>,
    ) -> Result<(), InventoryError> {
        let (host, topic) = (host.clone(), topic.to_string());
        let now = now.timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO services (host, topic, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
                ON CONFLICT(host, topic) DO UPDATE SET updated_at = excluded.updated_at
                "#,
                params![host.as_str(), topic, now],
            )?;
            Ok(())
        })
        .await
    }
}

fn heartbeat_from_row(
    host: &str,
    topic: String,
    created_at: i64,
    updated_at: Option<i64>,
) -> Result<HostHeartbeat, InventoryError> {
    Ok(HostHeartbeat {
        host: parse_host(host)?,
        topic,
        created_at: from_millis(created_at)?,
        updated_at: updated_at.map(from_millis).transpose()?,
    })
}

/// Instance row before identifier validation.
struct RawInstance {
    uuid: String,
    name: String,
    host: Option<String>,
    launched_on: Option<String>,
}

impl RawInstance {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            name: row.get(1)?,
            host: row.get(2)?,
            launched_on: row.get(3)?,
        })
    }

    fn into_instance(self) -> Result<Instance, InventoryError> {
        let uuid = InstanceUuid::parse(&self.uuid)
            .map_err(|e| InventoryError::Invalid(format!("instance uuid: {e}")))?;
        Ok(Instance {
            uuid,
            name: self.name,
            host: self.host.as_deref().map(parse_host).transpose()?,
            launched_on: self.launched_on.as_deref().map(parse_host).transpose()?,
        })
    }
}

fn parse_host(s: &str) -> Result<HostId, InventoryError> {
    HostId::parse(s).map_err(|e| InventoryError::Invalid(format!("host '{s}': {e}")))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, InventoryError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| InventoryError::Invalid(format!("timestamp out of range: {ms}")))
}
