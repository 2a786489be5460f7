use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::store::ReleaseStore;
use crate::store::error::StoreError;
use crate::store::types::{
    CompatEntry, Dependency, OrderedRelease, Package, Release, ReleaseMetadata, ReleaseNotes,
    ReleaseOrder, ReleaseRef,
};

const PACKAGE_COLUMNS: &str = "id, name, type, managed, repository, enabled, published, webhook_id, webhook_secret";

const RELEASE_COLUMNS: &str = "id, package_id, version, normalized_version, stability, sha, metadata, changelog, date, critical, notes, valid, invalid_reason";

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        info!("Opening registry database at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        debug!("Registry database ready");

        Ok(store)
    }

    /// Acquire database connection lock with proper error handling
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        debug!("Creating database schema");

        let conn = self.lock_conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS packages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL,
                managed INTEGER NOT NULL DEFAULT 0,
                repository TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                published INTEGER NOT NULL DEFAULT 0,
                webhook_id TEXT,
                webhook_secret TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS releases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                package_id INTEGER NOT NULL,
                version TEXT NOT NULL,
                normalized_version TEXT NOT NULL,
                stability TEXT NOT NULL,
                sha TEXT NOT NULL,
                metadata TEXT,
                changelog TEXT,
                date TEXT,
                critical INTEGER NOT NULL DEFAULT 0,
                notes TEXT,
                valid INTEGER NOT NULL DEFAULT 1,
                invalid_reason TEXT,
                FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE,
                UNIQUE(package_id, normalized_version)
            );

            CREATE INDEX IF NOT EXISTS idx_releases_package_id ON releases(package_id);
            CREATE INDEX IF NOT EXISTS idx_releases_stability ON releases(package_id, stability);

            CREATE TABLE IF NOT EXISTS dependencies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                package_id INTEGER NOT NULL,
                release_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                constraints TEXT NOT NULL,
                FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE,
                FOREIGN KEY (release_id) REFERENCES releases(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_dependencies_name ON dependencies(name);
            CREATE INDEX IF NOT EXISTS idx_dependencies_release_id ON dependencies(release_id);

            CREATE TABLE IF NOT EXISTS release_orders (
                release_id INTEGER PRIMARY KEY,
                plugin_id INTEGER NOT NULL,
                sort_order INTEGER NOT NULL,
                stable_order INTEGER NOT NULL,
                FOREIGN KEY (release_id) REFERENCES releases(id) ON DELETE CASCADE,
                FOREIGN KEY (plugin_id) REFERENCES packages(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_release_orders_plugin_id ON release_orders(plugin_id);

            CREATE TABLE IF NOT EXISTS compat (
                plugin_release_id INTEGER NOT NULL,
                host_release_id INTEGER NOT NULL,
                PRIMARY KEY (plugin_release_id, host_release_id),
                FOREIGN KEY (plugin_release_id) REFERENCES releases(id) ON DELETE CASCADE,
                FOREIGN KEY (host_release_id) REFERENCES releases(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_compat_host ON compat(host_release_id);
            "#,
        )?;

        debug!("Database schema created successfully");
        Ok(())
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn query_packages(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Package>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages WHERE {filter} ORDER BY name"
        ))?;
        let packages = stmt
            .query_map(params, package_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(packages)
    }
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

fn package_from_row(row: &Row) -> rusqlite::Result<Package> {
    Ok(Package {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        package_type: row.get(2)?,
        managed: row.get(3)?,
        repository: row.get(4)?,
        enabled: row.get(5)?,
        published: row.get(6)?,
        webhook_id: row.get(7)?,
        webhook_secret: row.get(8)?,
    })
}

fn release_from_row(row: &Row) -> rusqlite::Result<Release> {
    let metadata = row
        .get::<_, Option<String>>(6)?
        .map(|json| serde_json::from_str::<ReleaseMetadata>(&json))
        .transpose()
        .map_err(|e| conversion_error(6, e))?;

    let date = row
        .get::<_, Option<String>>(8)?
        .map(|raw| NaiveDate::parse_from_str(&raw, DATE_FORMAT))
        .transpose()
        .map_err(|e| conversion_error(8, e))?;

    Ok(Release {
        id: Some(row.get(0)?),
        package_id: row.get(1)?,
        version: row.get(2)?,
        normalized_version: row.get(3)?,
        stability: parse_column(row, 4)?,
        sha: row.get(5)?,
        metadata,
        changelog: row.get(7)?,
        notes: ReleaseNotes {
            date,
            critical: row.get(9)?,
            notes: row.get(10)?,
        },
        valid: row.get(11)?,
        invalid_reason: row.get(12)?,
    })
}

impl ReleaseStore for SqliteStore {
    fn begin(&self) -> Result<(), StoreError> {
        self.lock_conn()?.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.lock_conn()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.lock_conn()?.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn package_by_name(&self, name: &str) -> Result<Option<Package>, StoreError> {
        let conn = self.lock_conn()?;
        let package = conn
            .query_row(
                &format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE name = ?1"),
                [name],
                package_from_row,
            )
            .optional()?;
        Ok(package)
    }

    fn insert_package(&self, package: &Package) -> Result<i64, StoreError> {
        let now = Self::now_ms();
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO packages (name, type, managed, repository, enabled, published,
                                  webhook_id, webhook_secret, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            "#,
            params![
                package.name,
                package.package_type,
                package.managed,
                package.repository,
                package.enabled,
                package.published,
                package.webhook_id,
                package.webhook_secret,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Inserted package {} with id {}", package.name, id);
        Ok(id)
    }

    fn update_package(&self, package: &Package) -> Result<(), StoreError> {
        let id = package
            .id
            .ok_or_else(|| StoreError::NotFound(format!("package {} has no id", package.name)))?;
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            UPDATE packages SET name = ?1, type = ?2, managed = ?3, repository = ?4,
                enabled = ?5, published = ?6, webhook_id = ?7, webhook_secret = ?8,
                updated_at = ?9
            WHERE id = ?10
            "#,
            params![
                package.name,
                package.package_type,
                package.managed,
                package.repository,
                package.enabled,
                package.published,
                package.webhook_id,
                package.webhook_secret,
                Self::now_ms(),
                id,
            ],
        )?;
        Ok(())
    }

    fn delete_package(&self, package_id: i64) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM packages WHERE id = ?1", [package_id])?;
        Ok(())
    }

    fn managed_packages(&self) -> Result<Vec<Package>, StoreError> {
        self.query_packages("managed = 1", [])
    }

    fn dependency_packages(&self) -> Result<Vec<Package>, StoreError> {
        self.query_packages("managed = 0", [])
    }

    fn packages_by_type(&self, package_type: &str) -> Result<Vec<Package>, StoreError> {
        self.query_packages("type = ?1", [package_type])
    }

    fn release_refs(&self, package_id: i64) -> Result<Vec<ReleaseRef>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, version, normalized_version, stability, sha, valid
            FROM releases WHERE package_id = ?1 ORDER BY id
            "#,
        )?;
        let refs = stmt
            .query_map([package_id], |row| {
                Ok(ReleaseRef {
                    id: row.get(0)?,
                    version: row.get(1)?,
                    normalized_version: row.get(2)?,
                    stability: parse_column(row, 3)?,
                    sha: row.get(4)?,
                    valid: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(refs)
    }

    fn releases(&self, package_id: i64) -> Result<Vec<Release>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases WHERE package_id = ?1 ORDER BY id"
        ))?;
        let releases = stmt
            .query_map([package_id], release_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(releases)
    }

    fn release_by_version(
        &self,
        package_id: i64,
        normalized_version: &str,
    ) -> Result<Option<Release>, StoreError> {
        let conn = self.lock_conn()?;
        let release = conn
            .query_row(
                &format!(
                    "SELECT {RELEASE_COLUMNS} FROM releases WHERE package_id = ?1 AND normalized_version = ?2"
                ),
                params![package_id, normalized_version],
                release_from_row,
            )
            .optional()?;
        Ok(release)
    }

    fn insert_release(&self, release: &Release) -> Result<i64, StoreError> {
        let metadata = release
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let date = release
            .notes
            .date
            .map(|d| d.format(DATE_FORMAT).to_string());

        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO releases (package_id, version, normalized_version, stability, sha,
                                  metadata, changelog, date, critical, notes, valid, invalid_reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                release.package_id,
                release.version,
                release.normalized_version,
                release.stability.as_str(),
                release.sha,
                metadata,
                release.changelog,
                date,
                release.notes.critical,
                release.notes.notes,
                release.valid,
                release.invalid_reason,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn delete_releases(&self, release_ids: &[i64]) -> Result<(), StoreError> {
        if release_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock_conn()?;
        let sp = conn.savepoint()?;
        {
            let mut stmt = sp.prepare("DELETE FROM releases WHERE id = ?1")?;
            for id in release_ids {
                stmt.execute([id])?;
            }
        }
        sp.commit()?;
        debug!("Deleted {} releases", release_ids.len());
        Ok(())
    }

    fn update_release_notes(
        &self,
        release_id: i64,
        notes: &ReleaseNotes,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE releases SET date = ?1, critical = ?2, notes = ?3 WHERE id = ?4",
            params![
                notes.date.map(|d| d.format(DATE_FORMAT).to_string()),
                notes.critical,
                notes.notes,
                release_id,
            ],
        )?;
        Ok(())
    }

    fn insert_dependencies(&self, dependencies: &[Dependency]) -> Result<(), StoreError> {
        if dependencies.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock_conn()?;
        let sp = conn.savepoint()?;
        {
            let mut stmt = sp.prepare(
                "INSERT INTO dependencies (package_id, release_id, name, constraints) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for dep in dependencies {
                stmt.execute(params![dep.package_id, dep.release_id, dep.name, dep.constraints])?;
            }
        }
        sp.commit()?;
        Ok(())
    }

    fn dependencies_for_release(&self, release_id: i64) -> Result<Vec<Dependency>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT package_id, release_id, name, constraints FROM dependencies WHERE release_id = ?1 ORDER BY id",
        )?;
        let deps = stmt
            .query_map([release_id], |row| {
                Ok(Dependency {
                    package_id: row.get(0)?,
                    release_id: row.get(1)?,
                    name: row.get(2)?,
                    constraints: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(deps)
    }

    fn constraints_on(&self, dependency_name: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT constraints FROM dependencies WHERE name = ?1 ORDER BY constraints",
        )?;
        let constraints = stmt
            .query_map([dependency_name], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(constraints)
    }

    fn replace_release_orders(
        &self,
        plugin_id: i64,
        orders: &[ReleaseOrder],
    ) -> Result<(), StoreError> {
        let mut conn = self.lock_conn()?;
        let sp = conn.savepoint()?;
        sp.execute("DELETE FROM release_orders WHERE plugin_id = ?1", [plugin_id])?;
        {
            let mut stmt = sp.prepare(
                "INSERT INTO release_orders (release_id, plugin_id, sort_order, stable_order) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for order in orders {
                stmt.execute(params![
                    order.release_id,
                    order.plugin_id,
                    order.order,
                    order.stable_order
                ])?;
            }
        }
        sp.commit()?;
        Ok(())
    }

    fn release_orders(&self, plugin_id: i64) -> Result<Vec<ReleaseOrder>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT release_id, plugin_id, sort_order, stable_order
            FROM release_orders WHERE plugin_id = ?1 ORDER BY sort_order
            "#,
        )?;
        let orders = stmt
            .query_map([plugin_id], |row| {
                Ok(ReleaseOrder {
                    release_id: row.get(0)?,
                    plugin_id: row.get(1)?,
                    order: row.get(2)?,
                    stable_order: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    fn ordered_plugin_releases(
        &self,
        plugin_id: i64,
        host_name: &str,
    ) -> Result<Vec<OrderedRelease>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT r.id, r.normalized_version, o.sort_order, r.valid, d.constraints
            FROM releases r
            JOIN release_orders o ON o.release_id = r.id
            LEFT JOIN dependencies d ON d.release_id = r.id AND d.name = ?2
            WHERE r.package_id = ?1
            ORDER BY o.sort_order DESC
            "#,
        )?;
        let releases = stmt
            .query_map(params![plugin_id, host_name], |row| {
                Ok(OrderedRelease {
                    release_id: row.get(0)?,
                    normalized_version: row.get(1)?,
                    order: row.get(2)?,
                    valid: row.get(3)?,
                    host_constraint: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(releases)
    }

    fn insert_compat_entries(&self, entries: &[CompatEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock_conn()?;
        let sp = conn.savepoint()?;
        {
            let mut stmt = sp.prepare(
                "INSERT OR IGNORE INTO compat (plugin_release_id, host_release_id) VALUES (?1, ?2)",
            )?;
            for entry in entries {
                stmt.execute(params![entry.plugin_release_id, entry.host_release_id])?;
            }
        }
        sp.commit()?;
        Ok(())
    }

    fn delete_compat_for_plugin(&self, plugin_id: i64) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM compat WHERE plugin_release_id IN (SELECT id FROM releases WHERE package_id = ?1)",
            [plugin_id],
        )?;
        Ok(())
    }

    fn compatible_host_release_ids(
        &self,
        plugin_release_id: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT host_release_id FROM compat WHERE plugin_release_id = ?1 ORDER BY host_release_id",
        )?;
        let ids = stmt
            .query_map([plugin_release_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Stability;
    use rstest::rstest;
    use tempfile::TempDir;

    fn create_store() -> (TempDir, SqliteStore) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = SqliteStore::open(&db_path).unwrap();
        (temp_dir, store)
    }

    fn insert_release(store: &SqliteStore, package_id: i64, version: &str, sha: &str) -> i64 {
        let normalized = crate::version::normalize(version).unwrap();
        let stability = crate::version::stability_of(version);
        store
            .insert_release(&Release::shell(
                package_id,
                version,
                &normalized,
                stability,
                sha,
            ))
            .unwrap()
    }

    #[test]
    fn reopening_keeps_schema_and_indexes() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        drop(SqliteStore::open(&db_path).unwrap());
        let store = SqliteStore::open(&db_path).unwrap();

        let conn = store.lock_conn().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'")
            .unwrap();
        let indexes: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(indexes.contains(&"idx_releases_stability".to_string()));
        assert!(indexes.contains(&"idx_compat_host".to_string()));
    }

    #[test]
    fn insert_package_then_find_by_name() {
        let (_temp_dir, store) = create_store();

        let mut package = Package::new("vendor/plugin", "craft-plugin");
        package.managed = true;
        package.repository = Some("https://github.com/vendor/plugin".to_string());
        let id = store.insert_package(&package).unwrap();

        let found = store.package_by_name("vendor/plugin").unwrap().unwrap();
        assert_eq!(found.id, Some(id));
        assert!(found.managed);
        assert_eq!(found.package_type, "craft-plugin");
        assert_eq!(found.repository, package.repository);

        assert!(store.package_by_name("vendor/missing").unwrap().is_none());
    }

    #[test]
    fn managed_and_dependency_packages_are_partitioned() {
        let (_temp_dir, store) = create_store();

        let mut managed = Package::new("vendor/plugin", "craft-plugin");
        managed.managed = true;
        store.insert_package(&managed).unwrap();
        store.insert_package(&Package::discovered("other/lib")).unwrap();

        let managed: Vec<String> = store
            .managed_packages()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        let deps: Vec<String> = store
            .dependency_packages()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();

        assert_eq!(managed, vec!["vendor/plugin"]);
        assert_eq!(deps, vec!["other/lib"]);
    }

    #[test]
    fn insert_release_round_trips_metadata_and_notes() {
        let (_temp_dir, store) = create_store();
        let package_id = store
            .insert_package(&Package::new("vendor/plugin", "craft-plugin"))
            .unwrap();

        let mut release = Release::shell(package_id, "v1.2.0", "1.2.0.0", Stability::Stable, "abc");
        let mut metadata = ReleaseMetadata::default();
        metadata.description = Some("A plugin".to_string());
        metadata
            .require
            .insert("craftcms/cms".to_string(), "^4.0".to_string());
        release.metadata = Some(metadata.clone());
        release.notes = ReleaseNotes {
            date: NaiveDate::from_ymd_opt(2024, 1, 15),
            critical: true,
            notes: Some("<p>Fixed</p>".to_string()),
        };
        let id = store.insert_release(&release).unwrap();

        let stored = store
            .release_by_version(package_id, "1.2.0.0")
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, Some(id));
        assert_eq!(stored.metadata, Some(metadata));
        assert_eq!(stored.notes, release.notes);
        assert_eq!(stored.stability, Stability::Stable);
    }

    #[test]
    fn insert_release_rejects_duplicate_normalized_version() {
        let (_temp_dir, store) = create_store();
        let package_id = store
            .insert_package(&Package::new("vendor/plugin", "craft-plugin"))
            .unwrap();

        insert_release(&store, package_id, "1.0.0", "aaa");
        let duplicate = store.insert_release(&Release::shell(
            package_id,
            "v1.0",
            "1.0.0.0",
            Stability::Stable,
            "bbb",
        ));

        assert!(matches!(duplicate, Err(StoreError::Database(_))));
    }

    #[test]
    fn delete_releases_cascades_to_dependencies_orders_and_compat() {
        let (_temp_dir, store) = create_store();
        let host_id = store
            .insert_package(&Package::new("craftcms/cms", "project"))
            .unwrap();
        let plugin_id = store
            .insert_package(&Package::new("vendor/plugin", "craft-plugin"))
            .unwrap();

        let host_release = insert_release(&store, host_id, "4.0.0", "h1");
        let plugin_release = insert_release(&store, plugin_id, "1.0.0", "p1");
        store
            .insert_dependencies(&[Dependency {
                package_id: plugin_id,
                release_id: plugin_release,
                name: "craftcms/cms".to_string(),
                constraints: "^4.0".to_string(),
            }])
            .unwrap();
        store
            .replace_release_orders(
                plugin_id,
                &[ReleaseOrder {
                    release_id: plugin_release,
                    plugin_id,
                    order: 0,
                    stable_order: 0,
                }],
            )
            .unwrap();
        store
            .insert_compat_entries(&[CompatEntry {
                plugin_release_id: plugin_release,
                host_release_id: host_release,
            }])
            .unwrap();

        store.delete_releases(&[plugin_release]).unwrap();

        assert!(store.dependencies_for_release(plugin_release).unwrap().is_empty());
        assert!(store.release_orders(plugin_id).unwrap().is_empty());
        assert!(
            store
                .compatible_host_release_ids(plugin_release)
                .unwrap()
                .is_empty()
        );
        assert!(store.constraints_on("craftcms/cms").unwrap().is_empty());
    }

    #[test]
    fn replace_release_orders_replaces_previous_rows() {
        let (_temp_dir, store) = create_store();
        let plugin_id = store
            .insert_package(&Package::new("vendor/plugin", "craft-plugin"))
            .unwrap();
        let a = insert_release(&store, plugin_id, "1.0.0", "a");
        let b = insert_release(&store, plugin_id, "2.0.0", "b");

        let order = |release_id, order| ReleaseOrder {
            release_id,
            plugin_id,
            order,
            stable_order: order,
        };
        store
            .replace_release_orders(plugin_id, &[order(a, 1), order(b, 0)])
            .unwrap();
        store
            .replace_release_orders(plugin_id, &[order(a, 0), order(b, 1)])
            .unwrap();

        let orders = store.release_orders(plugin_id).unwrap();
        assert_eq!(orders, vec![order(a, 0), order(b, 1)]);
    }

    #[test]
    fn ordered_plugin_releases_joins_host_constraint_newest_first() {
        let (_temp_dir, store) = create_store();
        let plugin_id = store
            .insert_package(&Package::new("vendor/plugin", "craft-plugin"))
            .unwrap();
        let old = insert_release(&store, plugin_id, "1.0.0", "a");
        let new = insert_release(&store, plugin_id, "2.0.0", "b");
        store
            .insert_dependencies(&[Dependency {
                package_id: plugin_id,
                release_id: new,
                name: "craftcms/cms".to_string(),
                constraints: "^4.0".to_string(),
            }])
            .unwrap();
        store
            .replace_release_orders(
                plugin_id,
                &[
                    ReleaseOrder {
                        release_id: old,
                        plugin_id,
                        order: 0,
                        stable_order: 0,
                    },
                    ReleaseOrder {
                        release_id: new,
                        plugin_id,
                        order: 1,
                        stable_order: 1,
                    },
                ],
            )
            .unwrap();

        let ordered = store
            .ordered_plugin_releases(plugin_id, "craftcms/cms")
            .unwrap();

        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].release_id, new);
        assert_eq!(ordered[0].host_constraint.as_deref(), Some("^4.0"));
        assert_eq!(ordered[1].release_id, old);
        assert_eq!(ordered[1].host_constraint, None);
    }

    #[test]
    fn rollback_discards_writes_since_begin() {
        let (_temp_dir, store) = create_store();
        let package_id = store
            .insert_package(&Package::new("vendor/plugin", "craft-plugin"))
            .unwrap();

        store.begin().unwrap();
        insert_release(&store, package_id, "1.0.0", "a");
        store.delete_releases(&[]).unwrap();
        store.rollback().unwrap();

        assert!(store.release_refs(package_id).unwrap().is_empty());
    }

    #[test]
    fn delete_package_removes_releases() {
        let (_temp_dir, store) = create_store();
        let package_id = store
            .insert_package(&Package::new("vendor/plugin", "craft-plugin"))
            .unwrap();
        insert_release(&store, package_id, "1.0.0", "a");

        store.delete_package(package_id).unwrap();

        assert!(store.package_by_name("vendor/plugin").unwrap().is_none());
        assert!(store.release_refs(package_id).unwrap().is_empty());
    }

    #[rstest]
    #[case(&["^1.0", "^1.0", "~2.1"], vec!["^1.0", "~2.1"])]
    #[case(&[], vec![])]
    fn constraints_on_returns_distinct_constraints(
        #[case] constraints: &[&str],
        #[case] expected: Vec<&str>,
    ) {
        let (_temp_dir, store) = create_store();
        let package_id = store
            .insert_package(&Package::new("vendor/plugin", "craft-plugin"))
            .unwrap();
        let release_id = insert_release(&store, package_id, "1.0.0", "a");
        let deps: Vec<Dependency> = constraints
            .iter()
            .map(|c| Dependency {
                package_id,
                release_id,
                name: "other/lib".to_string(),
                constraints: c.to_string(),
            })
            .collect();
        store.insert_dependencies(&deps).unwrap();

        assert_eq!(store.constraints_on("other/lib").unwrap(), expected);
    }

    #[test]
    fn update_package_persists_flags() {
        let (_temp_dir, store) = create_store();
        let id = store
            .insert_package(&Package::new("vendor/plugin", "craft-plugin"))
            .unwrap();

        let mut package = store.package_by_name("vendor/plugin").unwrap().unwrap();
        package.published = true;
        package.webhook_id = Some("123".to_string());
        store.update_package(&package).unwrap();

        let stored = store.package_by_name("vendor/plugin").unwrap().unwrap();
        assert_eq!(stored.id, Some(id));
        assert!(stored.published);
        assert_eq!(stored.webhook_id.as_deref(), Some("123"));
    }
}
