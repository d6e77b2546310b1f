//! Persisted module enable map.
//!
//! # Responsibility
//! - Store `module name -> enabled` rows in `module_settings`.
//! - Return them as [`ModuleSettings`] for discovery.
//!
//! # Invariants
//! - Only valid module names are written.
//! - Unreadable rows (out-of-range `enabled`, invalid names) are skipped with
//!   a warning, so that module falls back to the next settings layer.

use crate::db::DbError;
use crate::module::descriptor::is_valid_module_name;
use crate::module::settings::ModuleSettings;
use log::{info, warn};
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

pub type SettingsRepoResult<T> = Result<T, SettingsRepoError>;

#[derive(Debug)]
pub enum SettingsRepoError {
    Db(DbError),
    InvalidModuleName(String),
}

impl Display for SettingsRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidModuleName(name) => write!(f, "invalid module name: {name:?}"),
        }
    }
}

impl Error for SettingsRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidModuleName(_) => None,
        }
    }
}

impl From<DbError> for SettingsRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SettingsRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::from(value))
    }
}

/// Storage contract for the module enable map.
pub trait SettingsRepository {
    fn load_settings(&self) -> SettingsRepoResult<ModuleSettings>;
    fn set_enabled(&self, name: &str, enabled: bool) -> SettingsRepoResult<()>;
    /// Deletes the row for `name`. Returns whether one existed.
    fn remove(&self, name: &str) -> SettingsRepoResult<bool>;
}

/// SQLite-backed [`SettingsRepository`].
pub struct SqliteSettingsRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSettingsRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for SqliteSettingsRepository<'_> {
    fn load_settings(&self) -> SettingsRepoResult<ModuleSettings> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, enabled FROM module_settings ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Value>(1)?))
        })?;

        let mut settings = ModuleSettings::new();
        let mut skipped = 0usize;
        for row in rows {
            let (name, enabled) = row?;
            let enabled = match enabled {
                Value::Integer(0) => false,
                Value::Integer(1) => true,
                other => {
                    warn!(
                        "event=module_setting_skipped module=settings status=warn name={:?} enabled={:?}",
                        name, other
                    );
                    skipped += 1;
                    continue;
                }
            };
            if !is_valid_module_name(&name) {
                warn!(
                    "event=module_setting_skipped module=settings status=warn name={:?} reason=invalid_name",
                    name
                );
                skipped += 1;
                continue;
            }
            settings.set(name, enabled);
        }
        info!(
            "event=module_settings_load module=settings status=ok loaded={} skipped={}",
            settings.len(),
            skipped
        );
        Ok(settings)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> SettingsRepoResult<()> {
        let name = name.trim();
        if !is_valid_module_name(name) {
            return Err(SettingsRepoError::InvalidModuleName(name.to_string()));
        }
        self.conn.execute(
            "INSERT INTO module_settings (name, enabled, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
            params![name, i64::from(enabled), now_epoch_ms()],
        )?;
        info!(
            "event=module_setting_saved module=settings status=ok name={} enabled={}",
            name, enabled
        );
        Ok(())
    }

    fn remove(&self, name: &str) -> SettingsRepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM module_settings WHERE name = ?1", params![name.trim()])?;
        Ok(changed > 0)
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{SettingsRepoError, SettingsRepository, SqliteSettingsRepository};
    use crate::db::open_db_in_memory;

    #[test]
    fn upserts_and_loads_settings() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteSettingsRepository::new(&conn);
        repo.set_enabled("theme", true).expect("save theme");
        repo.set_enabled("@acme/reviews", false).expect("save reviews");
        repo.set_enabled("theme", false).expect("update theme");

        let settings = repo.load_settings().expect("load settings");
        assert_eq!(settings.len(), 2);
        assert_eq!(settings.get("theme"), Some(false));
        assert_eq!(settings.get("@acme/reviews"), Some(false));
    }

    #[test]
    fn rejects_invalid_names() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteSettingsRepository::new(&conn);
        let err = repo
            .set_enabled("../evil", true)
            .expect_err("invalid name must fail");
        assert!(matches!(err, SettingsRepoError::InvalidModuleName(_)));
    }

    #[test]
    fn malformed_rows_are_skipped_instead_of_failing_the_load() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteSettingsRepository::new(&conn);
        repo.set_enabled("theme", true).expect("save theme");
        conn.execute_batch(
            "PRAGMA ignore_check_constraints = ON;
             INSERT INTO module_settings (name, enabled, updated_at) VALUES ('promotions', 7, 0);
             INSERT INTO module_settings (name, enabled, updated_at) VALUES ('reviews', 'yes', 0);
             INSERT INTO module_settings (name, enabled, updated_at) VALUES ('../evil', 1, 0);
             PRAGMA ignore_check_constraints = OFF;",
        )
        .expect("insert malformed rows");

        let settings = repo.load_settings().expect("load settings");
        assert_eq!(settings.len(), 1);
        assert_eq!(settings.get("theme"), Some(true));
        assert_eq!(settings.get("promotions"), None);
        assert_eq!(settings.get("reviews"), None);
    }

    #[test]
    fn remove_reports_whether_row_existed() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteSettingsRepository::new(&conn);
        repo.set_enabled("theme", true).expect("save theme");
        assert!(repo.remove("theme").expect("remove theme"));
        assert!(!repo.remove("theme").expect("remove again"));
        assert!(repo.load_settings().expect("load settings").is_empty());
    }
}
