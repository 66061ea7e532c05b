//! Cache entry repository.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Repository for cache entry operations.
///
/// Expiry times are Unix milliseconds.
pub struct CacheRepo;

impl CacheRepo {
    /// Returns the value under `key` if it has not expired at `now`.
    pub fn get(conn: &Connection, key: &str, now: i64) -> Result<Option<Vec<u8>>> {
        let value = conn
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Inserts or replaces an entry.
    pub fn set(conn: &Connection, key: &str, value: &[u8], expires_at: i64) -> Result<()> {
        conn.execute(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    /// Deletes an entry. Returns true if it existed.
    pub fn delete(conn: &Connection, key: &str) -> Result<bool> {
        let deleted = conn.execute("DELETE FROM cache_entries WHERE key = ?1", [key])?;
        Ok(deleted > 0)
    }

    /// Deletes every entry expired at `now`. Returns the number removed.
    pub fn purge_expired(conn: &Connection, now: i64) -> Result<usize> {
        let purged = conn.execute("DELETE FROM cache_entries WHERE expires_at <= ?1", [now])?;
        Ok(purged)
    }

    /// Counts stored entries, expired ones included.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn set_and_get_before_expiry() {
        let conn = setup_db();
        CacheRepo::set(&conn, "k", b"v", 1_000).unwrap();
        assert_eq!(CacheRepo::get(&conn, "k", 999).unwrap(), Some(b"v".to_vec()));
        assert_eq!(CacheRepo::get(&conn, "k", 1_000).unwrap(), None);
    }

    #[test]
    fn set_overwrites() {
        let conn = setup_db();
        CacheRepo::set(&conn, "k", b"old", 10).unwrap();
        CacheRepo::set(&conn, "k", b"new", 20).unwrap();
        assert_eq!(CacheRepo::get(&conn, "k", 15).unwrap(), Some(b"new".to_vec()));
        assert_eq!(CacheRepo::count(&conn).unwrap(), 1);
    }

    #[test]
    fn purge_removes_only_expired() {
        let conn = setup_db();
        CacheRepo::set(&conn, "a", b"1", 10).unwrap();
        CacheRepo::set(&conn, "b", b"2", 30).unwrap();
        assert_eq!(CacheRepo::purge_expired(&conn, 20).unwrap(), 1);
        assert_eq!(CacheRepo::count(&conn).unwrap(), 1);
    }

    #[test]
    fn delete_reports_existence() {
        let conn = setup_db();
        CacheRepo::set(&conn, "a", b"1", 10).unwrap();
        assert!(CacheRepo::delete(&conn, "a").unwrap());
        assert!(!CacheRepo::delete(&conn, "a").unwrap());
    }
}
