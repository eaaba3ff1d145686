//! Durable, delay-scheduled, deduplicated work queue.
//!
//! One SQLite table keyed by the canonical work item string with a ready time
//! in epoch milliseconds. Scheduling is an upsert, so an identity is never
//! queued twice. Popping does not delete: the popped item is re-stamped one
//! retry delay into the future, which hides it from other pops while it is
//! being dispatched and makes it reappear if the process dies mid-dispatch.
//!
//! Runtime pragmas match the rest of the workspace:
//! - `journal_mode = WAL` so `list-queue` can read while the loop writes
//! - `busy_timeout = 5s` to absorb short lock contention from the collector

pub mod migrations;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::model::WorkItem;

/// Busy timeout used for queue connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a popped item stays hidden before it becomes ready again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(15 * 60);
/// Sleep between polls while waiting for a ready item.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

pub struct WorkQueue {
    conn: Connection,
    retry_delay: Duration,
    poll_interval: Duration,
}

impl WorkQueue {
    /// Open (or create) the queue database, apply pragmas and migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if opening, configuring, or migrating the database fails.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create queue directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("open queue database {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Open a throwaway queue, mostly for tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be migrated.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory queue")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        configure_connection(&conn).context("configure sqlite pragmas")?;
        migrations::migrate(&mut conn).context("apply queue migrations")?;
        Ok(Self {
            conn,
            retry_delay: DEFAULT_RETRY_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    #[must_use]
    pub fn with_timing(mut self, retry_delay: Duration, poll_interval: Duration) -> Self {
        self.retry_delay = retry_delay;
        self.poll_interval = poll_interval;
        self
    }

    /// Make each item ready `delay` from now, replacing any existing ready time.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn schedule_work_items<'a>(
        &self,
        items: impl IntoIterator<Item = &'a WorkItem>,
        delay: Duration,
    ) -> Result<()> {
        let delay = chrono::Duration::from_std(delay).context("schedule delay out of range")?;
        self.schedule_work_items_at(items, Utc::now() + delay)
    }

    /// Make each item ready at `ready_at`, replacing any existing ready time.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn schedule_work_items_at<'a>(
        &self,
        items: impl IntoIterator<Item = &'a WorkItem>,
        ready_at: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction().context("begin schedule")?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO work_queue (item, ready_at_ms) VALUES (?1, ?2)
                 ON CONFLICT(item) DO UPDATE SET ready_at_ms = excluded.ready_at_ms",
            )?;
            for item in items {
                stmt.execute(params![item.to_string(), ready_at.timestamp_millis()])
                    .with_context(|| format!("schedule {item}"))?;
                debug!(%item, %ready_at, "scheduled work item");
            }
        }
        tx.commit().context("commit schedule")?;
        Ok(())
    }

    /// Every queued identity, ready or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored item is corrupt.
    pub fn get_all_work_items(&self) -> Result<BTreeSet<WorkItem>> {
        Ok(self.list()?.into_iter().map(|(item, _)| item).collect())
    }

    /// Every queued item with its ready time, earliest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored item is corrupt.
    pub fn list(&self) -> Result<Vec<(WorkItem, DateTime<Utc>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT item, ready_at_ms FROM work_queue ORDER BY ready_at_ms, item")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (raw, ready_at_ms) = row?;
            let item: WorkItem = raw
                .parse()
                .with_context(|| format!("decode queued item '{raw}'"))?;
            items.push((item, from_millis(ready_at_ms)));
        }
        Ok(items)
    }

    /// Pop the earliest ready item, hiding it for one retry delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or the stored item is corrupt.
    pub fn pop_first_ready_work_item(&self) -> Result<Option<WorkItem>> {
        self.pop_first_ready_at(Utc::now())
    }

    /// [`Self::pop_first_ready_work_item`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or the stored item is corrupt.
    pub fn pop_first_ready_at(&self, now: DateTime<Utc>) -> Result<Option<WorkItem>> {
        let hidden_until = now
            + chrono::Duration::from_std(self.retry_delay).context("retry delay out of range")?;

        let popped: Option<String> = self
            .conn
            .query_row(
                "UPDATE work_queue SET ready_at_ms = ?2
                 WHERE item = (SELECT item FROM work_queue ORDER BY ready_at_ms, item LIMIT 1)
                   AND ready_at_ms <= ?1
                 RETURNING item",
                params![now.timestamp_millis(), hidden_until.timestamp_millis()],
                |row| row.get(0),
            )
            .optional()
            .context("pop first ready work item")?;

        popped
            .map(|raw| {
                raw.parse::<WorkItem>()
                    .with_context(|| format!("decode queued item '{raw}'"))
            })
            .transpose()
    }

    /// Block until an item is ready, then pop it.
    ///
    /// # Errors
    ///
    /// Returns an error if polling the database fails.
    pub fn wait_first_ready_work_item(&self) -> Result<WorkItem> {
        loop {
            if let Some(item) = self.pop_first_ready_work_item()? {
                return Ok(item);
            }
            debug!(poll_secs = self.poll_interval.as_secs(), "no ready work item");
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Delete the given items. Returns how many were present.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_work_items<'a>(
        &self,
        items: impl IntoIterator<Item = &'a WorkItem>,
    ) -> Result<usize> {
        let mut removed = 0;
        for item in items {
            removed += self
                .conn
                .execute("DELETE FROM work_queue WHERE item = ?1", [item.to_string()])
                .with_context(|| format!("remove {item}"))?;
        }
        Ok(removed)
    }

    /// Empty the queue. Returns how many items were dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_all_work_items(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM work_queue", [])
            .context("clear work queue")
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
