use std::path::Path;
use std::sync::Mutex;

use binbot_common::command::Command;
use binbot_common::detect::DetectionResult;
use binbot_common::zone::Zone;
use rusqlite::{params, Connection, Result as SqlResult};
use tracing::{debug, info};

/// SQLite log of every detection the host decodes.
///
/// WAL mode is enabled so the API server can read while the host writes.
pub struct DetectionLog {
    conn: Mutex<Connection>,
}

impl DetectionLog {
    /// Open (or create) the log file, creating its parent directory.
    pub fn open(path: &Path) -> SqlResult<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|_e| rusqlite::Error::InvalidPath(dir.into()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let log = Self::init(conn)?;
        info!(path = path.display().to_string(), "detection log opened");
        Ok(log)
    }

    pub fn open_in_memory() -> SqlResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqlResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS detections (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                received_at_ms  INTEGER NOT NULL,
                kind            TEXT    NOT NULL CHECK(kind IN ('object','none')),
                x               INTEGER,
                y               INTEGER,
                width           INTEGER,
                height          INTEGER,
                changed_pixels  INTEGER,
                zone            TEXT,
                command         TEXT    NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_detections_time
                ON detections(received_at_ms);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Record one decoded detection and the command it mapped to. Returns the
    /// new row id.
    pub fn insert(
        &self,
        received_at_ms: i64,
        result: &DetectionResult,
        zone: Option<Zone>,
        command: Command,
    ) -> SqlResult<i64> {
        let conn = self.conn.lock().unwrap();
        let zone = zone.map(Zone::as_str);
        match result {
            DetectionResult::NoObject => conn.execute(
                "INSERT INTO detections (received_at_ms, kind, zone, command)
                 VALUES (?1, 'none', ?2, ?3)",
                params![received_at_ms, zone, command.as_str()],
            )?,
            DetectionResult::Object(r) => conn.execute(
                "INSERT INTO detections
                    (received_at_ms, kind, x, y, width, height, changed_pixels, zone, command)
                 VALUES (?1, 'object', ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    received_at_ms,
                    r.x,
                    r.y,
                    r.width,
                    r.height,
                    r.changed_pixels,
                    zone,
                    command.as_str()
                ],
            )?,
        };
        let id = conn.last_insert_rowid();
        debug!(id, received_at_ms, command = command.as_str(), "logged detection");
        Ok(id)
    }

    pub fn count(&self) -> SqlResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))
    }
}
