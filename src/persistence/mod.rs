//! Register snapshot persistence: a 1 Hz poll over an explicit allow-list,
//! written through SQLite, restored into the Register Store before the
//! state machine runs.
//!
//! Grounded on `original_source/modbus_database_integration.py`'s allow-list
//! tables and `_monitor_registers` poll loop, and `original_source/modbus_database.py`'s
//! schema; the `Mutex<Connection>` / `init_schema` shape follows
//! `hdds-team-hdds`'s `crates/hdds-persistence/src/sqlite.rs`.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::{params, Connection};

use crate::registers::{map::holding, map::input, Bank, RegisterStore};

/// One allow-listed cell, with the human-readable label carried in the
/// schema (grounded on the original's per-register Russian-language
/// description column).
#[derive(Debug, Clone, Copy)]
pub struct RegisterSnapshotRow {
    pub bank: Bank,
    pub address: u16,
    pub value: u16,
    pub description: &'static str,
}

fn bank_name(bank: Bank) -> &'static str {
    match bank {
        Bank::Holding => "holding",
        Bank::Input => "input",
    }
}

/// Allow-listed holding cells. Excludes the command register (40001), the
/// status register lives in the input bank and is excluded there, and the
/// height-calibration step count (40052-53, meaningless across restarts).
const HOLDING_ALLOW_LIST: &[(u16, u16, &str)] = &[
    (holding::REF_WALL, 2, "reference wall thickness"),
    (holding::REF_BOTTOM, 2, "reference bottom thickness"),
    (holding::REF_BODY_DIAMETER, 2, "reference body diameter"),
    (holding::REF_HEIGHT, 2, "reference height"),
    (holding::D12, 2, "calibration distance 1-2"),
    (holding::D13, 2, "calibration distance 1-3"),
    (holding::D4S, 2, "calibration distance s4-surface"),
    (holding::D1C, 2, "calibration distance s1-axis"),
    (holding::REF_DIAMETER_FLANGE, 2, "reference flange diameter"),
    (holding::RESULT_FLANGE_AXIS_DIST, 2, "flange s3-to-axis distance"),
    (holding::REF_DIAMETER_BODY_SEPARATE, 2, "reference body-separate diameter"),
    (holding::REF_BODY2, 2, "reference body-2 diameter"),
    (holding::RESULT_BODY_SEPARATE, 2, "body-separate s3-to-axis distance"),
    (holding::RESULT_BODY2, 2, "body-2 s3-to-axis distance"),
    (holding::DISTANCE_TO_REF_PLANE, 2, "distance to reference plane"),
    (holding::THRESHOLD_BODY2_BASE, 6, "body-2 thresholds"),
    (holding::THRESHOLD_UPPER_WALL, 6, "upper-wall thresholds"),
    (holding::THRESHOLD_LOWER_WALL, 6, "lower-wall thresholds"),
    (holding::THRESHOLD_BOTTOM, 6, "bottom thresholds"),
    (holding::THRESHOLD_FLANGE_THICKNESS, 6, "flange-thickness thresholds"),
    (holding::THRESHOLD_HEIGHT, 6, "height thresholds"),
    (holding::THRESHOLD_BODY_DIAMETER, 6, "body-diameter thresholds"),
    (holding::THRESHOLD_FLANGE_DIAMETER, 6, "flange-diameter thresholds"),
    (holding::POSITIVE_BAD_BOTTOM, 2, "positive-bad error, bottom"),
    (holding::POSITIVE_BAD_LOWER_WALL, 2, "positive-bad error, lower wall"),
    (holding::OFFSET_UPPER_WALL, 24, "offset & extrapolation coefficients"),
];

/// Allow-listed input cells: shift counters and per-parameter tallies.
/// Excludes the status register (30009), live sensor mirror (30001-08),
/// and the sensor-connection-ok bit (30058), all meaningless across
/// restarts.
const INPUT_ALLOW_LIST: &[(u16, u16, &str)] = &[
    (input::SHIFT_COUNTERS, 4, "shift counters"),
    (input::COND_BAD_HEIGHT, 23, "per-parameter tallies"),
];

pub struct PersistenceStore {
    conn: Mutex<Connection>,
}

impl PersistenceStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open persistence database at {path}"))?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("persistence lock poisoned");
        conn.execute(
            "CREATE TABLE IF NOT EXISTS register_snapshot (
                bank TEXT NOT NULL,
                address INTEGER NOT NULL,
                value INTEGER NOT NULL,
                description TEXT NOT NULL,
                PRIMARY KEY (bank, address)
            )",
            [],
        )
        .context("failed to create register_snapshot table")?;
        Ok(())
    }

    fn save_row(&self, row: &RegisterSnapshotRow) -> Result<()> {
        let conn = self.conn.lock().expect("persistence lock poisoned");
        conn.execute(
            "INSERT INTO register_snapshot (bank, address, value, description)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(bank, address) DO UPDATE SET value = excluded.value",
            params![bank_name(row.bank), row.address, row.value, row.description],
        )
        .context("failed to upsert register snapshot row")?;
        Ok(())
    }

    /// Loads every persisted row. Used on startup to restore the Register
    /// Store before the state machine runs.
    pub fn load_all(&self) -> Result<Vec<(Bank, u16, u16)>> {
        let conn = self.conn.lock().expect("persistence lock poisoned");
        let mut stmt = conn.prepare("SELECT bank, address, value FROM register_snapshot")?;
        let rows = stmt
            .query_map([], |row| {
                let bank: String = row.get(0)?;
                let address: u16 = row.get(1)?;
                let value: u16 = row.get(2)?;
                Ok((bank, address, value))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read register_snapshot rows")?;

        Ok(rows
            .into_iter()
            .map(|(bank, address, value)| {
                let bank = if bank == "input" { Bank::Input } else { Bank::Holding };
                (bank, address, value)
            })
            .collect())
    }
}

/// Restores persisted values into `store`. Call once at startup, before
/// the sensor/control threads start.
pub fn restore(persistence: &PersistenceStore, store: &RegisterStore) -> Result<()> {
    let rows = persistence.load_all()?;
    info!("restoring {} persisted register cells", rows.len());
    for (bank, addr, value) in rows {
        store.set_word(bank, addr, value);
    }
    Ok(())
}

fn allow_listed_cells() -> impl Iterator<Item = (Bank, u16, &'static str)> {
    HOLDING_ALLOW_LIST
        .iter()
        .flat_map(|&(base, count, desc)| (0..count).map(move |i| (Bank::Holding, base + i, desc)))
        .chain(
            INPUT_ALLOW_LIST
                .iter()
                .flat_map(|&(base, count, desc)| (0..count).map(move |i| (Bank::Input, base + i, desc))),
        )
}

/// Runs the 1 Hz persistence poll until `running` is cleared. Only cells
/// whose value changed since the last poll are written.
pub async fn run(
    persistence: std::sync::Arc<PersistenceStore>,
    store: std::sync::Arc<RegisterStore>,
    running: std::sync::Arc<std::sync::atomic::AtomicBool>,
) {
    use std::sync::atomic::Ordering;

    let mut last_seen: std::collections::HashMap<(u8, u16), u16> = std::collections::HashMap::new();

    while running.load(Ordering::SeqCst) {
        for (bank, addr, description) in allow_listed_cells() {
            let value = store.get_word(bank, addr);
            let key = (if bank == Bank::Holding { 0 } else { 1 }, addr);
            if last_seen.get(&key) != Some(&value) {
                let row = RegisterSnapshotRow {
                    bank,
                    address: addr,
                    value,
                    description,
                };
                if let Err(e) = persistence.save_row(&row) {
                    log::warn!("failed to persist {bank:?}:{addr}: {e}");
                } else {
                    debug!("persisted {bank:?}:{addr} = {value}");
                    last_seen.insert(key, value);
                }
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_sqlite() {
        let persistence = PersistenceStore::open_in_memory().unwrap();
        let row = RegisterSnapshotRow {
            bank: Bank::Holding,
            address: holding::REF_WALL,
            value: 0x4040,
            description: "reference wall thickness",
        };
        persistence.save_row(&row).unwrap();

        let store = RegisterStore::new();
        restore(&persistence, &store).unwrap();
        assert_eq!(store.get_word(Bank::Holding, holding::REF_WALL), 0x4040);
    }

    #[test]
    fn upsert_overwrites_existing_row() {
        let persistence = PersistenceStore::open_in_memory().unwrap();
        let mut row = RegisterSnapshotRow {
            bank: Bank::Input,
            address: input::SHIFT_COUNTERS,
            value: 1,
            description: "shift counters",
        };
        persistence.save_row(&row).unwrap();
        row.value = 2;
        persistence.save_row(&row).unwrap();

        let rows = persistence.load_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].2, 2);
    }

    #[test]
    fn allow_list_excludes_command_and_status_registers() {
        for (bank, addr, _) in allow_listed_cells() {
            assert!(!(bank == Bank::Holding && addr == holding::COMMAND));
            assert!(!(bank == Bank::Input && addr == input::STATUS));
        }
    }
}
