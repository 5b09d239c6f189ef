//! SQL schema for the ganztag SQLite store.
//!
//! Executed once at connection startup. Partial unique indexes back the
//! occupancy invariants so a bug in the state machine cannot persist a second
//! open visit or a second running group per `(room, device)`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS educational_groups (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    name                TEXT NOT NULL UNIQUE,
    daily_checkout_time TEXT              -- 'HH:MM:SS', local time
);

CREATE TABLE IF NOT EXISTS persons (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name     TEXT NOT NULL,
    last_name      TEXT NOT NULL,
    tag_id         TEXT UNIQUE,           -- normalised RFID UID
    kind           TEXT NOT NULL CHECK (kind IN ('student', 'staff')),
    group_id       INTEGER REFERENCES educational_groups(id),
    school_class   TEXT,
    guardian_email TEXT,
    staff_role     TEXT,
    pin_hash       TEXT
);

CREATE TABLE IF NOT EXISTS educational_group_staff (
    group_id INTEGER NOT NULL REFERENCES educational_groups(id),
    staff_id INTEGER NOT NULL REFERENCES persons(id),
    PRIMARY KEY (group_id, staff_id)
);

CREATE TABLE IF NOT EXISTS rooms (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    name     TEXT NOT NULL UNIQUE,
    building TEXT,
    floor    INTEGER,
    capacity INTEGER,
    category TEXT
);

CREATE TABLE IF NOT EXISTS activities (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    name             TEXT NOT NULL UNIQUE,
    category         TEXT,
    supervisor_id    INTEGER REFERENCES persons(id),
    is_open          INTEGER NOT NULL DEFAULT 1,
    max_participants INTEGER
);

CREATE TABLE IF NOT EXISTS devices (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id    TEXT NOT NULL UNIQUE,
    name         TEXT,
    api_key_hash TEXT NOT NULL UNIQUE,    -- hex SHA-256 of the API key
    status       TEXT NOT NULL DEFAULT 'active',
    last_seen    TEXT
);

CREATE TABLE IF NOT EXISTS active_groups (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    activity_id   INTEGER NOT NULL REFERENCES activities(id),
    room_id       INTEGER NOT NULL REFERENCES rooms(id),
    device_id     INTEGER REFERENCES devices(id),
    start_time    TEXT NOT NULL,
    end_time      TEXT,
    last_activity TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS active_groups_running_idx
    ON active_groups(room_id, IFNULL(device_id, 0)) WHERE end_time IS NULL;

CREATE TABLE IF NOT EXISTS visits (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id      INTEGER NOT NULL REFERENCES persons(id),
    active_group_id INTEGER NOT NULL REFERENCES active_groups(id),
    entry_time      TEXT NOT NULL,
    exit_time       TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS visits_open_idx
    ON visits(student_id) WHERE exit_time IS NULL;
CREATE INDEX IF NOT EXISTS visits_group_idx ON visits(active_group_id);

CREATE TABLE IF NOT EXISTS supervisions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    staff_id        INTEGER NOT NULL REFERENCES persons(id),
    active_group_id INTEGER NOT NULL REFERENCES active_groups(id),
    start_time      TEXT NOT NULL,
    end_time        TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS supervisions_open_idx
    ON supervisions(staff_id, active_group_id) WHERE end_time IS NULL;

CREATE TABLE IF NOT EXISTS scheduled_checkouts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id    INTEGER NOT NULL REFERENCES persons(id),
    scheduled_by  INTEGER NOT NULL,
    scheduled_for TEXT NOT NULL,
    reason        TEXT,
    status        TEXT NOT NULL DEFAULT 'pending',
    cancelled_by  INTEGER,
    cancelled_at  TEXT,
    executed_at   TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS scheduled_checkouts_pending_idx
    ON scheduled_checkouts(student_id) WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS attendance (
    student_id     INTEGER NOT NULL REFERENCES persons(id),
    date           TEXT NOT NULL,         -- 'YYYY-MM-DD', local date
    check_in_time  TEXT NOT NULL,
    check_out_time TEXT,
    PRIMARY KEY (student_id, date)
);

CREATE TABLE IF NOT EXISTS settings (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    encrypted  INTEGER NOT NULL DEFAULT 0
);

PRAGMA user_version = 1;
";
