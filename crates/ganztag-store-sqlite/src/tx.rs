//! [`SqliteTx`]: the [`ActiveTx`] implementation over one open SQLite
//! transaction.

use std::{collections::HashMap, time::Instant};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use ganztag_core::{
  Error as CoreError, Id,
  facility::{Activity, Device, DeviceStatus, EducationalGroup, NewActivity, NewRoom, Room},
  person::{NewPerson, Person, PersonKind, normalize_tag},
  session::{
    ActiveGroup, Attendance, AttendanceStatus, NewActiveGroup, NewScheduledCheckout, NewVisit,
    ScheduledCheckout, ScheduledCheckoutStatus, Supervision, Visit,
  },
  store::{ActiveTx, StoredSetting},
};
use rusqlite::{Connection, OptionalExtension as _, Params, Row, params, params_from_iter, types::Value};

use crate::encode::{
  ACTIVE_GROUP_COLUMNS, ACTIVITY_COLUMNS, ATTENDANCE_COLUMNS, CHECKOUT_COLUMNS, PERSON_COLUMNS,
  ROOM_COLUMNS, RawActiveGroup, RawAttendance, RawCheckout, RawDevice, RawEducationalGroup,
  RawPerson, RawSupervision, RawVisit, SUPERVISION_COLUMNS, VISIT_COLUMNS, activity_from_row,
  db_err, encode_checkout_status, encode_date, encode_dt, encode_time, placeholders,
  room_from_row,
};

type Result<T> = std::result::Result<T, CoreError>;

/// Fail with `DeadlineExceeded` once `deadline` has passed.
pub fn check_deadline(deadline: Option<Instant>) -> Result<()> {
  match deadline {
    Some(d) if Instant::now() >= d => Err(CoreError::DeadlineExceeded),
    _ => Ok(()),
  }
}

/// A borrowed view of a connection with an open transaction.
pub struct SqliteTx<'c> {
  conn:     &'c Connection,
  deadline: Option<Instant>,
}

impl<'c> SqliteTx<'c> {
  pub fn new(conn: &'c Connection, deadline: Option<Instant>) -> Self {
    Self { conn, deadline }
  }

  fn query_opt<T, P: Params>(
    &self,
    sql: &str,
    params: P,
    map: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
  ) -> Result<Option<T>> {
    check_deadline(self.deadline)?;
    self.conn.query_row(sql, params, map).optional().map_err(db_err)
  }

  fn query_all<T, P: Params>(
    &self,
    sql: &str,
    params: P,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
  ) -> Result<Vec<T>> {
    check_deadline(self.deadline)?;
    let mut stmt = self.conn.prepare_cached(sql).map_err(db_err)?;
    let rows = stmt
      .query_map(params, map)
      .map_err(db_err)?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(db_err)?;
    Ok(rows)
  }

  fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
    check_deadline(self.deadline)?;
    self.conn.execute(sql, params).map_err(db_err)
  }

  fn insert<P: Params>(&self, sql: &str, params: P) -> Result<Id> {
    self.execute(sql, params)?;
    Ok(self.conn.last_insert_rowid())
  }

  fn count<P: Params>(&self, sql: &str, params: P) -> Result<u32> {
    Ok(self.query_opt(sql, params, |r| r.get::<_, u32>(0))?.unwrap_or(0))
  }

  /// Run `SELECT <columns> FROM <table> WHERE <column> IN (...)<extra>`.
  fn query_in<T>(
    &self,
    select: &str,
    column: &str,
    ids: &[Id],
    leading: Vec<Value>,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
  ) -> Result<Vec<T>> {
    let sql = format!("{select} AND {column} IN ({})", placeholders(ids.len()));
    let values: Vec<Value> = leading
      .into_iter()
      .chain(ids.iter().map(|id| Value::Integer(*id)))
      .collect();
    check_deadline(self.deadline)?;
    let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
      .query_map(params_from_iter(values.iter()), map)
      .map_err(db_err)?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(db_err)?;
    Ok(rows)
  }
}

impl ActiveTx for SqliteTx<'_> {
  // ── People ────────────────────────────────────────────────────────────────

  fn find_person_by_tag(&self, tag_id: &str) -> Result<Option<Person>> {
    let sql = format!("SELECT {PERSON_COLUMNS} FROM persons WHERE tag_id = ?1");
    self
      .query_opt(&sql, params![tag_id], RawPerson::from_row)?
      .map(RawPerson::into_person)
      .transpose()
  }

  fn get_person(&self, id: Id) -> Result<Option<Person>> {
    let sql = format!("SELECT {PERSON_COLUMNS} FROM persons WHERE id = ?1");
    self
      .query_opt(&sql, params![id], RawPerson::from_row)?
      .map(RawPerson::into_person)
      .transpose()
  }

  fn create_person(&mut self, person: NewPerson) -> Result<Person> {
    let tag_id = person.tag_id.as_deref().map(normalize_tag);
    let id = match &person.kind {
      PersonKind::Student(s) => self.insert(
        "INSERT INTO persons (first_name, last_name, tag_id, kind, group_id, school_class, guardian_email)
         VALUES (?1, ?2, ?3, 'student', ?4, ?5, ?6)",
        params![person.first_name, person.last_name, tag_id, s.group_id, s.school_class, s.guardian_email],
      )?,
      PersonKind::Staff(s) => self.insert(
        "INSERT INTO persons (first_name, last_name, tag_id, kind, staff_role, pin_hash)
         VALUES (?1, ?2, ?3, 'staff', ?4, ?5)",
        params![person.first_name, person.last_name, tag_id, s.role, s.pin_hash],
      )?,
    };
    Ok(Person {
      id,
      first_name: person.first_name,
      last_name: person.last_name,
      tag_id,
      kind: person.kind,
    })
  }

  fn set_staff_pin_hash(&mut self, staff_id: Id, pin_hash: &str) -> Result<()> {
    let changed = self.execute(
      "UPDATE persons SET pin_hash = ?2 WHERE id = ?1 AND kind = 'staff'",
      params![staff_id, pin_hash],
    )?;
    if changed == 0 {
      return Err(CoreError::NotStaff(staff_id));
    }
    Ok(())
  }

  // ── Rooms, activities, educational groups ─────────────────────────────────

  fn get_room(&self, id: Id) -> Result<Option<Room>> {
    let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1");
    self.query_opt(&sql, params![id], room_from_row)
  }

  fn create_room(&mut self, room: NewRoom) -> Result<Room> {
    let id = self.insert(
      "INSERT INTO rooms (name, building, floor, capacity, category) VALUES (?1, ?2, ?3, ?4, ?5)",
      params![room.name, room.building, room.floor, room.capacity, room.category],
    )?;
    Ok(Room {
      id,
      name: room.name,
      building: room.building,
      floor: room.floor,
      capacity: room.capacity,
      category: room.category,
    })
  }

  fn get_activity(&self, id: Id) -> Result<Option<Activity>> {
    let sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ?1");
    self.query_opt(&sql, params![id], activity_from_row)
  }

  fn find_activity_by_name(&self, name: &str) -> Result<Option<Activity>> {
    let sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE name = ?1");
    self.query_opt(&sql, params![name], activity_from_row)
  }

  fn create_activity(&mut self, activity: NewActivity) -> Result<Activity> {
    let id = self.insert(
      "INSERT INTO activities (name, category, supervisor_id, is_open, max_participants)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      params![
        activity.name,
        activity.category,
        activity.supervisor_id,
        activity.is_open,
        activity.max_participants,
      ],
    )?;
    Ok(Activity {
      id,
      name: activity.name,
      category: activity.category,
      supervisor_id: activity.supervisor_id,
      is_open: activity.is_open,
      max_participants: activity.max_participants,
    })
  }

  fn get_educational_group(&self, id: Id) -> Result<Option<EducationalGroup>> {
    self
      .query_opt(
        "SELECT id, name, daily_checkout_time FROM educational_groups WHERE id = ?1",
        params![id],
        RawEducationalGroup::from_row,
      )?
      .map(RawEducationalGroup::into_group)
      .transpose()
  }

  fn create_educational_group(
    &mut self,
    name: &str,
    daily_checkout_time: Option<NaiveTime>,
  ) -> Result<EducationalGroup> {
    let id = self.insert(
      "INSERT INTO educational_groups (name, daily_checkout_time) VALUES (?1, ?2)",
      params![name, daily_checkout_time.map(encode_time)],
    )?;
    Ok(EducationalGroup { id, name: name.to_owned(), daily_checkout_time })
  }

  fn assign_staff_to_educational_group(&mut self, staff_id: Id, group_id: Id) -> Result<()> {
    self.execute(
      "INSERT OR IGNORE INTO educational_group_staff (group_id, staff_id) VALUES (?1, ?2)",
      params![group_id, staff_id],
    )?;
    Ok(())
  }

  fn find_staff_educational_group_ids(&self, staff_id: Id) -> Result<Vec<Id>> {
    self.query_all(
      "SELECT group_id FROM educational_group_staff WHERE staff_id = ?1 ORDER BY group_id",
      params![staff_id],
      |r| r.get(0),
    )
  }

  // ── Devices ───────────────────────────────────────────────────────────────

  fn find_device_by_key_hash(&self, api_key_hash: &str) -> Result<Option<Device>> {
    self
      .query_opt(
        "SELECT id, device_id, name, status FROM devices WHERE api_key_hash = ?1",
        params![api_key_hash],
        RawDevice::from_row,
      )?
      .map(RawDevice::into_device)
      .transpose()
  }

  fn create_device(&mut self, device_id: &str, name: Option<&str>, api_key_hash: &str) -> Result<Device> {
    let id = self.insert(
      "INSERT INTO devices (device_id, name, api_key_hash) VALUES (?1, ?2, ?3)",
      params![device_id, name, api_key_hash],
    )?;
    Ok(Device {
      id,
      device_id: device_id.to_owned(),
      name: name.map(str::to_owned),
      status: DeviceStatus::Active,
    })
  }

  fn touch_device(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
    self.execute("UPDATE devices SET last_seen = ?2 WHERE id = ?1", params![id, encode_dt(at)])?;
    Ok(())
  }

  fn set_device_status(&mut self, id: Id, status: DeviceStatus) -> Result<()> {
    self.execute("UPDATE devices SET status = ?2 WHERE id = ?1", params![id, status.as_str()])?;
    Ok(())
  }

  // ── Active groups ─────────────────────────────────────────────────────────

  fn get_active_group(&self, id: Id) -> Result<Option<ActiveGroup>> {
    let sql = format!("SELECT {ACTIVE_GROUP_COLUMNS} FROM active_groups WHERE id = ?1");
    self
      .query_opt(&sql, params![id], RawActiveGroup::from_row)?
      .map(RawActiveGroup::into_group)
      .transpose()
  }

  fn find_active_groups_by_room(&self, room_id: Id) -> Result<Vec<ActiveGroup>> {
    let sql = format!(
      "SELECT {ACTIVE_GROUP_COLUMNS} FROM active_groups
       WHERE room_id = ?1 AND end_time IS NULL ORDER BY id"
    );
    self
      .query_all(&sql, params![room_id], RawActiveGroup::from_row)?
      .into_iter()
      .map(RawActiveGroup::into_group)
      .collect()
  }

  fn find_device_active_group(&self, device_id: Id) -> Result<Option<ActiveGroup>> {
    let sql = format!(
      "SELECT {ACTIVE_GROUP_COLUMNS} FROM active_groups
       WHERE device_id = ?1 AND end_time IS NULL ORDER BY id LIMIT 1"
    );
    self
      .query_opt(&sql, params![device_id], RawActiveGroup::from_row)?
      .map(RawActiveGroup::into_group)
      .transpose()
  }

  fn create_active_group(&mut self, group: NewActiveGroup) -> Result<Id> {
    let start = encode_dt(group.start_time);
    self.insert(
      "INSERT INTO active_groups (activity_id, room_id, device_id, start_time, last_activity)
       VALUES (?1, ?2, ?3, ?4, ?4)",
      params![group.activity_id, group.room_id, group.device_id, start],
    )
  }

  fn end_active_group(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
    let at = encode_dt(at);
    let changed = self.execute(
      "UPDATE active_groups SET end_time = ?2 WHERE id = ?1 AND end_time IS NULL",
      params![id, at],
    )?;
    if changed == 0 {
      return Err(match self.get_active_group(id)? {
        Some(_) => CoreError::ActiveGroupAlreadyEnded(id),
        None => CoreError::ActiveGroupNotFound(id),
      });
    }
    self.execute(
      "UPDATE visits SET exit_time = ?2 WHERE active_group_id = ?1 AND exit_time IS NULL",
      params![id, at],
    )?;
    self.execute(
      "UPDATE supervisions SET end_time = ?2 WHERE active_group_id = ?1 AND end_time IS NULL",
      params![id, at],
    )?;
    Ok(())
  }

  fn update_session_activity(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
    self.execute(
      "UPDATE active_groups SET last_activity = ?2 WHERE id = ?1 AND end_time IS NULL",
      params![id, encode_dt(at)],
    )?;
    Ok(())
  }

  fn count_open_visits_in_room(&self, room_id: Id) -> Result<u32> {
    self.count(
      "SELECT COUNT(*) FROM visits v JOIN active_groups g ON g.id = v.active_group_id
       WHERE g.room_id = ?1 AND g.end_time IS NULL AND v.exit_time IS NULL",
      params![room_id],
    )
  }

  fn count_open_visits_in_group(&self, active_group_id: Id) -> Result<u32> {
    self.count(
      "SELECT COUNT(*) FROM visits WHERE active_group_id = ?1 AND exit_time IS NULL",
      params![active_group_id],
    )
  }

  // ── Visits ────────────────────────────────────────────────────────────────

  fn get_student_current_visit(&self, student_id: Id) -> Result<Option<Visit>> {
    let sql = format!(
      "SELECT {VISIT_COLUMNS} FROM visits WHERE student_id = ?1
       ORDER BY (exit_time IS NULL) DESC, entry_time DESC, id DESC LIMIT 1"
    );
    self
      .query_opt(&sql, params![student_id], RawVisit::from_row)?
      .map(RawVisit::into_visit)
      .transpose()
  }

  fn create_visit(&mut self, visit: NewVisit) -> Result<Id> {
    self.insert(
      "INSERT INTO visits (student_id, active_group_id, entry_time) VALUES (?1, ?2, ?3)",
      params![visit.student_id, visit.active_group_id, encode_dt(visit.entry_time)],
    )
  }

  fn end_visit(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
    let changed = self.execute(
      "UPDATE visits SET exit_time = ?2 WHERE id = ?1 AND exit_time IS NULL",
      params![id, encode_dt(at)],
    )?;
    if changed == 0 {
      return Err(CoreError::VisitAlreadyEnded(id));
    }
    Ok(())
  }

  // ── Supervisions ──────────────────────────────────────────────────────────

  fn find_staff_active_supervisions(&self, staff_id: Id) -> Result<Vec<Supervision>> {
    let sql = format!(
      "SELECT {SUPERVISION_COLUMNS} FROM supervisions
       WHERE staff_id = ?1 AND end_time IS NULL ORDER BY active_group_id"
    );
    self
      .query_all(&sql, params![staff_id], RawSupervision::from_row)?
      .into_iter()
      .map(RawSupervision::into_supervision)
      .collect()
  }

  fn create_supervision(&mut self, staff_id: Id, active_group_id: Id, at: DateTime<Utc>) -> Result<Supervision> {
    let id = self.insert(
      "INSERT INTO supervisions (staff_id, active_group_id, start_time) VALUES (?1, ?2, ?3)",
      params![staff_id, active_group_id, encode_dt(at)],
    )?;
    Ok(Supervision { id, staff_id, active_group_id, start_time: at, end_time: None })
  }

  fn end_supervision(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
    self.execute(
      "UPDATE supervisions SET end_time = ?2 WHERE id = ?1 AND end_time IS NULL",
      params![id, encode_dt(at)],
    )?;
    Ok(())
  }

  // ── Scheduled checkouts ───────────────────────────────────────────────────

  fn get_scheduled_checkout(&self, id: Id) -> Result<Option<ScheduledCheckout>> {
    let sql = format!("SELECT {CHECKOUT_COLUMNS} FROM scheduled_checkouts WHERE id = ?1");
    self
      .query_opt(&sql, params![id], RawCheckout::from_row)?
      .map(RawCheckout::into_checkout)
      .transpose()
  }

  fn get_pending_scheduled_checkout(&self, student_id: Id) -> Result<Option<ScheduledCheckout>> {
    let sql = format!(
      "SELECT {CHECKOUT_COLUMNS} FROM scheduled_checkouts
       WHERE student_id = ?1 AND status = 'pending'"
    );
    self
      .query_opt(&sql, params![student_id], RawCheckout::from_row)?
      .map(RawCheckout::into_checkout)
      .transpose()
  }

  fn create_scheduled_checkout(&mut self, checkout: NewScheduledCheckout) -> Result<ScheduledCheckout> {
    let id = self.insert(
      "INSERT INTO scheduled_checkouts (student_id, scheduled_by, scheduled_for, reason, status)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      params![
        checkout.student_id,
        checkout.scheduled_by,
        encode_dt(checkout.scheduled_for),
        checkout.reason,
        encode_checkout_status(ScheduledCheckoutStatus::Pending),
      ],
    )?;
    Ok(ScheduledCheckout {
      id,
      student_id: checkout.student_id,
      scheduled_by: checkout.scheduled_by,
      scheduled_for: checkout.scheduled_for,
      reason: checkout.reason,
      status: ScheduledCheckoutStatus::Pending,
      cancelled_by: None,
      cancelled_at: None,
      executed_at: None,
    })
  }

  fn cancel_scheduled_checkout(&mut self, id: Id, actor_id: Option<Id>, at: DateTime<Utc>) -> Result<()> {
    let changed = self.execute(
      "UPDATE scheduled_checkouts SET status = 'cancelled', cancelled_by = ?2, cancelled_at = ?3
       WHERE id = ?1 AND status = 'pending'",
      params![id, actor_id, encode_dt(at)],
    )?;
    if changed == 0 {
      return Err(CoreError::ScheduledCheckoutNotPending(id));
    }
    Ok(())
  }

  fn find_due_scheduled_checkouts(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledCheckout>> {
    let sql = format!(
      "SELECT {CHECKOUT_COLUMNS} FROM scheduled_checkouts
       WHERE status = 'pending' AND scheduled_for <= ?1 ORDER BY scheduled_for, id"
    );
    self
      .query_all(&sql, params![encode_dt(now)], RawCheckout::from_row)?
      .into_iter()
      .map(RawCheckout::into_checkout)
      .collect()
  }

  fn mark_scheduled_checkout_executed(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
    let changed = self.execute(
      "UPDATE scheduled_checkouts SET status = 'executed', executed_at = ?2
       WHERE id = ?1 AND status = 'pending'",
      params![id, encode_dt(at)],
    )?;
    if changed == 0 {
      return Err(CoreError::ScheduledCheckoutNotPending(id));
    }
    Ok(())
  }

  // ── Attendance ────────────────────────────────────────────────────────────

  fn get_attendance(&self, student_id: Id, date: NaiveDate) -> Result<Option<Attendance>> {
    let sql = format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE student_id = ?1 AND date = ?2");
    self
      .query_opt(&sql, params![student_id, encode_date(date)], RawAttendance::from_row)?
      .map(RawAttendance::into_attendance)
      .transpose()
  }

  fn record_attendance_check_in(&mut self, student_id: Id, date: NaiveDate, at: DateTime<Utc>) -> Result<()> {
    // A student returning on the same day is present again; the first
    // arrival time is kept.
    self.execute(
      "INSERT INTO attendance (student_id, date, check_in_time) VALUES (?1, ?2, ?3)
       ON CONFLICT (student_id, date) DO UPDATE SET check_out_time = NULL",
      params![student_id, encode_date(date), encode_dt(at)],
    )?;
    Ok(())
  }

  fn record_attendance_check_out(&mut self, student_id: Id, date: NaiveDate, at: DateTime<Utc>) -> Result<()> {
    self.execute(
      "UPDATE attendance SET check_out_time = ?3 WHERE student_id = ?1 AND date = ?2",
      params![student_id, encode_date(date), encode_dt(at)],
    )?;
    Ok(())
  }

  // ── Bulk snapshots ────────────────────────────────────────────────────────

  fn get_students_attendance_statuses(
    &self,
    student_ids: &[Id],
    date: NaiveDate,
  ) -> Result<HashMap<Id, AttendanceStatus>> {
    if student_ids.is_empty() {
      return Ok(HashMap::new());
    }
    let select = format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE date = ?");
    let rows = self.query_in(
      &select,
      "student_id",
      student_ids,
      vec![Value::Text(encode_date(date))],
      RawAttendance::from_row,
    )?;

    let mut statuses: HashMap<Id, AttendanceStatus> =
      student_ids.iter().map(|id| (*id, AttendanceStatus::NotArrived)).collect();
    for raw in rows {
      let attendance = raw.into_attendance()?;
      statuses.insert(attendance.student_id, AttendanceStatus::from(Some(&attendance)));
    }
    Ok(statuses)
  }

  fn get_students_current_visits(&self, student_ids: &[Id]) -> Result<HashMap<Id, Visit>> {
    if student_ids.is_empty() {
      return Ok(HashMap::new());
    }
    let select = format!("SELECT {VISIT_COLUMNS} FROM visits WHERE exit_time IS NULL");
    self
      .query_in(&select, "student_id", student_ids, Vec::new(), RawVisit::from_row)?
      .into_iter()
      .map(|raw| raw.into_visit().map(|v| (v.student_id, v)))
      .collect()
  }

  fn get_active_groups_by_ids(&self, ids: &[Id]) -> Result<HashMap<Id, ActiveGroup>> {
    if ids.is_empty() {
      return Ok(HashMap::new());
    }
    let select = format!("SELECT {ACTIVE_GROUP_COLUMNS} FROM active_groups WHERE 1 = 1");
    self
      .query_in(&select, "id", ids, Vec::new(), RawActiveGroup::from_row)?
      .into_iter()
      .map(|raw| raw.into_group().map(|g| (g.id, g)))
      .collect()
  }

  fn get_rooms_by_ids(&self, ids: &[Id]) -> Result<HashMap<Id, Room>> {
    if ids.is_empty() {
      return Ok(HashMap::new());
    }
    let select = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE 1 = 1");
    Ok(
      self
        .query_in(&select, "id", ids, Vec::new(), room_from_row)?
        .into_iter()
        .map(|r| (r.id, r))
        .collect(),
    )
  }

  // ── Settings ──────────────────────────────────────────────────────────────

  fn get_setting(&self, key: &str) -> Result<Option<StoredSetting>> {
    self.query_opt(
      "SELECT key, value, encrypted FROM settings WHERE key = ?1",
      params![key],
      |r| {
        Ok(StoredSetting { key: r.get(0)?, value: r.get(1)?, encrypted: r.get(2)? })
      },
    )
  }

  fn put_setting(&mut self, setting: StoredSetting) -> Result<()> {
    self.execute(
      "INSERT INTO settings (key, value, encrypted) VALUES (?1, ?2, ?3)
       ON CONFLICT (key) DO UPDATE SET value = excluded.value, encrypted = excluded.encrypted",
      params![setting.key, setting.value, setting.encrypted],
    )?;
    Ok(())
  }
}
