//! Integration tests for `SqliteStore` against an in-memory database.

use std::time::{Duration, Instant};

use chrono::{NaiveTime, Utc};
use ganztag_core::{
  Error as CoreError, Id,
  checkin::{CheckinPolicy, ResponseAction, ScanInput, ScanOutcome, ScanResult, StudentScan, process_scan},
  device_session::{end_session, start_session},
  error::CapacityScope,
  event::{EventKind, Topic},
  facility::{DeviceStatus, NewActivity, NewRoom},
  location::resolve_student_locations,
  person::NewPerson,
  scheduled::{cancel_checkout, execute_checkout, schedule_checkout},
  session::{AttendanceStatus, NewActiveGroup, NewScheduledCheckout, ScheduledCheckoutStatus},
  store::{ActiveStore, StoredSetting},
  subscription::resolve_subscriptions,
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

/// A small site: one student, one device, two rooms each with a running
/// group bound to the device that created it.
struct Site {
  student: Id,
  device:  Id,
  room_a:  Id,
  room_b:  Id,
  group_a: Id,
  group_b: Id,
}

async fn site(s: &SqliteStore) -> Site {
  s.transact(None, |tx| {
    let student = tx.create_person(NewPerson::student("Mia", "Klein", Some("TAG_A"), None))?;
    let device = tx.create_device("reader-1", Some("Eingang"), "hash-1")?;
    let other = tx.create_device("reader-2", None, "hash-2")?;
    let room_a = tx.create_room(NewRoom::named("Room 7"))?;
    let room_b = tx.create_room(NewRoom::named("Room 9"))?;
    let activity = tx.create_activity(NewActivity::open("Basteln"))?;
    let now = Utc::now();
    let group_a = tx.create_active_group(NewActiveGroup {
      activity_id: activity.id,
      room_id:     room_a.id,
      device_id:   Some(device.id),
      start_time:  now,
    })?;
    let group_b = tx.create_active_group(NewActiveGroup {
      activity_id: activity.id,
      room_id:     room_b.id,
      device_id:   Some(other.id),
      start_time:  now,
    })?;
    Ok(Site {
      student: student.id,
      device: device.id,
      room_a: room_a.id,
      room_b: room_b.id,
      group_a,
      group_b,
    })
  })
  .await
  .expect("seed site")
}

async fn scan(s: &SqliteStore, tag: &str, room_id: Option<Id>, device_id: Id) -> Result<ScanOutcome, Error> {
  let input = ScanInput { tag_id: tag.to_owned(), room_id, device_id };
  s.transact(Some(Instant::now() + Duration::from_secs(15)), move |tx| {
    process_scan(tx, &input, &CheckinPolicy::default(), Utc::now())
  })
  .await
}

fn student(outcome: &ScanOutcome) -> &StudentScan {
  match &outcome.result {
    ScanResult::Student(s) => s,
    ScanResult::Staff(_) => panic!("expected a student scan"),
  }
}

async fn open_visits(s: &SqliteStore, student_id: Id) -> usize {
  s.read(move |tx| Ok(tx.get_students_current_visits(&[student_id])?.len()))
    .await
    .unwrap()
}

// ─── Check-in state machine ──────────────────────────────────────────────────

#[tokio::test]
async fn scan_checks_in() {
  let s = store().await;
  let site = site(&s).await;

  let outcome = scan(&s, "TAG_A", Some(site.room_a), site.device).await.unwrap();
  let scan = student(&outcome);
  assert_eq!(scan.action, ResponseAction::CheckedIn);
  assert_eq!(scan.student_name, "Mia Klein");
  assert_eq!(scan.room_name, "Room 7");
  assert_eq!(scan.message, "Hallo Mia!");

  assert_eq!(outcome.events.len(), 1);
  assert_eq!(outcome.events[0].kind(), EventKind::StudentCheckin);
  assert_eq!(outcome.events[0].topic_key(), &Topic::group(site.group_a));

  let visit_id = scan.visit_id;
  let visit = s
    .read(move |tx| tx.get_student_current_visit(site.student))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(visit.id, visit_id);
  assert!(visit.is_open());
}

#[tokio::test]
async fn rescan_in_same_room_checks_out() {
  let s = store().await;
  let site = site(&s).await;

  let first = scan(&s, "TAG_A", Some(site.room_a), site.device).await.unwrap();
  let second = scan(&s, "TAG_A", Some(site.room_a), site.device).await.unwrap();
  let scan = student(&second);

  assert_eq!(scan.action, ResponseAction::CheckedOut);
  assert_eq!(scan.visit_id, student(&first).visit_id);
  assert_eq!(scan.message, "Tschüss Mia!");
  assert_eq!(second.events[0].kind(), EventKind::StudentCheckout);
  assert_eq!(open_visits(&s, site.student).await, 0);

  let visit = s
    .read(move |tx| tx.get_student_current_visit(site.student))
    .await
    .unwrap()
    .unwrap();
  assert!(visit.exit_time.is_some());
}

#[tokio::test]
async fn scan_without_room_checks_out() {
  let s = store().await;
  let site = site(&s).await;

  scan(&s, "TAG_A", Some(site.room_a), site.device).await.unwrap();
  let out = scan(&s, "TAG_A", None, site.device).await.unwrap();
  assert_eq!(student(&out).action, ResponseAction::CheckedOut);
  assert_eq!(open_visits(&s, site.student).await, 0);
}

#[tokio::test]
async fn scan_in_other_room_transfers() {
  let s = store().await;
  let site = site(&s).await;

  let first = scan(&s, "TAG_A", Some(site.room_a), site.device).await.unwrap();
  let second = scan(&s, "TAG_A", Some(site.room_b), site.device).await.unwrap();
  let scan = student(&second);

  assert_eq!(scan.action, ResponseAction::Transferred);
  assert_eq!(scan.previous_room.as_deref(), Some("Room 7"));
  assert_eq!(scan.room_name, "Room 9");
  assert_eq!(scan.message, "Gewechselt von Room 7 zu Room 9!");
  assert_ne!(scan.visit_id, student(&first).visit_id);

  assert_eq!(second.events.len(), 1);
  assert_eq!(second.events[0].kind(), EventKind::StudentTransfer);
  assert_eq!(second.events[0].topic_key(), &Topic::group(site.group_b));

  let first_visit = student(&first).visit_id;
  let (visits, current) = s
    .read(move |tx| {
      Ok((tx.get_students_current_visits(&[site.student])?, tx.get_student_current_visit(site.student)?))
    })
    .await
    .unwrap();
  assert_eq!(visits.len(), 1);
  assert_eq!(visits[&site.student].active_group_id, site.group_b);
  assert_ne!(current.unwrap().id, first_visit);
}

#[tokio::test]
async fn unknown_tag_is_not_found() {
  let s = store().await;
  let site = site(&s).await;

  let err = scan(&s, "UNKNOWN", None, site.device).await.unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::TagNotFound)));
  assert_eq!(err.to_string(), "RFID tag not found");
}

#[tokio::test]
async fn tags_are_normalised() {
  let s = store().await;
  let site = site(&s).await;
  s.transact(None, |tx| {
    tx.create_person(NewPerson::student("Ben", "Ott", Some("04:a3:2f"), None))?;
    Ok(())
  })
  .await
  .unwrap();

  let out = scan(&s, "04A32F", Some(site.room_a), site.device).await.unwrap();
  assert_eq!(student(&out).student_name, "Ben Ott");
}

#[tokio::test]
async fn first_scan_without_room_fails() {
  let s = store().await;
  let site = site(&s).await;

  let err = scan(&s, "TAG_A", None, site.device).await.unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::NoRoomContext)));
}

#[tokio::test]
async fn room_without_group_fails() {
  let s = store().await;
  let site = site(&s).await;
  let empty = s
    .transact(None, |tx| Ok(tx.create_room(NewRoom::named("Turnhalle"))?.id))
    .await
    .unwrap();

  let err = scan(&s, "TAG_A", Some(empty), site.device).await.unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::NoActiveGroupInRoom(name)) if name == "Turnhalle"));
  assert_eq!(open_visits(&s, site.student).await, 0);
}

#[tokio::test]
async fn at_most_one_open_visit_across_many_scans() {
  let s = store().await;
  let site = site(&s).await;

  let rooms = [Some(site.room_a), Some(site.room_b), Some(site.room_b), None, Some(site.room_a), Some(site.room_b)];
  for room in rooms {
    let _ = scan(&s, "TAG_A", room, site.device).await;
    assert!(open_visits(&s, site.student).await <= 1);
  }
}

#[tokio::test]
async fn transfer_into_full_room_leaves_state_untouched() {
  let s = store().await;
  let site = site(&s).await;

  let full = s
    .transact(None, |tx| {
      let room = tx.create_room(NewRoom { capacity: Some(1), ..NewRoom::named("Leseecke") })?;
      let activity = tx.create_activity(NewActivity::open("Lesen"))?;
      tx.create_active_group(NewActiveGroup {
        activity_id: activity.id,
        room_id:     room.id,
        device_id:   None,
        start_time:  Utc::now(),
      })?;
      tx.create_person(NewPerson::student("Lea", "Berg", Some("TAG_B"), None))?;
      Ok(room.id)
    })
    .await
    .unwrap();

  scan(&s, "TAG_B", Some(full), site.device).await.unwrap();
  let first = scan(&s, "TAG_A", Some(site.room_a), site.device).await.unwrap();

  let err = scan(&s, "TAG_A", Some(full), site.device).await.unwrap_err();
  match err {
    Error::Core(CoreError::CapacityExceeded { scope, current, max, .. }) => {
      assert_eq!(scope, CapacityScope::Room);
      assert_eq!((current, max), (1, 1));
    }
    other => panic!("expected capacity error, got {other:?}"),
  }

  let current = s
    .read(move |tx| tx.get_student_current_visit(site.student))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(current.id, student(&first).visit_id);
  assert!(current.is_open());
}


#[tokio::test]
async fn activity_participant_limit_is_enforced() {
  let s = store().await;
  let site = site(&s).await;

  let room = s
    .transact(None, |tx| {
      let room = tx.create_room(NewRoom::named("Werkraum"))?;
      let activity = tx.create_activity(NewActivity { max_participants: Some(1), ..NewActivity::open("Holz") })?;
      tx.create_active_group(NewActiveGroup {
        activity_id: activity.id,
        room_id:     room.id,
        device_id:   None,
        start_time:  Utc::now(),
      })?;
      tx.create_person(NewPerson::student("Lea", "Berg", Some("TAG_B"), None))?;
      Ok(room.id)
    })
    .await
    .unwrap();

  scan(&s, "TAG_B", Some(room), site.device).await.unwrap();
  let err = scan(&s, "TAG_A", Some(room), site.device).await.unwrap_err();
  assert!(matches!(
    err,
    Error::Core(CoreError::CapacityExceeded { scope: CapacityScope::Activity, .. })
  ));
  assert_eq!(open_visits(&s, site.student).await, 0);
}

// ─── Schulhof ────────────────────────────────────────────────────────────────

async fn schulhof(s: &SqliteStore) -> Id {
  s.transact(None, |tx| {
    tx.create_activity(NewActivity::open("Schulhof"))?;
    tx.create_person(NewPerson::student("Lea", "Berg", Some("TAG_B"), None))?;
    Ok(tx.create_room(NewRoom::named("Schulhof"))?.id)
  })
  .await
  .unwrap()
}

async fn running_groups(s: &SqliteStore, room_id: Id) -> usize {
  s.read(move |tx| Ok(tx.find_active_groups_by_room(room_id)?.len()))
    .await
    .unwrap()
}

#[tokio::test]
async fn schulhof_materialises_one_group() {
  let s = store().await;
  let site = site(&s).await;
  let yard = schulhof(&s).await;

  let first = scan(&s, "TAG_A", Some(yard), site.device).await.unwrap();
  let kinds: Vec<_> = first.events.iter().map(|e| e.kind()).collect();
  assert_eq!(kinds, [EventKind::GroupStarted, EventKind::StudentCheckin]);
  assert_eq!(running_groups(&s, yard).await, 1);

  let second = scan(&s, "TAG_B", Some(yard), site.device).await.unwrap();
  assert_eq!(second.events.len(), 1);
  assert_eq!(running_groups(&s, yard).await, 1);
}

#[tokio::test]
async fn concurrent_schulhof_scans_share_a_group() {
  let s = store().await;
  let site = site(&s).await;
  let yard = schulhof(&s).await;

  let (a, b) = tokio::join!(
    scan(&s, "TAG_A", Some(yard), site.device),
    scan(&s, "TAG_B", Some(yard), site.device),
  );
  a.unwrap();
  b.unwrap();
  assert_eq!(running_groups(&s, yard).await, 1);
}

#[tokio::test]
async fn schulhof_without_activity_fails() {
  let s = store().await;
  let site = site(&s).await;
  let yard = s
    .transact(None, |tx| Ok(tx.create_room(NewRoom::named("Schulhof"))?.id))
    .await
    .unwrap();

  let err = scan(&s, "TAG_A", Some(yard), site.device).await.unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::SchulhofActivityMissing(_))));
  assert_eq!(running_groups(&s, yard).await, 0);
}

// ─── Supervisors and device sessions ─────────────────────────────────────────

#[tokio::test]
async fn staff_scan_toggles_supervision() {
  let s = store().await;
  let site = site(&s).await;
  let staff = s
    .transact(None, |tx| Ok(tx.create_person(NewPerson::staff("Eva", "Schmidt", Some("STAFF_1"), "teacher"))?.id))
    .await
    .unwrap();

  let joined = scan(&s, "STAFF_1", None, site.device).await.unwrap();
  match &joined.result {
    ScanResult::Staff(scan) => {
      assert_eq!(scan.active_group_id, site.group_a);
      assert_eq!(scan.message, "Hallo Eva!");
    }
    ScanResult::Student(_) => panic!("expected a staff scan"),
  }
  assert_eq!(joined.events[0].kind(), EventKind::SupervisorJoined);

  let subs = s.read(move |tx| resolve_subscriptions(tx, staff)).await.unwrap();
  assert_eq!(subs.active_group_ids, [site.group_a]);

  let left = scan(&s, "STAFF_1", None, site.device).await.unwrap();
  assert_eq!(left.events[0].kind(), EventKind::SupervisorLeft);

  let subs = s.read(move |tx| resolve_subscriptions(tx, staff)).await.unwrap();
  assert!(subs.is_empty());
}

#[tokio::test]
async fn staff_scan_without_session_fails() {
  let s = store().await;
  let idle = s
    .transact(None, |tx| {
      tx.create_person(NewPerson::staff("Eva", "Schmidt", Some("STAFF_1"), "teacher"))?;
      Ok(tx.create_device("reader-3", None, "hash-3")?.id)
    })
    .await
    .unwrap();

  let err = scan(&s, "STAFF_1", None, idle).await.unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::NoActiveSessionForDevice)));
}

#[tokio::test]
async fn ending_a_session_closes_visits_and_supervisions() {
  let s = store().await;
  let site = site(&s).await;
  let staff = s
    .transact(None, |tx| Ok(tx.create_person(NewPerson::staff("Eva", "Schmidt", Some("STAFF_1"), "teacher"))?.id))
    .await
    .unwrap();
  scan(&s, "TAG_A", Some(site.room_a), site.device).await.unwrap();
  scan(&s, "STAFF_1", None, site.device).await.unwrap();

  let ended = s
    .transact(None, move |tx| end_session(tx, site.device, Utc::now()))
    .await
    .unwrap();
  assert_eq!(ended.active_group_id, site.group_a);
  assert_eq!(ended.room_name, "Room 7");
  let events = ended.events;
  assert_eq!(events.len(), 1);
  assert_eq!(events[0].kind(), EventKind::GroupEnded);
  assert_eq!(events[0].topic_key(), &Topic::group(site.group_a));

  assert_eq!(open_visits(&s, site.student).await, 0);
  let subs = s.read(move |tx| resolve_subscriptions(tx, staff)).await.unwrap();
  assert!(subs.is_empty());

  let err = s
    .transact(None, move |tx| end_session(tx, site.device, Utc::now()))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::NoActiveSessionForDevice)));
}

#[tokio::test]
async fn starting_a_session_replaces_the_device_group() {
  let s = store().await;
  let site = site(&s).await;
  let (activity, staff) = s
    .transact(None, |tx| {
      let activity = tx.create_activity(NewActivity::open("Fussball"))?;
      let staff = tx.create_person(NewPerson::staff("Eva", "Schmidt", None, "teacher"))?;
      Ok((activity.id, staff.id))
    })
    .await
    .unwrap();

  // Room 9 already runs a group bound to another device.
  let started = s
    .transact(None, move |tx| start_session(tx, site.device, activity, site.room_b, Some(staff), Utc::now()))
    .await
    .unwrap();
  let kinds: Vec<_> = started.events.iter().map(|e| e.kind()).collect();
  assert_eq!(kinds, [EventKind::GroupEnded, EventKind::GroupStarted]);
  assert_eq!(started.group.room_id, site.room_b);
  assert_eq!(started.room_name, "Room 9");

  let group_a = site.group_a;
  let old = s.read(move |tx| tx.get_active_group(group_a)).await.unwrap().unwrap();
  assert!(!old.is_running());

  let subs = s.read(move |tx| resolve_subscriptions(tx, staff)).await.unwrap();
  assert_eq!(subs.active_group_ids, [started.group.id]);
}

#[tokio::test]
async fn session_supervisor_must_be_staff() {
  let s = store().await;
  let site = site(&s).await;
  let activity = s
    .transact(None, |tx| Ok(tx.create_activity(NewActivity::open("Fussball"))?.id))
    .await
    .unwrap();

  let student = site.student;
  let err = s
    .transact(None, move |tx| start_session(tx, site.device, activity, site.room_b, Some(student), Utc::now()))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::NotStaff(id)) if id == student));

  let err = s
    .transact(None, move |tx| start_session(tx, site.device, activity, site.room_b, Some(9_999), Utc::now()))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::StaffNotFound(9_999))));

  // The device keeps its original group.
  let group_a = site.group_a;
  let group = s.read(move |tx| tx.get_active_group(group_a)).await.unwrap().unwrap();
  assert!(group.is_running());
}

// ─── Scheduled checkouts ─────────────────────────────────────────────────────

fn checkout_for(student_id: Id, minutes: i64) -> NewScheduledCheckout {
  NewScheduledCheckout {
    student_id,
    scheduled_by: student_id,
    scheduled_for: Utc::now() + chrono::Duration::minutes(minutes),
    reason: Some("Arzttermin".into()),
  }
}

#[tokio::test]
async fn one_pending_checkout_per_student() {
  let s = store().await;
  let site = site(&s).await;

  s.transact(None, move |tx| schedule_checkout(tx, checkout_for(site.student, 30)))
    .await
    .unwrap();
  let err = s
    .transact(None, move |tx| schedule_checkout(tx, checkout_for(site.student, 60)))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::ScheduledCheckoutPending(_))));
}

#[tokio::test]
async fn manual_checkout_cancels_pending_checkout() {
  let s = store().await;
  let site = site(&s).await;

  scan(&s, "TAG_A", Some(site.room_a), site.device).await.unwrap();
  let pending = s
    .transact(None, move |tx| schedule_checkout(tx, checkout_for(site.student, 30)))
    .await
    .unwrap();
  scan(&s, "TAG_A", None, site.device).await.unwrap();

  let id = pending.id;
  let after = s.read(move |tx| tx.get_scheduled_checkout(id)).await.unwrap().unwrap();
  assert_eq!(after.status, ScheduledCheckoutStatus::Cancelled);
  assert_eq!(after.cancelled_by, None);
  assert!(after.cancelled_at.is_some());
}

#[tokio::test]
async fn cancelling_twice_fails() {
  let s = store().await;
  let site = site(&s).await;
  let pending = s
    .transact(None, move |tx| schedule_checkout(tx, checkout_for(site.student, 30)))
    .await
    .unwrap();

  let id = pending.id;
  s.transact(None, move |tx| cancel_checkout(tx, id, 99, Utc::now())).await.unwrap();
  let err = s
    .transact(None, move |tx| cancel_checkout(tx, id, 99, Utc::now()))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::ScheduledCheckoutNotPending(_))));
}

#[tokio::test]
async fn due_checkout_closes_open_visit() {
  let s = store().await;
  let site = site(&s).await;
  scan(&s, "TAG_A", Some(site.room_a), site.device).await.unwrap();
  s.transact(None, move |tx| schedule_checkout(tx, checkout_for(site.student, -1)))
    .await
    .unwrap();

  let due = s
    .read(|tx| tx.find_due_scheduled_checkouts(Utc::now()))
    .await
    .unwrap();
  assert_eq!(due.len(), 1);

  let id = due[0].id;
  let executed = s.transact(None, move |tx| execute_checkout(tx, id, Utc::now())).await.unwrap();
  assert_eq!(executed.room_name.as_deref(), Some("Room 7"));
  let kinds: Vec<_> = executed.events.iter().map(|e| e.kind()).collect();
  assert_eq!(kinds, [EventKind::StudentCheckout]);
  assert_eq!(open_visits(&s, site.student).await, 0);

  let due = s
    .read(|tx| tx.find_due_scheduled_checkouts(Utc::now()))
    .await
    .unwrap();
  assert!(due.is_empty());
}

// ─── Daily checkout and attendance ───────────────────────────────────────────

#[tokio::test]
async fn checkout_after_daily_cutoff_is_daily() {
  let s = store().await;
  let site = site(&s).await;
  let tom = s
    .transact(None, |tx| {
      let group = tx.create_educational_group("Klasse 3a", Some(NaiveTime::MIN))?;
      Ok(tx.create_person(NewPerson::student("Tom", "Lang", Some("TAG_C"), Some(group.id)))?.id)
    })
    .await
    .unwrap();

  scan(&s, "TAG_C", Some(site.room_a), site.device).await.unwrap();
  let out = scan(&s, "TAG_C", Some(site.room_a), site.device).await.unwrap();
  let scan = student(&out);
  assert_eq!(scan.action, ResponseAction::CheckedOutDaily);
  assert_eq!(scan.message, "Tschüss Tom, bis morgen!");

  let today = CheckinPolicy::default().local_date(Utc::now());
  let statuses = s
    .read(move |tx| tx.get_students_attendance_statuses(&[tom], today))
    .await
    .unwrap();
  assert!(matches!(statuses[&tom], AttendanceStatus::Left { .. }));
}

#[tokio::test]
async fn class_topic_sees_student_movements() {
  let s = store().await;
  let site = site(&s).await;
  let (class, teacher, tom) = s
    .transact(None, |tx| {
      let class = tx.create_educational_group("Klasse 4c", None)?;
      let teacher = tx.create_person(NewPerson::staff("Jan", "Ott", None, "teacher"))?;
      tx.assign_staff_to_educational_group(teacher.id, class.id)?;
      let tom = tx.create_person(NewPerson::student("Tom", "Lang", Some("TAG_C"), Some(class.id)))?;
      Ok((class.id, teacher.id, tom.id))
    })
    .await
    .unwrap();

  let subs = s.read(move |tx| resolve_subscriptions(tx, teacher)).await.unwrap();
  assert!(subs.active_group_ids.is_empty());
  assert_eq!(subs.all_topics, [Topic::educational(class)]);

  let checkin = scan(&s, "TAG_C", Some(site.room_a), site.device).await.unwrap();
  let topics: Vec<_> = checkin.events.iter().map(|e| e.topic_key().clone()).collect();
  assert_eq!(topics, [Topic::group(site.group_a), Topic::educational(class)]);
  assert!(checkin.events.iter().all(|e| e.kind() == EventKind::StudentCheckin));
  assert_eq!(checkin.events[0].payload(), checkin.events[1].payload());

  let transfer = scan(&s, "TAG_C", Some(site.room_b), site.device).await.unwrap();
  assert!(transfer.events.iter().any(|e| {
    e.kind() == EventKind::StudentTransfer && e.topic_key() == &Topic::educational(class)
  }));

  s.transact(None, move |tx| schedule_checkout(tx, checkout_for(tom, -1)))
    .await
    .unwrap();
  let due = s.read(|tx| tx.find_due_scheduled_checkouts(Utc::now())).await.unwrap();
  let id = due[0].id;
  let executed = s.transact(None, move |tx| execute_checkout(tx, id, Utc::now())).await.unwrap();
  let topics: Vec<_> = executed.events.iter().map(|e| e.topic_key().clone()).collect();
  assert_eq!(topics, [Topic::group(site.group_b), Topic::educational(class)]);
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn locations_resolve_in_bulk() {
  let s = store().await;
  let site = site(&s).await;
  let absent = s
    .transact(None, |tx| Ok(tx.create_person(NewPerson::student("Lea", "Berg", Some("TAG_B"), None))?.id))
    .await
    .unwrap();
  scan(&s, "TAG_A", Some(site.room_b), site.device).await.unwrap();

  let today = CheckinPolicy::default().local_date(Utc::now());
  let ids = vec![site.student, absent];
  let locations = s
    .read(move |tx| resolve_student_locations(tx, &ids, today))
    .await
    .unwrap();

  let present = &locations[&site.student];
  assert!(matches!(present.attendance, AttendanceStatus::Present { .. }));
  assert_eq!(present.active_group_id, Some(site.group_b));
  assert_eq!(present.room_id, Some(site.room_b));
  assert_eq!(present.room_name.as_deref(), Some("Room 9"));

  let missing = &locations[&absent];
  assert_eq!(missing.attendance, AttendanceStatus::NotArrived);
  assert_eq!(missing.room_id, None);
}

#[tokio::test]
async fn bulk_lookups_accept_empty_input() {
  let s = store().await;
  let today = CheckinPolicy::default().local_date(Utc::now());
  let locations = s
    .read(move |tx| resolve_student_locations(tx, &[], today))
    .await
    .unwrap();
  assert!(locations.is_empty());
}

#[tokio::test]
async fn subscriptions_are_deterministic() {
  let s = store().await;
  let site = site(&s).await;
  let staff = s
    .transact(None, move |tx| {
      let staff = tx.create_person(NewPerson::staff("Eva", "Schmidt", None, "teacher"))?;
      let g2 = tx.create_educational_group("Klasse 2b", None)?;
      let g1 = tx.create_educational_group("Klasse 1a", None)?;
      tx.assign_staff_to_educational_group(staff.id, g2.id)?;
      tx.assign_staff_to_educational_group(staff.id, g1.id)?;
      tx.create_supervision(staff.id, site.group_b, Utc::now())?;
      tx.create_supervision(staff.id, site.group_a, Utc::now())?;
      Ok(staff.id)
    })
    .await
    .unwrap();

  let (first, second) = s
    .read(move |tx| Ok((resolve_subscriptions(tx, staff)?, resolve_subscriptions(tx, staff)?)))
    .await
    .unwrap();
  assert_eq!(first, second);
  assert_eq!(first.active_group_ids, [site.group_a, site.group_b]);
  let topics: Vec<&str> = first.all_topics.iter().map(Topic::as_str).collect();
  assert_eq!(topics.len(), 4);
  assert_eq!(topics[0], site.group_a.to_string());
  assert!(topics[2].starts_with("edu:"));
}

// ─── Transactions ────────────────────────────────────────────────────────────

#[tokio::test]
async fn expired_deadline_rolls_back() {
  let s = store().await;

  let err = s
    .transact(Some(Instant::now()), |tx| {
      tx.create_room(NewRoom::named("Aula"))?;
      Ok(())
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::DeadlineExceeded)));

  // The name is still free, so nothing was committed.
  s.transact(None, |tx| Ok(tx.create_room(NewRoom::named("Aula"))?.id))
    .await
    .unwrap();
}

#[tokio::test]
async fn failed_closure_rolls_back() {
  let s = store().await;

  let err = s
    .transact(None, |tx| {
      tx.create_room(NewRoom::named("Aula"))?;
      Err::<(), _>(CoreError::TagNotFound)
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::TagNotFound)));

  s.transact(None, |tx| Ok(tx.create_room(NewRoom::named("Aula"))?.id))
    .await
    .unwrap();
}

#[tokio::test]
async fn duplicate_room_name_conflicts() {
  let s = store().await;
  s.transact(None, |tx| Ok(tx.create_room(NewRoom::named("Aula"))?.id))
    .await
    .unwrap();
  let err = s
    .transact(None, |tx| Ok(tx.create_room(NewRoom::named("Aula"))?.id))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::Duplicate(_))));
}

#[tokio::test]
async fn settings_upsert() {
  let s = store().await;
  s.transact(None, |tx| {
    tx.put_setting(StoredSetting { key: "smtp".into(), value: "a".into(), encrypted: false })?;
    tx.put_setting(StoredSetting { key: "smtp".into(), value: "b".into(), encrypted: true })
  })
  .await
  .unwrap();

  let stored = s.read(|tx| tx.get_setting("smtp")).await.unwrap().unwrap();
  assert_eq!(stored.value, "b");
  assert!(stored.encrypted);
  assert!(s.read(|tx| tx.get_setting("missing")).await.unwrap().is_none());
}

#[tokio::test]
async fn device_lookup_by_key_hash() {
  let s = store().await;
  let site = site(&s).await;

  let device = s.read(|tx| tx.find_device_by_key_hash("hash-1")).await.unwrap().unwrap();
  assert_eq!(device.id, site.device);
  assert_eq!(device.name.as_deref(), Some("Eingang"));
  assert!(s.read(|tx| tx.find_device_by_key_hash("nope")).await.unwrap().is_none());
}

#[tokio::test]
async fn device_status_round_trips() {
  let s = store().await;
  let site = site(&s).await;

  let device = site.device;
  s.transact(None, move |tx| tx.set_device_status(device, DeviceStatus::Inactive))
    .await
    .unwrap();
  let found = s.read(|tx| tx.find_device_by_key_hash("hash-1")).await.unwrap().unwrap();
  assert_eq!(found.status, DeviceStatus::Inactive);
}
