use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ulid::Ulid;

use super::*;
use crate::model::*;
use crate::notify::{Notice, NotifyHub};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("agendo_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn date(d: &str) -> NaiveDate {
    NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()
}

fn time(t: &str) -> NaiveTime {
    NaiveTime::parse_from_str(t, "%H:%M").unwrap()
}

fn dt(d: &str, t: &str) -> NaiveDateTime {
    date(d).and_time(time(t))
}

/// 2026-03-02 is a Monday; the fixture rule opens Mondays 10:00–14:00.
const MONDAY: &str = "2026-03-02";
const NEXT_MONDAY: &str = "2026-03-09";
const THIRD_MONDAY: &str = "2026-03-16";

/// Well before any Monday used in the tests.
fn early() -> NaiveDateTime {
    dt("2026-02-25", "09:00")
}

struct Salon {
    engine: Engine,
    staff: Ulid,
    cut: Ulid,
    color: Ulid,
}

/// One staff member, a 60-minute complement service, a 60-minute
/// color-design service, and a Monday 10:00–14:00 rule for everyone.
async fn salon(wal: &str) -> Salon {
    let engine = Engine::new(test_wal_path(wal), Arc::new(NotifyHub::new())).unwrap();
    let staff = Ulid::new();
    let cut = Ulid::new();
    let color = Ulid::new();
    engine.add_staff(staff, "Yani".into()).await.unwrap();
    engine
        .add_service(cut, "Cut".into(), ServiceKind::Complement, Some(60), 8_000)
        .await
        .unwrap();
    engine
        .add_service(color, "Balayage".into(), ServiceKind::ColorDesign, Some(60), 45_000)
        .await
        .unwrap();
    engine
        .add_rule(WeeklyRule {
            id: Ulid::new(),
            staff_id: None,
            weekday: 0,
            start: time("10:00"),
            end: time("14:00"),
            valid_from: None,
            valid_to: None,
            color_design: true,
            complement: true,
            active: true,
        })
        .await
        .unwrap();
    Salon { engine, staff, cut, color }
}

impl Salon {
    async fn book(&self, d: &str, t: &str) -> Appointment {
        self.book_for(Ulid::new(), d, t).await
    }

    async fn book_for(&self, client: Ulid, d: &str, t: &str) -> Appointment {
        self.engine
            .request_appointment(
                Ulid::new(),
                client,
                Some(self.staff),
                &[self.cut],
                date(d),
                time(t),
                early(),
            )
            .await
            .unwrap()
    }

    async fn confirm(&self, id: Ulid) -> Appointment {
        self.engine.approve_appointment(id, early()).await.unwrap();
        self.engine.confirm_deposit(id).await.unwrap()
    }

    async fn starts(&self, service: Ulid, from: &str, now: NaiveDateTime) -> Vec<NaiveTime> {
        self.engine
            .query_availability(service, Some(date(from)), now)
            .await
            .unwrap()
            .into_iter()
            .filter(|row| row.date == date(from))
            .map(|row| row.start)
            .collect()
    }
}

// ── Availability ─────────────────────────────────────────────────

#[tokio::test]
async fn availability_monday_grid() {
    let s = salon("avail_grid.wal").await;
    let starts = s.starts(s.cut, MONDAY, early()).await;
    assert_eq!(
        starts,
        vec![time("10:00"), time("11:00"), time("12:00"), time("13:00")]
    );
}

#[tokio::test]
async fn availability_removes_booked_slot() {
    let s = salon("avail_booked.wal").await;
    s.book(MONDAY, "11:00").await;
    let starts = s.starts(s.cut, MONDAY, early()).await;
    assert_eq!(starts, vec![time("10:00"), time("12:00"), time("13:00")]);
}

#[tokio::test]
async fn availability_empty_on_closed_day() {
    let s = salon("avail_closed.wal").await;
    // Tuesday has no rule at all.
    let rows = s
        .engine
        .query_availability(s.cut, Some(date("2026-03-03")), early())
        .await
        .unwrap();
    let tuesday: Vec<_> = rows.iter().filter(|r| r.date == date("2026-03-03")).collect();
    assert!(tuesday.is_empty());
}

#[tokio::test]
async fn availability_is_idempotent() {
    let s = salon("avail_idem.wal").await;
    s.book(MONDAY, "12:00").await;
    let first = s.engine.query_availability(s.cut, Some(date(MONDAY)), early()).await.unwrap();
    let second = s.engine.query_availability(s.cut, Some(date(MONDAY)), early()).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn availability_hides_elapsed_slots() {
    let s = salon("avail_elapsed.wal").await;
    // Query mid-Monday: 10:00 and 11:00 already passed, 12:00 is "now".
    let now = dt(MONDAY, "12:00");
    let starts = s.starts(s.cut, MONDAY, now).await;
    assert_eq!(starts, vec![time("13:00")]);
}

#[tokio::test]
async fn availability_respects_capability_flags() {
    let s = salon("avail_capability.wal").await;
    // Wednesdays take complement work only.
    s.engine
        .add_rule(WeeklyRule {
            id: Ulid::new(),
            staff_id: None,
            weekday: 2,
            start: time("10:00"),
            end: time("12:00"),
            valid_from: None,
            valid_to: None,
            color_design: false,
            complement: true,
            active: true,
        })
        .await
        .unwrap();
    let wednesday = "2026-03-04";
    let color_starts = s.starts(s.color, wednesday, early()).await;
    assert!(color_starts.is_empty());
    let cut_starts = s.starts(s.cut, wednesday, early()).await;
    assert_eq!(cut_starts, vec![time("10:00"), time("11:00")]);
}

#[tokio::test]
async fn availability_blocked_by_blackout() {
    let s = salon("avail_blackout.wal").await;
    s.engine
        .add_blackout(
            Ulid::new(),
            None,
            Span::new(dt(MONDAY, "10:00"), dt(MONDAY, "12:00")),
            "renovation".into(),
            false,
        )
        .await
        .unwrap();
    let starts = s.starts(s.cut, MONDAY, early()).await;
    assert_eq!(starts, vec![time("12:00"), time("13:00")]);
}

#[tokio::test]
async fn availability_unknown_service_is_error() {
    let s = salon("avail_unknown.wal").await;
    let result = s.engine.query_availability(Ulid::new(), None, early()).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn availability_policy_granularity() {
    let s = salon("avail_gran.wal").await;
    s.engine
        .update_policy(PolicyPatch { slot_minutes: Some(120), ..Default::default() })
        .await
        .unwrap();
    let starts = s.starts(s.cut, MONDAY, early()).await;
    assert_eq!(starts, vec![time("10:00"), time("12:00")]);
}

// ── Booking ──────────────────────────────────────────────────────

#[tokio::test]
async fn booking_requires_staff_assignment() {
    let s = salon("book_no_staff.wal").await;
    let result = s
        .engine
        .request_appointment(
            Ulid::new(),
            Ulid::new(),
            None,
            &[s.cut],
            date(MONDAY),
            time("10:00"),
            early(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::MissingStaff)));
}

#[tokio::test]
async fn booking_unknown_service_rejected() {
    let s = salon("book_unknown_service.wal").await;
    let result = s
        .engine
        .request_appointment(
            Ulid::new(),
            Ulid::new(),
            Some(s.staff),
            &[Ulid::new()],
            date(MONDAY),
            time("10:00"),
            early(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn booking_duplicate_service_rejected() {
    let s = salon("book_dup_service.wal").await;
    let result = s
        .engine
        .request_appointment(
            Ulid::new(),
            Ulid::new(),
            Some(s.staff),
            &[s.cut, s.cut],
            date(MONDAY),
            time("10:00"),
            early(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::DuplicateService(_))));
}

#[tokio::test]
async fn booking_same_client_same_slot_rejected() {
    let s = salon("book_dup_request.wal").await;
    let client = Ulid::new();
    s.book_for(client, MONDAY, "10:00").await;
    let result = s
        .engine
        .request_appointment(
            Ulid::new(),
            client,
            Some(s.staff),
            &[s.color],
            date(MONDAY),
            time("10:00"),
            early(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::DuplicateRequest)));
}

#[tokio::test]
async fn booking_staff_conflict_rejected() {
    let s = salon("book_conflict.wal").await;
    s.book(MONDAY, "10:00").await;
    let result = s
        .engine
        .request_appointment(
            Ulid::new(),
            Ulid::new(),
            Some(s.staff),
            &[s.cut],
            date(MONDAY),
            time("10:00"),
            early(),
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::SlotUnavailable(SlotConflict::StaffBusy(_)))
    ));
}

#[tokio::test]
async fn booking_outside_working_hours_rejected() {
    let s = salon("book_closed.wal").await;
    let result = s
        .engine
        .request_appointment(
            Ulid::new(),
            Ulid::new(),
            Some(s.staff),
            &[s.cut],
            date(MONDAY),
            time("15:00"),
            early(),
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::SlotUnavailable(SlotConflict::Closed))
    ));
}

#[tokio::test]
async fn booking_in_past_rejected() {
    let s = salon("book_past.wal").await;
    let result = s
        .engine
        .request_appointment(
            Ulid::new(),
            Ulid::new(),
            Some(s.staff),
            &[s.cut],
            date(MONDAY),
            time("10:00"),
            dt(MONDAY, "11:00"),
        )
        .await;
    assert!(matches!(result, Err(EngineError::InPast)));
}

#[tokio::test]
async fn booking_beyond_horizon_rejected() {
    let s = salon("book_horizon.wal").await;
    // 2026-04-20 is a Monday, but almost two months past the default
    // 30-day horizon seen from late February.
    let result = s
        .engine
        .request_appointment(
            Ulid::new(),
            Ulid::new(),
            Some(s.staff),
            &[s.cut],
            date("2026-04-20"),
            time("10:00"),
            early(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn booking_snapshots_price_and_duration() {
    let s = salon("book_snapshot.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    assert_eq!(appt.total_price_cents(), 8_000);
    assert_eq!(appt.total_duration_min(), 60);

    // Catalog edits after booking never touch the snapshot.
    s.engine.remove_service(s.cut).await.unwrap();
    let stored = s.engine.get_appointment(appt.id).await.unwrap();
    assert_eq!(stored.total_price_cents(), 8_000);
    assert_eq!(stored.total_duration_min(), 60);
}

#[tokio::test]
async fn booking_bundles_multiple_services() {
    let s = salon("book_bundle.wal").await;
    let appt = s
        .engine
        .request_appointment(
            Ulid::new(),
            Ulid::new(),
            Some(s.staff),
            &[s.cut, s.color],
            date(MONDAY),
            time("10:00"),
            early(),
        )
        .await
        .unwrap();
    assert_eq!(appt.items.len(), 2);
    assert_eq!(appt.total_duration_min(), 120);
    assert_eq!(appt.end_at(), dt(MONDAY, "12:00"));

    // The two-hour bundle occupies 10:00 and 11:00.
    let starts = s.starts(s.cut, MONDAY, early()).await;
    assert_eq!(starts, vec![time("12:00"), time("13:00")]);
}

// ── Resource capacity ────────────────────────────────────────────

#[tokio::test]
async fn capacity_rejects_overbooked_resource() {
    let s = salon("capacity.wal").await;
    let type_id = Ulid::new();
    s.engine.add_resource_type(type_id, "washbasin".into()).await.unwrap();
    for _ in 0..2 {
        s.engine.add_unit(Ulid::new(), type_id, UnitStatus::Available).await.unwrap();
    }
    s.engine
        .declare_need(Ulid::new(), s.cut, type_id, true, 1)
        .await
        .unwrap();

    // Three staff so staff-time checks stay out of the way.
    let staff_b = Ulid::new();
    let staff_c = Ulid::new();
    s.engine.add_staff(staff_b, "Flor".into()).await.unwrap();
    s.engine.add_staff(staff_c, "Mara".into()).await.unwrap();

    for staff in [s.staff, staff_b] {
        s.engine
            .request_appointment(
                Ulid::new(),
                Ulid::new(),
                Some(staff),
                &[s.cut],
                date(MONDAY),
                time("10:00"),
                early(),
            )
            .await
            .unwrap();
    }

    // Both washbasins are committed 10:00–11:00.
    let result = s
        .engine
        .request_appointment(
            Ulid::new(),
            Ulid::new(),
            Some(staff_c),
            &[s.cut],
            date(MONDAY),
            time("10:00"),
            early(),
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::SlotUnavailable(SlotConflict::ResourcesSaturated { .. }))
    ));

    // A non-overlapping hour is still fine.
    s.engine
        .request_appointment(
            Ulid::new(),
            Ulid::new(),
            Some(staff_c),
            &[s.cut],
            date(MONDAY),
            time("12:00"),
            early(),
        )
        .await
        .unwrap();
}

// ── Lifecycle: approve / confirm ─────────────────────────────────

#[tokio::test]
async fn approve_starts_deposit_clock() {
    let s = salon("approve.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    let approved = s.engine.approve_appointment(appt.id, early()).await.unwrap();
    assert_eq!(approved.state, AppointmentState::AwaitingDeposit);
    // Default policy gives 24 hours to pay the deposit.
    assert_eq!(approved.deposit_deadline, Some(early() + chrono::Duration::hours(24)));
}

#[tokio::test]
async fn approve_requires_requested_state() {
    let s = salon("approve_state.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.confirm(appt.id).await;
    let result = s.engine.approve_appointment(appt.id, early()).await;
    assert!(matches!(result, Err(EngineError::InvalidState { .. })));
}

#[tokio::test]
async fn confirm_deposit_clears_deadline() {
    let s = salon("confirm.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    let confirmed = s.confirm(appt.id).await;
    assert_eq!(confirmed.state, AppointmentState::Confirmed);
    assert_eq!(confirmed.deposit_deadline, None);
}

// ── Lifecycle: reprogram ────────────────────────────────────────

#[tokio::test]
async fn reprogram_requested_updates_in_place() {
    let s = salon("reprogram_requested.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    let moved = s
        .engine
        .reprogram_appointment(appt.id, date(NEXT_MONDAY), time("11:00"), Actor::Client, early())
        .await
        .unwrap();
    assert_eq!(moved.state, AppointmentState::Requested);
    assert_eq!(moved.reprogram_count, 0);
    assert_eq!(moved.date, date(NEXT_MONDAY));
}

#[tokio::test]
async fn reprogram_awaiting_deposit_reverts_to_requested() {
    let s = salon("reprogram_awaiting.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.engine.approve_appointment(appt.id, early()).await.unwrap();

    let moved = s
        .engine
        .reprogram_appointment(appt.id, date(NEXT_MONDAY), time("11:00"), Actor::Client, early())
        .await
        .unwrap();
    // The approval is invalidated and must be re-issued.
    assert_eq!(moved.state, AppointmentState::Requested);
    assert_eq!(moved.deposit_deadline, None);
    assert_eq!(moved.reprogram_count, 0);
}

#[tokio::test]
async fn reprogram_confirmed_counts_against_limit() {
    let s = salon("reprogram_limit.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.confirm(appt.id).await;

    let first = s
        .engine
        .reprogram_appointment(appt.id, date(MONDAY), time("11:00"), Actor::Staff, early())
        .await
        .unwrap();
    assert_eq!(first.state, AppointmentState::Confirmed);
    assert_eq!(first.reprogram_count, 1);

    let second = s
        .engine
        .reprogram_appointment(appt.id, date(NEXT_MONDAY), time("10:00"), Actor::Staff, early())
        .await
        .unwrap();
    assert_eq!(second.reprogram_count, 2);

    // Default limit is 2: the third move must fail and leave the row alone.
    let result = s
        .engine
        .reprogram_appointment(appt.id, date(THIRD_MONDAY), time("10:00"), Actor::Staff, early())
        .await;
    assert!(matches!(
        result,
        Err(EngineError::ReprogramLimitExceeded { limit: 2 })
    ));
    let unchanged = s.engine.get_appointment(appt.id).await.unwrap();
    assert_eq!(unchanged.date, date(NEXT_MONDAY));
    assert_eq!(unchanged.reprogram_count, 2);
}

#[tokio::test]
async fn reprogram_confirmed_client_inside_cutoff_rejected() {
    let s = salon("reprogram_cutoff.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.confirm(appt.id).await;

    // 40 hours remain; the default cutoff requires 48.
    let late = dt("2026-02-28", "18:00");
    let result = s
        .engine
        .reprogram_appointment(appt.id, date(NEXT_MONDAY), time("10:00"), Actor::Client, late)
        .await;
    match result {
        Err(EngineError::TimeWindowExceeded { required_hours, remaining_hours }) => {
            assert_eq!(required_hours, 48);
            assert_eq!(remaining_hours, 40);
        }
        other => panic!("expected TimeWindowExceeded, got {other:?}"),
    }

    // Staff are exempt from the window.
    let moved = s
        .engine
        .reprogram_appointment(appt.id, date(NEXT_MONDAY), time("10:00"), Actor::Staff, late)
        .await
        .unwrap();
    assert_eq!(moved.date, date(NEXT_MONDAY));
}

#[tokio::test]
async fn reprogram_to_taken_slot_rejected() {
    let s = salon("reprogram_conflict.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.book(MONDAY, "11:00").await;

    let result = s
        .engine
        .reprogram_appointment(appt.id, date(MONDAY), time("11:00"), Actor::Staff, early())
        .await;
    assert!(matches!(result, Err(EngineError::SlotUnavailable(_))));
    let unchanged = s.engine.get_appointment(appt.id).await.unwrap();
    assert_eq!(unchanged.start, time("10:00"));
}

#[tokio::test]
async fn reprogram_within_own_slot_allowed() {
    let s = salon("reprogram_own.wal").await;
    // A two-hour bundle moved one hour overlaps its old interval.
    let appt = s
        .engine
        .request_appointment(
            Ulid::new(),
            Ulid::new(),
            Some(s.staff),
            &[s.cut, s.color],
            date(MONDAY),
            time("10:00"),
            early(),
        )
        .await
        .unwrap();
    let moved = s
        .engine
        .reprogram_appointment(appt.id, date(MONDAY), time("11:00"), Actor::Staff, early())
        .await
        .unwrap();
    assert_eq!(moved.start, time("11:00"));
}

// ── Lifecycle: cancel + reclamation ──────────────────────────────

#[tokio::test]
async fn cancel_requested_is_free() {
    let s = salon("cancel_requested.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    let outcome = s
        .engine
        .cancel_appointment(appt.id, Actor::Client, Some("changed my mind".into()), early())
        .await
        .unwrap();
    assert_eq!(outcome.appointment.state, AppointmentState::Cancelled);
    // The slot is bookable again.
    let starts = s.starts(s.cut, MONDAY, early()).await;
    assert!(starts.contains(&time("10:00")));
}

#[tokio::test]
async fn cancel_confirmed_client_inside_cutoff_rejected() {
    let s = salon("cancel_cutoff.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.confirm(appt.id).await;

    let late = dt("2026-02-28", "18:00");
    let result = s.engine.cancel_appointment(appt.id, Actor::Client, None, late).await;
    assert!(matches!(result, Err(EngineError::TimeWindowExceeded { .. })));

    // Staff may cancel the same appointment at the same moment.
    let outcome = s.engine.cancel_appointment(appt.id, Actor::Staff, None, late).await.unwrap();
    assert_eq!(outcome.appointment.state, AppointmentState::Cancelled);
}

#[tokio::test]
async fn cancel_terminal_rejected() {
    let s = salon("cancel_terminal.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    let again = s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await;
    assert!(matches!(again, Err(EngineError::InvalidState { .. })));
}

#[tokio::test]
async fn cancel_offers_freed_slot_to_waitlist() {
    let s = salon("cancel_waitlist.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.confirm(appt.id).await;

    let waiting_client = Ulid::new();
    let entry_id = Ulid::new();
    s.engine
        .join_waitlist(
            entry_id,
            waiting_client,
            s.cut,
            date("2026-03-01"),
            date("2026-03-07"),
            None,
            None,
            early(),
        )
        .await
        .unwrap();

    let outcome = s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    assert_eq!(outcome.offers.len(), 1);
    let offer = &outcome.offers[0];
    assert_eq!(offer.client_id, waiting_client);
    assert_eq!(offer.date, date(MONDAY));
    assert_eq!(offer.start, time("10:00"));
    assert!(matches!(offer.source, OfferSource::Waitlist(id) if id == entry_id));

    // The entry is flagged and will not be offered this slot again.
    let entries = s.engine.list_waitlist().await;
    assert!(entries[0].notified);
}

#[tokio::test]
async fn cancel_skips_notified_waitlist_entries() {
    let s = salon("cancel_notified.wal").await;
    let first = s.book(MONDAY, "10:00").await;
    let second = s.book(MONDAY, "11:00").await;
    s.engine
        .join_waitlist(
            Ulid::new(),
            Ulid::new(),
            s.cut,
            date("2026-03-01"),
            date("2026-03-07"),
            None,
            None,
            early(),
        )
        .await
        .unwrap();

    let outcome = s.engine.cancel_appointment(first.id, Actor::Staff, None, early()).await.unwrap();
    assert_eq!(outcome.offers.len(), 1);

    // The second freed slot finds no fresh waitlist candidates.
    let outcome = s.engine.cancel_appointment(second.id, Actor::Staff, None, early()).await.unwrap();
    assert!(outcome.offers.is_empty());
}

#[tokio::test]
async fn cancel_waitlist_respects_time_window() {
    let s = salon("cancel_window.wal").await;
    let appt = s.book(MONDAY, "13:00").await;
    // Entry only wants mornings.
    s.engine
        .join_waitlist(
            Ulid::new(),
            Ulid::new(),
            s.cut,
            date("2026-03-01"),
            date("2026-03-07"),
            Some(time("09:00")),
            Some(time("12:00")),
            early(),
        )
        .await
        .unwrap();
    let outcome = s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    assert!(outcome.offers.is_empty());
}

#[tokio::test]
async fn cancel_offers_advance_to_later_confirmed() {
    let s = salon("cancel_advance.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.confirm(appt.id).await;

    // Another client holds a confirmed appointment a week later.
    let later_client = Ulid::new();
    let later = s.book_for(later_client, NEXT_MONDAY, "10:00").await;
    s.confirm(later.id).await;

    let outcome = s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    assert_eq!(outcome.offers.len(), 1);
    let offer = &outcome.offers[0];
    assert_eq!(offer.client_id, later_client);
    assert!(matches!(offer.source, OfferSource::Advance(id) if id == later.id));
}

#[tokio::test]
async fn cancel_advance_pool_excludes_unconfirmed_and_same_day() {
    let s = salon("cancel_advance_filter.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.confirm(appt.id).await;

    // Requested (not confirmed) later appointment: not eligible.
    s.book(NEXT_MONDAY, "10:00").await;
    // Confirmed appointment on the same day: not "strictly later".
    let same_day = s.book(MONDAY, "12:00").await;
    s.confirm(same_day.id).await;

    let outcome = s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    assert!(outcome.offers.is_empty());
}

#[tokio::test]
async fn cancel_snapshot_survives_state_write() {
    let s = salon("cancel_snapshot.wal").await;
    let appt = s.book(MONDAY, "11:00").await;
    s.confirm(appt.id).await;
    s.engine
        .join_waitlist(
            Ulid::new(),
            Ulid::new(),
            s.cut,
            date(MONDAY),
            date(MONDAY),
            None,
            None,
            early(),
        )
        .await
        .unwrap();

    let outcome = s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    // The offer carries the values the appointment had immediately before
    // the cancellation write.
    assert_eq!(outcome.offers[0].date, appt.date);
    assert_eq!(outcome.offers[0].start, appt.start);
    assert_eq!(outcome.offers[0].service_ids, vec![s.cut]);
}

#[tokio::test]
async fn cancelled_client_gets_notice() {
    let s = salon("cancel_notice.wal").await;
    let client = Ulid::new();
    let appt = s.book_for(client, MONDAY, "10:00").await;
    let mut rx = s.engine.notify.subscribe(client);
    s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    let notice = rx.recv().await.unwrap();
    assert_eq!(
        notice,
        Notice::AppointmentState { appointment_id: appt.id, state: AppointmentState::Cancelled }
    );
}

// ── Offers: acceptance ───────────────────────────────────────────

#[tokio::test]
async fn accept_waitlist_offer_books_requested() {
    let s = salon("accept_waitlist.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    let waiting_client = Ulid::new();
    s.engine
        .join_waitlist(
            Ulid::new(),
            waiting_client,
            s.cut,
            date(MONDAY),
            date(MONDAY),
            None,
            None,
            early(),
        )
        .await
        .unwrap();
    let outcome = s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    let offer = &outcome.offers[0];

    let booked = s.engine.accept_offer(offer.id, waiting_client, early()).await.unwrap();
    assert_eq!(booked.state, AppointmentState::Requested);
    assert_eq!(booked.date, date(MONDAY));
    assert_eq!(booked.start, time("10:00"));
    assert_eq!(booked.client_id, waiting_client);

    // Entry retired, offer claimed.
    let entries = s.engine.list_waitlist().await;
    assert!(!entries[0].active);
    let offers = s.engine.list_offers(Some(waiting_client)).await;
    assert!(offers[0].claimed);
}

#[tokio::test]
async fn accept_claimed_offer_rejected() {
    let s = salon("accept_claimed.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    let waiting_client = Ulid::new();
    s.engine
        .join_waitlist(
            Ulid::new(),
            waiting_client,
            s.cut,
            date(MONDAY),
            date(MONDAY),
            None,
            None,
            early(),
        )
        .await
        .unwrap();
    let outcome = s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    let offer = &outcome.offers[0];

    s.engine.accept_offer(offer.id, waiting_client, early()).await.unwrap();
    let again = s.engine.accept_offer(offer.id, waiting_client, early()).await;
    assert!(matches!(again, Err(EngineError::SlotNoLongerAvailable)));
}

#[tokio::test]
async fn accept_revalidates_slot() {
    let s = salon("accept_revalidate.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    let waiting_client = Ulid::new();
    s.engine
        .join_waitlist(
            Ulid::new(),
            waiting_client,
            s.cut,
            date(MONDAY),
            date(MONDAY),
            None,
            None,
            early(),
        )
        .await
        .unwrap();
    let outcome = s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    let offer = &outcome.offers[0];

    // Someone else books the freed slot through the normal path first.
    s.book(MONDAY, "10:00").await;

    let result = s.engine.accept_offer(offer.id, waiting_client, early()).await;
    assert!(matches!(result, Err(EngineError::SlotNoLongerAvailable)));
}

#[tokio::test]
async fn accept_advance_offer_moves_appointment() {
    let s = salon("accept_advance.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.confirm(appt.id).await;
    let later_client = Ulid::new();
    let later = s.book_for(later_client, NEXT_MONDAY, "10:00").await;
    s.confirm(later.id).await;

    let outcome = s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    let offer = &outcome.offers[0];

    let moved = s.engine.accept_offer(offer.id, later_client, early()).await.unwrap();
    assert_eq!(moved.id, later.id);
    assert_eq!(moved.date, date(MONDAY));
    assert_eq!(moved.start, time("10:00"));
    // Deposit carries over; the salon-initiated move costs no credit.
    assert_eq!(moved.state, AppointmentState::Confirmed);
    assert_eq!(moved.reprogram_count, 0);
}

#[tokio::test]
async fn accept_offer_wrong_client_rejected() {
    let s = salon("accept_wrong_client.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    let waiting_client = Ulid::new();
    s.engine
        .join_waitlist(
            Ulid::new(),
            waiting_client,
            s.cut,
            date(MONDAY),
            date(MONDAY),
            None,
            None,
            early(),
        )
        .await
        .unwrap();
    let outcome = s.engine.cancel_appointment(appt.id, Actor::Staff, None, early()).await.unwrap();
    let offer = &outcome.offers[0];

    let result = s.engine.accept_offer(offer.id, Ulid::new(), early()).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

// ── Expiry sweep ─────────────────────────────────────────────────

#[tokio::test]
async fn sweep_cancels_elapsed_pending() {
    let s = salon("sweep_elapsed.wal").await;
    let requested = s.book(MONDAY, "10:00").await;
    let approved = s.book(MONDAY, "11:00").await;
    s.engine.approve_appointment(approved.id, early()).await.unwrap();
    let confirmed = s.book(MONDAY, "12:00").await;
    s.confirm(confirmed.id).await;

    let tuesday = dt("2026-03-03", "09:00");
    let swept = s.engine.sweep_expired(tuesday).await.unwrap();
    assert_eq!(swept.len(), 2);
    assert!(swept.contains(&requested.id));
    assert!(swept.contains(&approved.id));

    // Confirmed appointments are never auto-expired.
    let kept = s.engine.get_appointment(confirmed.id).await.unwrap();
    assert_eq!(kept.state, AppointmentState::Confirmed);

    let row = s.engine.get_appointment(requested.id).await.unwrap();
    assert_eq!(row.state, AppointmentState::Cancelled);
    assert!(row.cancel_reason.is_some());
}

#[tokio::test]
async fn sweep_cancels_lapsed_deposit_and_reclaims() {
    let s = salon("sweep_deposit.wal").await;
    let appt = s.book(MONDAY, "10:00").await;
    s.engine.approve_appointment(appt.id, early()).await.unwrap();

    s.engine
        .join_waitlist(
            Ulid::new(),
            Ulid::new(),
            s.cut,
            date(MONDAY),
            date(MONDAY),
            None,
            None,
            early(),
        )
        .await
        .unwrap();

    // 25 hours later the 24-hour deposit window has lapsed, while the
    // Monday slot itself is still in the future.
    let lapse = early() + chrono::Duration::hours(25);
    let swept = s.engine.sweep_expired(lapse).await.unwrap();
    assert_eq!(swept, vec![appt.id]);

    // The freed future slot went straight to the waitlist.
    let offers = s.engine.list_offers(None).await;
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].date, date(MONDAY));
}

// ── Durability ───────────────────────────────────────────────────

#[tokio::test]
async fn replay_restores_full_state() {
    let path = test_wal_path("replay_state.wal");
    let staff;
    let cut;
    let appt_id;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        staff = Ulid::new();
        cut = Ulid::new();
        engine.add_staff(staff, "Yani".into()).await.unwrap();
        engine
            .add_service(cut, "Cut".into(), ServiceKind::Complement, Some(60), 8_000)
            .await
            .unwrap();
        engine
            .add_rule(WeeklyRule {
                id: Ulid::new(),
                staff_id: None,
                weekday: 0,
                start: time("10:00"),
                end: time("14:00"),
                valid_from: None,
                valid_to: None,
                color_design: true,
                complement: true,
                active: true,
            })
            .await
            .unwrap();
        engine
            .update_policy(PolicyPatch { cutoff_hours: Some(24), ..Default::default() })
            .await
            .unwrap();
        let appt = engine
            .request_appointment(
                Ulid::new(),
                Ulid::new(),
                Some(staff),
                &[cut],
                date(MONDAY),
                time("10:00"),
                early(),
            )
            .await
            .unwrap();
        appt_id = appt.id;
        engine.approve_appointment(appt_id, early()).await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let appt = engine.get_appointment(appt_id).await.unwrap();
    assert_eq!(appt.state, AppointmentState::AwaitingDeposit);
    assert!(appt.deposit_deadline.is_some());
    assert_eq!(engine.policy().await.cutoff_hours, 24);
    // The restored occupancy still blocks the slot.
    let starts: Vec<NaiveTime> = engine
        .query_availability(cut, Some(date(MONDAY)), early())
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.start)
        .collect();
    assert!(!starts.contains(&time("10:00")));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let s = {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine
    };
    let staff = Ulid::new();
    s.add_staff(staff, "Yani".into()).await.unwrap();
    // Churn that compaction should fold away.
    for _ in 0..20 {
        let id = Ulid::new();
        s.add_staff(id, "temp".into()).await.unwrap();
        s.remove_staff(id).await.unwrap();
    }
    s.compact_wal().await.unwrap();
    drop(s);

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let staff_rows = engine.list_staff().await;
    assert_eq!(staff_rows.len(), 1);
    assert_eq!(staff_rows[0].id, staff);
}

// ── Policy ───────────────────────────────────────────────────────

#[tokio::test]
async fn policy_update_is_bounded() {
    let s = salon("policy_bounds.wal").await;
    let result = s
        .engine
        .update_policy(PolicyPatch { slot_minutes: Some(0), ..Default::default() })
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));

    let updated = s
        .engine
        .update_policy(PolicyPatch {
            slot_minutes: Some(30),
            max_reprograms: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.slot_minutes, 30);
    assert_eq!(updated.max_reprograms, 1);
    // Untouched fields keep their values.
    assert_eq!(updated.cutoff_hours, 48);
}
