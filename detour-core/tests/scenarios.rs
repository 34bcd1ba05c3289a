use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use detour_core::{
    Activity, ActivityCategory, Booking, ChangeSnapshot, ChangeType, CheckOutcome, Commute, CommuteMode,
    ControllerError, DaySchedule, ExecutionController, ReshuffleConfig, ReshuffleEngine, ReshuffleResult,
    ReshuffleStrategy, ScheduleChange, ScheduleMutator, TimeSlot, TriggerContext, TriggerEvent, TriggerOrigin,
    TriggerSeverity, TripSchedule,
};

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// Lisbon is UTC+1 in May.
fn lisbon(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 2, h - 1, m, 0).unwrap()
}

fn museum_day() -> DaySchedule {
    DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap())
        .with_slot(
            TimeSlot::new("museum", t(9, 0), t(11, 0))
                .with_activity(Activity::new("gulbenkian", "Gulbenkian Museum", ActivityCategory::Museum, 120)),
        )
        .with_slot(
            TimeSlot::new("park", t(11, 30), t(12, 30))
                .with_activity(Activity::new("estrela", "Estrela Garden", ActivityCategory::Park, 60))
                .with_commute(Commute::new(CommuteMode::Walk, 15)),
        )
}

fn trip(day: DaySchedule) -> TripSchedule {
    TripSchedule::new("lisbon-2026", "Lisbon", "Europe/Lisbon").with_day(day)
}

fn running_late(id: &str, slot: &str, minutes: i32, at: DateTime<Utc>) -> TriggerEvent {
    TriggerEvent::new(
        TriggerContext::RunningLate {
            delay_minutes: minutes,
            reason: Some("metro stopped".into()),
        },
        TriggerSeverity::Medium,
        TriggerOrigin::User,
        at,
    )
    .with_id(id)
    .with_slot(slot)
}

fn park_shift(trigger: &str, minute: u32) -> ReshuffleResult {
    let mut r = ReshuffleResult::no_action(trigger, "push the park back", 0.9);
    r.id = format!("rs-{trigger}");
    r.strategy = ReshuffleStrategy::CompressBuffer;
    r.changes = vec![ScheduleChange {
        id: format!("chg-{trigger}"),
        change_type: ChangeType::TimeShift,
        slot_id: "park".into(),
        activity_name: "Estrela Garden".into(),
        description: "shift".into(),
        before: ChangeSnapshot::window(t(11, 30), t(12, 30)),
        after: ChangeSnapshot {
            start_time: Some(t(11, 30 + minute)),
            ..ChangeSnapshot::default()
        },
    }];
    r.requires_confirmation = false;
    r.auto_apply_in = Some(20);
    r.can_undo = true;
    r
}

#[test]
fn late_museum_visit_is_shortened() {
    let engine = ReshuffleEngine::new(ReshuffleConfig::default());
    let sched = trip(museum_day());
    let trigger = running_late("late-45", "museum", 45, lisbon(8, 50));

    let impact = engine.analyze(&trigger, &sched);
    let results = engine.propose(&impact, &sched);
    let best = &results[0];

    assert_eq!(best.strategy, ReshuffleStrategy::ShortenActivity);
    let museum = best.changes.iter().find(|c| c.slot_id == "museum").unwrap();
    assert!(museum.after.duration.unwrap() >= 84);
    assert!(!best.requires_confirmation);

    let applied = ScheduleMutator.apply(&sched, &best.changes).unwrap();
    let park = applied.schedule.find_slot("park").unwrap().1;
    assert_eq!(park.start, t(11, 30));
}

#[test]
fn late_museum_visit_needs_confirmation_with_booking_downstream() {
    let engine = ReshuffleEngine::new(ReshuffleConfig::default());
    let day = museum_day().with_slot(
        TimeSlot::new("dinner", t(20, 0), t(22, 0))
            .with_activity(Activity::new("belcanto", "Belcanto", ActivityCategory::Restaurant, 120))
            .with_booking(Booking::new("BEL-7731").with_grace(15)),
    );
    let sched = trip(day);
    let trigger = running_late("late-45", "museum", 45, lisbon(8, 50));

    let results = engine.propose(&engine.analyze(&trigger, &sched), &sched);
    let best = &results[0];
    assert_eq!(best.strategy, ReshuffleStrategy::ShortenActivity);
    assert!(best.requires_confirmation);
    assert!(best.auto_apply_in.is_none());
}

#[test]
fn closed_non_refundable_restaurant_is_cancelled_gracefully() {
    let engine = ReshuffleEngine::new(ReshuffleConfig::default());
    let day = DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap())
        .with_slot(
            TimeSlot::new("museum", t(10, 0), t(12, 0))
                .with_activity(Activity::new("tiles", "Tile Museum", ActivityCategory::Museum, 120)),
        )
        .with_slot(
            TimeSlot::new("lunch", t(12, 30), t(14, 0))
                .with_activity(Activity::new("taberna", "Taberna da Rua", ActivityCategory::Restaurant, 90))
                // Only alternative overruns the slot.
                .with_alternative(Activity::new("cervejaria", "Cervejaria Ramiro", ActivityCategory::Restaurant, 100))
                .with_booking(Booking::new("TAB-2291").non_refundable()),
        );
    let sched = trip(day);
    let trigger = TriggerEvent::new(
        TriggerContext::Closure {
            venue: "Taberna da Rua".into(),
            reason: "kitchen fire".into(),
            reopens_at: None,
        },
        TriggerSeverity::High,
        TriggerOrigin::Venue,
        lisbon(9, 0),
    )
    .with_id("closure-1")
    .with_slot("lunch");

    let results = engine.propose(&engine.analyze(&trigger, &sched), &sched);
    let best = &results[0];
    assert_eq!(best.strategy, ReshuffleStrategy::CancelGracefully);
    assert!(best.requires_confirmation);
    assert!(best.explanation.contains("TAB-2291"));
    assert!(
        best.changes
            .iter()
            .any(|c| c.change_type == ChangeType::ActivityRemoved && c.slot_id == "lunch")
    );
}

fn closed_booked_lunch(alternative: Activity) -> (TripSchedule, TriggerEvent) {
    let day = DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap())
        .with_slot(
            TimeSlot::new("museum", t(10, 0), t(12, 0))
                .with_activity(Activity::new("tiles", "Tile Museum", ActivityCategory::Museum, 120)),
        )
        .with_slot(
            TimeSlot::new("lunch", t(12, 30), t(14, 0))
                .with_activity(Activity::new("taberna", "Taberna da Rua", ActivityCategory::Restaurant, 90))
                .with_alternative(alternative)
                .with_booking(Booking::new("TAB-2291").non_refundable()),
        );
    let trigger = TriggerEvent::new(
        TriggerContext::Closure {
            venue: "Taberna da Rua".into(),
            reason: "kitchen fire".into(),
            reopens_at: None,
        },
        TriggerSeverity::High,
        TriggerOrigin::Venue,
        lisbon(9, 0),
    )
    .with_id("closure-2")
    .with_slot("lunch");
    (trip(day), trigger)
}

#[test]
fn closed_booked_restaurant_with_comfortable_same_kind_alternative_is_replaced() {
    let engine = ReshuffleEngine::new(ReshuffleConfig::default());
    let (sched, trigger) =
        closed_booked_lunch(Activity::new("cervejaria", "Cervejaria Ramiro", ActivityCategory::Restaurant, 80));

    let results = engine.propose(&engine.analyze(&trigger, &sched), &sched);
    let best = &results[0];
    assert_eq!(best.strategy, ReshuffleStrategy::ReplaceActivity);
    // The non-refundable reservation still needs a human yes.
    assert!(best.requires_confirmation);
    assert!(best.explanation.contains("TAB-2291"));
    assert!(best.alternatives.iter().any(|r| r.strategy == ReshuffleStrategy::CancelGracefully));

    let applied = ScheduleMutator.apply(&sched, &best.changes).unwrap();
    let lunch = applied.schedule.find_slot("lunch").unwrap().1;
    assert_eq!(lunch.activity.as_ref().unwrap().id, "cervejaria");
    assert!(lunch.booking.is_none());
}

#[test]
fn closed_booked_restaurant_is_not_swapped_for_another_kind_of_venue() {
    let engine = ReshuffleEngine::new(ReshuffleConfig::default());
    let (sched, trigger) = closed_booked_lunch(Activity::new("shop", "Gift Shop", ActivityCategory::Shopping, 90));

    let results = engine.propose(&engine.analyze(&trigger, &sched), &sched);
    assert_eq!(results[0].strategy, ReshuffleStrategy::CancelGracefully);
}

#[test]
fn two_applies_then_two_undos_restore_the_original() {
    let engine = ReshuffleEngine::new(ReshuffleConfig::default());
    let original = trip(museum_day());
    let mut ctl = ExecutionController::new(original.clone(), ReshuffleConfig::default());

    for trigger in [
        running_late("late-museum", "museum", 45, lisbon(8, 50)),
        running_late("late-park", "park", 40, lisbon(11, 0)),
    ] {
        let ticket = ctl.begin_processing().unwrap();
        let response = engine.check(&[trigger], &ticket.schedule);
        let outcome = ctl
            .handle_trigger_check_response(ticket, response, lisbon(11, 0))
            .unwrap();
        assert_ne!(outcome, CheckOutcome::NothingToDo);
        ctl.confirm_pending(lisbon(11, 0)).unwrap();
    }
    assert_ne!(ctl.current_schedule(), &original);
    assert_eq!(ctl.undo_depth(), 2);

    ctl.undo(lisbon(11, 5)).unwrap();
    ctl.undo(lisbon(11, 5)).unwrap();
    assert_eq!(ctl.current_schedule(), &original);
    assert!(!ctl.can_undo());
}

#[test]
fn rejecting_during_countdown_changes_nothing() {
    let sched = trip(museum_day());
    let mut ctl = ExecutionController::new(sched.clone(), ReshuffleConfig::default());
    let ticket = ctl.begin_processing().unwrap();
    let response = detour_core::CheckTriggersResponse {
        triggers_detected: vec![],
        analyses: vec![],
        suggested_actions: vec![park_shift("t1", 10)],
        schedule_status: detour_core::ScheduleStatus::MinorDelay,
        next_check_in_seconds: 900,
        summary: String::new(),
    };
    let started = lisbon(9, 0);
    let CheckOutcome::CountdownStarted { version, seconds } =
        ctl.handle_trigger_check_response(ticket, response, started).unwrap()
    else {
        panic!("expected a countdown");
    };
    assert_eq!(seconds, 20);

    // Second 5: the traveller says no.
    ctl.reject_reshuffle().unwrap();
    // Second 20: the timer fires anyway.
    let err = ctl
        .fire_auto_apply(version, started + Duration::seconds(20))
        .unwrap_err();
    assert!(matches!(err, ControllerError::CountdownSuperseded { .. }));
    assert_eq!(ctl.current_schedule(), &sched);
    assert_eq!(ctl.history().count(), 0);
}

#[test]
fn eleventh_reshuffle_evicts_the_oldest_undo_entry() {
    let mut ctl = ExecutionController::new(trip(museum_day()), ReshuffleConfig::default());
    assert_eq!(ctl.config().undo.max_history_size, 10);
    let now = lisbon(9, 0);

    let mut event_ids = Vec::new();
    for i in 1..=11u32 {
        let result = park_shift(&format!("t{i}"), i);
        let next = ScheduleMutator
            .apply(ctl.current_schedule(), &result.changes)
            .unwrap()
            .schedule;
        let event = ctl.apply_reshuffle(result, next, true, now).unwrap();
        event_ids.push(event.id);
        if i == 10 {
            assert_eq!(ctl.undo_depth(), 10);
        }
    }

    assert_eq!(ctl.undo_depth(), 10);
    let on_stack = ctl.undo_event_ids();
    assert_eq!(on_stack.first().copied(), Some(event_ids[1].as_str()));
    assert_eq!(on_stack.last().copied(), Some(event_ids[10].as_str()));
    let oldest = ctl.history().next().unwrap();
    assert_eq!(oldest.id, event_ids[0]);
    assert!(!oldest.undo_available);
}
