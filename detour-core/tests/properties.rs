use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use detour_core::{
    Activity, ActivityCategory, Booking, ChangeSnapshot, ChangeType, CheckOutcome, CheckTriggersResponse, Commute,
    CommuteMode, DaySchedule, ExecutionController, ReshuffleConfig, ReshuffleEngine, ReshuffleResult,
    ReshuffleStrategy, RiskLevel, ScheduleChange, ScheduleMutator, ScheduleStatus, TimeSlot, TriggerContext,
    TriggerEvent, TriggerOrigin, TriggerSeverity, TripSchedule,
};
use proptest::prelude::*;

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn at_local(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 2, h - 1, m, 0).unwrap()
}

fn busy_day() -> TripSchedule {
    TripSchedule::new("trip", "Lisbon", "Europe/Lisbon")
        .with_day(
            DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap())
                .with_slot(
                    TimeSlot::new("museum", t(9, 0), t(11, 0))
                        .with_activity(Activity::new("m", "Gulbenkian", ActivityCategory::Museum, 120)),
                )
                .with_slot(
                    TimeSlot::new("cafe", t(11, 20), t(11, 50))
                        .with_activity(Activity::new("c", "Pasteis de Belem", ActivityCategory::Cafe, 30))
                        .with_commute(Commute::new(CommuteMode::Transit, 15)),
                )
                .with_slot(
                    TimeSlot::new("viewpoint", t(12, 15), t(13, 0))
                        .with_activity(Activity::new("v", "Miradouro", ActivityCategory::Viewpoint, 45))
                        .with_commute(Commute::new(CommuteMode::Walk, 20)),
                )
                .with_slot(
                    TimeSlot::new("lunch", t(13, 30), t(15, 0))
                        .with_activity(Activity::new("l", "Taberna", ActivityCategory::Restaurant, 90))
                        .with_commute(Commute::new(CommuteMode::Walk, 10))
                        .with_booking(Booking::new("TAB-1").with_grace(15)),
                )
                .with_slot(
                    TimeSlot::new("market", t(16, 0), t(17, 30))
                        .with_activity(Activity::new("k", "Time Out Market", ActivityCategory::Market, 90))
                        .with_commute(Commute::new(CommuteMode::Taxi, 15)),
                ),
        )
        .with_day(DaySchedule::new(2, NaiveDate::from_ymd_opt(2026, 5, 3).unwrap()))
}

fn late(slot: &str, minutes: i32) -> TriggerEvent {
    TriggerEvent::new(
        TriggerContext::RunningLate {
            delay_minutes: minutes,
            reason: None,
        },
        TriggerSeverity::Medium,
        TriggerOrigin::User,
        at_local(8, 45),
    )
    .with_id("trg-prop")
    .with_slot(slot)
}

fn slot_ids() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("museum"), Just("cafe"), Just("viewpoint"), Just("lunch"), Just("market")]
}

fn no_overlap(schedule: &TripSchedule) -> bool {
    schedule.days.iter().all(|day| {
        day.slots
            .iter()
            .enumerate()
            .all(|(i, a)| day.slots.iter().skip(i + 1).all(|b| !a.overlaps(b)))
    })
}

proptest! {
    #[test]
    fn smaller_buffer_never_lowers_risk(a in -120i32..240, b in -120i32..240) {
        let (big, small) = if a >= b { (a, b) } else { (b, a) };
        prop_assert!(RiskLevel::from_buffer(small, 30, 10) >= RiskLevel::from_buffer(big, 30, 10));
    }

    #[test]
    fn analysis_is_repeatable(slot in slot_ids(), minutes in 1i32..180) {
        let engine = ReshuffleEngine::new(ReshuffleConfig::default());
        let sched = busy_day();
        let trigger = late(slot, minutes);
        prop_assert_eq!(engine.analyze(&trigger, &sched), engine.analyze(&trigger, &sched));
    }

    #[test]
    fn delays_within_silent_buffer_only_offer_no_action(slot in slot_ids(), minutes in 1i32..=10) {
        let engine = ReshuffleEngine::new(ReshuffleConfig::default());
        let sched = busy_day();
        let results = engine.propose(&engine.analyze(&late(slot, minutes), &sched), &sched);
        prop_assert!(results.iter().all(|r| r.strategy == ReshuffleStrategy::NoAction));
        prop_assert!(results[0].alternatives.iter().all(|r| r.is_no_action()));
    }

    #[test]
    fn every_proposal_applies_without_overlap(slot in slot_ids(), minutes in 11i32..240) {
        let engine = ReshuffleEngine::new(ReshuffleConfig::default());
        let sched = busy_day();
        let results = engine.propose(&engine.analyze(&late(slot, minutes), &sched), &sched);
        prop_assert!(!results.is_empty());
        for result in &results {
            let applied = ScheduleMutator.apply(&sched, &result.changes);
            prop_assert!(applied.is_ok(), "{} failed: {:?}", result.strategy.as_str(), applied.err());
            if let Ok(outcome) = applied {
                prop_assert!(no_overlap(&outcome.schedule));
            }
        }
    }

    #[test]
    fn arbitrary_shifts_never_leave_overlaps(slot in slot_ids(), start in 0u32..(23 * 60), len in 1i32..240) {
        let sched = busy_day();
        let change = ScheduleChange {
            id: "chg".into(),
            change_type: ChangeType::TimeShift,
            slot_id: slot.into(),
            activity_name: String::new(),
            description: String::new(),
            before: ChangeSnapshot::default(),
            after: ChangeSnapshot {
                start_time: Some(t(start / 60, start % 60)),
                duration: Some(len),
                ..ChangeSnapshot::default()
            },
        };
        if let Ok(outcome) = ScheduleMutator.apply(&sched, &[change]) {
            prop_assert!(no_overlap(&outcome.schedule));
        }
    }

    #[test]
    fn undo_restores_the_exact_prior_schedule(slot in slot_ids(), minutes in 11i32..180) {
        let engine = ReshuffleEngine::new(ReshuffleConfig::default());
        let original = busy_day();
        let mut ctl = ExecutionController::new(original.clone(), ReshuffleConfig::default());

        let ticket = ctl.begin_processing().unwrap();
        let response = engine.check(&[late(slot, minutes)], &ticket.schedule);
        let outcome = ctl.handle_trigger_check_response(ticket, response, at_local(9, 0)).unwrap();
        if outcome != CheckOutcome::NothingToDo {
            ctl.confirm_pending(at_local(9, 0)).unwrap();
            ctl.undo(at_local(9, 1)).unwrap();
        }
        prop_assert_eq!(ctl.current_schedule(), &original);
    }

    #[test]
    fn confirmation_gate_holds_for_any_countdown(requires in any::<bool>(), seconds in 1u64..120) {
        let original = busy_day();
        let mut ctl = ExecutionController::new(original.clone(), ReshuffleConfig::default());
        let mut result = ReshuffleResult::no_action("trg", "drop the market", 0.9);
        result.id = "rs-trg".into();
        result.strategy = ReshuffleStrategy::SkipActivity;
        result.changes = vec![ScheduleChange {
            id: "chg".into(),
            change_type: ChangeType::ActivityRemoved,
            slot_id: "market".into(),
            activity_name: String::new(),
            description: String::new(),
            before: ChangeSnapshot::default(),
            after: ChangeSnapshot::default(),
        }];
        result.requires_confirmation = requires;
        result.auto_apply_in = Some(seconds);
        result.can_undo = true;

        let ticket = ctl.begin_processing().unwrap();
        let response = CheckTriggersResponse {
            triggers_detected: vec![],
            analyses: vec![],
            suggested_actions: vec![result],
            schedule_status: ScheduleStatus::MinorDelay,
            next_check_in_seconds: 900,
            summary: String::new(),
        };
        ctl.handle_trigger_check_response(ticket, response, at_local(9, 0)).unwrap();
        let fired = ctl.fire_auto_apply(ctl.version(), at_local(9, 2));
        if requires {
            prop_assert!(fired.is_err());
            prop_assert_eq!(ctl.current_schedule(), &original);
        } else {
            prop_assert!(fired.is_ok());
        }
    }
}
