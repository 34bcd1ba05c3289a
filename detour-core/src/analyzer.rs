//! Impact Analyzer: what in the remaining schedule a trigger puts at risk.
//!
//! `analyze` is a pure function of its inputs. The analysis timestamp is the
//! trigger's detection time, so two calls with the same trigger and schedule
//! produce equal results.

use chrono::{NaiveDateTime, NaiveTime};
use tracing::{debug, warn};

use crate::config::{DayWindow, ReshuffleConfig};
use crate::flexibility::{ActivityFlexibility, BookingConstraint, FlexibilityTable};
use crate::impact::{
    AffectedActivity, BookingRisk, CascadeEffect, DelayOrigin, ImpactAnalysis, ImpactType, RecoveryAction,
    RecoveryOption, RiskLevel, Urgency,
};
use crate::reflow::{find_gap, reflow, Adjustments, Planned};
use crate::schedule::{DaySchedule, TimeSlot, TripSchedule};
use crate::time::{minute_of_day, to_trip_local, MINUTES_PER_DAY};
use crate::trigger::{TriggerContext, TriggerEvent, TriggerSeverity, UserRequestAction};

/// Above this summed severity an impact is never auto-resolved.
const LOW_IMPACT_TOTAL_SEVERITY: u32 = 120;

/// Minutes before impact under which urgency is `within_hour`.
const WITHIN_HOUR_MINUTES: i32 = 60;

pub struct ImpactAnalyzer<'a> {
    config: &'a ReshuffleConfig,
}

/// Inputs shared by every per-trigger pass.
struct Scope<'s> {
    trigger: &'s TriggerEvent,
    schedule: &'s TripSchedule,
    flexibility: &'s FlexibilityTable,
    bookings: &'s [BookingConstraint],
    local: NaiveDateTime,
}

impl Scope<'_> {
    fn booking(&self, slot_id: &str) -> Option<&BookingConstraint> {
        self.bookings.iter().find(|b| b.slot_id == slot_id)
    }

    /// Minute of `day` from which slots still lie ahead of the traveller.
    fn now_minute_on(&self, day: &DaySchedule) -> i32 {
        let today = self.local.date();
        if day.date > today {
            0
        } else if day.date == today {
            minute_of_day(self.local.time())
        } else {
            MINUTES_PER_DAY
        }
    }

    /// Remaining slot positions on `day`.
    fn remaining(&self, day: &DaySchedule) -> Vec<usize> {
        let now = self.now_minute_on(day);
        day.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| minute_of_day(s.end) > now)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Working state for one analysis.
#[derive(Default)]
struct Findings {
    affected: Vec<AffectedActivity>,
    bookings: Vec<BookingRisk>,
    delay_origin: Option<DelayOrigin>,
    total_delay: i32,
    /// Latest projected end on the day, in minutes after local midnight.
    projected_day_end: Option<i32>,
    first_impact_minute: Option<i32>,
}

impl<'a> ImpactAnalyzer<'a> {
    pub fn new(config: &'a ReshuffleConfig) -> Self {
        Self { config }
    }

    pub fn analyze(
        &self,
        trigger: &TriggerEvent,
        schedule: &TripSchedule,
        flexibility: &FlexibilityTable,
        bookings: &[BookingConstraint],
    ) -> ImpactAnalysis {
        let local = match to_trip_local(trigger.detected_at, &schedule.timezone) {
            Ok(local) => local,
            Err(e) => {
                warn!(trip = %schedule.trip_id, error = %e, "falling back to UTC for trip clock");
                trigger.detected_at.naive_utc()
            }
        };

        let scope = Scope {
            trigger,
            schedule,
            flexibility,
            bookings,
            local,
        };

        let day = self.target_day(&scope);
        let findings = match day {
            Some(day) => self.findings_for(&scope, day),
            None => Findings::default(),
        };

        let remaining_today = day.map(|d| scope.remaining(d).len()).unwrap_or(0);
        let cascade_effect = self.cascade(&findings, remaining_today);
        let urgency = self.urgency(&scope, day, &findings);

        let total_severity: u32 = findings.affected.iter().map(|a| a.severity as u32).sum();
        let can_auto_resolve = !findings.affected.is_empty()
            && findings.affected.iter().all(|a| a.recoverable)
            && total_severity < LOW_IMPACT_TOTAL_SEVERITY;

        let summary = summarize(trigger, &findings);
        debug!(
            trigger = %trigger.id,
            affected = findings.affected.len(),
            bookings = findings.bookings.len(),
            total_delay = findings.total_delay,
            "impact analyzed"
        );

        ImpactAnalysis {
            trigger_id: trigger.id.clone(),
            trigger_type: trigger.trigger_type,
            trigger_severity: trigger.severity,
            analyzed_at: trigger.detected_at,
            local_time: local,
            day_number: day.map(|d| d.day_number),
            delay_origin: findings.delay_origin.clone(),
            affected_activities: findings.affected,
            bookings_at_risk: findings.bookings,
            cascade_effect,
            urgency,
            total_delay_minutes: findings.total_delay,
            can_auto_resolve,
            summary,
        }
    }

    fn target_day<'s>(&self, scope: &Scope<'s>) -> Option<&'s DaySchedule> {
        let schedule = scope.schedule;
        if let TriggerContext::WeatherChange {
            day_number: Some(n), ..
        } = scope.trigger.context
        {
            return schedule.day(n);
        }
        let seeded = scope
            .trigger
            .affected_slot_ids
            .iter()
            .find_map(|id| schedule.find_slot(id))
            .and_then(|(n, _)| schedule.day(n));
        seeded
            .or_else(|| schedule.day_for_date(scope.local.date()))
            .or_else(|| schedule.days.first().map(|d| d.as_ref()))
    }

    fn findings_for(&self, scope: &Scope<'_>, day: &DaySchedule) -> Findings {
        match &scope.trigger.context {
            TriggerContext::RunningLate { .. }
            | TriggerContext::TransportDelay { .. }
            | TriggerContext::UserState { .. } => self.delay_findings(scope, day),
            TriggerContext::UserRequest { action, .. } => match action {
                UserRequestAction::Extend { .. } | UserRequestAction::SlowDown { .. } => {
                    self.delay_findings(scope, day)
                }
                UserRequestAction::Skip | UserRequestAction::Replace => self.request_findings(scope, day, *action),
            },
            TriggerContext::WeatherChange {
                condition,
                precipitation_probability,
                temperature_c,
                wind_kph,
                ..
            } => {
                let w = &self.config.weather;
                if !w.is_adverse(*condition, *precipitation_probability, *temperature_c, *wind_kph) {
                    debug!(trigger = %scope.trigger.id, "weather within tolerance");
                    return Findings::default();
                }
                self.weather_findings(scope, day, condition.is_severe())
            }
            TriggerContext::Closure { reopens_at, .. } => self.closure_findings(scope, day, *reopens_at),
        }
    }

    /// First named slot on `day`, or the first one still ahead of the traveller.
    fn seed_position(&self, scope: &Scope<'_>, day: &DaySchedule, upcoming_only: bool) -> Option<usize> {
        if let Some(pos) = scope.trigger.affected_slot_ids.iter().find_map(|id| day.position(id)) {
            return Some(pos);
        }
        let now = scope.now_minute_on(day);
        if upcoming_only {
            day.slots.iter().position(|s| minute_of_day(s.start) >= now)
        } else {
            day.slots.iter().position(|s| minute_of_day(s.end) > now)
        }
    }

    /// Where the delay enters the day, as (position of the next slot, minute the
    /// traveller is free to head there).
    fn delay_entry(&self, scope: &Scope<'_>, day: &DaySchedule) -> Option<(usize, i32)> {
        let d = scope.trigger.delay_minutes();
        if d <= 0 {
            return None;
        }
        let now = scope.now_minute_on(day);
        match &scope.trigger.context {
            TriggerContext::RunningLate { .. } => {
                let pos = self.seed_position(scope, day, false)?;
                let seed = &day.slots[pos];
                Some((pos, minute_of_day(seed.start) + d - seed.commute_minutes()))
            }
            TriggerContext::TransportDelay { .. } => {
                let pos = self.seed_position(scope, day, true)?;
                let seed = &day.slots[pos];
                let departs = match pos.checked_sub(1) {
                    Some(prev) => minute_of_day(day.slots[prev].end),
                    None => minute_of_day(seed.start) - seed.commute_minutes(),
                };
                Some((pos, departs + d))
            }
            TriggerContext::UserRequest {
                action: UserRequestAction::Extend { .. },
                ..
            } => {
                let pos = self.seed_position(scope, day, false)?;
                let extended_end = minute_of_day(day.slots[pos].end) + d;
                if pos + 1 >= day.slots.len() {
                    return None;
                }
                Some((pos + 1, extended_end))
            }
            _ => {
                // A break (or deliberate slow-down) taken before the next slot.
                let pos = self.seed_position(scope, day, true)?;
                let seed = &day.slots[pos];
                let leaves = (minute_of_day(seed.start) - seed.commute_minutes()).max(now);
                Some((pos, leaves + d))
            }
        }
    }

    fn delay_findings(&self, scope: &Scope<'_>, day: &DaySchedule) -> Findings {
        let mut findings = Findings::default();
        let Some((from, free_at)) = self.delay_entry(scope, day) else {
            return findings;
        };
        let d = scope.trigger.delay_minutes();

        let baseline_free_at = match from.checked_sub(1) {
            Some(prev) => minute_of_day(day.slots[prev].end),
            None => minute_of_day(day.slots[from].start) - day.slots[from].commute_minutes(),
        };
        let projected = reflow(day, from, free_at, &Adjustments::default());
        let baseline = reflow(day, from, baseline_free_at.min(free_at), &Adjustments::default());

        let extended_slot_id = match scope.trigger.context {
            TriggerContext::UserRequest {
                action: UserRequestAction::Extend { .. },
                ..
            } => from.checked_sub(1).map(|p| day.slots[p].id.clone()),
            _ => None,
        };
        findings.delay_origin = Some(DelayOrigin {
            slot_id: day.slots[from].id.clone(),
            free_at_minute: free_at,
            extended_slot_id,
        });
        findings.projected_day_end = projected.last().map(|p| p.end);

        for (offset, planned) in projected.iter().enumerate() {
            let slot = &day.slots[from + offset];
            let arrival_slipped = baseline
                .get(offset)
                .is_some_and(|b| planned.arrival > b.arrival);

            if let Some(constraint) = scope.booking(&slot.id) {
                if arrival_slipped || planned.start_shift() > 0 {
                    findings.bookings.push(self.booking_risk(scope, constraint, planned.arrival));
                }
            }

            if planned.start_shift() <= 0 && offset > 0 {
                break;
            }

            findings.first_impact_minute.get_or_insert(planned.original_start);
            findings.total_delay = findings.total_delay.max(planned.start_shift());

            let upstream = &projected[..offset];
            let risk = findings
                .bookings
                .iter()
                .find(|b| b.slot_id == slot.id)
                .map(|b| b.risk_level);
            findings
                .affected
                .push(self.delayed_activity(scope, day, from + offset, planned, upstream, risk, d));
        }

        findings
    }

    #[allow(clippy::too_many_arguments)]
    fn delayed_activity(
        &self,
        scope: &Scope<'_>,
        day: &DaySchedule,
        pos: usize,
        planned: &Planned,
        upstream: &[Planned],
        risk: Option<RiskLevel>,
        trigger_delay: i32,
    ) -> AffectedActivity {
        let slot = &day.slots[pos];
        let flex = scope.flexibility.for_slot(slot);
        let shift = planned.start_shift().max(0);
        let max_shorten = flex.max_shorten_minutes(slot.duration_minutes());

        let impact_type = match risk {
            Some(RiskLevel::WillMiss) => ImpactType::Impossible,
            Some(RiskLevel::AtRisk) | Some(RiskLevel::Tight) => ImpactType::AtRisk,
            _ if planned.end > MINUTES_PER_DAY => ImpactType::Impossible,
            _ if shift <= self.config.thresholds.silent_buffer => ImpactType::Delayed,
            _ if max_shorten > 0 => ImpactType::Shortened,
            _ => ImpactType::Delayed,
        };

        let mut severity = if impact_type == ImpactType::Impossible && risk.is_none() {
            90
        } else {
            let scale = (2 * self.config.thresholds.auto_reshuffle).max(trigger_delay).max(1);
            (shift * 100 / scale).clamp(0, 100) as u8
        };
        severity = severity.max(match risk {
            Some(RiskLevel::Tight) => 50,
            Some(RiskLevel::AtRisk) => 70,
            Some(RiskLevel::WillMiss) => 100,
            _ => 0,
        });
        if slot.is_must_see() {
            severity = severity.saturating_add(10).min(100);
        }

        let mut options = Vec::new();
        if let Some(commute) = slot.commute_from_previous.as_ref() {
            let saved = commute.compressible_minutes();
            if saved > 0 {
                options.push(RecoveryOption {
                    action: RecoveryAction::Compress,
                    description: format!("Take a faster route to {}", slot.activity_name()),
                    time_saved_minutes: saved,
                    tradeoff: "Higher travel cost".to_string(),
                    can_recover: saved >= shift,
                });
            }
        }
        if max_shorten > 0 && slot.booking.is_none() {
            options.push(RecoveryOption {
                action: RecoveryAction::Shorten,
                description: format!("Spend up to {max_shorten} fewer minutes at {}", slot.activity_name()),
                time_saved_minutes: max_shorten,
                tradeoff: "Less time at the activity".to_string(),
                can_recover: max_shorten >= shift,
            });
        }
        if slot.booking.is_some() && !upstream.is_empty() {
            let needed = match scope.booking(&slot.id) {
                Some(c) => planned.arrival - minute_of_day(c.latest_arrival) + self.config.booking_protection.min_buffer_minutes,
                None => shift,
            };
            let available = upstream_slack(scope, day, upstream);
            if available > 0 {
                options.push(RecoveryOption {
                    action: RecoveryAction::Shorten,
                    description: format!("Trim earlier stops to reach {} on time", slot.activity_name()),
                    time_saved_minutes: available,
                    tradeoff: "Less time at earlier activities".to_string(),
                    can_recover: available >= needed,
                });
            }
        }
        if flex.can_skip {
            options.push(skip_option(slot));
        }
        if let Some(option) = defer_option(scope.schedule, day, slot, &flex, &self.config.day_window) {
            options.push(option);
        }

        let recoverable = options.iter().any(|o| o.can_recover);
        AffectedActivity {
            slot_id: slot.id.clone(),
            day_number: day.day_number,
            activity_name: slot.activity_name().to_string(),
            impact_type,
            severity,
            delay_minutes: shift,
            recoverable,
            recovery_options: options,
        }
    }

    fn weather_findings(&self, scope: &Scope<'_>, day: &DaySchedule, severe: bool) -> Findings {
        let mut findings = Findings::default();
        let named = &scope.trigger.affected_slot_ids;
        let remaining = scope.remaining(day);
        let blocking = severe || scope.trigger.severity >= TriggerSeverity::High;

        for &pos in &remaining {
            let slot = &day.slots[pos];
            let hit = if named.is_empty() {
                slot.is_outdoor()
            } else {
                named.contains(&slot.id)
            };
            if !hit {
                continue;
            }

            let flex = scope.flexibility.for_slot(slot);
            let mut options = Vec::new();
            if let Some(partner) = swap_partner(scope, day, &remaining, pos, &flex) {
                options.push(RecoveryOption {
                    action: RecoveryAction::Swap,
                    description: format!("Swap with {}", partner.activity_name()),
                    time_saved_minutes: 0,
                    tradeoff: "Different order of the day".to_string(),
                    can_recover: true,
                });
            }
            if let Some(option) = defer_option(scope.schedule, day, slot, &flex, &self.config.day_window) {
                options.push(option);
            }
            if flex.can_skip {
                options.push(skip_option(slot));
            }

            let (impact_type, base) = if blocking {
                (ImpactType::Impossible, 85u8)
            } else {
                (ImpactType::Degraded, 50u8)
            };
            let severity = if slot.is_must_see() { base.saturating_add(10).min(100) } else { base };

            findings.first_impact_minute.get_or_insert(minute_of_day(slot.start));
            findings.affected.push(AffectedActivity {
                slot_id: slot.id.clone(),
                day_number: day.day_number,
                activity_name: slot.activity_name().to_string(),
                impact_type,
                severity,
                delay_minutes: 0,
                recoverable: options.iter().any(|o| o.can_recover),
                recovery_options: options,
            });
        }

        findings
    }

    fn closure_findings(&self, scope: &Scope<'_>, day: &DaySchedule, reopens_at: Option<NaiveTime>) -> Findings {
        let mut findings = Findings::default();
        let remaining = scope.remaining(day);

        for id in &scope.trigger.affected_slot_ids {
            let Some(pos) = day.position(id) else {
                debug!(slot = %id, "closure names a slot outside the target day");
                continue;
            };
            let slot = &day.slots[pos];
            let flex = scope.flexibility.for_slot(slot);
            let start = minute_of_day(slot.start);
            let end = minute_of_day(slot.end);

            let late_visit = reopens_at
                .map(minute_of_day)
                .filter(|r| *r > start && end - *r >= flex.min_duration.max(1) && flex.can_shorten);

            let mut options = Vec::new();
            let (impact_type, mut severity) = match late_visit {
                Some(reopen) => {
                    options.push(RecoveryOption {
                        action: RecoveryAction::Shorten,
                        description: format!("Arrive when {} reopens", slot.activity_name()),
                        time_saved_minutes: 0,
                        tradeoff: format!("{} fewer minutes on site", reopen - start),
                        can_recover: true,
                    });
                    (ImpactType::Shortened, 40u8)
                }
                None => (ImpactType::Impossible, 80u8),
            };
            if let Some(partner) = swap_partner(scope, day, &remaining, pos, &flex) {
                options.push(RecoveryOption {
                    action: RecoveryAction::Swap,
                    description: format!("Visit {} instead", partner.activity_name()),
                    time_saved_minutes: 0,
                    tradeoff: "Different order of the day".to_string(),
                    can_recover: false,
                });
            }
            if let Some(option) = defer_option(scope.schedule, day, slot, &flex, &self.config.day_window) {
                options.push(option);
            }
            if flex.can_skip {
                options.push(skip_option(slot));
            }

            if let Some(constraint) = scope.booking(&slot.id) {
                let eta = late_visit.unwrap_or(end);
                let risk = self.booking_risk(scope, constraint, eta);
                severity = severity.max(match risk.risk_level {
                    RiskLevel::WillMiss => 100,
                    RiskLevel::AtRisk => 70,
                    RiskLevel::Tight => 50,
                    RiskLevel::Safe => 0,
                });
                findings.bookings.push(risk);
            }
            if slot.is_must_see() {
                severity = severity.saturating_add(10).min(100);
            }

            findings.first_impact_minute.get_or_insert(start);
            findings.affected.push(AffectedActivity {
                slot_id: slot.id.clone(),
                day_number: day.day_number,
                activity_name: slot.activity_name().to_string(),
                impact_type,
                severity,
                delay_minutes: late_visit.map(|r| r - start).unwrap_or(0),
                recoverable: options.iter().any(|o| o.can_recover),
                recovery_options: options,
            });
        }

        findings
    }

    fn request_findings(&self, scope: &Scope<'_>, day: &DaySchedule, action: UserRequestAction) -> Findings {
        let mut findings = Findings::default();
        let remaining = scope.remaining(day);

        for id in &scope.trigger.affected_slot_ids {
            let Some(pos) = day.position(id) else { continue };
            let slot = &day.slots[pos];
            let flex = scope.flexibility.for_slot(slot);

            let mut options = Vec::new();
            if action == UserRequestAction::Replace {
                if let Some(partner) = swap_partner(scope, day, &remaining, pos, &flex) {
                    options.push(RecoveryOption {
                        action: RecoveryAction::Swap,
                        description: format!("Do {} here instead", partner.activity_name()),
                        time_saved_minutes: 0,
                        tradeoff: "Different order of the day".to_string(),
                        can_recover: true,
                    });
                }
            }
            if flex.can_skip {
                options.push(skip_option(slot));
            }
            if let Some(option) = defer_option(scope.schedule, day, slot, &flex, &self.config.day_window) {
                options.push(option);
            }

            let impact_type = match action {
                UserRequestAction::Skip => ImpactType::Impossible,
                _ => ImpactType::Degraded,
            };
            if let Some(constraint) = scope.booking(&slot.id) {
                findings
                    .bookings
                    .push(self.booking_risk(scope, constraint, minute_of_day(slot.end)));
            }

            findings.first_impact_minute.get_or_insert(minute_of_day(slot.start));
            findings.affected.push(AffectedActivity {
                slot_id: slot.id.clone(),
                day_number: day.day_number,
                activity_name: slot.activity_name().to_string(),
                impact_type,
                severity: 40,
                delay_minutes: 0,
                recoverable: options.iter().any(|o| o.can_recover),
                recovery_options: options,
            });
        }

        findings
    }

    fn booking_risk(&self, scope: &Scope<'_>, constraint: &BookingConstraint, eta_minute: i32) -> BookingRisk {
        let protection = &self.config.booking_protection;
        let buffer = minute_of_day(constraint.latest_arrival) - eta_minute;
        BookingRisk {
            slot_id: constraint.slot_id.clone(),
            reference: constraint.reference.clone(),
            activity_name: constraint.activity_name.clone(),
            latest_arrival: constraint.latest_arrival,
            current_eta_minute: eta_minute,
            buffer_minutes: buffer,
            risk_level: RiskLevel::from_buffer(buffer, protection.safe_buffer, protection.tight_buffer),
            refundable: constraint.refundable,
            cancellation_deadline: constraint.cancellation_deadline,
            can_cancel_free: constraint.can_cancel_free(scope.local),
        }
    }

    fn cascade(&self, findings: &Findings, remaining_today: usize) -> CascadeEffect {
        let window_end = minute_of_day(self.config.day_window.end);
        if findings.projected_day_end.is_some_and(|end| end > window_end) {
            return CascadeEffect::MultiDay;
        }
        let n = findings.affected.len();
        if n == 0 || (n == 1 && findings.affected[0].recoverable) {
            CascadeEffect::Isolated
        } else if n >= remaining_today {
            CascadeEffect::RestOfDay
        } else {
            CascadeEffect::PartialDay
        }
    }

    fn urgency(&self, scope: &Scope<'_>, day: Option<&DaySchedule>, findings: &Findings) -> Urgency {
        let pressing_booking = findings
            .bookings
            .iter()
            .any(|b| matches!(b.risk_level, RiskLevel::AtRisk | RiskLevel::WillMiss));
        if pressing_booking || scope.trigger.severity == TriggerSeverity::Critical {
            return Urgency::Immediate;
        }
        let Some(day) = day else { return Urgency::Today };
        if day.date > scope.local.date() {
            return Urgency::Future;
        }
        match findings.first_impact_minute {
            Some(minute) if minute - scope.now_minute_on(day) <= WITHIN_HOUR_MINUTES => Urgency::WithinHour,
            _ => Urgency::Today,
        }
    }
}

/// Minutes that shortening or compressing the kept upstream chain could win back.
fn upstream_slack(scope: &Scope<'_>, day: &DaySchedule, upstream: &[Planned]) -> i32 {
    upstream
        .iter()
        .filter_map(|p| day.slot(&p.slot_id))
        .map(|s| {
            let shorten = if s.booking.is_none() {
                scope.flexibility.for_slot(s).max_shorten_minutes(s.duration_minutes())
            } else {
                0
            };
            let compress = s
                .commute_from_previous
                .as_ref()
                .map(|c| c.compressible_minutes())
                .unwrap_or(0);
            shorten + compress
        })
        .sum()
}

fn skip_option(slot: &TimeSlot) -> RecoveryOption {
    RecoveryOption {
        action: RecoveryAction::Skip,
        description: format!("Skip {}", slot.activity_name()),
        time_saved_minutes: slot.duration_minutes() + slot.commute_minutes(),
        tradeoff: format!("{} is dropped from the trip", slot.activity_name()),
        can_recover: false,
    }
}

fn defer_option(
    schedule: &TripSchedule,
    day: &DaySchedule,
    slot: &TimeSlot,
    flex: &ActivityFlexibility,
    window: &DayWindow,
) -> Option<RecoveryOption> {
    if !flex.can_defer || flex.defer_days == 0 {
        return None;
    }
    let mut later = schedule
        .days
        .iter()
        .filter(|d| d.day_number > day.day_number && d.day_number <= day.day_number + flex.defer_days)
        .peekable();
    let first = (*later.peek()?).day_number;
    let roomy = later.find(|d| find_gap(d, &[], slot.duration_minutes(), window).is_some());
    let (target, can_recover, tradeoff) = match roomy {
        Some(d) => (d.day_number, true, "Later day gets busier".to_string()),
        None => (first, false, format!("No free {} minutes on the following days", slot.duration_minutes())),
    };
    Some(RecoveryOption {
        action: RecoveryAction::Defer,
        description: format!("Move {} to day {target}", slot.activity_name()),
        time_saved_minutes: slot.duration_minutes() + slot.commute_minutes(),
        tradeoff,
        can_recover,
    })
}

/// A later remaining slot that can trade places with `pos` in both directions.
fn swap_partner<'d>(
    scope: &Scope<'_>,
    day: &'d DaySchedule,
    remaining: &[usize],
    pos: usize,
    flex: &ActivityFlexibility,
) -> Option<&'d TimeSlot> {
    let slot = &day.slots[pos];
    remaining
        .iter()
        .filter(|&&i| i > pos)
        .map(|&i| &day.slots[i])
        .find(|other| {
            other.activity.is_some()
                && !other.is_outdoor()
                && other.booking.is_none()
                && !other.locked
                && flex.swaps_with(other.category())
                && scope.flexibility.for_slot(other).swaps_with(slot.category())
        })
}

fn summarize(trigger: &TriggerEvent, findings: &Findings) -> String {
    if findings.affected.is_empty() {
        return format!("{}: no remaining activities affected", trigger.trigger_type.as_str());
    }
    let mut summary = format!(
        "{}: {} {} affected",
        trigger.trigger_type.as_str(),
        findings.affected.len(),
        if findings.affected.len() == 1 { "activity" } else { "activities" }
    );
    let at_risk = findings
        .bookings
        .iter()
        .filter(|b| b.risk_level != RiskLevel::Safe)
        .count();
    if at_risk > 0 {
        summary.push_str(&format!(", {at_risk} booking(s) at risk"));
    }
    if findings.total_delay > 0 {
        summary.push_str(&format!(", up to {} min behind", findings.total_delay));
    }
    summary
}
