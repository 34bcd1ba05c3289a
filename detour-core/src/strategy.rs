//! Strategy Engine: turns an impact analysis into ranked reshuffle results.
//!
//! Candidates are built from re-timed projections of the affected day, checked
//! against the mutator, scored and ranked. `propose` never fails and never
//! returns an empty list.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::alternatives::{AlternativeProvider, AlternativeReason, ScheduleFit};
use crate::config::ReshuffleConfig;
use crate::flexibility::{BookingConstraint, FlexibilityTable};
use crate::impact::{ImpactAnalysis, ImpactType, RiskLevel};
use crate::mutator::ScheduleMutator;
use crate::reflow::{find_gap, reflow, Adjustments, Planned};
use crate::reshuffle::{
    change_id, result_id, undo_token, ChangeSnapshot, ChangeType, ReshuffleResult, ReshuffleStrategy, ScheduleChange,
};
use crate::schedule::{Activity, DaySchedule, TimeSlot, TripSchedule};
use crate::time::{add_minutes, minute_of_day, time_at_minute};
use crate::trigger::{TriggerSeverity, TriggerType};

/// Ceiling on the penalty for perturbing many activities.
const MAX_SPREAD_PENALTY: f64 = 0.3;

pub struct StrategyEngine<'a> {
    config: &'a ReshuffleConfig,
    flexibility: &'a FlexibilityTable,
    alternatives: &'a dyn AlternativeProvider,
}

struct Candidate {
    strategy: ReshuffleStrategy,
    changes: Vec<ScheduleChange>,
    explanation: String,
    confidence: f64,
    time_saved: i32,
    bookings_protected: u32,
    /// Slots dropped, replaced or moved to another day.
    lossy: Vec<String>,
    /// Fully resolves the impact without giving up an at-risk booking.
    acceptable: bool,
}

/// The affected day plus everything a candidate builder needs to know about it.
struct DayContext<'c> {
    impact: &'c ImpactAnalysis,
    schedule: &'c TripSchedule,
    day: &'c DaySchedule,
    bookings: Vec<BookingConstraint>,
}

impl DayContext<'_> {
    fn booking(&self, slot_id: &str) -> Option<&BookingConstraint> {
        self.bookings.iter().find(|b| b.slot_id == slot_id)
    }

    fn slot(&self, slot_id: &str) -> Option<&TimeSlot> {
        self.day.slot(slot_id)
    }

    /// Bookings the analysis flagged as threatened.
    fn threatened_bookings(&self) -> Vec<&str> {
        self.impact
            .bookings_at_risk
            .iter()
            .filter(|b| b.risk_level != RiskLevel::Safe)
            .map(|b| b.slot_id.as_str())
            .collect()
    }

    fn will_miss(&self) -> Vec<&str> {
        self.impact
            .bookings_at_risk
            .iter()
            .filter(|b| b.risk_level == RiskLevel::WillMiss)
            .map(|b| b.slot_id.as_str())
            .collect()
    }

    /// Minute the traveller leaves for the slot at `pos` under the original plan.
    fn departure(&self, pos: usize) -> i32 {
        match pos.checked_sub(1) {
            Some(prev) => minute_of_day(self.day.slots[prev].end),
            None => minute_of_day(self.day.slots[pos].start) - self.day.slots[pos].commute_minutes(),
        }
    }
}

/// Where a delay enters the day.
struct Chain {
    from: usize,
    free_at: i32,
    entry_id: String,
    extended: Option<String>,
}

/// A projection of the day under some adjustments.
struct Projection {
    planned: Vec<Planned>,
    /// Worst remaining lateness downstream of the entry slot.
    lateness: i32,
    missed: Vec<String>,
    protected: u32,
}

impl<'a> StrategyEngine<'a> {
    pub fn new(
        config: &'a ReshuffleConfig,
        flexibility: &'a FlexibilityTable,
        alternatives: &'a dyn AlternativeProvider,
    ) -> Self {
        Self {
            config,
            flexibility,
            alternatives,
        }
    }

    pub fn propose(&self, impact: &ImpactAnalysis, schedule: &TripSchedule) -> Vec<ReshuffleResult> {
        let trigger_id = impact.trigger_id.as_str();

        if impact.affected_activities.is_empty() {
            return vec![ReshuffleResult::no_action(
                trigger_id,
                "Nothing in the remaining schedule is affected",
                0.95,
            )];
        }

        let no_action = self.no_action(impact);

        let day = impact.day_number.and_then(|n| schedule.day(n));
        let Some(day) = day else {
            return vec![no_action];
        };

        if impact.delay_origin.is_some() && impact.total_delay_minutes <= self.config.thresholds.silent_buffer {
            debug!(trigger = %trigger_id, delay = impact.total_delay_minutes, "delay within silent buffer");
            return vec![no_action];
        }

        let ctx = DayContext {
            impact,
            schedule,
            day,
            bookings: BookingConstraint::from_schedule(schedule, self.flexibility),
        };

        let mut candidates = match impact.delay_origin.as_ref().and_then(|o| {
            day.position(&o.slot_id).map(|from| Chain {
                from,
                free_at: o.free_at_minute,
                entry_id: o.slot_id.clone(),
                extended: o.extended_slot_id.clone(),
            })
        }) {
            Some(chain) => self.delay_candidates(&ctx, &chain),
            None => self.blocked_candidates(&ctx),
        };

        if impact.trigger_severity == TriggerSeverity::Critical {
            candidates.extend(self.emergency_reroute(&ctx));
        }

        let mut results: Vec<(ReshuffleResult, bool)> = candidates
            .into_iter()
            .filter_map(|c| self.finalize(&ctx, c))
            .collect();
        results.push((no_action, false));

        results.sort_by(|(a, _), (b, _)| rank(a, b));

        // Never let a missed reservation slide by unless something keeps it.
        let booking_lost = self.config.booking_protection.enabled && !ctx.will_miss().is_empty();
        if booking_lost && !results.iter().any(|(r, acceptable)| *acceptable && r.strategy != ReshuffleStrategy::CancelGracefully) {
            if let Some(pos) = results
                .iter()
                .position(|(r, _)| r.strategy == ReshuffleStrategy::CancelGracefully)
            {
                let cancel = results.remove(pos);
                results.insert(0, cancel);
            }
        }

        let mut ranked: Vec<ReshuffleResult> = results.into_iter().map(|(r, _)| r).collect();
        let rest: Vec<ReshuffleResult> = ranked.iter().skip(1).cloned().collect();
        if let Some(best) = ranked.first_mut() {
            best.alternatives = rest;
        }
        debug!(
            trigger = %trigger_id,
            best = ranked.first().map(|r| r.strategy.as_str()).unwrap_or("none"),
            candidates = ranked.len(),
            "strategies ranked"
        );
        ranked
    }

    fn no_action(&self, impact: &ImpactAnalysis) -> ReshuffleResult {
        let impossible = impact
            .affected_activities
            .iter()
            .any(|a| a.impact_type == ImpactType::Impossible);
        let confidence = if impossible {
            0.0
        } else {
            (1.0 - impact.max_severity() as f64 / 100.0) * 0.8
        };
        let explanation = if impact.delay_origin.is_some() && impact.total_delay_minutes <= self.config.thresholds.silent_buffer {
            format!(
                "A {}-minute delay fits within the schedule's buffers",
                impact.total_delay_minutes
            )
        } else {
            "Keep the current plan".to_string()
        };
        ReshuffleResult::no_action(&impact.trigger_id, explanation, round(confidence))
    }

    // ----- delay-driven candidates -----

    fn project(&self, ctx: &DayContext<'_>, chain: &Chain, adj: &Adjustments) -> Projection {
        let planned = reflow(ctx.day, chain.from, chain.free_at, adj);
        let window_end = minute_of_day(self.config.day_window.end);

        let kept: Vec<&Planned> = planned.iter().filter(|p| !p.removed).collect();
        let mut lateness = kept
            .iter()
            .filter(|p| p.slot_id != chain.entry_id)
            .map(|p| p.start_shift())
            .max()
            .unwrap_or(0);
        if let Some(last) = kept.last() {
            lateness = lateness.max(last.end - window_end.max(last.original_end));
        }

        let threatened = ctx.threatened_bookings();
        let margin = if self.config.booking_protection.enabled {
            self.config.booking_protection.min_buffer_minutes
        } else {
            0
        };
        let mut missed = Vec::new();
        let mut protected = 0;
        for p in &kept {
            let Some(booking) = ctx.booking(&p.slot_id) else { continue };
            let buffer = minute_of_day(booking.latest_arrival) - p.arrival;
            if buffer < 0 {
                missed.push(p.slot_id.clone());
            } else if buffer >= margin && threatened.contains(&p.slot_id.as_str()) {
                protected += 1;
            }
        }

        Projection {
            lateness: lateness.max(0),
            planned,
            missed,
            protected,
        }
    }

    fn resolved(&self, projection: &Projection) -> bool {
        projection.lateness == 0 && (projection.missed.is_empty() || !self.config.booking_protection.enabled)
    }

    fn coverage(baseline: &Projection, projection: &Projection) -> f64 {
        if baseline.lateness <= 0 {
            1.0
        } else {
            1.0 - projection.lateness as f64 / baseline.lateness as f64
        }
    }

    /// Slots in the delay chain, in visiting order, that are still kept.
    fn chain_slots<'c>(&self, ctx: &DayContext<'c>, chain: &Chain) -> Vec<&'c TimeSlot> {
        ctx.day.slots.iter().skip(chain.from).collect()
    }

    fn delay_candidates(&self, ctx: &DayContext<'_>, chain: &Chain) -> Vec<Candidate> {
        let baseline = self.project(ctx, chain, &Adjustments::default());
        let mut out = Vec::new();

        out.extend(self.compress(ctx, chain, &baseline));
        out.extend(self.shorten(ctx, chain, &baseline));
        out.extend(self.skip_in_chain(ctx, chain, &baseline));
        out.extend(self.replace_in_chain(ctx, chain, &baseline));
        out.extend(self.defer_in_chain(ctx, chain, &baseline));
        if !ctx.will_miss().is_empty() {
            out.extend(self.cancel_in_chain(ctx, chain, &baseline));
        }
        out
    }

    fn compress(&self, ctx: &DayContext<'_>, chain: &Chain, baseline: &Projection) -> Option<Candidate> {
        if self.resolved(baseline) {
            return None;
        }
        let mut adj = Adjustments::default();
        let mut saved = 0;
        let mut legs = Vec::new();
        let mut projection = self.project(ctx, chain, &adj);
        for slot in self.chain_slots(ctx, chain) {
            if self.resolved(&projection) {
                break;
            }
            let Some(commute) = slot.commute_from_previous.as_ref() else { continue };
            let squeeze = commute.compressible_minutes();
            if squeeze <= 0 {
                continue;
            }
            adj.commutes.insert(slot.id.clone(), commute.duration_minutes - squeeze);
            saved += squeeze;
            legs.push(slot.activity_name().to_string());
            projection = self.project(ctx, chain, &adj);
        }
        if adj.is_empty() {
            return None;
        }

        let changes = self.retime_changes(ctx, chain, &projection.planned, &HashSet::new());
        let explanation = format!(
            "Take faster connections to {} to win back {saved} minutes",
            legs.join(", ")
        );
        Some(self.delay_candidate(
            ReshuffleStrategy::CompressBuffer,
            changes,
            explanation,
            baseline,
            &projection,
            saved,
            vec![],
        ))
    }

    fn shorten(&self, ctx: &DayContext<'_>, chain: &Chain, baseline: &Projection) -> Option<Candidate> {
        let mut adj = Adjustments::default();
        let mut saved = 0;
        let mut cuts = Vec::new();
        let mut projection = self.project(ctx, chain, &adj);

        for slot in self.chain_slots(ctx, chain) {
            if slot.booking.is_some() || chain.extended.as_deref() == Some(slot.id.as_str()) {
                continue;
            }
            let Some(planned) = projection.planned.iter().find(|p| p.slot_id == slot.id) else {
                continue;
            };
            let overrun = planned.end_overrun();
            if overrun <= 0 {
                if planned.start_shift() <= 0 && slot.id != chain.entry_id {
                    break;
                }
                continue;
            }
            let duration = slot.duration_minutes();
            let cut = overrun.min(self.flexibility.for_slot(slot).max_shorten_minutes(duration));
            if cut <= 0 {
                continue;
            }
            adj.durations.insert(slot.id.clone(), duration - cut);
            saved += cut;
            cuts.push(format!("{} to {} min", slot.activity_name(), duration - cut));
            projection = self.project(ctx, chain, &adj);
        }
        if adj.is_empty() {
            return None;
        }

        let changes = self.retime_changes(ctx, chain, &projection.planned, &HashSet::new());
        let explanation = format!("Shorten {}", cuts.join(", "));
        Some(self.delay_candidate(
            ReshuffleStrategy::ShortenActivity,
            changes,
            explanation,
            baseline,
            &projection,
            saved,
            vec![],
        ))
    }

    /// Chain slots that may be dropped, lowest skip priority first.
    fn skippable<'c>(&self, ctx: &DayContext<'c>, chain: &Chain) -> Vec<&'c TimeSlot> {
        let mut slots: Vec<&TimeSlot> = self
            .chain_slots(ctx, chain)
            .into_iter()
            .filter(|s| s.activity.is_some() && chain.extended.as_deref() != Some(s.id.as_str()))
            .filter(|s| self.flexibility.for_slot(s).can_skip)
            .collect();
        slots.sort_by_key(|s| (self.flexibility.for_slot(s).skip_priority, s.is_must_see()));
        slots
    }

    fn skip_in_chain(&self, ctx: &DayContext<'_>, chain: &Chain, baseline: &Projection) -> Option<Candidate> {
        if self.resolved(baseline) {
            return None;
        }
        let mut adj = Adjustments::default();
        let mut projection = self.project(ctx, chain, &adj);
        let mut dropped = Vec::new();
        let mut saved = 0;
        for slot in self.skippable(ctx, chain) {
            if self.resolved(&projection) {
                break;
            }
            adj.removed.insert(slot.id.clone());
            dropped.push(slot);
            saved += slot.duration_minutes() + slot.commute_minutes();
            projection = self.project(ctx, chain, &adj);
        }
        if dropped.is_empty() {
            return None;
        }

        let changes = self.retime_changes(ctx, chain, &projection.planned, &HashSet::new());
        let names: Vec<&str> = dropped.iter().map(|s| s.activity_name()).collect();
        let explanation = format!("Skip {} to get back on schedule", names.join(" and "));
        let lossy = dropped.iter().map(|s| s.id.clone()).collect();
        Some(self.delay_candidate(
            ReshuffleStrategy::SkipActivity,
            changes,
            explanation,
            baseline,
            &projection,
            saved,
            lossy,
        ))
    }

    fn replace_in_chain(&self, ctx: &DayContext<'_>, chain: &Chain, baseline: &Projection) -> Option<Candidate> {
        if self.resolved(baseline) {
            return None;
        }
        for slot in self.skippable(ctx, chain) {
            let Some(planned) = baseline.planned.iter().find(|p| p.slot_id == slot.id) else {
                continue;
            };
            let duration = slot.duration_minutes();
            let available = duration - planned.end_overrun().max(0);
            let Some(alt) = self
                .alternatives
                .alternatives(slot, available, AlternativeReason::TimeConstraint)
                .into_iter()
                .find(|a| a.fit.is_comfortable() && a.duration_minutes < duration)
            else {
                continue;
            };

            let mut adj = Adjustments::default();
            adj.durations.insert(slot.id.clone(), alt.duration_minutes);
            let projection = self.project(ctx, chain, &adj);

            let mut handled = HashSet::new();
            handled.insert(slot.id.clone());
            let mut changes = vec![self.replacement_change(slot, &projection.planned, &alt.activity)];
            changes.extend(self.retime_changes(ctx, chain, &projection.planned, &handled));

            let explanation = format!(
                "Swap {} for the shorter {} ({} min)",
                slot.activity_name(),
                alt.activity.name,
                alt.duration_minutes
            );
            return Some(self.delay_candidate(
                ReshuffleStrategy::ReplaceActivity,
                changes,
                explanation,
                baseline,
                &projection,
                duration - alt.duration_minutes,
                vec![slot.id.clone()],
            ));
        }
        None
    }

    fn defer_in_chain(&self, ctx: &DayContext<'_>, chain: &Chain, baseline: &Projection) -> Option<Candidate> {
        if self.resolved(baseline) {
            return None;
        }
        let mut adj = Adjustments::default();
        let mut projection = self.project(ctx, chain, &adj);
        let mut placed: HashMap<u32, Vec<(i32, i32)>> = HashMap::new();
        let mut moves = Vec::new();
        let mut saved = 0;

        for slot in self.skippable(ctx, chain) {
            if self.resolved(&projection) {
                break;
            }
            let Some((target, start)) = self.defer_target(ctx, slot, &mut placed) else { continue };
            adj.removed.insert(slot.id.clone());
            saved += slot.duration_minutes() + slot.commute_minutes();
            moves.push((slot, target, start));
            projection = self.project(ctx, chain, &adj);
        }
        if moves.is_empty() {
            return None;
        }

        let handled: HashSet<String> = moves.iter().map(|(s, _, _)| s.id.clone()).collect();
        let mut changes: Vec<ScheduleChange> = moves
            .iter()
            .filter_map(|(slot, target, start)| self.day_move_change(ctx, slot, *target, *start))
            .collect();
        changes.extend(self.retime_changes(ctx, chain, &projection.planned, &handled));

        let names: Vec<String> = moves
            .iter()
            .map(|(s, d, _)| format!("{} to day {d}", s.activity_name()))
            .collect();
        let explanation = format!("Move {}", names.join(", "));
        let lossy = moves.iter().map(|(s, _, _)| s.id.clone()).collect();
        Some(self.delay_candidate(
            ReshuffleStrategy::DeferToTomorrow,
            changes,
            explanation,
            baseline,
            &projection,
            saved,
            lossy,
        ))
    }

    fn cancel_in_chain(&self, ctx: &DayContext<'_>, chain: &Chain, baseline: &Projection) -> Option<Candidate> {
        let lost: Vec<&str> = ctx.will_miss();
        let mut adj = Adjustments::default();
        for id in &lost {
            adj.removed.insert(id.to_string());
        }
        let projection = self.project(ctx, chain, &adj);
        let changes = self.retime_changes(ctx, chain, &projection.planned, &HashSet::new());
        if changes.is_empty() {
            return None;
        }
        let saved = lost
            .iter()
            .filter_map(|id| ctx.slot(id))
            .map(|s| s.duration_minutes())
            .sum();
        let mut candidate = self.delay_candidate(
            ReshuffleStrategy::CancelGracefully,
            changes,
            self.cancellation_notice(ctx, &lost),
            baseline,
            &projection,
            saved,
            lost.iter().map(|s| s.to_string()).collect(),
        );
        candidate.acceptable = false;
        Some(candidate)
    }

    #[allow(clippy::too_many_arguments)]
    fn delay_candidate(
        &self,
        strategy: ReshuffleStrategy,
        changes: Vec<ScheduleChange>,
        explanation: String,
        baseline: &Projection,
        projection: &Projection,
        time_saved: i32,
        lossy: Vec<String>,
    ) -> Candidate {
        let coverage = Self::coverage(baseline, projection);
        let missed = !projection.missed.is_empty() && self.config.booking_protection.enabled;
        let touched = distinct_slots(&changes);
        let confidence = self.confidence(strategy, coverage, missed, lossy.len(), touched);
        Candidate {
            strategy,
            changes,
            explanation,
            confidence,
            time_saved,
            bookings_protected: projection.protected,
            acceptable: self.resolved(projection),
            lossy,
        }
    }

    /// Changes that move each re-timed slot of the chain to its projected window.
    fn retime_changes(
        &self,
        ctx: &DayContext<'_>,
        chain: &Chain,
        planned: &[Planned],
        handled: &HashSet<String>,
    ) -> Vec<ScheduleChange> {
        let mut changes = Vec::new();

        if let Some(extended) = chain.extended.as_deref().and_then(|id| ctx.slot(id)) {
            if let Some(end) = time_at_minute(chain.free_at) {
                changes.push(ScheduleChange {
                    id: String::new(),
                    change_type: ChangeType::DurationChange,
                    slot_id: extended.id.clone(),
                    activity_name: extended.activity_name().to_string(),
                    description: format!("Stay longer at {}", extended.activity_name()),
                    before: ChangeSnapshot::window(extended.start, extended.end),
                    after: ChangeSnapshot::window(extended.start, end),
                });
            }
        }

        for p in planned {
            if handled.contains(&p.slot_id) {
                continue;
            }
            let Some(slot) = ctx.slot(&p.slot_id) else { continue };
            if p.removed {
                changes.push(ScheduleChange {
                    id: String::new(),
                    change_type: ChangeType::ActivityRemoved,
                    slot_id: slot.id.clone(),
                    activity_name: slot.activity_name().to_string(),
                    description: format!("Drop {}", slot.activity_name()),
                    before: ChangeSnapshot::window(slot.start, slot.end).with_day(ctx.day.day_number),
                    after: ChangeSnapshot::default(),
                });
                continue;
            }
            if !p.moved() {
                continue;
            }
            // Windows past midnight cannot be expressed; the mutator rejects them.
            let (Some(start), Some(end)) = (time_at_minute(p.start), time_at_minute(p.end)) else {
                changes.push(out_of_day_change(slot, p));
                continue;
            };
            let (change_type, description) = if p.duration_changed() {
                (
                    ChangeType::DurationChange,
                    format!("{} now {} min", slot.activity_name(), p.end - p.start),
                )
            } else {
                (
                    ChangeType::TimeShift,
                    format!("{} moves by {} min", slot.activity_name(), p.start_shift()),
                )
            };
            changes.push(ScheduleChange {
                id: String::new(),
                change_type,
                slot_id: slot.id.clone(),
                activity_name: slot.activity_name().to_string(),
                description,
                before: ChangeSnapshot::window(slot.start, slot.end),
                after: ChangeSnapshot::window(start, end),
            });
        }
        changes
    }

    fn replacement_change(&self, slot: &TimeSlot, planned: &[Planned], activity: &Activity) -> ScheduleChange {
        let window = planned
            .iter()
            .find(|p| p.slot_id == slot.id)
            .and_then(|p| Some((time_at_minute(p.start)?, time_at_minute(p.end)?)));
        let after = match window {
            Some((start, end)) => ChangeSnapshot::window(start, end),
            None => ChangeSnapshot::default(),
        };
        ScheduleChange {
            id: String::new(),
            change_type: ChangeType::ActivityReplaced,
            slot_id: slot.id.clone(),
            activity_name: slot.activity_name().to_string(),
            description: format!("Replace {} with {}", slot.activity_name(), activity.name),
            before: ChangeSnapshot::window(slot.start, slot.end).with_activity_id(
                slot.activity.as_ref().map(|a| a.id.clone()).unwrap_or_default(),
            ),
            after: after.with_activity(activity.clone()),
        }
    }

    // ----- deferral -----

    /// First later day (within the slot's defer window) with room for it.
    fn defer_target(
        &self,
        ctx: &DayContext<'_>,
        slot: &TimeSlot,
        placed: &mut HashMap<u32, Vec<(i32, i32)>>,
    ) -> Option<(u32, i32)> {
        let flex = self.flexibility.for_slot(slot);
        if !flex.can_defer || flex.defer_days == 0 {
            return None;
        }
        let from = ctx.day.day_number;
        let duration = slot.duration_minutes();
        for day in ctx
            .schedule
            .days
            .iter()
            .filter(|d| d.day_number > from && d.day_number <= from + flex.defer_days)
        {
            let taken = placed.entry(day.day_number).or_default();
            if let Some(start) = find_gap(day, taken, duration, &self.config.day_window) {
                taken.push((start, start + duration));
                return Some((day.day_number, start));
            }
        }
        None
    }

    fn day_move_change(&self, ctx: &DayContext<'_>, slot: &TimeSlot, target: u32, start: i32) -> Option<ScheduleChange> {
        let start_time = time_at_minute(start)?;
        let end_time = time_at_minute(start + slot.duration_minutes())?;
        Some(ScheduleChange {
            id: String::new(),
            change_type: ChangeType::DayMoved,
            slot_id: slot.id.clone(),
            activity_name: slot.activity_name().to_string(),
            description: format!("Move {} to day {target} at {}", slot.activity_name(), start_time.format("%H:%M")),
            before: ChangeSnapshot::window(slot.start, slot.end).with_day(ctx.day.day_number),
            after: ChangeSnapshot::window(start_time, end_time).with_day(target),
        })
    }

    // ----- blocked-slot candidates (weather, closure, explicit requests) -----

    fn blocked_candidates(&self, ctx: &DayContext<'_>) -> Vec<Candidate> {
        let needing: Vec<&TimeSlot> = ctx
            .impact
            .affected_activities
            .iter()
            .filter(|a| a.day_number == ctx.day.day_number)
            .filter_map(|a| ctx.slot(&a.slot_id))
            .collect();
        if needing.is_empty() {
            return vec![];
        }

        let mut out = Vec::new();
        out.extend(self.reopen_late(ctx, &needing));
        out.extend(self.swap_blocked(ctx, &needing));
        out.extend(self.replace_blocked(ctx, &needing));
        out.extend(self.skip_blocked(ctx, &needing));
        out.extend(self.defer_blocked(ctx, &needing));

        if !ctx.will_miss().is_empty() || out.is_empty() {
            out.extend(self.cancel_blocked(ctx, &needing));
        }
        out
    }

    fn reason(&self, impact: &ImpactAnalysis) -> AlternativeReason {
        match impact.trigger_type {
            TriggerType::WeatherChange => AlternativeReason::Weather,
            TriggerType::Closure => AlternativeReason::Closed,
            TriggerType::UserRequest | TriggerType::UserState => AlternativeReason::Preference,
            TriggerType::RunningLate | TriggerType::TransportDelay => AlternativeReason::TimeConstraint,
        }
    }

    /// Closures that end before the slot does: visit once the venue reopens.
    fn reopen_late(&self, ctx: &DayContext<'_>, needing: &[&TimeSlot]) -> Option<Candidate> {
        let mut changes = Vec::new();
        for slot in needing {
            let Some(affected) = ctx.impact.affected(&slot.id) else { continue };
            if affected.impact_type != ImpactType::Shortened || affected.delay_minutes <= 0 {
                continue;
            }
            let Some(start) = add_minutes(slot.start, affected.delay_minutes) else { continue };
            changes.push(ScheduleChange {
                id: String::new(),
                change_type: ChangeType::DurationChange,
                slot_id: slot.id.clone(),
                activity_name: slot.activity_name().to_string(),
                description: format!("Arrive at {} when it reopens at {}", slot.activity_name(), start.format("%H:%M")),
                before: ChangeSnapshot::window(slot.start, slot.end),
                after: ChangeSnapshot::window(start, slot.end),
            });
        }
        if changes.is_empty() {
            return None;
        }
        let coverage = changes.len() as f64 / needing.len() as f64;
        let touched = distinct_slots(&changes);
        let explanation = format!("Visit later: {}", describe(&changes));
        Some(Candidate {
            strategy: ReshuffleStrategy::ShortenActivity,
            confidence: self.confidence(ReshuffleStrategy::ShortenActivity, coverage, false, 0, touched),
            time_saved: 0,
            bookings_protected: 0,
            lossy: vec![],
            acceptable: coverage >= 1.0 && ctx.will_miss().is_empty(),
            changes,
            explanation,
        })
    }

    fn swap_blocked(&self, ctx: &DayContext<'_>, needing: &[&TimeSlot]) -> Option<Candidate> {
        if ctx.impact.trigger_type == TriggerType::Closure {
            return None;
        }
        let needing_ids: HashSet<&str> = needing.iter().map(|s| s.id.as_str()).collect();
        let mut order: Vec<String> = ctx.day.slots.iter().map(|s| s.id.clone()).collect();
        let mut used: HashSet<String> = HashSet::new();
        let mut pairs = Vec::new();

        for slot in needing {
            let Some(pos) = ctx.day.position(&slot.id) else { continue };
            let flex = self.flexibility.for_slot(slot);
            let partner = ctx.day.slots.iter().skip(pos + 1).find(|other| {
                !needing_ids.contains(other.id.as_str())
                    && !used.contains(&other.id)
                    && other.activity.is_some()
                    && !other.is_outdoor()
                    && flex.swaps_with(other.category())
                    && self.flexibility.for_slot(other).swaps_with(slot.category())
            });
            let Some(partner) = partner else { continue };
            let (Some(a), Some(b)) = (
                order.iter().position(|id| id == &slot.id),
                order.iter().position(|id| id == &partner.id),
            ) else {
                continue;
            };
            order.swap(a, b);
            used.insert(partner.id.clone());
            pairs.push((*slot, partner));
        }
        if pairs.is_empty() {
            return None;
        }

        let first = pairs
            .iter()
            .filter_map(|(s, _)| ctx.day.position(&s.id))
            .min()
            .unwrap_or(0);
        let chain = Chain {
            from: first,
            free_at: ctx.departure(first),
            entry_id: String::new(),
            extended: None,
        };
        let adj = Adjustments {
            order: Some(order.into_iter().skip(first).collect()),
            ..Adjustments::default()
        };
        let projection = self.project(ctx, &chain, &adj);
        let swapped: HashSet<&str> = pairs
            .iter()
            .flat_map(|(a, b)| [a.id.as_str(), b.id.as_str()])
            .collect();
        let lateness = projection
            .planned
            .iter()
            .filter(|p| !swapped.contains(p.slot_id.as_str()))
            .map(|p| p.start_shift())
            .max()
            .unwrap_or(0)
            .max(0);

        let changes = self.retime_changes(ctx, &chain, &projection.planned, &HashSet::new());
        let mut coverage = pairs.len() as f64 / needing.len() as f64;
        if lateness > 0 {
            coverage -= (lateness as f64 / 120.0).min(0.5);
        }
        let touched = distinct_slots(&changes);
        let names: Vec<String> = pairs
            .iter()
            .map(|(a, b)| format!("{} with {}", a.activity_name(), b.activity_name()))
            .collect();
        Some(Candidate {
            strategy: ReshuffleStrategy::SwapOrder,
            confidence: self.confidence(ReshuffleStrategy::SwapOrder, coverage, false, 0, touched),
            explanation: format!("Swap {}", names.join("; ")),
            time_saved: 0,
            bookings_protected: 0,
            lossy: vec![],
            acceptable: pairs.len() == needing.len() && lateness == 0 && ctx.will_miss().is_empty(),
            changes,
        })
    }

    fn replace_blocked(&self, ctx: &DayContext<'_>, needing: &[&TimeSlot]) -> Option<Candidate> {
        let reason = self.reason(ctx.impact);
        let mut adj = Adjustments::default();
        let mut picks = Vec::new();
        let mut comfortable = true;

        for slot in needing {
            if slot.locked {
                continue;
            }
            let alts = self.alternatives.alternatives(slot, slot.duration_minutes(), reason);
            let Some(alt) = alts
                .iter()
                .find(|a| a.is_like_for_like())
                .or_else(|| alts.iter().find(|a| a.fit.is_comfortable()))
                .or_else(|| alts.iter().find(|a| a.fit != ScheduleFit::Overflow))
                .cloned()
            else {
                continue;
            };
            comfortable &= alt.fit.is_comfortable();
            adj.durations.insert(slot.id.clone(), alt.duration_minutes);
            picks.push((*slot, alt));
        }
        if picks.is_empty() {
            return None;
        }

        let first = picks
            .iter()
            .filter_map(|(s, _)| ctx.day.position(&s.id))
            .min()
            .unwrap_or(0);
        let chain = Chain {
            from: first,
            free_at: ctx.departure(first),
            entry_id: String::new(),
            extended: None,
        };
        let projection = self.project(ctx, &chain, &adj);
        let handled: HashSet<String> = picks.iter().map(|(s, _)| s.id.clone()).collect();

        let mut changes: Vec<ScheduleChange> = picks
            .iter()
            .map(|(slot, alt)| self.replacement_change(slot, &projection.planned, &alt.activity))
            .collect();
        changes.extend(self.retime_changes(ctx, &chain, &projection.planned, &handled));

        let mut coverage = picks.len() as f64 / needing.len() as f64;
        if !comfortable {
            coverage *= 0.6;
        }
        if projection.lateness > 0 {
            coverage -= (projection.lateness as f64 / 120.0).min(0.5);
        }
        // A reservation swapped for anything but a comfortable same-kind venue is lost.
        let booking_lost = picks
            .iter()
            .any(|(s, a)| s.booking.is_some() && !a.is_like_for_like());
        let touched = distinct_slots(&changes);
        let names: Vec<String> = picks
            .iter()
            .map(|(s, a)| format!("{} with {}", s.activity_name(), a.activity.name))
            .collect();
        let released: Vec<&str> = picks
            .iter()
            .filter_map(|(s, _)| s.booking.as_ref().map(|b| b.reference.as_str()))
            .collect();
        let mut explanation = format!("Replace {}", names.join("; "));
        if !released.is_empty() {
            explanation.push_str(&format!(" (reservation {} released)", released.join(", ")));
        }
        Some(Candidate {
            strategy: ReshuffleStrategy::ReplaceActivity,
            confidence: self.confidence(ReshuffleStrategy::ReplaceActivity, coverage, booking_lost, 0, touched),
            explanation,
            time_saved: 0,
            bookings_protected: 0,
            lossy: picks.iter().map(|(s, _)| s.id.clone()).collect(),
            acceptable: comfortable && picks.len() == needing.len() && !booking_lost,
            changes,
        })
    }

    fn skip_blocked(&self, ctx: &DayContext<'_>, needing: &[&TimeSlot]) -> Option<Candidate> {
        let dropped: Vec<&TimeSlot> = needing
            .iter()
            .copied()
            .filter(|s| self.flexibility.for_slot(s).can_skip)
            .collect();
        if dropped.is_empty() {
            return None;
        }
        let changes: Vec<ScheduleChange> = dropped.iter().map(|s| removal(ctx, s, "Skip")).collect();
        let coverage = dropped.len() as f64 / needing.len() as f64;
        let names: Vec<&str> = dropped.iter().map(|s| s.activity_name()).collect();
        Some(Candidate {
            strategy: ReshuffleStrategy::SkipActivity,
            confidence: self.confidence(ReshuffleStrategy::SkipActivity, coverage, false, dropped.len(), dropped.len()),
            explanation: format!("Skip {}", names.join(" and ")),
            time_saved: dropped.iter().map(|s| s.duration_minutes()).sum(),
            bookings_protected: 0,
            lossy: dropped.iter().map(|s| s.id.clone()).collect(),
            acceptable: false,
            changes,
        })
    }

    fn defer_blocked(&self, ctx: &DayContext<'_>, needing: &[&TimeSlot]) -> Option<Candidate> {
        let mut placed = HashMap::new();
        let mut changes = Vec::new();
        let mut lossy = Vec::new();
        for slot in needing {
            let Some((target, start)) = self.defer_target(ctx, slot, &mut placed) else { continue };
            if let Some(change) = self.day_move_change(ctx, slot, target, start) {
                lossy.push(slot.id.clone());
                changes.push(change);
            }
        }
        if changes.is_empty() {
            return None;
        }
        let coverage = changes.len() as f64 / needing.len() as f64;
        let touched = distinct_slots(&changes);
        Some(Candidate {
            strategy: ReshuffleStrategy::DeferToTomorrow,
            confidence: self.confidence(ReshuffleStrategy::DeferToTomorrow, coverage, false, lossy.len(), touched),
            explanation: describe(&changes),
            time_saved: 0,
            bookings_protected: 0,
            acceptable: coverage >= 1.0 && ctx.will_miss().is_empty(),
            lossy,
            changes,
        })
    }

    fn cancel_blocked(&self, ctx: &DayContext<'_>, needing: &[&TimeSlot]) -> Option<Candidate> {
        let lost = ctx.will_miss();
        let targets: Vec<&TimeSlot> = if lost.is_empty() {
            needing.to_vec()
        } else {
            lost.iter().filter_map(|id| ctx.slot(id)).collect()
        };
        if targets.is_empty() {
            return None;
        }
        let changes: Vec<ScheduleChange> = targets.iter().map(|s| removal(ctx, s, "Cancel")).collect();
        let ids: Vec<&str> = targets.iter().map(|s| s.id.as_str()).collect();
        let touched = distinct_slots(&changes);
        Some(Candidate {
            strategy: ReshuffleStrategy::CancelGracefully,
            confidence: self.confidence(ReshuffleStrategy::CancelGracefully, 1.0, false, 0, touched),
            explanation: self.cancellation_notice(ctx, &ids),
            time_saved: targets.iter().map(|s| s.duration_minutes()).sum(),
            bookings_protected: 0,
            lossy: targets.iter().map(|s| s.id.clone()).collect(),
            acceptable: false,
            changes,
        })
    }

    /// Drop everything still ahead today that is not a fixed commitment.
    fn emergency_reroute(&self, ctx: &DayContext<'_>) -> Option<Candidate> {
        let first = ctx
            .impact
            .affected_activities
            .iter()
            .filter_map(|a| ctx.day.position(&a.slot_id))
            .min()?;
        let dropped: Vec<&TimeSlot> = ctx
            .day
            .slots
            .iter()
            .skip(first)
            .filter(|s| s.booking.is_none() && !s.locked)
            .collect();
        if dropped.is_empty() {
            return None;
        }
        let changes: Vec<ScheduleChange> = dropped.iter().map(|s| removal(ctx, s, "Clear")).collect();
        let touched = distinct_slots(&changes);
        Some(Candidate {
            strategy: ReshuffleStrategy::EmergencyReroute,
            confidence: self.confidence(ReshuffleStrategy::EmergencyReroute, 1.0, false, 0, touched),
            explanation: format!(
                "Clear the rest of day {} ({} activities) and keep only fixed reservations",
                ctx.day.day_number,
                dropped.len()
            ),
            time_saved: dropped.iter().map(|s| s.duration_minutes()).sum(),
            bookings_protected: 0,
            lossy: dropped.iter().map(|s| s.id.clone()).collect(),
            acceptable: false,
            changes,
        })
    }

    fn cancellation_notice(&self, ctx: &DayContext<'_>, slot_ids: &[&str]) -> String {
        let mut parts = Vec::new();
        for id in slot_ids {
            let name = ctx.slot(id).map(|s| s.activity_name()).unwrap_or(*id);
            match ctx.booking(id) {
                Some(b) if !b.refundable => parts.push(format!(
                    "Reservation {} at {name} cannot be kept and is non-refundable",
                    b.reference
                )),
                Some(b) if b.can_cancel_free(ctx.impact.local_time) => parts.push(format!(
                    "Reservation {} at {name} cannot be kept; cancel it now at no cost",
                    b.reference
                )),
                Some(b) => parts.push(format!(
                    "Reservation {} at {name} cannot be kept and is past its free cancellation deadline",
                    b.reference
                )),
                None => parts.push(format!("{name} cannot go ahead")),
            }
        }
        parts.join("; ")
    }

    // ----- scoring -----

    fn confidence(&self, strategy: ReshuffleStrategy, coverage: f64, booking_missed: bool, lost: usize, touched: usize) -> f64 {
        let base = match strategy {
            ReshuffleStrategy::CompressBuffer => 0.95,
            ReshuffleStrategy::ShortenActivity => 0.9,
            ReshuffleStrategy::SwapOrder => 0.85,
            ReshuffleStrategy::SkipActivity => 0.8,
            ReshuffleStrategy::ReplaceActivity => 0.75,
            ReshuffleStrategy::DeferToTomorrow => 0.7,
            ReshuffleStrategy::SplitGroup => 0.6,
            ReshuffleStrategy::CancelGracefully => 0.5,
            ReshuffleStrategy::EmergencyReroute => 0.6,
            ReshuffleStrategy::NoAction => 0.0,
        };
        let mut c = base * (0.4 + 0.6 * coverage.clamp(0.0, 1.0));
        if booking_missed {
            c *= 0.5;
        }
        match strategy {
            ReshuffleStrategy::SkipActivity => c *= (1.0 - 0.1 * lost as f64).max(0.5),
            ReshuffleStrategy::DeferToTomorrow => c *= 0.95,
            _ => {}
        }
        c -= (0.02 * touched.saturating_sub(1) as f64).min(MAX_SPREAD_PENALTY);
        round(c.clamp(0.0, 1.0))
    }

    fn requires_confirmation(&self, ctx: &DayContext<'_>, candidate: &Candidate) -> bool {
        if matches!(
            candidate.strategy,
            ReshuffleStrategy::CancelGracefully | ReshuffleStrategy::EmergencyReroute
        ) {
            return true;
        }
        if candidate.confidence < self.config.auto_apply.min_confidence {
            return true;
        }
        let must_see_lost = candidate
            .lossy
            .iter()
            .filter_map(|id| ctx.slot(id))
            .any(|s| s.is_must_see());
        if must_see_lost {
            return true;
        }
        let touches_non_refundable = candidate
            .changes
            .iter()
            .filter_map(|c| ctx.booking(&c.slot_id))
            .any(|b| !b.refundable);
        if touches_non_refundable {
            return true;
        }
        // Any reservation later in the day makes a silent rewrite too risky.
        let first_changed = candidate
            .changes
            .iter()
            .filter_map(|c| ctx.day.position(&c.slot_id))
            .min();
        match first_changed {
            Some(first) => ctx.day.slots.iter().skip(first).any(|s| s.booking.is_some()),
            None => false,
        }
    }

    fn finalize(&self, ctx: &DayContext<'_>, mut candidate: Candidate) -> Option<(ReshuffleResult, bool)> {
        let trigger_id = ctx.impact.trigger_id.as_str();
        for (i, change) in candidate.changes.iter_mut().enumerate() {
            change.id = change_id(trigger_id, candidate.strategy, i);
        }

        if let Err(e) = ScheduleMutator.apply(ctx.schedule, &candidate.changes) {
            debug!(strategy = candidate.strategy.as_str(), error = %e, "candidate dropped");
            return None;
        }

        let requires_confirmation = self.requires_confirmation(ctx, &candidate);
        let policy = &self.config.auto_apply;
        let auto_apply_in = (!requires_confirmation
            && policy.enabled
            && (!policy.low_impact_only || ctx.impact.can_auto_resolve))
            .then_some(policy.timeout_seconds);

        let result = ReshuffleResult {
            id: result_id(trigger_id, candidate.strategy),
            trigger_id: trigger_id.to_string(),
            strategy: candidate.strategy,
            activities_affected: distinct_slots(&candidate.changes) as u32,
            changes: candidate.changes,
            explanation: candidate.explanation,
            confidence: candidate.confidence,
            alternatives: vec![],
            requires_confirmation,
            auto_apply_in,
            time_saved_minutes: candidate.time_saved,
            bookings_protected: candidate.bookings_protected,
            undo_token: undo_token(trigger_id, candidate.strategy),
            can_undo: true,
        };
        Some((result, candidate.acceptable))
    }
}

/// Higher confidence first, then more time saved, then fewer activities touched.
fn rank(a: &ReshuffleResult, b: &ReshuffleResult) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.time_saved_minutes.cmp(&a.time_saved_minutes))
        .then_with(|| a.activities_affected.cmp(&b.activities_affected))
        .then_with(|| preference(a.strategy).cmp(&preference(b.strategy)))
}

fn preference(strategy: ReshuffleStrategy) -> u8 {
    match strategy {
        ReshuffleStrategy::CompressBuffer => 0,
        ReshuffleStrategy::ShortenActivity => 1,
        ReshuffleStrategy::SwapOrder => 2,
        ReshuffleStrategy::SkipActivity => 3,
        ReshuffleStrategy::ReplaceActivity => 4,
        ReshuffleStrategy::DeferToTomorrow => 5,
        ReshuffleStrategy::SplitGroup => 6,
        ReshuffleStrategy::CancelGracefully => 7,
        ReshuffleStrategy::EmergencyReroute => 8,
        ReshuffleStrategy::NoAction => 9,
    }
}

fn round(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn distinct_slots(changes: &[ScheduleChange]) -> usize {
    changes.iter().map(|c| c.slot_id.as_str()).collect::<HashSet<_>>().len()
}

fn describe(changes: &[ScheduleChange]) -> String {
    changes
        .iter()
        .map(|c| c.description.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

fn removal(ctx: &DayContext<'_>, slot: &TimeSlot, verb: &str) -> ScheduleChange {
    ScheduleChange {
        id: String::new(),
        change_type: ChangeType::ActivityRemoved,
        slot_id: slot.id.clone(),
        activity_name: slot.activity_name().to_string(),
        description: format!("{verb} {}", slot.activity_name()),
        before: ChangeSnapshot::window(slot.start, slot.end).with_day(ctx.day.day_number),
        after: ChangeSnapshot::default(),
    }
}

/// A shift the day cannot hold; kept so the mutator rejects the candidate.
fn out_of_day_change(slot: &TimeSlot, planned: &Planned) -> ScheduleChange {
    ScheduleChange {
        id: String::new(),
        change_type: ChangeType::DurationChange,
        slot_id: slot.id.clone(),
        activity_name: slot.activity_name().to_string(),
        description: format!("{} would run past midnight", slot.activity_name()),
        before: ChangeSnapshot::window(slot.start, slot.end),
        after: ChangeSnapshot {
            start_time: time_at_minute(planned.start),
            duration: Some(planned.end - planned.start),
            ..ChangeSnapshot::default()
        },
    }
}
