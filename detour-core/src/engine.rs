//! Check façade: validate triggers, analyze, propose, and summarize.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::alternatives::{AlternativeProvider, SlotAlternatives};
use crate::analyzer::ImpactAnalyzer;
use crate::config::ReshuffleConfig;
use crate::flexibility::{BookingConstraint, FlexibilityTable};
use crate::impact::{ImpactAnalysis, RiskLevel};
use crate::reshuffle::ReshuffleResult;
use crate::schedule::TripSchedule;
use crate::status::ScheduleStatus;
use crate::strategy::StrategyEngine;
use crate::trigger::{TriggerEvent, TriggerSeverity};

/// Outcome of one trigger check, shaped for the poller and the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckTriggersResponse {
    pub triggers_detected: Vec<TriggerEvent>,
    pub analyses: Vec<ImpactAnalysis>,
    /// Best result per trigger, most pressing first. Each carries its own
    /// ranked alternatives.
    pub suggested_actions: Vec<ReshuffleResult>,
    pub schedule_status: ScheduleStatus,
    pub next_check_in_seconds: u64,
    pub summary: String,
}

impl CheckTriggersResponse {
    /// The suggestion the controller should act on, if any.
    pub fn top_suggestion(&self) -> Option<&ReshuffleResult> {
        self.suggested_actions.iter().find(|r| !r.is_no_action())
    }
}

pub struct ReshuffleEngine {
    config: ReshuffleConfig,
    flexibility: FlexibilityTable,
    alternatives: Box<dyn AlternativeProvider + Send + Sync>,
}

impl ReshuffleEngine {
    pub fn new(config: ReshuffleConfig) -> Self {
        Self {
            config,
            flexibility: FlexibilityTable::new(),
            alternatives: Box::new(SlotAlternatives),
        }
    }

    pub fn with_flexibility(mut self, flexibility: FlexibilityTable) -> Self {
        self.flexibility = flexibility;
        self
    }

    pub fn with_alternatives<P>(mut self, provider: P) -> Self
    where
        P: AlternativeProvider + Send + Sync + 'static,
    {
        self.alternatives = Box::new(provider);
        self
    }

    pub fn config(&self) -> &ReshuffleConfig {
        &self.config
    }

    pub fn analyze(&self, trigger: &TriggerEvent, schedule: &TripSchedule) -> ImpactAnalysis {
        let bookings = BookingConstraint::from_schedule(schedule, &self.flexibility);
        ImpactAnalyzer::new(&self.config).analyze(trigger, schedule, &self.flexibility, &bookings)
    }

    pub fn propose(&self, impact: &ImpactAnalysis, schedule: &TripSchedule) -> Vec<ReshuffleResult> {
        StrategyEngine::new(&self.config, &self.flexibility, self.alternatives.as_ref()).propose(impact, schedule)
    }

    pub fn check(&self, triggers: &[TriggerEvent], schedule: &TripSchedule) -> CheckTriggersResponse {
        let valid: Vec<TriggerEvent> = triggers
            .iter()
            .filter(|t| match t.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(trigger = %t.id, error = %e, "dropping invalid trigger");
                    false
                }
            })
            .cloned()
            .collect();

        let bookings = BookingConstraint::from_schedule(schedule, &self.flexibility);
        let analyzer = ImpactAnalyzer::new(&self.config);
        let strategies = StrategyEngine::new(&self.config, &self.flexibility, self.alternatives.as_ref());

        let mut scored: Vec<(ImpactAnalysis, ReshuffleResult)> = Vec::with_capacity(valid.len());
        for trigger in &valid {
            let impact = analyzer.analyze(trigger, schedule, &self.flexibility, &bookings);
            let best = strategies.propose(&impact, schedule).into_iter().next();
            match best {
                Some(best) => scored.push((impact, best)),
                None => debug!(trigger = %trigger.id, "no proposal"),
            }
        }

        scored.sort_by(|(ia, ra), (ib, rb)| {
            ra.is_no_action()
                .cmp(&rb.is_no_action())
                .then_with(|| ia.urgency.cmp(&ib.urgency))
                .then_with(|| rb.confidence.total_cmp(&ra.confidence))
        });

        let status = self.status_for(&valid, scored.iter().map(|(i, _)| i));
        let summary = summarize(&scored);
        let (analyses, suggested_actions): (Vec<_>, Vec<_>) = scored.into_iter().unzip();

        debug!(
            triggers = valid.len(),
            status = status.as_str(),
            suggestions = suggested_actions.len(),
            "trigger check complete"
        );

        CheckTriggersResponse {
            triggers_detected: valid,
            analyses,
            suggested_actions,
            schedule_status: status,
            next_check_in_seconds: status.next_check_in_seconds(),
            summary,
        }
    }

    fn status_for<'i>(&self, triggers: &[TriggerEvent], analyses: impl Iterator<Item = &'i ImpactAnalysis>) -> ScheduleStatus {
        let mut status = ScheduleStatus::OnTrack;
        for impact in analyses {
            status = status.max(ScheduleStatus::from_delay(impact.total_delay_minutes, &self.config.status));
            if impact
                .worst_booking_risk()
                .is_some_and(|r| matches!(r, RiskLevel::AtRisk | RiskLevel::WillMiss))
            {
                status = status.max(ScheduleStatus::NeedsAttention);
            }
        }
        if triggers.iter().any(|t| t.severity == TriggerSeverity::Critical) {
            status = ScheduleStatus::Critical;
        }
        status
    }
}

fn summarize(scored: &[(ImpactAnalysis, ReshuffleResult)]) -> String {
    if scored.is_empty() {
        return "No disruptions detected".to_string();
    }
    let lines: Vec<String> = scored
        .iter()
        .map(|(impact, best)| format!("{} ({})", impact.summary, best.strategy.as_str()))
        .collect();
    format!("{} trigger(s): {}", scored.len(), lines.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Activity, ActivityCategory, DaySchedule, TimeSlot};
    use crate::trigger::{TriggerContext, TriggerOrigin};
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    fn schedule() -> TripSchedule {
        let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(
            DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap())
                .with_slot(
                    TimeSlot::new("museum", t(9), t(11))
                        .with_activity(Activity::new("a1", "Gulbenkian", ActivityCategory::Museum, 120)),
                )
                .with_slot(
                    TimeSlot::new("park", t(11), t(12))
                        .with_activity(Activity::new("a2", "Estrela Garden", ActivityCategory::Park, 60)),
                ),
        )
    }

    fn late(id: &str, minutes: i32) -> TriggerEvent {
        TriggerEvent::new(
            TriggerContext::RunningLate {
                delay_minutes: minutes,
                reason: None,
            },
            TriggerSeverity::Medium,
            TriggerOrigin::User,
            Utc.with_ymd_and_hms(2026, 5, 2, 7, 55, 0).unwrap(),
        )
        .with_id(id)
        .with_slot("museum")
    }

    #[test]
    fn invalid_triggers_are_dropped() {
        let engine = ReshuffleEngine::new(ReshuffleConfig::default());
        let bad = late("bad", 0);
        let response = engine.check(&[bad], &schedule());
        assert!(response.triggers_detected.is_empty());
        assert!(response.suggested_actions.is_empty());
        assert_eq!(response.schedule_status, ScheduleStatus::OnTrack);
        assert_eq!(response.summary, "No disruptions detected");
    }

    #[test]
    fn delay_drives_status_and_poll_interval() {
        let engine = ReshuffleEngine::new(ReshuffleConfig::default());
        let response = engine.check(&[late("t1", 45)], &schedule());
        assert_eq!(response.schedule_status, ScheduleStatus::NeedsAttention);
        assert_eq!(response.next_check_in_seconds, 300);
        assert!(response.top_suggestion().is_some());
    }

    #[test]
    fn actionable_suggestions_come_first() {
        let engine = ReshuffleEngine::new(ReshuffleConfig::default());
        let response = engine.check(&[late("quiet", 5), late("loud", 45)], &schedule());
        assert_eq!(response.suggested_actions.len(), 2);
        assert_eq!(response.suggested_actions[0].trigger_id, "loud");
        assert!(response.suggested_actions[1].is_no_action());
    }
}
