//! Deterministic replay of trigger sources against a controller, stepping a
//! virtual clock from one interesting instant to the next (a due poll or a
//! countdown deadline). Used for simulations where waiting in real time is
//! pointless.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use detour_core::{ExecutionController, ReshuffleEngine, TriggerEvent};
use detour_signals::TriggerSource;

use crate::session::SessionEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

pub struct Replay<S> {
    controller: ExecutionController,
    engine: ReshuffleEngine,
    sources: Vec<S>,
}

impl<S: TriggerSource> Replay<S> {
    pub fn new(controller: ExecutionController, engine: ReshuffleEngine, sources: Vec<S>) -> Self {
        Self {
            controller,
            engine,
            sources,
        }
    }

    pub fn controller(&self) -> &ExecutionController {
        &self.controller
    }

    pub fn into_controller(self) -> ExecutionController {
        self.controller
    }

    fn countdown_deadline(&self) -> Option<(u64, DateTime<Utc>)> {
        let countdown = self.controller.pending()?.countdown?;
        let seconds = i64::try_from(countdown.seconds).unwrap_or(i64::MAX);
        Some((countdown.version, countdown.started_at + TimeDelta::seconds(seconds)))
    }

    /// Run from `from` until `until`, or until every source is `idle` and no
    /// countdown is left.
    pub fn run(
        &mut self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        mut idle: impl FnMut(&S) -> bool,
    ) -> Vec<ReplayEntry> {
        let mut entries = Vec::new();
        let mut next_poll: Vec<DateTime<Utc>> = vec![from; self.sources.len()];
        let mut now = from;

        while now <= until {
            if let Some((version, deadline)) = self.countdown_deadline() {
                if deadline <= now {
                    match self.controller.fire_auto_apply(version, now) {
                        Ok(event) => debug!(event = %event.id, "countdown applied reshuffle"),
                        Err(e) => debug!(version, error = %e, "countdown lapsed"),
                    }
                }
            }

            let mut triggers = Vec::new();
            for (source, due) in self.sources.iter_mut().zip(next_poll.iter_mut()) {
                if *due > now {
                    continue;
                }
                match source.poll(self.controller.current_schedule(), now) {
                    Ok(found) => triggers.extend(found),
                    Err(e) => {
                        warn!(source = source.name(), error = %e, "trigger source failed");
                        entries.push(ReplayEntry {
                            at: now,
                            event: SessionEvent::SourceFailed {
                                source: source.name().to_string(),
                                error: format!("{e:#}"),
                            },
                        });
                    }
                }
                let step = i64::try_from(source.poll_seconds().max(1)).unwrap_or(i64::MAX);
                *due = now + TimeDelta::seconds(step);
            }

            if !triggers.is_empty() {
                self.check(&triggers, now, &mut entries);
            }
            self.controller.expire_undo(now);
            entries.extend(self.controller.drain_notices().into_iter().map(|notice| ReplayEntry {
                at: now,
                event: SessionEvent::Notice { notice },
            }));

            let next_source = self
                .sources
                .iter()
                .zip(next_poll.iter())
                .filter(|(source, _)| !idle(*source))
                .map(|(_, due)| *due)
                .min();
            let next_countdown = self.countdown_deadline().map(|(_, deadline)| deadline.max(now));
            let Some(next) = next_source.into_iter().chain(next_countdown).min() else {
                break;
            };
            // A countdown armed this instant can only fire strictly later.
            now = if next <= now { now + TimeDelta::seconds(1) } else { next };
        }
        entries
    }

    fn check(&mut self, triggers: &[TriggerEvent], now: DateTime<Utc>, entries: &mut Vec<ReplayEntry>) {
        let ticket = match self.controller.begin_processing() {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(error = %e, "check skipped");
                return;
            }
        };
        let response = self.engine.check(triggers, &ticket.schedule);
        entries.push(ReplayEntry {
            at: now,
            event: SessionEvent::CheckCompleted {
                summary: response.summary.clone(),
                status: response.schedule_status,
                next_check_in_seconds: response.next_check_in_seconds,
            },
        });
        if let Err(e) = self.controller.handle_trigger_check_response(ticket, response, now) {
            warn!(error = %e, "check response rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use detour_core::{
        Activity, ActivityCategory, ControllerNotice, DaySchedule, ReshuffleConfig, TimeSlot, TripSchedule,
    };
    use detour_signals::{parse_script, ScriptedSource};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn lisbon(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, h - 1, m, 0).unwrap()
    }

    fn schedule() -> TripSchedule {
        TripSchedule::new("lisbon-2026", "Lisbon", "Europe/Lisbon").with_day(
            DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap())
                .with_slot(
                    TimeSlot::new("museum", t(9, 0), t(11, 0))
                        .with_activity(Activity::new("gulbenkian", "Gulbenkian Museum", ActivityCategory::Museum, 120)),
                )
                .with_slot(
                    TimeSlot::new("park", t(11, 30), t(12, 30))
                        .with_activity(Activity::new("estrela", "Estrela Garden", ActivityCategory::Park, 60)),
                ),
        )
    }

    #[test]
    fn test_replay_auto_applies_after_countdown() {
        let mut config = ReshuffleConfig::default();
        config.auto_apply.low_impact_only = false;
        let script = "at,kind,text\n2026-05-02 08:50,report,running 45 min late\n";
        let signals = parse_script(script.as_bytes(), "Europe/Lisbon").unwrap();
        let sources = ScriptedSource::per_kind(signals, &config);

        let controller = ExecutionController::new(schedule(), config.clone());
        let mut replay = Replay::new(controller, ReshuffleEngine::new(config), sources);
        let entries = replay.run(lisbon(8, 50), lisbon(10, 0), ScriptedSource::is_exhausted);

        let applied = entries
            .iter()
            .find(|e| {
                matches!(
                    e.event,
                    SessionEvent::Notice {
                        notice: ControllerNotice::ReshuffleApplied {
                            user_confirmed: false,
                            ..
                        }
                    }
                )
            })
            .unwrap();
        assert_eq!(applied.at, lisbon(8, 50) + TimeDelta::seconds(20));
        assert_eq!(replay.controller().history().count(), 1);
    }
}
