//! Live session: one controller, one countdown task, any number of pollers.
//!
//! The controller lives behind an async mutex. A trigger check takes the
//! processing guard, releases the lock while the engine works, then hands the
//! response back with the ticket; anything the traveller did in between
//! bumps the controller version and the response is discarded as stale.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use detour_core::{
    CheckOutcome, CompletedActivity, ControllerError, ControllerNotice, ExecutionController, InProgressActivity,
    ReshuffleEngine, ReshuffleEvent, ScheduleStatus, SkippedActivity, TriggerEvent, TripSchedule, UndoFailure,
};
use detour_signals::TriggerSource;

use crate::clock::Clock;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Notice {
        notice: ControllerNotice,
    },
    CheckCompleted {
        summary: String,
        status: ScheduleStatus,
        next_check_in_seconds: u64,
    },
    SourceFailed {
        source: String,
        error: String,
    },
}

struct Shared {
    controller: Mutex<ExecutionController>,
    engine: ReshuffleEngine,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SessionEvent>,
    countdown: StdMutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish(&self, ctl: &mut ExecutionController) {
        for notice in ctl.drain_notices() {
            self.emit(SessionEvent::Notice { notice });
        }
    }

    fn replace_countdown(&self, next: Option<JoinHandle<()>>) {
        let previous = match self.countdown.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        };
        if let Some(handle) = previous {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct LiveSession {
    shared: Arc<Shared>,
}

impl LiveSession {
    pub fn new(controller: ExecutionController, engine: ReshuffleEngine, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                controller: Mutex::new(controller),
                engine,
                clock,
                events,
                countdown: StdMutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    pub async fn schedule(&self) -> TripSchedule {
        self.shared.controller.lock().await.current_schedule().clone()
    }

    /// Read-only access to the controller.
    pub async fn inspect<R>(&self, f: impl FnOnce(&ExecutionController) -> R) -> R {
        let ctl = self.shared.controller.lock().await;
        f(&ctl)
    }

    /// Run one check→analyze→propose cycle over `triggers`.
    pub async fn submit(&self, triggers: Vec<TriggerEvent>) -> Result<CheckOutcome, ControllerError> {
        let ticket = {
            let mut ctl = self.shared.controller.lock().await;
            let ticket = ctl.begin_processing();
            self.shared.publish(&mut ctl);
            ticket?
        };
        self.shared.replace_countdown(None);

        let response = self.shared.engine.check(&triggers, &ticket.schedule);
        self.shared.emit(SessionEvent::CheckCompleted {
            summary: response.summary.clone(),
            status: response.schedule_status,
            next_check_in_seconds: response.next_check_in_seconds,
        });

        let outcome = {
            let mut ctl = self.shared.controller.lock().await;
            let outcome = ctl.handle_trigger_check_response(ticket, response, self.now());
            self.shared.publish(&mut ctl);
            outcome?
        };
        if let CheckOutcome::CountdownStarted { version, seconds } = outcome {
            self.arm_countdown(version, seconds);
        }
        Ok(outcome)
    }

    fn arm_countdown(&self, version: u64, seconds: u64) {
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            let mut ctl = shared.controller.lock().await;
            match ctl.fire_auto_apply(version, shared.clock.now()) {
                Ok(event) => info!(event = %event.id, version, "countdown applied reshuffle"),
                Err(e) => debug!(version, error = %e, "countdown lapsed"),
            }
            shared.publish(&mut ctl);
        });
        self.shared.replace_countdown(Some(handle));
    }

    pub async fn confirm(&self) -> Result<ReshuffleEvent, ControllerError> {
        self.shared.replace_countdown(None);
        let mut ctl = self.shared.controller.lock().await;
        let applied = ctl.confirm_pending(self.now());
        self.shared.publish(&mut ctl);
        applied
    }

    pub async fn reject(&self) -> Result<(), ControllerError> {
        self.shared.replace_countdown(None);
        let mut ctl = self.shared.controller.lock().await;
        let rejected = ctl.reject_reshuffle();
        self.shared.publish(&mut ctl);
        rejected
    }

    pub async fn undo(&self) -> Result<ReshuffleEvent, UndoFailure> {
        self.shared.replace_countdown(None);
        let mut ctl = self.shared.controller.lock().await;
        let undone = ctl.undo(self.now());
        self.shared.publish(&mut ctl);
        undone
    }

    pub async fn expire_undo(&self) -> usize {
        let mut ctl = self.shared.controller.lock().await;
        let expired = ctl.expire_undo(self.now());
        self.shared.publish(&mut ctl);
        expired
    }

    pub async fn report_delay(&self, minutes: i32) -> ScheduleStatus {
        self.shared.replace_countdown(None);
        let mut ctl = self.shared.controller.lock().await;
        let status = ctl.report_delay(minutes);
        self.shared.publish(&mut ctl);
        status
    }

    pub async fn start_activity(&self, slot_id: &str) -> Result<InProgressActivity, ControllerError> {
        let mut ctl = self.shared.controller.lock().await;
        let started = ctl.start_activity(slot_id, self.now()).cloned();
        self.shared.publish(&mut ctl);
        started
    }

    pub async fn complete_activity(
        &self,
        slot_id: &str,
        rating: Option<u8>,
        notes: Option<String>,
    ) -> Result<CompletedActivity, ControllerError> {
        let mut ctl = self.shared.controller.lock().await;
        let completed = ctl.complete_activity(slot_id, rating, notes, self.now()).cloned();
        self.shared.publish(&mut ctl);
        completed
    }

    pub async fn skip_activity(&self, slot_id: &str, reason: &str) -> Result<SkippedActivity, ControllerError> {
        self.shared.replace_countdown(None);
        let mut ctl = self.shared.controller.lock().await;
        let skipped = ctl.skip_activity(slot_id, reason, self.now()).cloned();
        self.shared.publish(&mut ctl);
        skipped
    }

    /// Stay longer where we are, then re-time the rest of the day.
    pub async fn extend_current_activity(&self, minutes: i32) -> Result<CheckOutcome, ControllerError> {
        let trigger = {
            let mut ctl = self.shared.controller.lock().await;
            let trigger = ctl.extend_current_activity(minutes, self.now());
            self.shared.publish(&mut ctl);
            trigger?
        };
        self.submit(vec![trigger]).await
    }

    /// Poll `source` on its own cadence until the task is aborted. Triggers
    /// that could not be checked (guard busy, stale schedule) are carried
    /// into the next round.
    pub fn spawn_poller<S>(&self, mut source: S) -> JoinHandle<()>
    where
        S: TriggerSource + Send + 'static,
    {
        let session = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(source.poll_seconds().max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut carried: Vec<TriggerEvent> = Vec::new();
            loop {
                ticker.tick().await;
                let schedule = session.schedule().await;
                match source.poll(&schedule, session.now()) {
                    Ok(found) => carried.extend(found),
                    Err(e) => {
                        warn!(source = source.name(), error = %e, "trigger source failed");
                        session.shared.emit(SessionEvent::SourceFailed {
                            source: source.name().to_string(),
                            error: format!("{e:#}"),
                        });
                    }
                }
                if carried.is_empty() {
                    continue;
                }
                match session.submit(carried.clone()).await {
                    Ok(_) => carried.clear(),
                    Err(e @ (ControllerError::Busy | ControllerError::StaleSnapshot { .. })) => {
                        debug!(source = source.name(), error = %e, "check deferred to next poll");
                    }
                    Err(e) => {
                        warn!(source = source.name(), error = %e, "check failed, dropping triggers");
                        carried.clear();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_event_wire_shape() {
        let event = SessionEvent::Notice {
            notice: ControllerNotice::ReshuffleRejected {
                result_id: "rs-1".into(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "notice");
        assert_eq!(json["notice"]["kind"], "reshuffle_rejected");
    }
}
