//! Free-text traveller reports ("running 20 min late", "I'm exhausted",
//! "skip the museum", "need 30 more minutes here").

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use tracing::debug;

use detour_core::{
    DaySchedule, TimeSlot, TriggerContext, TriggerEvent, TriggerOrigin, TriggerSeverity, TripSchedule, UserCondition,
    UserRequestAction,
};

use crate::lookup::{current_slot, local_now, slot_named, today};

const DEFAULT_SLOW_DOWN_MINUTES: i32 = 30;

fn delay_severity(minutes: i32) -> TriggerSeverity {
    match minutes {
        m if m >= 60 => TriggerSeverity::High,
        m if m >= 30 => TriggerSeverity::Medium,
        _ => TriggerSeverity::Low,
    }
}

/// Strip filler around an activity reference ("the museum, please!").
fn clean_target(raw: &str) -> &str {
    let s = raw.trim().trim_end_matches(['.', '!', '?', ',']);
    let s = s.strip_prefix("the ").unwrap_or(s);
    s.split([',', ';']).next().unwrap_or(s).trim()
}

/// Parse a traveller message into a trigger against the current plan.
///
/// Returns `Ok(None)` for chatter that carries no actionable signal, or when
/// the message refers to nothing left on today's plan.
pub fn parse_report(text: &str, schedule: &TripSchedule, now: DateTime<Utc>) -> Result<Option<TriggerEvent>> {
    let late_re = Regex::new(r"(?i)\b(?P<minutes>\d{1,3})\s*(?:m|mins?|minutes?)\s+(?:behind|late)\b")?;
    let extend_re = Regex::new(concat!(
        r"(?i)\b(?:need|want|stay(?:ing)?|give\s+(?:me|us))\s+",
        r"(?:another\s+)?(?P<minutes>\d{1,3})\s*(?:more\s+)?(?:m|mins?|minutes?)\b"
    ))?;
    let slow_re = Regex::new(r"(?i)\bslow\s+(?:it\s+|things\s+)?down\b(?:.*?\b(?P<minutes>\d{1,3})\s*(?:m|mins?|minutes?)\b)?")?;
    let skip_re = Regex::new(r"(?i)\b(?:skip|drop|cancel)\s+(?P<what>[\w' -]+)")?;
    let replace_re = Regex::new(r"(?i)\b(?:replace|swap\s+out|something\s+else\s+instead\s+of)\s+(?P<what>[\w' -]+)")?;
    let states = [
        (Regex::new(r"(?i)\b(?:unwell|sick|ill|not\s+feeling\s+(?:well|good))\b")?, UserCondition::Unwell),
        (Regex::new(r"(?i)\b(?:exhausted|tired|worn\s+out|knackered|need\s+a\s+break)\b")?, UserCondition::Tired),
        (Regex::new(r"(?i)\b(?:hungry|starving)\b")?, UserCondition::Hungry),
        (Regex::new(r"(?i)\b(?:energi[sz]ed|full\s+of\s+energy|feeling\s+great)\b")?, UserCondition::Energized),
    ];

    let local = local_now(schedule, now)?;
    let Some(day) = today(schedule, local) else {
        debug!("no plan for today, ignoring report");
        return Ok(None);
    };
    let current = current_slot(day, local);
    let message = Some(text.trim().to_string());

    let built = if let Some(caps) = late_re.captures(text) {
        let minutes: i32 = caps["minutes"].parse()?;
        current.map(|slot| {
            TriggerEvent::new(
                TriggerContext::RunningLate {
                    delay_minutes: minutes,
                    reason: message.clone(),
                },
                delay_severity(minutes),
                TriggerOrigin::User,
                now,
            )
            .with_slot(slot.id.as_str())
        })
    } else if let Some(caps) = extend_re.captures(text) {
        let minutes: i32 = caps["minutes"].parse()?;
        current.map(|slot| {
            request(UserRequestAction::Extend { minutes }, message.clone(), delay_severity(minutes), now)
                .with_slot(slot.id.as_str())
        })
    } else if let Some(caps) = slow_re.captures(text) {
        let minutes = match caps.name("minutes") {
            Some(m) => m.as_str().parse()?,
            None => DEFAULT_SLOW_DOWN_MINUTES,
        };
        current.map(|slot| {
            request(UserRequestAction::SlowDown { minutes }, message.clone(), TriggerSeverity::Low, now)
                .with_slot(slot.id.as_str())
        })
    } else if let Some(caps) = skip_re.captures(text) {
        targeted(UserRequestAction::Skip, clean_target(&caps["what"]), day, local, current, message.clone(), now)
    } else if let Some(caps) = replace_re.captures(text) {
        targeted(UserRequestAction::Replace, clean_target(&caps["what"]), day, local, current, message.clone(), now)
    } else if let Some((_, condition)) = states.iter().find(|(re, _)| re.is_match(text)) {
        let severity = match condition {
            UserCondition::Unwell => TriggerSeverity::High,
            UserCondition::Tired | UserCondition::Hungry => TriggerSeverity::Medium,
            UserCondition::Energized => TriggerSeverity::Low,
        };
        let trigger = TriggerEvent::new(
            TriggerContext::UserState {
                condition: *condition,
                needs_break_minutes: None,
            },
            severity,
            TriggerOrigin::User,
            now,
        );
        Some(match current {
            Some(slot) => trigger.with_slot(slot.id.as_str()),
            None => trigger,
        })
    } else {
        debug!(text, "report carries no recognisable signal");
        None
    };

    let Some(trigger) = built else {
        return Ok(None);
    };
    trigger.validate()?;
    Ok(Some(trigger))
}

fn request(
    action: UserRequestAction,
    message: Option<String>,
    severity: TriggerSeverity,
    now: DateTime<Utc>,
) -> TriggerEvent {
    TriggerEvent::new(
        TriggerContext::UserRequest { action, message },
        severity,
        TriggerOrigin::User,
        now,
    )
}

/// Skip/replace aimed at a named activity; "this" or "it" means the current one.
fn targeted(
    action: UserRequestAction,
    target: &str,
    day: &DaySchedule,
    local: NaiveDateTime,
    current: Option<&TimeSlot>,
    message: Option<String>,
    now: DateTime<Utc>,
) -> Option<TriggerEvent> {
    let slot = match target.to_lowercase().as_str() {
        "this" | "it" | "this one" | "this place" => current,
        other => slot_named(day, local, other),
    };
    let Some(slot) = slot else {
        debug!(wanted = target, "report names nothing left on today's plan");
        return None;
    };
    Some(request(action, message, TriggerSeverity::Medium, now).with_slot(slot.id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use detour_core::{Activity, ActivityCategory, TriggerType};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn schedule() -> TripSchedule {
        TripSchedule::new("trip", "Lisbon", "Europe/Lisbon").with_day(
            DaySchedule::new(1, NaiveDate::from_ymd_opt(2026, 5, 2).unwrap())
                .with_slot(
                    TimeSlot::new("museum", t(9, 0), t(11, 0))
                        .with_activity(Activity::new("m", "Gulbenkian Museum", ActivityCategory::Museum, 120)),
                )
                .with_slot(
                    TimeSlot::new("park", t(11, 30), t(12, 30))
                        .with_activity(Activity::new("p", "Estrela Garden", ActivityCategory::Park, 60)),
                ),
        )
    }

    fn at_ten() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, 9, 0, 0).unwrap()
    }

    fn parse(text: &str) -> Option<TriggerEvent> {
        parse_report(text, &schedule(), at_ten()).unwrap()
    }

    #[test]
    fn test_running_late() {
        let trigger = parse("Running 20 min late, metro is stuck").unwrap();
        assert_eq!(trigger.trigger_type, TriggerType::RunningLate);
        assert_eq!(trigger.delay_minutes(), 20);
        assert_eq!(trigger.affected_slot_ids, vec!["museum"]);
        assert_eq!(trigger.severity, TriggerSeverity::Low);
    }

    #[test]
    fn test_extend_current_activity() {
        let trigger = parse("we need 30 more minutes here").unwrap();
        assert!(matches!(
            trigger.context,
            TriggerContext::UserRequest {
                action: UserRequestAction::Extend { minutes: 30 },
                ..
            }
        ));
        assert_eq!(trigger.affected_slot_ids, vec!["museum"]);
    }

    #[test]
    fn test_skip_by_name_and_by_category() {
        let by_category = parse("let's skip the park").unwrap();
        assert_eq!(by_category.affected_slot_ids, vec!["park"]);
        let current = parse("Skip this.").unwrap();
        assert_eq!(current.affected_slot_ids, vec!["museum"]);
        assert!(parse("skip the opera").is_none());
    }

    #[test]
    fn test_user_state() {
        let trigger = parse("I'm exhausted").unwrap();
        assert!(matches!(
            trigger.context,
            TriggerContext::UserState {
                condition: UserCondition::Tired,
                ..
            }
        ));
        assert_eq!(trigger.delay_minutes(), 30);
    }

    #[test]
    fn test_chatter_and_zero_delay() {
        assert!(parse("what a lovely view").is_none());
        assert!(parse_report("0 min late", &schedule(), at_ten()).is_err());
    }
}
