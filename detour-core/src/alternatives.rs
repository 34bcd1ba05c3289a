//! Alternative-activity lookup used by `replace_activity`.

use serde::{Deserialize, Serialize};

use crate::schedule::{Activity, TimeSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternativeReason {
    Closed,
    Weather,
    Preference,
    TimeConstraint,
}

/// How well an alternative fits the time it would get. Best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFit {
    Perfect,
    Good,
    Tight,
    Overflow,
}

impl ScheduleFit {
    /// Classify by minutes left over once the alternative is done.
    pub fn from_slack(slack_minutes: i32) -> ScheduleFit {
        match slack_minutes {
            0..=15 => ScheduleFit::Perfect,
            s if s > 15 => ScheduleFit::Good,
            -15..=-1 => ScheduleFit::Tight,
            _ => ScheduleFit::Overflow,
        }
    }

    /// Fits that a schedule can take without squeezing neighbours.
    pub fn is_comfortable(&self) -> bool {
        matches!(self, ScheduleFit::Perfect | ScheduleFit::Good)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeActivity {
    pub activity: Activity,
    pub fit: ScheduleFit,
    /// Minutes the alternative needs on site.
    pub duration_minutes: i32,
    /// Same category as the activity it would replace.
    #[serde(default)]
    pub same_category: bool,
}

impl AlternativeActivity {
    /// A like-for-like stand-in that fits without squeezing the day.
    pub fn is_like_for_like(&self) -> bool {
        self.same_category && self.fit.is_comfortable()
    }
}

pub trait AlternativeProvider {
    /// Ranked alternatives for `slot` given `available_minutes` to fill.
    fn alternatives(&self, slot: &TimeSlot, available_minutes: i32, reason: AlternativeReason) -> Vec<AlternativeActivity>;
}

/// Uses the alternatives captured on each slot when the trip was generated.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotAlternatives;

impl AlternativeProvider for SlotAlternatives {
    fn alternatives(&self, slot: &TimeSlot, available_minutes: i32, reason: AlternativeReason) -> Vec<AlternativeActivity> {
        let current = slot.activity.as_ref().map(|a| a.id.as_str());
        let category = slot.category();
        // Closed or rained-out venues are replaced in kind when possible.
        let in_kind = matches!(reason, AlternativeReason::Closed | AlternativeReason::Weather);
        let mut out: Vec<AlternativeActivity> = slot
            .alternatives
            .iter()
            .filter(|a| Some(a.id.as_str()) != current)
            .filter(|a| reason != AlternativeReason::Weather || !a.outdoor)
            .map(|a| AlternativeActivity {
                activity: a.clone(),
                fit: ScheduleFit::from_slack(available_minutes - a.duration_minutes),
                duration_minutes: a.duration_minutes,
                same_category: a.category == category,
            })
            .collect();

        // Scores only rank; they are compared, never summed.
        out.sort_by(|a, b| {
            let off_kind = |x: &AlternativeActivity| in_kind && !x.same_category;
            off_kind(a)
                .cmp(&off_kind(b))
                .then_with(|| a.fit.cmp(&b.fit))
                .then_with(|| b.activity.score.total_cmp(&a.activity.score))
                .then_with(|| a.activity.id.cmp(&b.activity.id))
        });
        out
    }
}
