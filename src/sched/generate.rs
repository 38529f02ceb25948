//! Pure schedule generation: registry + policy knobs → concrete triggers.
//!
//! No clocks, no I/O. Identical inputs yield an identical trigger set,
//! which is what makes the schedule testable and diffable.

use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};

use super::registry::{SpecialSlot, TaskMetadata, Tier};
use crate::config::Settings;

/// Seconds between consecutive L1 tasks in the post-close wave.
const L1_WAVE_STEP_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    DailyAt(NaiveTime),
    WeeklyAt(Weekday, NaiveTime),
    Every {
        period: Duration,
        initial_delay: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub name: &'static str,
    pub trigger: Trigger,
}

/// Expand the registry into concrete triggers.
pub fn generate_schedule(registry: &[TaskMetadata], knobs: &Settings) -> Vec<ScheduledTask> {
    registry
        .iter()
        .map(|task| {
            let trigger = match task.tier {
                Tier::L1 => Trigger::DailyAt(
                    knobs.l1_daily_time
                        + chrono::Duration::seconds(
                            (u64::from(task.offset_multiplier) * L1_WAVE_STEP_SECS) as i64,
                        ),
                ),
                Tier::L2 => Trigger::Every {
                    period: knobs.l2_interval,
                    initial_delay: knobs.l2_task_offset * task.offset_multiplier,
                },
                Tier::Special => match task.special_slot {
                    Some(SpecialSlot::Daily(t)) => Trigger::DailyAt(t),
                    Some(SpecialSlot::Weekly(w)) => Trigger::WeeklyAt(w.weekday, w.time),
                    // A Special task without a slot is a registry bug; park it
                    // at midnight rather than panicking the composition root.
                    None => Trigger::DailyAt(NaiveTime::MIN),
                },
            };
            ScheduledTask {
                name: task.name,
                trigger,
            }
        })
        .collect()
}

/// Next wall-clock firing strictly after `now` for a cron-style trigger.
/// Interval triggers are driven by the runtime clock instead.
pub fn next_fire(trigger: &Trigger, now: NaiveDateTime) -> Option<NaiveDateTime> {
    match trigger {
        Trigger::DailyAt(t) => {
            let today = now.date().and_time(*t);
            Some(if today > now {
                today
            } else {
                (now.date() + chrono::Duration::days(1)).and_time(*t)
            })
        }
        Trigger::WeeklyAt(weekday, t) => {
            let mut date = now.date();
            for _ in 0..8 {
                if date.weekday() == *weekday {
                    let fire = date.and_time(*t);
                    if fire > now {
                        return Some(fire);
                    }
                }
                date += chrono::Duration::days(1);
            }
            None
        }
        Trigger::Every { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::registry::build_registry;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn generation_is_deterministic() {
        let settings = Settings::default();
        let registry = build_registry(&settings);
        let a = generate_schedule(&registry, &settings);
        let b = generate_schedule(&registry, &settings);
        assert_eq!(a, b);
        assert_eq!(a.len(), registry.len());
    }

    #[test]
    fn l1_wave_staggers_by_thirty_seconds() {
        let settings = Settings::default();
        let registry = build_registry(&settings);
        let schedule = generate_schedule(&registry, &settings);

        let at = |name: &str| {
            schedule
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.trigger)
                .unwrap()
        };
        assert_eq!(at("symbol_list"), Trigger::DailyAt(t(17, 30)));
        assert_eq!(
            at("daily_quotes"),
            Trigger::DailyAt(NaiveTime::from_hms_opt(17, 30, 30).unwrap())
        );
        assert_eq!(
            at("tech_indicators"),
            Trigger::DailyAt(NaiveTime::from_hms_opt(17, 31, 0).unwrap())
        );
    }

    #[test]
    fn l2_tasks_stagger_by_offset_knob() {
        let settings = Settings::default();
        let registry = build_registry(&settings);
        let schedule = generate_schedule(&registry, &settings);

        let every = |name: &str| match schedule.iter().find(|s| s.name == name).unwrap().trigger {
            Trigger::Every {
                period,
                initial_delay,
            } => (period, initial_delay),
            other => panic!("expected interval trigger, got {other:?}"),
        };
        assert_eq!(
            every("minute_bars"),
            (Duration::from_secs(300), Duration::ZERO)
        );
        assert_eq!(
            every("news"),
            (Duration::from_secs(300), Duration::from_secs(120))
        );
        assert_eq!(
            every("embeddings"),
            (Duration::from_secs(300), Duration::from_secs(240))
        );
    }

    #[test]
    fn knobs_flow_into_triggers() {
        let mut settings = Settings::default();
        settings.l1_daily_time = t(18, 0);
        settings.l2_interval = Duration::from_secs(120);
        settings.l2_task_offset = Duration::from_secs(40);

        let registry = build_registry(&settings);
        let schedule = generate_schedule(&registry, &settings);
        let quotes = schedule.iter().find(|s| s.name == "daily_quotes").unwrap();
        assert_eq!(
            quotes.trigger,
            Trigger::DailyAt(NaiveTime::from_hms_opt(18, 0, 30).unwrap())
        );
        let news = schedule.iter().find(|s| s.name == "news").unwrap();
        assert_eq!(
            news.trigger,
            Trigger::Every {
                period: Duration::from_secs(120),
                initial_delay: Duration::from_secs(40),
            }
        );
    }

    #[test]
    fn next_fire_daily_rolls_over_midnight() {
        let trig = Trigger::DailyAt(t(17, 30));
        let before = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        assert_eq!(
            next_fire(&trig, before).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(17, 30, 0)
                .unwrap()
        );

        let after = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        assert_eq!(
            next_fire(&trig, after).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 16)
                .unwrap()
                .and_hms_opt(17, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn next_fire_weekly_finds_the_right_day() {
        // 2024-01-15 is a Monday.
        let trig = Trigger::WeeklyAt(Weekday::Sat, t(20, 0));
        let now = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(
            next_fire(&trig, now).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 20)
                .unwrap()
                .and_hms_opt(20, 0, 0)
                .unwrap()
        );

        // Exactly at the slot → next week.
        let at_slot = NaiveDate::from_ymd_opt(2024, 1, 20)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        assert_eq!(
            next_fire(&trig, at_slot).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 27)
                .unwrap()
                .and_hms_opt(20, 0, 0)
                .unwrap()
        );
    }
}
