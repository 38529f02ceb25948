//! Declarative task registry — the single source of truth for the schedule.
//!
//! A flat list of records, immutable once built. Nothing registers itself
//! at runtime; adding a task means adding a row here and an arm to the
//! syncer dispatcher, which keeps the generated schedule diffable.

use chrono::NaiveTime;

use crate::config::{Settings, WeeklySpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Daily post-close wave.
    L1,
    /// Intraday polling.
    L2,
    /// Own cron slot from `schedule_spec`.
    Special,
}

/// Cron-like slot for `Special` tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialSlot {
    Daily(NaiveTime),
    Weekly(WeeklySpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMetadata {
    pub name: &'static str,
    pub tier: Tier,
    /// L1: multiples of 30 s after the wave start, ordering DB contention.
    /// L2: multiples of the stagger offset.
    pub offset_multiplier: u32,
    /// Only read for `Special` tasks.
    pub special_slot: Option<SpecialSlot>,
}

impl TaskMetadata {
    const fn l1(name: &'static str, offset_multiplier: u32) -> Self {
        Self {
            name,
            tier: Tier::L1,
            offset_multiplier,
            special_slot: None,
        }
    }

    const fn l2(name: &'static str, offset_multiplier: u32) -> Self {
        Self {
            name,
            tier: Tier::L2,
            offset_multiplier,
            special_slot: None,
        }
    }

    const fn special(name: &'static str, slot: SpecialSlot) -> Self {
        Self {
            name,
            tier: Tier::Special,
            offset_multiplier: 0,
            special_slot: Some(slot),
        }
    }
}

/// Build the registry. Special slots come from configuration; everything
/// else is fixed. `tech_indicators` is deliberately positioned after
/// `daily_quotes` in the L1 wave — indicators for a date need that date's
/// bars.
pub fn build_registry(settings: &Settings) -> Vec<TaskMetadata> {
    // The doctor runs daily, one hour after the L1 wave starts.
    let doctor_time = settings.l1_daily_time + chrono::Duration::hours(1);

    vec![
        TaskMetadata::l1("symbol_list", 0),
        TaskMetadata::l1("daily_quotes", 1),
        TaskMetadata::l1("tech_indicators", 2),
        TaskMetadata::l1("valuations", 3),
        TaskMetadata::l1("fund_flow", 4),
        TaskMetadata::l1("margin", 5),
        TaskMetadata::l1("dragon_tiger", 6),
        TaskMetadata::l1("northbound_flow", 7),
        TaskMetadata::l1("market_sentiment", 8),
        TaskMetadata::l1("limit_up", 9),
        TaskMetadata::l1("sector_quotes", 10),
        TaskMetadata::l2("minute_bars", 0),
        TaskMetadata::l2("news", 1),
        TaskMetadata::l2("embeddings", 2),
        TaskMetadata::special(
            "financial_statements",
            SpecialSlot::Weekly(settings.financial_schedule),
        ),
        TaskMetadata::special(
            "news_cleanup",
            SpecialSlot::Weekly(settings.cleanup_schedule),
        ),
        TaskMetadata::special("data_doctor", SpecialSlot::Daily(doctor_time)),
    ]
}

pub fn find_task<'a>(registry: &'a [TaskMetadata], name: &str) -> Option<&'a TaskMetadata> {
    registry.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_names_are_unique() {
        let registry = build_registry(&Settings::default());
        let mut names: Vec<&str> = registry.iter().map(|t| t.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), registry.len());
    }

    #[test]
    fn indicators_scheduled_after_daily_quotes() {
        let registry = build_registry(&Settings::default());
        let quotes = find_task(&registry, "daily_quotes").unwrap();
        let indicators = find_task(&registry, "tech_indicators").unwrap();
        assert!(indicators.offset_multiplier > quotes.offset_multiplier);
    }

    #[test]
    fn special_tasks_carry_slots() {
        let registry = build_registry(&Settings::default());
        for name in ["financial_statements", "news_cleanup", "data_doctor"] {
            let task = find_task(&registry, name).unwrap();
            assert_eq!(task.tier, Tier::Special);
            assert!(task.special_slot.is_some());
        }
    }
}
