use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::calendar::Calendar;
use crate::library::{ContentItem, Library};

#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub item: ContentItem,
    pub start: DateTime<Utc>,
}

pub type Schedule = Vec<ScheduleEntry>;

/// Materializes a fixed-length, time-stamped playlist by walking a simulated
/// clock forward from "now". Every successful selection advances the shared
/// library cursors, so consecutive builds over the same libraries yield
/// different items on purpose.
#[derive(Debug, Clone)]
pub struct ScheduleBuilder {
    pub length: usize,
    pub ad_every: usize,
    pub ad_category: String,
}

impl ScheduleBuilder {
    pub fn new(length: usize, ad_every: usize, ad_category: impl Into<String>) -> Self {
        Self {
            length,
            ad_every,
            ad_category: ad_category.into(),
        }
    }

    /// Calendar mode. Ad cadence overrides the calendar: every `ad_every`-th
    /// slot draws from the ad library no matter what the calendar resolves.
    /// A slot whose category has no (or an empty) library is skipped without
    /// stalling the simulated clock.
    pub fn build(
        &self,
        calendar: &Calendar,
        libraries: &mut HashMap<String, Library>,
        now: DateTime<Utc>,
    ) -> Schedule {
        let mut schedule = Vec::with_capacity(self.length);
        let mut clock = now;
        for slot in 0..self.length {
            let category = if self.is_ad_slot(slot) {
                self.ad_category.clone()
            } else {
                match calendar.resolve_at(clock) {
                    Some(category) => category.to_string(),
                    None => {
                        debug!(slot, clock = %clock, "no program scheduled, skipping slot");
                        continue;
                    }
                }
            };
            let Some(library) = libraries.get_mut(&category) else {
                debug!(slot, category, "no library for category, skipping slot");
                continue;
            };
            let Ok(item) = library.select() else {
                debug!(slot, category, "library empty, skipping slot");
                continue;
            };
            clock = self.push_entry(&mut schedule, item, clock);
        }
        info!(slots = schedule.len(), "schedule materialized");
        schedule
    }

    /// Calendar-less mode: one flat rotation with ads keyed off the plain
    /// slot-index modulo. The result is consumed with wrap-around.
    pub fn build_flat(
        &self,
        flat: &mut Library,
        ads: &mut Library,
        now: DateTime<Utc>,
    ) -> Schedule {
        let mut schedule = Vec::with_capacity(self.length);
        let mut clock = now;
        for slot in 0..self.length {
            let source = if self.is_ad_slot(slot) { &mut *ads } else { &mut *flat };
            let Ok(item) = source.select() else {
                continue;
            };
            clock = self.push_entry(&mut schedule, item, clock);
        }
        info!(slots = schedule.len(), "flat rotation materialized");
        schedule
    }

    fn is_ad_slot(&self, slot: usize) -> bool {
        self.ad_every > 0 && slot % self.ad_every == 0
    }

    fn push_entry(
        &self,
        schedule: &mut Schedule,
        item: ContentItem,
        clock: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let advance = Duration::milliseconds(item.duration_ms);
        schedule.push(ScheduleEntry { item, start: clock });
        clock + advance
    }
}
