//! Wall-clock boundaries for the monitoring loop
//!
//! The loop polls [`Schedule::poll`] with the local time on every tick. A
//! boundary fires on the first poll after it was crossed and never twice for
//! the same crossing. The very first poll only records where we are.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Boundaries crossed since the previous poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Boundaries {
    /// Calendar date changed
    pub day: bool,
    /// Entered a new logging slot (`minute % interval == 0`)
    pub interval: bool,
    /// Passed the daily status time
    pub status: bool,
}

impl Boundaries {
    pub fn any(&self) -> bool {
        self.day || self.interval || self.status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    date: NaiveDate,
    hour: u32,
    minute: u32,
}

#[derive(Debug, Clone)]
pub struct Schedule {
    log_interval_minutes: u32,
    status_time: Option<NaiveTime>,
    last: Option<(NaiveDateTime, Slot)>,
}

impl Schedule {
    /// `status_time` is `(hour, minute)`, `None` to never fire status.
    /// Intervals are held to 1..=60 minutes; 60 rolls over on the hour.
    pub fn new(log_interval_minutes: u32, status_time: Option<(u32, u32)>) -> Self {
        Self {
            log_interval_minutes: log_interval_minutes.clamp(1, 60),
            status_time: status_time.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0)),
            last: None,
        }
    }

    fn slot(&self, at: NaiveDateTime) -> Slot {
        let minute = at.minute();
        Slot {
            date: at.date(),
            hour: at.hour(),
            minute: minute - minute % self.log_interval_minutes,
        }
    }

    fn status_crossed(&self, prev: NaiveDateTime, now: NaiveDateTime) -> bool {
        let Some(time) = self.status_time else {
            return false;
        };
        let mut dates = vec![prev.date()];
        if now.date() != prev.date() {
            dates.push(now.date());
        }
        dates
            .into_iter()
            .map(|d| d.and_time(time))
            .any(|t| prev < t && t <= now)
    }

    pub fn poll(&mut self, now: NaiveDateTime) -> Boundaries {
        let slot = self.slot(now);

        let Some((prev, prev_slot)) = self.last else {
            self.last = Some((now, slot));
            return Boundaries::default();
        };

        if now <= prev {
            // Clock stepped back: re-anchor without firing
            self.last = Some((now, slot));
            return Boundaries::default();
        }

        let boundaries = Boundaries {
            day: now.date() != prev.date(),
            interval: slot != prev_slot,
            status: self.status_crossed(prev, now),
        };
        self.last = Some((now, slot));
        boundaries
    }
}
