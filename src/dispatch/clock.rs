use chrono::{Local, NaiveDateTime};

/// Wall-clock source for the dispatch loop. Schedules are in local time.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}
