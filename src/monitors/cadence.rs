use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Timelike};
use rand::Rng;

/// When a monitor fires, derived from its interval. Boundaries are aligned to
/// local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Every second whose value is a multiple of `n` (intervals up to a minute).
    EverySeconds(u32),
    /// Second zero of every minute that is a multiple of `n`.
    EveryMinutes(u32),
    /// `minute_offset` past every hour that is a multiple of `hours`.
    EveryHours { hours: u32, minute_offset: u32 },
}

impl Cadence {
    pub fn from_interval<R: Rng + ?Sized>(interval_secs: u32, rng: &mut R) -> Self {
        let interval = interval_secs.max(1);
        if interval <= 60 {
            Cadence::EverySeconds(interval)
        } else if interval <= 3600 {
            Cadence::EveryMinutes(interval.div_ceil(60))
        } else {
            let hours = match interval.div_ceil(3600) % 24 {
                0 => 24,
                h => h,
            };
            Cadence::EveryHours {
                hours,
                minute_offset: rng.random_range(0..60),
            }
        }
    }

    fn step(&self) -> Duration {
        match self {
            Cadence::EverySeconds(_) => Duration::seconds(1),
            Cadence::EveryMinutes(_) => Duration::minutes(1),
            Cadence::EveryHours { .. } => Duration::hours(1),
        }
    }

    fn matches(&self, at: NaiveDateTime) -> bool {
        match *self {
            Cadence::EverySeconds(n) => at.second() % n == 0,
            Cadence::EveryMinutes(n) => at.minute() % n == 0,
            Cadence::EveryHours { hours, .. } => at.hour() % hours == 0,
        }
    }

    /// The earliest candidate strictly after `now`, already aligned to the step.
    fn first_candidate(&self, now: NaiveDateTime) -> NaiveDateTime {
        let whole_second = now.with_nanosecond(0).unwrap_or(now);
        match *self {
            Cadence::EverySeconds(_) => whole_second + Duration::seconds(1),
            Cadence::EveryMinutes(_) => {
                whole_second.with_second(0).unwrap_or(whole_second) + Duration::minutes(1)
            }
            Cadence::EveryHours { minute_offset, .. } => {
                let slot = whole_second
                    .with_second(0)
                    .and_then(|t| t.with_minute(minute_offset))
                    .unwrap_or(whole_second);
                if slot > now {
                    slot
                } else {
                    slot + Duration::hours(1)
                }
            }
        }
    }

    /// Next boundary strictly after `now`, in naive local time.
    pub fn next_after_naive(&self, now: NaiveDateTime) -> NaiveDateTime {
        let mut candidate = self.first_candidate(now);
        // A full day of steps covers every tier.
        for _ in 0..=86_400 {
            if self.matches(candidate) {
                return candidate;
            }
            candidate += self.step();
        }
        candidate
    }

    /// Next firing time strictly after `now`. Local times skipped by a DST
    /// change are passed over.
    pub fn next_fire_after(&self, now: DateTime<Local>) -> DateTime<Local> {
        let mut naive = now.naive_local();
        for _ in 0..48 {
            naive = self.next_after_naive(naive);
            if let Some(at) = Local.from_local_datetime(&naive).earliest() {
                if at > now {
                    return at;
                }
            }
        }
        now + self.step()
    }
}
