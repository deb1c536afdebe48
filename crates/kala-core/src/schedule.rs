//! ISO-8601 recurrence schedule strings (`Rn/<start>/<interval>`) and
//! next-fire computation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::IsoDuration;
use crate::error::ScheduleError;

/// `-1` means "repeat forever"; `0` means "fire once, at `start_time`, then stop".
pub const REPEAT_FOREVER: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub times_to_repeat: i64,
    pub start_time: DateTime<Utc>,
    pub interval: IsoDuration,
}

impl Schedule {
    /// Parse `R[n]/<instant>/<duration>`. When `check_time` is set, a
    /// `start_time` already in the past is rejected.
    pub fn parse(s: &str, check_time: bool) -> Result<Self, ScheduleError> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 {
            return Err(ScheduleError::WrongPartCount(s.to_string()));
        }

        let repeat = parts[0];
        let times_to_repeat = if repeat == "R" {
            REPEAT_FOREVER
        } else if let Some(n) = repeat.strip_prefix('R') {
            n.parse::<i64>()
                .map_err(|_| ScheduleError::InvalidRepeat(repeat.to_string()))?
        } else {
            return Err(ScheduleError::InvalidRepeat(repeat.to_string()));
        };

        let start_time = parse_instant(parts[1])
            .map_err(|e| ScheduleError::InvalidStartTime(parts[1].to_string(), e))?;

        if check_time && start_time <= Utc::now() {
            return Err(ScheduleError::PastStartTime(start_time));
        }

        let interval = IsoDuration::parse(parts[2])?;

        Ok(Schedule { times_to_repeat, start_time, interval })
    }

    /// How long to wait, from `now`, until the next fire.
    ///
    /// `last_attempted_run` is the timestamp of the last run attempt (`None`
    /// if the job has never run). `resume_at_next_scheduled_time` selects
    /// between skipping a missed backlog entirely versus catching up one
    /// interval at a time.
    pub fn wait_duration(
        &self,
        now: DateTime<Utc>,
        last_attempted_run: Option<DateTime<Utc>>,
        resume_at_next_scheduled_time: bool,
    ) -> chrono::Duration {
        if self.start_time > now {
            return self.start_time - now;
        }

        if self.times_to_repeat == 0 {
            return chrono::Duration::zero();
        }

        if resume_at_next_scheduled_time {
            if self.start_time == DateTime::<Utc>::UNIX_EPOCH {
                return chrono::Duration::zero();
            }
            let mut p = self.start_time;
            while p < now {
                p = self.interval.add(p);
            }
            return p - now;
        }

        match last_attempted_run {
            None => self.interval.relative_to(now),
            Some(last) => self.interval.add(last) - now,
        }
    }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // RFC3339 without an explicit timezone offset: assume UTC.
    let with_zulu = format!("{s}Z");
    DateTime::parse_from_rfc3339(&with_zulu)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}
