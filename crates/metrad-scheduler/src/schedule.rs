use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use metrad_types::status_code::ScheduleCode;
use metrad_types::{make_error_msg, Result, UtcTime};

/// Whether the schedule can still fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Active,
    Ended,
}

/// The outcome of one `wait`: the schedule state and how many whole
/// intervals went by unobserved since the last fire.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleResponse {
    pub state: ScheduleState,
    pub missed: u64,
}

/// Fixed-interval schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleSchedule {
    pub interval_ms: u64,
}

impl SimpleSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Cron-expression schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronSchedule {
    pub expression: String,
}

/// Interval schedule bounded by an optional start/stop window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowedSchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<UtcTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<UtcTime>,
    pub interval_ms: u64,
}

impl WindowedSchedule {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// The schedule kinds a task can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    Simple(SimpleSchedule),
    Cron(CronSchedule),
    Windowed(WindowedSchedule),
}

/// Sleep to the next interval boundary after `last`, returning how many
/// boundaries were missed: `floor((now - last) / interval) - 1`.
async fn wait_on_interval(last: Option<UtcTime>, interval: Duration) -> u64 {
    let Some(last) = last else {
        tokio::time::sleep(interval).await;
        return 0;
    };

    let now = Utc::now();
    let elapsed = now
        .signed_duration_since(*last.as_chrono())
        .to_std()
        .unwrap_or(Duration::ZERO);

    let behind = (elapsed.as_nanos() / interval.as_nanos().max(1)) as u64;
    let step = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::milliseconds(1));
    let steps = (behind + 1).min(i32::MAX as u64) as i32;
    let next = *last.as_chrono() + step * steps;
    if let Ok(sleep_for) = next.signed_duration_since(now).to_std() {
        tokio::time::sleep(sleep_for).await;
    }
    behind.saturating_sub(1)
}

impl Schedule {
    /// Must pass before a task is created around this schedule.
    pub fn validate(&self) -> Result<()> {
        match self {
            Schedule::Simple(s) => {
                if s.interval_ms == 0 {
                    return make_error_msg(
                        ScheduleCode::INVALID,
                        "interval must be greater than 0",
                    );
                }
                Ok(())
            }
            Schedule::Cron(c) => {
                cron::Schedule::from_str(&c.expression).map_err(|e| {
                    metrad_types::Status::with_message(
                        ScheduleCode::INVALID,
                        format!("bad cron expression {:?}: {}", c.expression, e),
                    )
                })?;
                Ok(())
            }
            Schedule::Windowed(w) => {
                if w.interval_ms == 0 {
                    return make_error_msg(
                        ScheduleCode::INVALID,
                        "interval must be greater than 0",
                    );
                }
                if let (Some(start), Some(stop)) = (w.start, w.stop) {
                    if stop <= start {
                        return make_error_msg(
                            ScheduleCode::INVALID,
                            "window stop must be after start",
                        );
                    }
                }
                Ok(())
            }
        }
    }

    /// Block until the next fire time.
    pub async fn wait(&self, last: Option<UtcTime>) -> ScheduleResponse {
        match self {
            Schedule::Simple(s) => {
                let missed = wait_on_interval(last, s.interval()).await;
                ScheduleResponse {
                    state: ScheduleState::Active,
                    missed,
                }
            }
            Schedule::Cron(c) => {
                // validate() ran before task creation; a bad expression here
                // ends the schedule instead of firing blind.
                let Ok(schedule) = cron::Schedule::from_str(&c.expression) else {
                    return ScheduleResponse {
                        state: ScheduleState::Ended,
                        missed: 0,
                    };
                };
                let now = Utc::now();
                let missed = match last {
                    None => 0,
                    Some(last) => schedule
                        .after(last.as_chrono())
                        .take_while(|t| *t <= now)
                        .take(1_000)
                        .count()
                        .saturating_sub(1) as u64,
                };
                let Some(next) = schedule.after(&now).next() else {
                    return ScheduleResponse {
                        state: ScheduleState::Ended,
                        missed,
                    };
                };
                sleep_until_chrono(next).await;
                ScheduleResponse {
                    state: ScheduleState::Active,
                    missed,
                }
            }
            Schedule::Windowed(w) => {
                let now = UtcTime::now();
                if let Some(stop) = w.stop {
                    if now > stop {
                        return ScheduleResponse {
                            state: ScheduleState::Ended,
                            missed: 0,
                        };
                    }
                }
                if let Some(start) = w.start {
                    if now < start {
                        sleep_until_chrono(*start.as_chrono()).await;
                        return ScheduleResponse {
                            state: ScheduleState::Active,
                            missed: 0,
                        };
                    }
                }
                let missed = wait_on_interval(last, w.interval()).await;
                let state = match w.stop {
                    Some(stop) if UtcTime::now() > stop => ScheduleState::Ended,
                    _ => ScheduleState::Active,
                };
                ScheduleResponse { state, missed }
            }
        }
    }
}

async fn sleep_until_chrono(at: DateTime<Utc>) {
    if let Ok(wait) = at.signed_duration_since(Utc::now()).to_std() {
        tokio::time::sleep(wait).await;
    }
}
