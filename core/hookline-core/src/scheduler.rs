//! Minute-resolution task scheduler driven by the daemon loop.
//!
//! Tasks fire either on a 5-field cron expression or on a fixed interval.
//! Last-run times persist in the global `scheduler.json` record so a daemon
//! restart neither repeats nor forgets a run. A run is recorded only after its
//! handler succeeds; a failed task is retried on the next eligible tick.
//!
//! Cron fields: minute (0-59), hour (0-23), day of month (1-31), month (1-12),
//! day of week (0-7, 0 and 7 both Sunday). Each field accepts `*`, `n`,
//! `a-b`, `*/n`, `a-b/n` and comma lists. All fields must match; expressions
//! are evaluated against UTC.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HooklineError, ScheduleError, StoreError};
use crate::scope::Scope;
use crate::store::{RecordKey, RecordKind, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
}

impl CronExpr {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::InvalidExpression {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, got {}", fields.len())));
        }

        let minute = parse_field(fields[0], 0, 59).map_err(&invalid)?;
        let hour = parse_field(fields[1], 0, 23).map_err(&invalid)?;
        let day_of_month = parse_field(fields[2], 1, 31).map_err(&invalid)?;
        let month = parse_field(fields[3], 1, 12).map_err(&invalid)?;
        let mut day_of_week = parse_field(fields[4], 0, 7).map_err(&invalid)?;
        if day_of_week.contains(7) {
            day_of_week.0 |= 1;
        }

        Ok(Self {
            source: expression.trim().to_string(),
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the minute containing `now` matches.
    pub fn matches(&self, now: DateTime<Utc>) -> bool {
        self.minute.contains(now.minute())
            && self.hour.contains(now.hour())
            && self.day_of_month.contains(now.day())
            && self.month.contains(now.month())
            && self.day_of_week.contains(now.weekday().num_days_from_sunday())
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<FieldSet, String> {
    let mut set = 0u64;
    for part in field.split(',') {
        if part.is_empty() {
            return Err(format!("empty list item in {:?}", field));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step {:?}", step))?;
                if step == 0 || step > max - min {
                    return Err(format!("step out of range in {:?}", part));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, min, max)?, parse_value(hi, min, max)?)
        } else {
            let value = parse_value(range, min, max)?;
            // `n/step` runs from n to the end of the range
            if step > 1 {
                (value, max)
            } else {
                (value, value)
            }
        };
        if lo > hi {
            return Err(format!("descending range {:?}", range));
        }

        let mut value = lo;
        while value <= hi {
            set |= 1 << value;
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
    }
    Ok(FieldSet(set))
}

fn parse_value(raw: &str, min: u32, max: u32) -> Result<u32, String> {
    let value: u32 = raw
        .parse()
        .map_err(|_| format!("invalid number {:?}", raw))?;
    if value < min || value > max {
        return Err(format!("{} out of range {}-{}", value, min, max));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    Cron(CronExpr),
    Every(Duration),
}

impl Schedule {
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Cron(_) => "cron",
            Schedule::Every(_) => "interval",
        }
    }

    fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match self {
            Schedule::Cron(expr) => {
                expr.matches(now)
                    && !last_run.is_some_and(|last| same_minute(last, now))
            }
            Schedule::Every(interval) => match last_run {
                None => true,
                Some(last) => (now - last)
                    .to_std()
                    .map_or(false, |elapsed| elapsed >= *interval),
            },
        }
    }
}

fn same_minute(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive() && a.hour() == b.hour() && a.minute() == b.minute()
}

/// Persisted last-run times, keyed by task name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    #[serde(default)]
    pub tasks: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTask {
    pub name: String,
    pub schedule: Schedule,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatus {
    pub name: String,
    pub kind: &'static str,
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub ran: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    store: Store,
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            tasks: Vec::new(),
        }
    }

    fn key() -> RecordKey {
        RecordKey::scoped(&Scope::Global, RecordKind::Scheduler)
    }

    /// Registers (or replaces) a task.
    pub fn register(&mut self, name: &str, schedule: Schedule) {
        self.tasks.retain(|task| task.name != name);
        self.tasks.push(ScheduledTask {
            name: name.to_string(),
            schedule,
        });
    }

    /// Registers a cron task. A malformed expression leaves the task
    /// unregistered; other tasks are unaffected.
    pub fn register_cron(&mut self, name: &str, expression: &str) -> Result<(), ScheduleError> {
        match CronExpr::parse(expression) {
            Ok(expr) => {
                self.register(name, Schedule::Cron(expr));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(task = name, error = %err, "Scheduled task disabled");
                Err(err)
            }
        }
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    pub fn run_log(&self) -> Result<RunLog, StoreError> {
        Ok(self.store.load::<RunLog>(&Self::key())?.unwrap_or_default())
    }

    /// Names of the tasks due at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let log = self.run_log()?;
        Ok(self
            .tasks
            .iter()
            .filter(|task| task.schedule.is_due(log.tasks.get(&task.name).copied(), now))
            .map(|task| task.name.clone())
            .collect())
    }

    pub fn mark_run(&self, name: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.with_lock(&Self::key(), |log: &mut Option<RunLog>| {
            log.get_or_insert_with(RunLog::default)
                .tasks
                .insert(name.to_string(), at);
        })
    }

    /// Runs every due task through `handler`, recording successful runs.
    pub fn tick<F>(&self, now: DateTime<Utc>, mut handler: F) -> Result<TickReport, StoreError>
    where
        F: FnMut(&str) -> Result<(), HooklineError>,
    {
        let mut report = TickReport::default();
        for name in self.due(now)? {
            match handler(&name) {
                Ok(()) => {
                    self.mark_run(&name, now)?;
                    tracing::info!(task = %name, "Scheduled task ran");
                    report.ran.push(name);
                }
                Err(err) => {
                    tracing::warn!(task = %name, error = %err, "Scheduled task failed");
                    report.failed.push(name);
                }
            }
        }
        Ok(report)
    }

    pub fn status(&self) -> Result<Vec<TaskStatus>, StoreError> {
        let log = self.run_log()?;
        Ok(self
            .tasks
            .iter()
            .map(|task| TaskStatus {
                name: task.name.clone(),
                kind: task.schedule.kind(),
                last_run: log.tasks.get(&task.name).copied(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn weekday_morning_expression() {
        let expr = CronExpr::parse("0 9 * * 1-5").unwrap();
        // 2024-06-03 is a Monday, 2024-06-08 a Saturday.
        assert!(expr.matches(at(2024, 6, 3, 9, 0)));
        assert!(expr.matches(at(2024, 6, 7, 9, 0)));
        assert!(!expr.matches(at(2024, 6, 8, 9, 0)));
        assert!(!expr.matches(at(2024, 6, 3, 9, 1)));
        assert!(expr.matches(at(2024, 6, 3, 9, 0) + chrono::Duration::seconds(42)));
    }

    #[test]
    fn sunday_is_zero_or_seven() {
        let sunday = at(2024, 6, 9, 12, 0);
        assert!(CronExpr::parse("0 12 * * 0").unwrap().matches(sunday));
        assert!(CronExpr::parse("0 12 * * 7").unwrap().matches(sunday));
    }

    #[test]
    fn steps_ranges_and_lists() {
        let expr = CronExpr::parse("*/15 8-18/2 1,15 * *").unwrap();
        assert!(expr.matches(at(2024, 6, 1, 8, 45)));
        assert!(expr.matches(at(2024, 6, 15, 18, 0)));
        assert!(!expr.matches(at(2024, 6, 15, 9, 0)));
        assert!(!expr.matches(at(2024, 6, 2, 8, 0)));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for bad in [
            "* * * *", "61 * * * *", "*/0 * * * *", "5-1 * * * *", "a * * * *", "1,,2 * * * *",
            "1-5/4294967295 * * * *", "* */24 * * *",
        ] {
            assert!(
                matches!(CronExpr::parse(bad), Err(ScheduleError::InvalidExpression { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn invalid_cron_disables_only_that_task() {
        let temp = tempdir().unwrap();
        let mut scheduler = Scheduler::new(Store::new(StorageConfig::with_root(temp.path().to_path_buf())));
        assert!(scheduler.register_cron("broken", "not a cron").is_err());
        scheduler.register("checkin", Schedule::Every(Duration::from_secs(60)));

        assert_eq!(scheduler.due(Utc::now()).unwrap(), vec!["checkin".to_string()]);
    }

    #[test]
    fn cron_runs_once_per_matching_minute() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let mut scheduler = Scheduler::new(store.clone());
        scheduler.register_cron("briefing", "0 9 * * 1-5").unwrap();

        let nine = at(2024, 6, 3, 9, 0);
        let report = scheduler.tick(nine, |_| Ok(())).unwrap();
        assert_eq!(report.ran, vec!["briefing".to_string()]);

        // Restarted daemon: a fresh scheduler reads the persisted run log.
        let mut scheduler = Scheduler::new(store);
        scheduler.register_cron("briefing", "0 9 * * 1-5").unwrap();
        let again = scheduler
            .tick(nine + chrono::Duration::seconds(30), |_| Ok(()))
            .unwrap();
        assert!(again.ran.is_empty());
        assert!(scheduler.due(at(2024, 6, 4, 9, 0)).unwrap().contains(&"briefing".to_string()));
    }

    #[test]
    fn failed_run_is_retried() {
        let temp = tempdir().unwrap();
        let mut scheduler = Scheduler::new(Store::new(StorageConfig::with_root(temp.path().to_path_buf())));
        scheduler.register("checkin", Schedule::Every(Duration::from_secs(3600)));
        let now = at(2024, 6, 3, 10, 0);

        let report = scheduler
            .tick(now, |name| {
                Err(HooklineError::TaskFailed {
                    name: name.to_string(),
                    details: "send failed".to_string(),
                })
            })
            .unwrap();
        assert_eq!(report.failed, vec!["checkin".to_string()]);
        assert_eq!(scheduler.status().unwrap()[0].last_run, None);

        let report = scheduler
            .tick(now + chrono::Duration::minutes(1), |_| Ok(()))
            .unwrap();
        assert_eq!(report.ran, vec!["checkin".to_string()]);
        assert!(scheduler
            .due(now + chrono::Duration::minutes(30))
            .unwrap()
            .is_empty());
        assert_eq!(
            scheduler.due(now + chrono::Duration::minutes(61)).unwrap(),
            vec!["checkin".to_string()]
        );
    }
}
