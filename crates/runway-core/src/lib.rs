//! Pure logic behind runway: validation, schedules, health hysteresis, candidate
//! ordering and statistics. Nothing here performs I/O.

pub mod health;
pub mod ordering;
pub mod predicate;
pub mod schedule;
pub mod stats;
pub mod templates;
pub mod validation;

pub use health::HealthTracker;
pub use ordering::{Advance, AttemptPlan, CandidateView, order_candidates, plan_attempts};
pub use schedule::{CronSchedule, ScheduleError, normalize_cron};
pub use stats::{AdapterStats, TerminalRecord, adapter_stats, success_rate};
pub use validation::{validate, validate_all};
