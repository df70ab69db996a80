use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::{debug, warn};

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::ScheduleType;

const NEVER: &str = "Never";

/// 一次调度计算的结果，缺失的时间在展示时显示为 "Never"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTimes {
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduleTimes {
    pub fn display_last_run(&self) -> String {
        display_time(self.last_run)
    }

    pub fn display_next_run(&self) -> String {
        display_time(self.next_run)
    }
}

impl fmt::Display for ScheduleTimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "last={}, next={}",
            self.display_last_run(),
            self.display_next_run()
        )
    }
}

fn display_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| NEVER.to_string())
}

/// 解析频率表达式，例如 "10m"、"1h 30m"、"45s"
pub fn parse_frequency(expr: &str) -> SchedulerResult<Duration> {
    let invalid = |message: String| SchedulerError::InvalidFrequency {
        expr: expr.to_string(),
        message,
    };

    let std_duration = humantime::parse_duration(expr.trim()).map_err(|e| invalid(e.to_string()))?;
    if std_duration.is_zero() {
        return Err(invalid("频率必须大于0".to_string()));
    }

    Duration::from_std(std_duration).map_err(|e| invalid(e.to_string()))
}

/// 编译后的调度计算器
///
/// 跟踪缓存只在调度表达式变化时重新编译。
#[derive(Debug, Clone)]
pub enum ScheduleCalculator {
    Cron {
        expression: String,
        schedule: Box<Schedule>,
    },
    Frequency {
        expression: String,
        interval: Duration,
    },
    Manual,
}

impl ScheduleCalculator {
    pub fn compile(schedule_type: ScheduleType, expression: &str) -> SchedulerResult<Self> {
        match schedule_type {
            ScheduleType::Cron => {
                let schedule =
                    Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidCron {
                        expr: expression.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(ScheduleCalculator::Cron {
                    expression: expression.to_string(),
                    schedule: Box::new(schedule),
                })
            }
            ScheduleType::Frequency => Ok(ScheduleCalculator::Frequency {
                expression: expression.to_string(),
                interval: parse_frequency(expression)?,
            }),
            ScheduleType::Manual => Ok(ScheduleCalculator::Manual),
        }
    }

    pub fn schedule_type(&self) -> ScheduleType {
        match self {
            ScheduleCalculator::Cron { .. } => ScheduleType::Cron,
            ScheduleCalculator::Frequency { .. } => ScheduleType::Frequency,
            ScheduleCalculator::Manual => ScheduleType::Manual,
        }
    }

    pub fn expression(&self) -> &str {
        match self {
            ScheduleCalculator::Cron { expression, .. }
            | ScheduleCalculator::Frequency { expression, .. } => expression,
            ScheduleCalculator::Manual => "",
        }
    }

    /// 表达式与类型均未变化时可复用
    pub fn matches(&self, schedule_type: ScheduleType, expression: &str) -> bool {
        self.schedule_type() == schedule_type
            && (schedule_type == ScheduleType::Manual || self.expression() == expression)
    }

    /// 计算下一次运行时间
    ///
    /// CRON: 没有参考时间时以当前时间为准，返回严格晚于参考时间的触发点。
    /// FREQUENCY: 参考时间加上间隔；没有参考时间则不产生下一次运行时间。
    pub fn compute_next(
        &self,
        reference: Option<DateTime<Utc>>,
        last_executed: Option<DateTime<Utc>>,
    ) -> ScheduleTimes {
        let next_run = match self {
            ScheduleCalculator::Cron { schedule, .. } => {
                let reference = reference.unwrap_or_else(Utc::now);
                schedule.after(&reference).next()
            }
            ScheduleCalculator::Frequency { interval, .. } => reference.map(|r| r + *interval),
            ScheduleCalculator::Manual => None,
        };

        ScheduleTimes {
            last_run: last_executed,
            next_run,
        }
    }

    /// 检查作业在 `now` 时是否应该触发
    ///
    /// `reference` 是从未执行过时的起算点（通常为跟踪器创建时间）。
    pub fn is_due(
        &self,
        last_executed: Option<DateTime<Utc>>,
        reference: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        match self {
            ScheduleCalculator::Cron { schedule, expression } => {
                let base = last_executed.unwrap_or(reference);
                match schedule.after(&base).next() {
                    Some(next_time) => {
                        let due = next_time <= now;
                        if due {
                            debug!(
                                "CRON作业到期: 表达式={}, 基准时间={}, 触发时间={}",
                                expression,
                                base.format("%Y-%m-%d %H:%M:%S UTC"),
                                next_time.format("%Y-%m-%d %H:%M:%S UTC")
                            );
                        }
                        due
                    }
                    None => {
                        warn!("无法计算下一次执行时间，表达式: {}", expression);
                        false
                    }
                }
            }
            ScheduleCalculator::Frequency { interval, .. } => match last_executed {
                Some(last) => last + *interval <= now,
                None => true,
            },
            ScheduleCalculator::Manual => false,
        }
    }

    /// 从指定时间开始的若干次触发时间，仅CRON有意义
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        match self {
            ScheduleCalculator::Cron { schedule, .. } => schedule.after(&from).take(count).collect(),
            ScheduleCalculator::Frequency { interval, .. } => (1..=count as i32)
                .map(|i| from + *interval * i)
                .collect(),
            ScheduleCalculator::Manual => Vec::new(),
        }
    }
}

/// 纯函数形式的调度计算，每次调用都会编译表达式
pub fn compute_next(
    schedule_type: ScheduleType,
    reference: Option<DateTime<Utc>>,
    last_executed: Option<DateTime<Utc>>,
    expression: &str,
) -> SchedulerResult<ScheduleTimes> {
    let calculator = ScheduleCalculator::compile(schedule_type, expression)?;
    Ok(calculator.compute_next(reference, last_executed))
}
