use chrono::{DateTime, Duration, Utc};

/// 固定重试表中的一档
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// 第1次失败后等待1小时
    First,
    /// 第2次失败后等待6小时
    Second,
    /// 第3次及以后的失败等待24小时
    Third,
}

impl BackoffStep {
    pub fn for_attempt(attempt_count: i32) -> Self {
        match attempt_count {
            i32::MIN..=1 => BackoffStep::First,
            2 => BackoffStep::Second,
            _ => BackoffStep::Third,
        }
    }

    pub fn delay(&self) -> Duration {
        match self {
            BackoffStep::First => Duration::hours(1),
            BackoffStep::Second => Duration::hours(6),
            BackoffStep::Third => Duration::hours(24),
        }
    }
}

/// 失败后的处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    DeadLetter,
}

/// 重试策略
///
/// 纯函数，无状态、无I/O。`max_attempts` 是总尝试次数预算，
/// 达到预算后的失败直接进入死信。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: i32,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, i32::MAX as u32) as i32,
        }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// 给定失败后的 attempt_count，返回距离下次重试的间隔；`None` 表示放弃
    pub fn next(&self, attempt_count: i32) -> Option<Duration> {
        if attempt_count >= self.max_attempts {
            return None;
        }
        Some(BackoffStep::for_attempt(attempt_count).delay())
    }

    pub fn decide(&self, attempt_count: i32, failed_at: DateTime<Utc>) -> RetryDecision {
        match self.next(attempt_count) {
            Some(delay) => RetryDecision::RetryAt(failed_at + delay),
            None => RetryDecision::DeadLetter,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}
