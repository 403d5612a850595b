use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 重试表共三档（1h/6h/24h），最多允许第四次尝试用完第三档
pub const MAX_CONFIGURABLE_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// 是否在进程内周期性触发批次
    pub enabled: bool,
    pub schedule_interval_seconds: u64,
    /// 每次调用最多认领的投递记录数
    pub batch_size: usize,
    /// 单次出站HTTP请求超时，必须严格小于调度间隔
    pub request_timeout_seconds: u64,
    /// 认领租约，超过后视为该次尝试已被放弃
    pub claim_lease_seconds: u64,
    pub max_attempts: u32,
    pub user_agent: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule_interval_seconds: 60,
            batch_size: 20,
            request_timeout_seconds: 10,
            claim_lease_seconds: 120,
            max_attempts: 3,
            user_agent: format!("webhook-relay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.schedule_interval_seconds,
            "dispatcher.schedule_interval_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.request_timeout_seconds,
            "dispatcher.request_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.claim_lease_seconds,
            "dispatcher.claim_lease_seconds",
        )?;
        ValidationUtils::validate_count(self.batch_size, "dispatcher.batch_size", 1000)?;
        ValidationUtils::validate_count(
            self.max_attempts as usize,
            "dispatcher.max_attempts",
            MAX_CONFIGURABLE_ATTEMPTS as usize,
        )?;
        ValidationUtils::validate_not_empty(&self.user_agent, "dispatcher.user_agent")?;

        ValidationUtils::validate_strictly_less(
            self.request_timeout_seconds,
            "dispatcher.request_timeout_seconds",
            self.schedule_interval_seconds,
            "dispatcher.schedule_interval_seconds",
        )?;
        ValidationUtils::validate_strictly_less(
            self.request_timeout_seconds,
            "dispatcher.request_timeout_seconds",
            self.claim_lease_seconds,
            "dispatcher.claim_lease_seconds",
        )?;

        Ok(())
    }
}
