//! 固定配置常量
//!
//! 这些边界值来自硬件约束，不支持运行时修改。

/// PWM 频率安全上限（Hz）
pub const MAX_PWM_FREQUENCY_HZ: f64 = 50_000.0;

/// 占空比下限（百分比）
pub const MIN_DUTY_CYCLE_PERCENT: f64 = 0.0;

/// 占空比上限（百分比）
pub const MAX_DUTY_CYCLE_PERCENT: f64 = 100.0;

/// 占空比百分数 → 百万分比（pigpiod 硬件 PWM 的量纲）
pub const DUTY_PERCENT_TO_PPM: f64 = 10_000.0;
