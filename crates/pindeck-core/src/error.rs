//! 核心层错误类型定义
//!
//! 错误分类对应四类故障：参数校验失败、后端缺失、编号模式无法建立、
//! 已建立后端的调用故障。分发器统一渲染 `Display` 文本。

use pindeck_hal::HalError;
use thiserror::Error;

/// 引脚状态跟踪器错误
#[derive(Error, Debug)]
pub enum GpioError {
    /// 编号模式在 cleanup-and-retry 之后仍无法建立
    #[error("GPIO initialization failed")]
    InitFailed,

    /// PWM 频率非正数
    #[error("Invalid frequency: {0}. Must be a positive number.")]
    InvalidFrequency(f64),

    /// PWM 频率超出安全上限
    #[error("Frequency {0}Hz exceeds maximum safe limit (50kHz).")]
    FrequencyTooHigh(f64),

    /// 占空比越界
    #[error("Invalid duty cycle: {0}. Must be between 0 and 100.")]
    InvalidDutyCycle(f64),

    /// 请求停止的引脚上没有活动的 PWM 描述符
    #[error("PWM not running on this pin")]
    PwmNotRunning,

    /// 已建立的后端调用失败
    #[error("{0}")]
    Hardware(#[from] HalError),
}

/// 舵机控制器错误
#[derive(Error, Debug)]
pub enum ServoError {
    /// 没有可用的 PWM 守护进程连接
    #[error("pigpio daemon not available")]
    DaemonUnavailable,

    /// 舵机未启用时收到角度命令
    #[error("Servo not enabled")]
    NotEnabled,

    /// 已有扫描任务在运行
    #[error("Already scanning")]
    AlreadyScanning,

    /// 已建立的后端调用失败
    #[error("{0}")]
    Hardware(#[from] HalError),
}
