//! # PinDeck 硬件抽象层
//!
//! GPIO/PWM 硬件抽象层，提供统一的后端接口抽象。
//!
//! 两种硬件能力分别对应一个 trait：
//! - [`DigitalGpio`]：数字 GPIO 驱动（方向/上下拉/电平读写 + 软件 PWM）
//! - [`PwmDaemon`]：PWM 守护进程连接（pigpiod，硬件 PWM / 舵机脉宽）
//!
//! 任一后端都可能缺失（未安装驱动、守护进程未运行），上层必须容忍
//! "句柄不存在" 并降级到模拟模式。

use thiserror::Error;

pub mod pigpiod;

pub use pigpiod::PigpiodClient;

#[cfg(target_os = "linux")]
pub mod rpi;

#[cfg(target_os = "linux")]
pub use rpi::RppalGpio;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockDaemon, MockGpio};

/// 引脚方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    Input,
    Output,
}

/// 输入引脚的内部偏置电阻
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Pull {
    #[default]
    Off,
    Up,
    Down,
}

/// 后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalErrorKind {
    /// 编号模式未建立或已被外部 cleanup 失效
    NotInitialized,
    /// 守护进程未连接（或连接已断开）
    NotConnected,
    /// 底层 IO 错误（socket、字符设备）
    Io,
    /// 参数非法（引脚号越界、脉宽越界等）
    InvalidArgument,
    /// 后端自身报告的故障
    Backend,
    /// 该后端不支持的操作
    Unsupported,
}

/// 硬件抽象层统一错误类型
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct HalError {
    pub kind: HalErrorKind,
    pub message: String,
}

impl HalError {
    pub fn new(kind: HalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 是否提示上层应执行 cleanup-and-retry 重新初始化
    pub fn is_reinit_hint(&self) -> bool {
        matches!(self.kind, HalErrorKind::NotInitialized)
    }
}

impl From<std::io::Error> for HalError {
    fn from(err: std::io::Error) -> Self {
        Self::new(HalErrorKind::Io, err.to_string())
    }
}

/// 数字 GPIO 驱动能力
///
/// 对应原生驱动库（Raspberry Pi 上为 rppal）。软件 PWM 实例与引脚
/// 一一对应，因此直接以引脚号作为实例标识。
pub trait DigitalGpio: Send {
    /// 建立引脚编号模式
    ///
    /// 幂等：已初始化时再次调用等同于校验。编号模式可能被外部
    /// cleanup 失效，此时后续操作返回 `NotInitialized`。
    fn init(&mut self) -> Result<(), HalError>;

    fn set_direction(&mut self, pin: u8, dir: Direction) -> Result<(), HalError>;

    fn set_pull(&mut self, pin: u8, pull: Pull) -> Result<(), HalError>;

    /// 读取电平，返回 0 或 1
    fn read_level(&mut self, pin: u8) -> Result<u8, HalError>;

    /// 写入电平（0 或 1）
    fn write_level(&mut self, pin: u8, level: u8) -> Result<(), HalError>;

    /// 在引脚上启动软件 PWM
    fn start_soft_pwm(&mut self, pin: u8, frequency_hz: f64) -> Result<(), HalError>;

    /// 调整软件 PWM 占空比（百分比 0-100）
    fn set_soft_pwm_duty(&mut self, pin: u8, percent: f64) -> Result<(), HalError>;

    /// 停止引脚上的软件 PWM
    fn stop_soft_pwm(&mut self, pin: u8) -> Result<(), HalError>;

    /// 释放全部已占用引脚并使编号模式失效
    fn release_all(&mut self) -> Result<(), HalError>;
}

/// PWM 守护进程连接能力
///
/// 对应 pigpiod。除硬件 PWM 外也提供基本的方向/电平操作，
/// 上层在两个后端都存在时会同时写两边。
pub trait PwmDaemon: Send {
    /// 连接是否仍然有效
    fn connected(&self) -> bool;

    fn set_direction(&mut self, pin: u8, dir: Direction) -> Result<(), HalError>;

    fn set_pull(&mut self, pin: u8, pull: Pull) -> Result<(), HalError>;

    fn read_level(&mut self, pin: u8) -> Result<u8, HalError>;

    fn write_level(&mut self, pin: u8, level: u8) -> Result<(), HalError>;

    /// 硬件 PWM
    ///
    /// `duty_ppm` 为百万分比（0 - 1_000_000）。`(0, 0)` 表示停止输出。
    fn hardware_pwm(&mut self, pin: u8, frequency_hz: u32, duty_ppm: u32) -> Result<(), HalError>;

    /// 设置（软件定时的守护进程）PWM 频率
    fn set_pwm_frequency(&mut self, pin: u8, frequency_hz: u32) -> Result<(), HalError>;

    /// 设置 PWM 占空比（pigpio 量纲 0-255；0 表示停止输出）
    fn set_pwm_duty_cycle(&mut self, pin: u8, duty: u32) -> Result<(), HalError>;

    /// 设置舵机脉宽（微秒，0 表示关闭；有效域 500-2500）
    fn set_servo_pulse_width(&mut self, pin: u8, pulse_us: u32) -> Result<(), HalError>;

    /// 关闭连接（之后 `connected()` 返回 false）
    fn close(&mut self) -> Result<(), HalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// HalError 的 Display 包含分类与消息
    #[test]
    fn test_hal_error_display() {
        let err = HalError::new(HalErrorKind::NotConnected, "daemon gone");
        let msg = format!("{}", err);
        assert!(msg.contains("NotConnected"));
        assert!(msg.contains("daemon gone"));
    }

    /// 只有 NotInitialized 提示重新初始化
    #[test]
    fn test_reinit_hint() {
        assert!(HalError::new(HalErrorKind::NotInitialized, "mode reset").is_reinit_hint());
        assert!(!HalError::new(HalErrorKind::Io, "broken pipe").is_reinit_hint());
        assert!(!HalError::new(HalErrorKind::Backend, "fault").is_reinit_hint());
    }

    /// IO 错误可以直接转换
    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timeout");
        let err: HalError = io.into();
        assert_eq!(err.kind, HalErrorKind::Io);
        assert!(err.message.contains("read timeout"));
    }
}
