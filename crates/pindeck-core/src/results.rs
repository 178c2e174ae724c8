//! 操作结果结构体
//!
//! 每个公开操作返回一个可序列化的结果结构，分发器直接序列化给
//! 客户端。`message` 字段是面向 UI 的可读文本，与原有前端约定一致。

use pindeck_hal::{Direction, Pull};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// PWM 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PwmBackend {
    /// pigpiod 硬件 PWM（低抖动）
    Hardware,
    /// 数字驱动的软件 PWM（任意引脚可用）
    Software,
}

/// 活动中的 PWM 描述符参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PwmSettings {
    pub backend: PwmBackend,
    pub frequency: f64,
    pub duty_cycle: f64,
}

/// 单引脚操作结果（配置/读/写/翻转共用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinState {
    pub pin: u8,
    /// 逻辑电平 0/1
    pub state: u8,
    pub mode: Direction,
    pub message: String,
}

/// 单个引脚的状态快照（read_all_pins / 事件广播共用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinSnapshot {
    pub state: u8,
    pub mode: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull: Option<Pull>,
}

/// 全量读取结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllPinStates {
    pub states: BTreeMap<u8, PinSnapshot>,
    pub message: String,
}

/// PWM 启动结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PwmStarted {
    pub pin: u8,
    pub frequency: f64,
    pub duty_cycle: f64,
    pub message: String,
}

/// PWM 停止结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PwmStopped {
    pub pin: u8,
    pub message: String,
}

/// 全量复位结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetDone {
    pub message: String,
}

/// 引脚详情（诊断接口，未配置的引脚也有合法返回）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinInfo {
    pub pin: u8,
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull: Option<Pull>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<u8>,
    pub pwm_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwm: Option<PwmSettings>,
}

/// 系统状态（调试接口）
///
/// 所有字段都是原始类型，保证无条件可序列化。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub digital_available: bool,
    pub daemon_available: bool,
    pub gpio_initialized: bool,
    pub daemon_connected: bool,
    pub configured_pins: usize,
    pub active_pwm: usize,
    pub pin_states: BTreeMap<u8, PinSnapshot>,
}

/// 舵机启用结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoEnabled {
    pub angle: f64,
    pub message: String,
}

/// 舵机角度命令结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoMove {
    pub angle: f64,
    pub target_angle: f64,
    /// 脉宽（毫秒）
    pub pulse_width: f64,
    /// 占空比（百分比，2 位小数）
    pub duty_cycle: f64,
}

/// 扫描启动结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStarted {
    pub start_angle: f64,
    pub end_angle: f64,
    pub speed: String,
    pub message: String,
}

/// 扫描停止结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStopped {
    pub current_angle: f64,
    pub message: String,
}

/// 舵机状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoStatus {
    pub pin: u8,
    pub enabled: bool,
    pub current_angle: f64,
    pub target_angle: f64,
    /// 脉宽（毫秒）
    pub pulse_width: f64,
    pub duty_cycle: f64,
    /// 固定 50 Hz
    pub frequency: u32,
    pub scanning: bool,
    pub daemon_available: bool,
    /// 墙钟时间 `HH:MM:SS`
    pub timestamp: String,
}
