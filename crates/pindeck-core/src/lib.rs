//! # PinDeck 控制核心
//!
//! 本 crate 提供树莓派 GPIO 控制服务器的两个核心组件：
//! - [`GpioController`]：引脚状态跟踪器（方向/上下拉/电平/PWM 描述符）
//! - [`ServoController`]：SG90 舵机控制器（角度/平滑移动/往返扫描）
//!
//! 两个组件只依赖 `pindeck-hal` 的后端能力抽象，彼此独立。上层分发器
//! （web 传输层，不在本 crate 范围内）将入站命令反序列化后同步调用
//! 这里的操作，并把返回的结果结构体序列化给客户端。
//!
//! # 错误模型
//!
//! 所有公开操作返回 `Result<T, E>`；底层后端异常一律在组件内部捕获
//! 并包装为组件错误，绝不向分发器抛出未包装的低层错误。
//!
//! # 并发模型
//!
//! 变更操作假定来自单线程调用方（分发器逐条处理命令）。唯一的后台
//! 并发是每个舵机至多一个扫描线程，它与前台通过原子标志和原子角度
//! 标量通信（last-write-wins，刻意不做严格加锁）。

pub mod config;
pub mod error;
pub mod events;
pub mod gpio;
pub mod results;
pub mod servo;

pub use error::{GpioError, ServoError};
pub use events::{ChannelEventSink, GpioEvent, GpioEventSink, NullEventSink};
pub use gpio::{GpioController, PinModeRequest};
pub use results::{
    AllPinStates, PinInfo, PinSnapshot, PinState, PwmBackend, PwmSettings, PwmStarted, PwmStopped,
    ResetDone, ScanStarted, ScanStopped, ServoEnabled, ServoMove, ServoStatus, SystemStatus,
};
pub use servo::{ScanSpeed, ServoController};

// 重新导出 HAL 的共享类型，分发器无需直接依赖 pindeck-hal
pub use pindeck_hal::{Direction, HalError, Pull};
