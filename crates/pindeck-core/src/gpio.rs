//! 引脚状态跟踪器
//!
//! 在无状态的命令接口与少量持久硬件状态（方向、最近电平、活动 PWM）
//! 之间做中介。同时驱动两个可选后端：数字驱动（rppal）与 PWM 守护
//! 进程（pigpiod）；两者都缺失时进入模拟模式，读操作回退到缓存值，
//! 写操作只更新缓存。
//!
//! 编号模式是进程级单例状态，可能被外部 cleanup 失效；所有触碰硬件
//! 的操作先经过 [`GpioController::ensure_initialized`] 的两次尝试循环
//! （init → 可恢复失败则 release 一次 → 重试一次）。

use crate::config;
use crate::error::GpioError;
use crate::events::{GpioEventSink, NullEventSink};
use crate::results::{
    AllPinStates, PinInfo, PinSnapshot, PinState, PwmBackend, PwmSettings, PwmStarted, PwmStopped,
    ResetDone, SystemStatus,
};
use pindeck_hal::{DigitalGpio, Direction, HalError, Pull, PwmDaemon};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 分发器侧的引脚模式请求（上下拉别名在这里展开）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinModeRequest {
    Input,
    Output,
    InputPullup,
    InputPulldown,
}

impl PinModeRequest {
    /// 展开为 (方向, 上下拉)
    fn resolve(self) -> (Direction, Option<Pull>) {
        match self {
            Self::Input => (Direction::Input, None),
            Self::Output => (Direction::Output, None),
            Self::InputPullup => (Direction::Input, Some(Pull::Up)),
            Self::InputPulldown => (Direction::Input, Some(Pull::Down)),
        }
    }
}

/// 单个已配置引脚的记录
#[derive(Debug, Clone, Copy)]
struct PinRecord {
    mode: Direction,
    pull: Option<Pull>,
    /// 最近观察或写入的逻辑电平
    state: u8,
}

fn mode_name(mode: Direction) -> &'static str {
    match mode {
        Direction::Input => "input",
        Direction::Output => "output",
    }
}

fn pull_name(pull: Pull) -> &'static str {
    match pull {
        Pull::Off => "off",
        Pull::Up => "pullup",
        Pull::Down => "pulldown",
    }
}

fn level_name(level: u8) -> &'static str {
    if level != 0 { "HIGH" } else { "LOW" }
}

/// 引脚状态跟踪器
pub struct GpioController {
    digital: Option<Box<dyn DigitalGpio>>,
    daemon: Option<Box<dyn PwmDaemon>>,
    pins: BTreeMap<u8, PinRecord>,
    pwm: BTreeMap<u8, PwmSettings>,
    /// 编号模式是否已建立（惰性重建）
    initialized: bool,
    events: Arc<dyn GpioEventSink>,
}

impl GpioController {
    /// 创建跟踪器并尽力完成首次初始化
    ///
    /// 任一后端缺失不算错误：缺失的能力降级为模拟模式，只记录警告。
    pub fn new(
        digital: Option<Box<dyn DigitalGpio>>,
        daemon: Option<Box<dyn PwmDaemon>>,
    ) -> Self {
        let mut controller = Self {
            digital,
            daemon,
            pins: BTreeMap::new(),
            pwm: BTreeMap::new(),
            initialized: false,
            events: Arc::new(NullEventSink),
        };

        match controller.digital.as_mut() {
            Some(d) => match d.init() {
                Ok(()) => {
                    controller.initialized = true;
                    info!("GPIO initialized");
                }
                Err(e) => warn!(error = %e, "initial GPIO init failed, will retry lazily"),
            },
            None => warn!("digital GPIO driver not available, running in simulation mode"),
        }
        match controller.daemon.as_ref() {
            Some(dm) if dm.connected() => info!("pigpio daemon connected"),
            Some(_) => warn!("pigpio daemon handle present but not connected"),
            None => warn!("pigpio daemon not available, hardware PWM disabled"),
        }

        controller
    }

    /// 注入事件接收端
    pub fn with_event_sink(mut self, events: Arc<dyn GpioEventSink>) -> Self {
        self.events = events;
        self
    }

    /// 确保编号模式有效（显式两次尝试循环）
    ///
    /// 已标记初始化时仍重新调用 `init()` 校验——编号模式可能被外部
    /// cleanup 清掉。首次尝试以可恢复错误失败时，release 一次后重试
    /// 一次；再失败即报 `InitFailed`。
    fn ensure_initialized(&mut self) -> Result<(), GpioError> {
        let Some(digital) = self.digital.as_mut() else {
            // 无数字驱动时没有编号模式可言
            return Ok(());
        };

        if self.initialized {
            match digital.init() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "GPIO state lost, reinitializing");
                    self.initialized = false;
                }
            }
        }

        let digital = match self.digital.as_mut() {
            Some(d) => d,
            None => return Ok(()),
        };
        match digital.init() {
            Ok(()) => {
                self.initialized = true;
                info!("GPIO initialized");
                Ok(())
            }
            Err(first) if first.is_reinit_hint() => {
                warn!(error = %first, "GPIO init failed, retrying with cleanup");
                if let Err(e) = digital.release_all() {
                    warn!(error = %e, "GPIO cleanup warning");
                }
                match digital.init() {
                    Ok(()) => {
                        self.initialized = true;
                        info!("GPIO initialized after cleanup");
                        Ok(())
                    }
                    Err(second) => {
                        error!(error = %second, "GPIO init failed after cleanup");
                        Err(GpioError::InitFailed)
                    }
                }
            }
            Err(first) => {
                error!(error = %first, "GPIO initialization failed");
                Err(GpioError::InitFailed)
            }
        }
    }

    fn apply_digital_setup(
        digital: &mut dyn DigitalGpio,
        pin: u8,
        mode: Direction,
        pull: Option<Pull>,
    ) -> Result<(), HalError> {
        digital.set_direction(pin, mode)?;
        if mode == Direction::Input {
            if let Some(p) = pull {
                digital.set_pull(pin, p)?;
            }
        }
        Ok(())
    }

    /// 配置引脚方向与上下拉
    ///
    /// 写穿两个在场的后端。守护进程侧失败在数字驱动成功时仅告警；
    /// 数字驱动侧因编号模式被重置失败时，重建后重试一次。
    pub fn setup_pin(
        &mut self,
        pin: u8,
        mode: Direction,
        pull: Option<Pull>,
    ) -> Result<PinState, GpioError> {
        self.ensure_initialized()?;

        let first = self
            .digital
            .as_mut()
            .map(|d| Self::apply_digital_setup(d.as_mut(), pin, mode, pull));
        if let Some(Err(e)) = first {
            if e.is_reinit_hint() {
                warn!(error = %e, pin, "GPIO mode was reset, reinitializing");
                self.initialized = false;
                self.ensure_initialized()?;
                if let Some(d) = self.digital.as_mut() {
                    Self::apply_digital_setup(d.as_mut(), pin, mode, pull)?;
                }
            } else {
                return Err(e.into());
            }
        }

        let daemon_result = match self.daemon.as_mut() {
            Some(dm) if dm.connected() => {
                let mut apply = || -> Result<(), HalError> {
                    dm.set_direction(pin, mode)?;
                    if mode == Direction::Input {
                        dm.set_pull(pin, pull.unwrap_or(Pull::Off))?;
                    }
                    Ok(())
                };
                Some(apply())
            }
            _ => None,
        };
        if let Some(Err(e)) = daemon_result {
            if self.digital.is_some() {
                warn!(error = %e, pin, "daemon-side pin setup failed, digital driver proceeded");
            } else {
                return Err(e.into());
            }
        }

        let state = if mode == Direction::Input {
            self.read_pin_value(pin)
        } else {
            0
        };
        self.pins.insert(pin, PinRecord { mode, pull, state });

        let suffix = pull.map(|p| format!(" with {}", pull_name(p))).unwrap_or_default();
        info!(pin, mode = mode_name(mode), "pin setup{}", suffix);

        Ok(PinState {
            pin,
            state,
            mode,
            message: format!("Pin {pin} configured as {}{suffix}", mode_name(mode)),
        })
    }

    /// 按分发器请求设置引脚模式（input_pullup/input_pulldown 别名展开）
    pub fn set_pin_mode(&mut self, pin: u8, mode: PinModeRequest) -> Result<PinState, GpioError> {
        let (direction, pull) = mode.resolve();
        self.setup_pin(pin, direction, pull)
    }

    /// 读取引脚的实际硬件电平
    ///
    /// 数字驱动优先，其次守护进程；两者都不在场时回退到缓存值。
    /// 读取故障降级为 0 并记录，绝不让读操作失败。
    fn read_pin_value(&mut self, pin: u8) -> u8 {
        if let Some(d) = self.digital.as_mut() {
            return match d.read_level(pin) {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, pin, "error reading pin value");
                    0
                }
            };
        }
        if let Some(dm) = self.daemon.as_mut() {
            if dm.connected() {
                return match dm.read_level(pin) {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, pin, "error reading pin value via daemon");
                        0
                    }
                };
            }
        }
        // 模拟模式：缓存值
        self.pins.get(&pin).map(|r| r.state).unwrap_or(0)
    }

    /// 写引脚电平（0/1，其余值折算为 1）
    ///
    /// 未配置为输出的引脚先自动配置。
    pub fn write_pin(&mut self, pin: u8, value: u8) -> Result<PinState, GpioError> {
        let value = u8::from(value != 0);
        self.ensure_initialized()?;

        let is_output = matches!(self.pins.get(&pin), Some(rec) if rec.mode == Direction::Output);
        if !is_output {
            self.setup_pin(pin, Direction::Output, None)?;
        }

        if let Some(d) = self.digital.as_mut() {
            d.write_level(pin, value)?;
        }
        let daemon_result = match self.daemon.as_mut() {
            Some(dm) if dm.connected() => Some(dm.write_level(pin, value)),
            _ => None,
        };
        if let Some(Err(e)) = daemon_result {
            if self.digital.is_some() {
                warn!(error = %e, pin, "daemon-side write failed, digital driver proceeded");
            } else {
                return Err(e.into());
            }
        }

        if let Some(rec) = self.pins.get_mut(&pin) {
            rec.state = value;
        }
        info!(pin, value, "pin written");

        // 尽力而为的实时通知；纯模拟模式下同样触发
        self.events.pin_changed(pin, value, Direction::Output);

        Ok(PinState {
            pin,
            state: value,
            mode: Direction::Output,
            message: format!("Pin {pin} set to {}", level_name(value)),
        })
    }

    /// 翻转引脚输出
    ///
    /// 只翻转缓存的最近电平，不先读硬件。
    pub fn toggle_pin(&mut self, pin: u8) -> Result<PinState, GpioError> {
        if !self.pins.contains_key(&pin) {
            self.setup_pin(pin, Direction::Output, None)?;
        }
        let current = self.pins.get(&pin).map(|r| r.state).unwrap_or(0);
        self.write_pin(pin, 1 - current)
    }

    /// 读引脚电平
    ///
    /// 未配置的引脚先自动配置为输入。
    pub fn read_pin(&mut self, pin: u8) -> Result<PinState, GpioError> {
        if !self.pins.contains_key(&pin) {
            self.setup_pin(pin, Direction::Input, None)?;
        }

        let state = self.read_pin_value(pin);
        let mode = match self.pins.get_mut(&pin) {
            Some(rec) => {
                rec.state = state;
                rec.mode
            }
            None => Direction::Input,
        };
        info!(pin, state, "pin read");

        Ok(PinState {
            pin,
            state,
            mode,
            message: format!("Pin {pin} is {}", level_name(state)),
        })
    }

    /// 读取全部已配置引脚
    ///
    /// 初始化必须先成功，否则整体失败。成功后尽力广播全量快照。
    pub fn read_all_pins(&mut self) -> Result<AllPinStates, GpioError> {
        self.ensure_initialized()?;

        let configured: Vec<u8> = self.pins.keys().copied().collect();
        let mut states = BTreeMap::new();
        for pin in configured {
            let state = self.read_pin_value(pin);
            if let Some(rec) = self.pins.get_mut(&pin) {
                rec.state = state;
                states.insert(
                    pin,
                    PinSnapshot {
                        state,
                        mode: rec.mode,
                        pull: rec.pull,
                    },
                );
            }
        }
        info!(count = states.len(), "read all pins");

        self.events.all_pins(&states);

        Ok(AllPinStates {
            message: format!("Read {} pins", states.len()),
            states,
        })
    }

    /// 启动 PWM 输出
    ///
    /// 数值边界在本组件内校验；守护进程在场时优先硬件 PWM（百分比
    /// 折算为百万分比），否则回退到与引脚一一绑定的软件 PWM。引脚上
    /// 已有的描述符先停掉再替换。
    pub fn start_pwm(
        &mut self,
        pin: u8,
        frequency: f64,
        duty_cycle: f64,
    ) -> Result<PwmStarted, GpioError> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(GpioError::InvalidFrequency(frequency));
        }
        if frequency > config::MAX_PWM_FREQUENCY_HZ {
            return Err(GpioError::FrequencyTooHigh(frequency));
        }
        if !duty_cycle.is_finite()
            || duty_cycle < config::MIN_DUTY_CYCLE_PERCENT
            || duty_cycle > config::MAX_DUTY_CYCLE_PERCENT
        {
            return Err(GpioError::InvalidDutyCycle(duty_cycle));
        }

        self.ensure_initialized()?;

        let is_output = matches!(self.pins.get(&pin), Some(rec) if rec.mode == Direction::Output);
        if !is_output {
            self.setup_pin(pin, Direction::Output, None)?;
        }

        if self.pwm.contains_key(&pin) {
            self.stop_pwm_descriptor(pin)?;
        }

        let backend = match self.daemon.as_mut() {
            Some(dm) if dm.connected() => {
                let duty_ppm = (duty_cycle * config::DUTY_PERCENT_TO_PPM).round() as u32;
                dm.hardware_pwm(pin, frequency.round() as u32, duty_ppm)?;
                PwmBackend::Hardware
            }
            _ => {
                if let Some(d) = self.digital.as_mut() {
                    d.start_soft_pwm(pin, frequency)?;
                    d.set_soft_pwm_duty(pin, duty_cycle)?;
                }
                // 纯模拟模式：仅登记描述符
                PwmBackend::Software
            }
        };

        self.pwm.insert(
            pin,
            PwmSettings {
                backend,
                frequency,
                duty_cycle,
            },
        );
        info!(pin, frequency, duty_cycle, "PWM started");

        Ok(PwmStarted {
            pin,
            frequency,
            duty_cycle,
            message: format!("Pin {pin} PWM started: {frequency}Hz, {duty_cycle}%"),
        })
    }

    /// 停止引脚上的 PWM
    pub fn stop_pwm(&mut self, pin: u8) -> Result<PwmStopped, GpioError> {
        if !self.pwm.contains_key(&pin) {
            return Err(GpioError::PwmNotRunning);
        }
        self.stop_pwm_descriptor(pin)?;
        info!(pin, "PWM stopped");

        Ok(PwmStopped {
            pin,
            message: format!("Pin {pin} PWM stopped"),
        })
    }

    /// 停掉并移除一个 PWM 描述符（硬件置零 / 软件停止）
    fn stop_pwm_descriptor(&mut self, pin: u8) -> Result<(), GpioError> {
        let Some(desc) = self.pwm.get(&pin).copied() else {
            return Ok(());
        };
        match desc.backend {
            PwmBackend::Hardware => {
                if let Some(dm) = self.daemon.as_mut() {
                    if dm.connected() {
                        dm.hardware_pwm(pin, 0, 0)?;
                    }
                }
            }
            PwmBackend::Software => {
                if let Some(d) = self.digital.as_mut() {
                    d.stop_soft_pwm(pin)?;
                }
            }
        }
        self.pwm.remove(&pin);
        Ok(())
    }

    /// 复位全部引脚
    ///
    /// 停掉所有 PWM、清空记录、释放底层引脚并将编号模式标记为失效
    /// （下次使用时惰性重建）。底层释放只告警，操作总是成功。
    pub fn reset_all_pins(&mut self) -> ResetDone {
        for pin in self.pwm.keys().copied().collect::<Vec<_>>() {
            if let Err(e) = self.stop_pwm_descriptor(pin) {
                warn!(error = %e, pin, "PWM stop warning during reset");
            }
        }
        self.pwm.clear();
        self.pins.clear();

        if let Some(d) = self.digital.as_mut() {
            if let Err(e) = d.release_all() {
                warn!(error = %e, "GPIO cleanup warning");
            }
            self.initialized = false;
        }
        info!("all GPIO pins reset");

        ResetDone {
            message: "All GPIO pins reset".to_string(),
        }
    }

    /// 终态清理
    ///
    /// 与复位相同的引脚/PWM 拆除，另外关闭并丢弃守护进程句柄；之后
    /// 需要硬件的调用将优雅失败直到重新构建。不抛错，只告警。
    pub fn cleanup(&mut self) {
        let _ = self.reset_all_pins();

        if let Some(mut dm) = self.daemon.take() {
            if let Err(e) = dm.close() {
                warn!(error = %e, "pigpio cleanup warning");
            } else {
                info!("pigpio cleanup completed");
            }
        }
    }

    /// 引脚详情（含活动 PWM 描述符）
    pub fn get_pin_info(&self, pin: u8) -> PinInfo {
        match self.pins.get(&pin) {
            Some(rec) => {
                let pwm = self.pwm.get(&pin).copied();
                PinInfo {
                    pin,
                    configured: true,
                    mode: Some(rec.mode),
                    pull: rec.pull,
                    state: Some(rec.state),
                    pwm_active: pwm.is_some(),
                    pwm,
                }
            }
            None => PinInfo {
                pin,
                configured: false,
                mode: None,
                pull: None,
                state: None,
                pwm_active: false,
                pwm: None,
            },
        }
    }

    /// 系统状态快照（调试接口）
    pub fn get_system_status(&self) -> SystemStatus {
        let pin_states = self
            .pins
            .iter()
            .map(|(&pin, rec)| {
                (
                    pin,
                    PinSnapshot {
                        state: rec.state,
                        mode: rec.mode,
                        pull: rec.pull,
                    },
                )
            })
            .collect();

        SystemStatus {
            digital_available: self.digital.is_some(),
            daemon_available: self.daemon.is_some(),
            gpio_initialized: self.initialized,
            daemon_connected: self.daemon.as_ref().map(|d| d.connected()).unwrap_or(false),
            configured_pins: self.pins.len(),
            active_pwm: self.pwm.len(),
            pin_states,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pindeck_hal::mock::{MockDaemon, MockGpio};

    fn controller_with_mocks() -> (GpioController, MockGpio, MockDaemon) {
        let gpio = MockGpio::new();
        let daemon = MockDaemon::new();
        let controller = GpioController::new(
            Some(Box::new(gpio.clone())),
            Some(Box::new(daemon.clone())),
        );
        (controller, gpio, daemon)
    }

    /// 别名模式展开为方向 + 上下拉
    #[test]
    fn test_pin_mode_request_resolution() {
        assert_eq!(
            PinModeRequest::InputPullup.resolve(),
            (Direction::Input, Some(Pull::Up))
        );
        assert_eq!(
            PinModeRequest::InputPulldown.resolve(),
            (Direction::Input, Some(Pull::Down))
        );
        assert_eq!(PinModeRequest::Output.resolve(), (Direction::Output, None));
    }

    /// toggle 只翻转缓存电平，从不先读硬件
    #[test]
    fn test_toggle_flips_cached_level_only() {
        let (mut controller, gpio, _daemon) = controller_with_mocks();
        controller.setup_pin(17, Direction::Output, None).unwrap();
        controller.write_pin(17, 1).unwrap();

        // 硬件侧被外部改写也不影响 toggle 的输入
        gpio.set_input_level(17, 0);
        let result = controller.toggle_pin(17).unwrap();
        assert_eq!(result.state, 0);
        let result = controller.toggle_pin(17).unwrap();
        assert_eq!(result.state, 1);
    }

    /// PWM 数值校验在触碰硬件之前完成
    #[test]
    fn test_pwm_validation() {
        let (mut controller, _gpio, daemon) = controller_with_mocks();

        let err = controller.start_pwm(12, 0.0, 50.0).unwrap_err();
        assert!(matches!(err, GpioError::InvalidFrequency(_)));

        let err = controller.start_pwm(12, 100_000.0, 50.0).unwrap_err();
        assert!(format!("{err}").contains("maximum safe limit"));

        let err = controller.start_pwm(12, 1000.0, 150.0).unwrap_err();
        assert!(matches!(err, GpioError::InvalidDutyCycle(_)));

        assert!(daemon.hardware_pwm_calls().is_empty());
    }

    /// 占空比按百万分比折算传给硬件后端
    #[test]
    fn test_hardware_pwm_duty_conversion() {
        let (mut controller, _gpio, daemon) = controller_with_mocks();
        controller.start_pwm(12, 1000.0, 50.0).unwrap();
        assert_eq!(daemon.hardware_pwm_calls(), vec![(12, 1000, 500_000)]);
    }
}
