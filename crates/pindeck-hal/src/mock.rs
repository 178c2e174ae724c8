//! Mock 后端
//!
//! 无硬件依赖的测试替身。句柄可 Clone，内部状态通过 `Arc<Mutex<_>>`
//! 共享，测试可以在把句柄移交给控制器之后继续观察与注入故障。

use crate::{DigitalGpio, Direction, HalError, HalErrorKind, Pull, PwmDaemon};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockGpioState {
    initialized: bool,
    init_calls: u32,
    release_calls: u32,
    /// 下若干次 init 返回 NotInitialized（模拟编号模式被外部重置）
    fail_init: u32,
    /// 外部脚本化的输入电平
    input_levels: HashMap<u8, u8>,
    directions: HashMap<u8, Direction>,
    pulls: HashMap<u8, Pull>,
    /// 全部电平写入记录
    writes: Vec<(u8, u8)>,
    /// 软件 PWM：pin → (频率, 占空比百分数)
    soft_pwm: HashMap<u8, (f64, f64)>,
}

/// 模拟数字 GPIO 驱动
#[derive(Clone, Default)]
pub struct MockGpio {
    state: Arc<Mutex<MockGpioState>>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// 脚本化某个输入引脚的电平
    pub fn set_input_level(&self, pin: u8, level: u8) {
        self.state.lock().unwrap().input_levels.insert(pin, level);
    }

    /// 让接下来 `times` 次 init 失败（NotInitialized）
    pub fn fail_init(&self, times: u32) {
        self.state.lock().unwrap().fail_init = times;
    }

    /// 模拟外部 cleanup：编号模式失效
    pub fn invalidate(&self) {
        self.state.lock().unwrap().initialized = false;
    }

    pub fn init_calls(&self) -> u32 {
        self.state.lock().unwrap().init_calls
    }

    pub fn release_calls(&self) -> u32 {
        self.state.lock().unwrap().release_calls
    }

    /// 取出全部写入记录
    pub fn take_writes(&self) -> Vec<(u8, u8)> {
        std::mem::take(&mut self.state.lock().unwrap().writes)
    }

    pub fn direction_of(&self, pin: u8) -> Option<Direction> {
        self.state.lock().unwrap().directions.get(&pin).copied()
    }

    pub fn pull_of(&self, pin: u8) -> Option<Pull> {
        self.state.lock().unwrap().pulls.get(&pin).copied()
    }

    /// 软件 PWM 当前参数（频率, 占空比）
    pub fn soft_pwm_of(&self, pin: u8) -> Option<(f64, f64)> {
        self.state.lock().unwrap().soft_pwm.get(&pin).copied()
    }

    fn ensure_init(state: &MockGpioState) -> Result<(), HalError> {
        if state.initialized {
            Ok(())
        } else {
            Err(HalError::new(
                HalErrorKind::NotInitialized,
                "GPIO numbering mode not set",
            ))
        }
    }
}

impl DigitalGpio for MockGpio {
    fn init(&mut self) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        state.init_calls += 1;
        if state.fail_init > 0 {
            state.fail_init -= 1;
            return Err(HalError::new(
                HalErrorKind::NotInitialized,
                "numbering mode reset externally",
            ));
        }
        state.initialized = true;
        Ok(())
    }

    fn set_direction(&mut self, pin: u8, dir: Direction) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_init(&state)?;
        state.directions.insert(pin, dir);
        Ok(())
    }

    fn set_pull(&mut self, pin: u8, pull: Pull) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_init(&state)?;
        state.pulls.insert(pin, pull);
        Ok(())
    }

    fn read_level(&mut self, pin: u8) -> Result<u8, HalError> {
        let state = self.state.lock().unwrap();
        Self::ensure_init(&state)?;
        Ok(state.input_levels.get(&pin).copied().unwrap_or(0))
    }

    fn write_level(&mut self, pin: u8, level: u8) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_init(&state)?;
        state.writes.push((pin, level));
        state.input_levels.insert(pin, level);
        Ok(())
    }

    fn start_soft_pwm(&mut self, pin: u8, frequency_hz: f64) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_init(&state)?;
        state.soft_pwm.insert(pin, (frequency_hz, 0.0));
        Ok(())
    }

    fn set_soft_pwm_duty(&mut self, pin: u8, percent: f64) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        match state.soft_pwm.get_mut(&pin) {
            Some(entry) => {
                entry.1 = percent;
                Ok(())
            }
            None => Err(HalError::new(
                HalErrorKind::InvalidArgument,
                format!("software PWM not running on pin {pin}"),
            )),
        }
    }

    fn stop_soft_pwm(&mut self, pin: u8) -> Result<(), HalError> {
        self.state.lock().unwrap().soft_pwm.remove(&pin);
        Ok(())
    }

    fn release_all(&mut self) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        state.release_calls += 1;
        state.directions.clear();
        state.pulls.clear();
        state.soft_pwm.clear();
        state.initialized = false;
        Ok(())
    }
}

#[derive(Default)]
struct MockDaemonState {
    connected: bool,
    input_levels: HashMap<u8, u8>,
    writes: Vec<(u8, u8)>,
    /// (pin, 频率, 占空比 ppm)
    hardware_pwm_calls: Vec<(u8, u32, u32)>,
    pwm_frequencies: Vec<(u8, u32)>,
    duty_cycles: Vec<(u8, u32)>,
    servo_pulses: Vec<(u8, u32)>,
    /// 所有操作返回 Backend 错误（模拟守护进程故障）
    fail_ops: bool,
}

/// 模拟 pigpio 守护进程连接
#[derive(Clone)]
pub struct MockDaemon {
    state: Arc<Mutex<MockDaemonState>>,
}

impl Default for MockDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDaemon {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockDaemonState {
                connected: true,
                ..Default::default()
            })),
        }
    }

    /// 模拟守护进程断开
    pub fn disconnect(&self) {
        self.state.lock().unwrap().connected = false;
    }

    /// 让所有后续操作失败（守护进程故障）
    pub fn fail_ops(&self, fail: bool) {
        self.state.lock().unwrap().fail_ops = fail;
    }

    pub fn set_input_level(&self, pin: u8, level: u8) {
        self.state.lock().unwrap().input_levels.insert(pin, level);
    }

    pub fn hardware_pwm_calls(&self) -> Vec<(u8, u32, u32)> {
        self.state.lock().unwrap().hardware_pwm_calls.clone()
    }

    pub fn servo_pulses(&self) -> Vec<(u8, u32)> {
        self.state.lock().unwrap().servo_pulses.clone()
    }

    pub fn last_servo_pulse(&self) -> Option<(u8, u32)> {
        self.state.lock().unwrap().servo_pulses.last().copied()
    }

    pub fn pwm_frequencies(&self) -> Vec<(u8, u32)> {
        self.state.lock().unwrap().pwm_frequencies.clone()
    }

    pub fn duty_cycles(&self) -> Vec<(u8, u32)> {
        self.state.lock().unwrap().duty_cycles.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn check(state: &MockDaemonState) -> Result<(), HalError> {
        if !state.connected {
            return Err(HalError::new(
                HalErrorKind::NotConnected,
                "pigpiod connection closed",
            ));
        }
        if state.fail_ops {
            return Err(HalError::new(HalErrorKind::Backend, "daemon fault"));
        }
        Ok(())
    }
}

impl PwmDaemon for MockDaemon {
    fn connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn set_direction(&mut self, _pin: u8, _dir: Direction) -> Result<(), HalError> {
        Self::check(&self.state.lock().unwrap())
    }

    fn set_pull(&mut self, _pin: u8, _pull: Pull) -> Result<(), HalError> {
        Self::check(&self.state.lock().unwrap())
    }

    fn read_level(&mut self, pin: u8) -> Result<u8, HalError> {
        let state = self.state.lock().unwrap();
        Self::check(&state)?;
        Ok(state.input_levels.get(&pin).copied().unwrap_or(0))
    }

    fn write_level(&mut self, pin: u8, level: u8) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state)?;
        state.writes.push((pin, level));
        Ok(())
    }

    fn hardware_pwm(&mut self, pin: u8, frequency_hz: u32, duty_ppm: u32) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state)?;
        state.hardware_pwm_calls.push((pin, frequency_hz, duty_ppm));
        Ok(())
    }

    fn set_pwm_frequency(&mut self, pin: u8, frequency_hz: u32) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state)?;
        state.pwm_frequencies.push((pin, frequency_hz));
        Ok(())
    }

    fn set_pwm_duty_cycle(&mut self, pin: u8, duty: u32) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state)?;
        state.duty_cycles.push((pin, duty));
        Ok(())
    }

    fn set_servo_pulse_width(&mut self, pin: u8, pulse_us: u32) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state)?;
        state.servo_pulses.push((pin, pulse_us));
        Ok(())
    }

    fn close(&mut self) -> Result<(), HalError> {
        self.state.lock().unwrap().connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 未初始化时所有操作报 NotInitialized
    #[test]
    fn test_mock_gpio_requires_init() {
        let mut gpio = MockGpio::new();
        let err = gpio.write_level(17, 1).unwrap_err();
        assert_eq!(err.kind, HalErrorKind::NotInitialized);

        gpio.init().unwrap();
        gpio.set_direction(17, Direction::Output).unwrap();
        gpio.write_level(17, 1).unwrap();
        assert_eq!(gpio.clone().take_writes(), vec![(17, 1)]);
    }

    /// fail_init 脚本化初始化失败
    #[test]
    fn test_mock_gpio_fail_init() {
        let mut gpio = MockGpio::new();
        gpio.fail_init(1);
        assert!(gpio.init().is_err());
        assert!(gpio.init().is_ok());
        assert_eq!(gpio.init_calls(), 2);
    }

    /// 断开后的守护进程所有操作失败
    #[test]
    fn test_mock_daemon_disconnect() {
        let mut daemon = MockDaemon::new();
        daemon.set_servo_pulse_width(18, 1500).unwrap();
        daemon.disconnect();
        let err = daemon.set_servo_pulse_width(18, 1500).unwrap_err();
        assert_eq!(err.kind, HalErrorKind::NotConnected);
        assert_eq!(daemon.servo_pulses(), vec![(18, 1500)]);
    }
}
