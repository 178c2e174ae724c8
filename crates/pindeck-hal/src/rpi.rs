//! rppal 数字 GPIO 后端
//!
//! 基于 rppal 的 `DigitalGpio` 实现，只在 Linux（Raspberry Pi）上编译。
//! rppal 的引脚对象独占所有权，改变方向或上下拉需要先归还旧句柄再
//! 重新申领，因此这里维护一张 pin → 句柄表。

use crate::{DigitalGpio, Direction, HalError, HalErrorKind, Pull};
use rppal::gpio::{Gpio, InputPin, Level, OutputPin};
use std::collections::HashMap;
use tracing::{debug, info};

/// 一个已申领的引脚句柄
enum PinHandle {
    Input(InputPin),
    Output(OutputPin),
}

/// rppal 数字驱动
pub struct RppalGpio {
    /// 芯片句柄；`None` 表示编号模式未建立（或已被 release_all 失效）
    gpio: Option<Gpio>,
    pins: HashMap<u8, PinHandle>,
    /// 软件 PWM 的当前频率（rppal 每次设置占空比都需要重传频率）
    soft_pwm_freq: HashMap<u8, f64>,
}

fn map_err(err: rppal::gpio::Error) -> HalError {
    match err {
        rppal::gpio::Error::Io(e) => HalError::new(HalErrorKind::Io, e.to_string()),
        rppal::gpio::Error::PinNotAvailable(pin) => HalError::new(
            HalErrorKind::InvalidArgument,
            format!("pin {pin} not available"),
        ),
        other => HalError::new(HalErrorKind::Backend, other.to_string()),
    }
}

impl RppalGpio {
    /// 创建后端并建立芯片句柄
    pub fn new() -> Result<Self, HalError> {
        let mut backend = Self {
            gpio: None,
            pins: HashMap::new(),
            soft_pwm_freq: HashMap::new(),
        };
        backend.init()?;
        Ok(backend)
    }

    fn chip(&self) -> Result<&Gpio, HalError> {
        self.gpio.as_ref().ok_or_else(|| {
            HalError::new(HalErrorKind::NotInitialized, "GPIO numbering mode not set")
        })
    }

    fn output_pin(&mut self, pin: u8) -> Result<&mut OutputPin, HalError> {
        match self.pins.get_mut(&pin) {
            Some(PinHandle::Output(out)) => Ok(out),
            Some(PinHandle::Input(_)) => Err(HalError::new(
                HalErrorKind::InvalidArgument,
                format!("pin {pin} is configured as input"),
            )),
            None => Err(HalError::new(
                HalErrorKind::InvalidArgument,
                format!("pin {pin} not claimed"),
            )),
        }
    }
}

impl DigitalGpio for RppalGpio {
    fn init(&mut self) -> Result<(), HalError> {
        if self.gpio.is_none() {
            self.gpio = Some(Gpio::new().map_err(map_err)?);
            info!("GPIO initialized with BCM numbering");
        }
        Ok(())
    }

    fn set_direction(&mut self, pin: u8, dir: Direction) -> Result<(), HalError> {
        // 先归还旧句柄，rppal 不允许重复申领
        self.pins.remove(&pin);
        let handle = self.chip()?.get(pin).map_err(map_err)?;
        let claimed = match dir {
            Direction::Input => PinHandle::Input(handle.into_input()),
            Direction::Output => PinHandle::Output(handle.into_output_low()),
        };
        self.pins.insert(pin, claimed);
        debug!(pin, ?dir, "pin direction set");
        Ok(())
    }

    fn set_pull(&mut self, pin: u8, pull: Pull) -> Result<(), HalError> {
        // 上下拉在申领输入句柄时绑定，重建句柄
        self.pins.remove(&pin);
        let handle = self.chip()?.get(pin).map_err(map_err)?;
        let input = match pull {
            Pull::Off => handle.into_input(),
            Pull::Up => handle.into_input_pullup(),
            Pull::Down => handle.into_input_pulldown(),
        };
        self.pins.insert(pin, PinHandle::Input(input));
        Ok(())
    }

    fn read_level(&mut self, pin: u8) -> Result<u8, HalError> {
        match self.pins.get(&pin) {
            Some(PinHandle::Input(input)) => Ok(match input.read() {
                Level::High => 1,
                Level::Low => 0,
            }),
            Some(PinHandle::Output(out)) => Ok(u8::from(out.is_set_high())),
            None => Err(HalError::new(
                HalErrorKind::InvalidArgument,
                format!("pin {pin} not claimed"),
            )),
        }
    }

    fn write_level(&mut self, pin: u8, level: u8) -> Result<(), HalError> {
        let out = self.output_pin(pin)?;
        if level != 0 {
            out.set_high();
        } else {
            out.set_low();
        }
        Ok(())
    }

    fn start_soft_pwm(&mut self, pin: u8, frequency_hz: f64) -> Result<(), HalError> {
        let out = self.output_pin(pin)?;
        out.set_pwm_frequency(frequency_hz, 0.0).map_err(map_err)?;
        self.soft_pwm_freq.insert(pin, frequency_hz);
        Ok(())
    }

    fn set_soft_pwm_duty(&mut self, pin: u8, percent: f64) -> Result<(), HalError> {
        let frequency_hz = *self.soft_pwm_freq.get(&pin).ok_or_else(|| {
            HalError::new(
                HalErrorKind::InvalidArgument,
                format!("software PWM not running on pin {pin}"),
            )
        })?;
        let out = self.output_pin(pin)?;
        out.set_pwm_frequency(frequency_hz, (percent / 100.0).clamp(0.0, 1.0))
            .map_err(map_err)?;
        Ok(())
    }

    fn stop_soft_pwm(&mut self, pin: u8) -> Result<(), HalError> {
        self.soft_pwm_freq.remove(&pin);
        let out = self.output_pin(pin)?;
        out.clear_pwm().map_err(map_err)?;
        Ok(())
    }

    fn release_all(&mut self) -> Result<(), HalError> {
        // rppal 引脚在 drop 时恢复默认状态
        self.pins.clear();
        self.soft_pwm_freq.clear();
        self.gpio = None;
        info!("GPIO pins released");
        Ok(())
    }
}
