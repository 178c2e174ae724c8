//! SG90 舵机控制器
//!
//! SG90 参数：
//! - 控制信号：PWM 50 Hz
//! - 脉冲宽度：0.5 ms（0°）~ 2.5 ms（180°）
//! - 转动角度：0-180°
//!
//! 角度与脉宽为线性映射。扫描模式由一个后台线程驱动，通过协作式
//! 标志停止；当前角度经原子标量与前台共享（last-write-wins，前台
//! 与扫描线程的竞争属于容忍的遥测竞争，刻意不加锁）。

use crate::error::ServoError;
use crate::results::{ScanStarted, ScanStopped, ServoEnabled, ServoMove, ServoStatus};
use parking_lot::Mutex;
use pindeck_hal::{HalError, PwmDaemon};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 舵机 PWM 频率（Hz）
pub const PWM_FREQUENCY: u32 = 50;
/// 0° 对应脉宽（微秒）
pub const PULSE_MIN_US: f64 = 500.0;
/// 180° 对应脉宽（微秒）
pub const PULSE_MAX_US: f64 = 2500.0;
/// 角度下限
pub const ANGLE_MIN: f64 = 0.0;
/// 角度上限
pub const ANGLE_MAX: f64 = 180.0;

/// 平滑移动触发阈值（度）
const SMOOTH_THRESHOLD_DEG: f64 = 5.0;
/// 平滑移动步长（度）
const SMOOTH_STEP_DEG: f64 = 2.0;
/// 平滑移动每步延迟
const SMOOTH_STEP_DELAY: Duration = Duration::from_millis(20);
/// 扫描步长（度）
const SCAN_STEP_DEG: f64 = 2.0;
/// 停止扫描时等待后台线程退出的上限
const SCAN_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// 角度 → 脉宽（微秒），角度先钳制到 [0, 180]
pub fn angle_to_pulse_width(angle: f64) -> u32 {
    let angle = angle.clamp(ANGLE_MIN, ANGLE_MAX);
    (PULSE_MIN_US + (angle / ANGLE_MAX) * (PULSE_MAX_US - PULSE_MIN_US)) as u32
}

/// 脉宽（微秒）→ 角度，1 位小数（诊断用逆映射）
pub fn pulse_width_to_angle(pulse_us: u32) -> f64 {
    let angle = (f64::from(pulse_us) - PULSE_MIN_US) * ANGLE_MAX / (PULSE_MAX_US - PULSE_MIN_US);
    (angle * 10.0).round() / 10.0
}

/// 脉宽（微秒）→ 占空比百分数，2 位小数（50 Hz 周期 = 20 000 µs）
pub fn duty_cycle_for_pulse(pulse_us: u32) -> f64 {
    let period_us = 1_000_000.0 / f64::from(PWM_FREQUENCY);
    let duty = f64::from(pulse_us) / period_us * 100.0;
    (duty * 100.0).round() / 100.0
}

/// 扫描速度档位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSpeed {
    Slow,
    Medium,
    Fast,
}

impl ScanSpeed {
    /// 未知速度名回落到 medium
    pub fn parse(speed: &str) -> Self {
        match speed {
            "slow" => Self::Slow,
            "fast" => Self::Fast,
            _ => Self::Medium,
        }
    }

    /// 每步延迟
    pub fn step_delay(self) -> Duration {
        match self {
            Self::Slow => Duration::from_millis(50),
            Self::Medium => Duration::from_millis(30),
            Self::Fast => Duration::from_millis(10),
        }
    }
}

type SharedDaemon = Arc<Mutex<Option<Box<dyn PwmDaemon>>>>;

/// 等待线程自行退出，超时则放任其留在后台
///
/// 扫描线程是守护式的：它只在协作标志上退出，万一卡住也不阻塞
/// 进程收尾，由 OS 回收。
fn join_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    if handle.is_finished() {
        if handle.join().is_err() {
            warn!("scan thread panicked");
        }
    } else {
        warn!(?timeout, "scan thread did not exit in time, detaching");
    }
}

/// SG90 舵机控制器
///
/// 绑定到固定引脚，进程内单例。角度命令只在启用状态下生效。
pub struct ServoController {
    pin: u8,
    daemon: SharedDaemon,
    enabled: bool,
    /// 当前角度（f64 位模式），与扫描线程共享
    current_angle: Arc<AtomicU64>,
    target_angle: f64,
    scanning: Arc<AtomicBool>,
    scan_thread: Option<JoinHandle<()>>,
}

impl ServoController {
    /// 创建控制器，初始角度 90°
    pub fn new(pin: u8, daemon: Option<Box<dyn PwmDaemon>>) -> Self {
        match daemon.as_ref() {
            Some(dm) if dm.connected() => info!(pin, "pigpio connected for servo"),
            _ => warn!(pin, "pigpio daemon not available, servo control disabled"),
        }
        Self {
            pin,
            daemon: Arc::new(Mutex::new(daemon)),
            enabled: false,
            current_angle: Arc::new(AtomicU64::new(90.0_f64.to_bits())),
            target_angle: 90.0,
            scanning: Arc::new(AtomicBool::new(false)),
            scan_thread: None,
        }
    }

    /// 当前角度（与扫描线程共享的原子标量）
    pub fn current_angle(&self) -> f64 {
        f64::from_bits(self.current_angle.load(Ordering::Relaxed))
    }

    fn set_current_angle(&self, angle: f64) {
        self.current_angle.store(angle.to_bits(), Ordering::Relaxed);
    }

    /// 对守护进程执行一次操作
    ///
    /// 句柄缺失或连接已断开都报 DaemonUnavailable，两种情况对
    /// 调用方等价。
    fn with_daemon<T>(
        &self,
        op: impl FnOnce(&mut dyn PwmDaemon) -> Result<T, HalError>,
    ) -> Result<T, ServoError> {
        let mut guard = self.daemon.lock();
        match guard.as_mut() {
            Some(dm) if dm.connected() => op(dm.as_mut()).map_err(ServoError::from),
            _ => Err(ServoError::DaemonUnavailable),
        }
    }

    fn daemon_present(&self) -> bool {
        self.daemon.lock().as_ref().is_some_and(|dm| dm.connected())
    }

    /// 启用舵机
    ///
    /// 设置 50 Hz 频率并移动到存储的当前角度（默认 90°）。
    pub fn enable(&mut self) -> Result<ServoEnabled, ServoError> {
        let pin = self.pin;
        let angle = self.current_angle();
        self.with_daemon(|dm| {
            dm.set_pwm_frequency(pin, PWM_FREQUENCY)?;
            dm.set_servo_pulse_width(pin, angle_to_pulse_width(angle))
        })?;

        self.enabled = true;
        info!(pin, angle, "servo enabled");

        Ok(ServoEnabled {
            angle,
            message: "Servo enabled".to_string(),
        })
    }

    /// 禁用舵机：停扫描、置零输出
    pub fn disable(&mut self) -> Result<ScanStopped, ServoError> {
        if !self.daemon_present() {
            return Err(ServoError::DaemonUnavailable);
        }
        let _ = self.stop_scan();

        let pin = self.pin;
        self.with_daemon(|dm| dm.set_pwm_duty_cycle(pin, 0))?;

        self.enabled = false;
        info!(pin, "servo disabled");

        Ok(ScanStopped {
            current_angle: self.current_angle(),
            message: "Servo disabled".to_string(),
        })
    }

    /// 写一次脉宽
    fn write_pulse(&self, angle: f64) -> Result<u32, ServoError> {
        let pin = self.pin;
        let pulse = angle_to_pulse_width(angle);
        self.with_daemon(|dm| dm.set_servo_pulse_width(pin, pulse))?;
        Ok(pulse)
    }

    /// 设置角度（越界值钳制到 [0, 180]）
    ///
    /// `smooth` 且角度差超过 5° 时执行分步过渡（2°/步，20 ms/步），
    /// 调用在过渡完成前阻塞。
    pub fn set_angle(&mut self, angle: f64, smooth: bool) -> Result<ServoMove, ServoError> {
        if !self.daemon_present() {
            return Err(ServoError::DaemonUnavailable);
        }
        if !self.enabled {
            return Err(ServoError::NotEnabled);
        }

        let angle = angle.clamp(ANGLE_MIN, ANGLE_MAX);
        self.target_angle = angle;
        let pulse = angle_to_pulse_width(angle);

        if smooth && (angle - self.current_angle()).abs() > SMOOTH_THRESHOLD_DEG {
            self.smooth_move(angle)?;
        } else {
            self.write_pulse(angle)?;
            self.set_current_angle(angle);
        }

        let duty_cycle = duty_cycle_for_pulse(pulse);
        info!(
            pin = self.pin,
            angle, pulse_us = pulse, duty_cycle, "servo angle set"
        );

        Ok(ServoMove {
            angle: self.current_angle(),
            target_angle: self.target_angle,
            pulse_width: f64::from(pulse) / 1000.0,
            duty_cycle,
        })
    }

    /// 分步过渡到目标角度（同步，期间逐步更新当前角度）
    fn smooth_move(&mut self, target: f64) -> Result<(), ServoError> {
        let mut current = self.current_angle();
        while (current - target).abs() > SMOOTH_STEP_DEG {
            current += if current < target {
                SMOOTH_STEP_DEG
            } else {
                -SMOOTH_STEP_DEG
            };
            self.write_pulse(current)?;
            self.set_current_angle(current);
            spin_sleep::sleep(SMOOTH_STEP_DELAY);
        }

        // 最后精确到达
        self.write_pulse(target)?;
        self.set_current_angle(target);
        Ok(())
    }

    /// 相对步进（正数前进，负数后退）
    pub fn step_move(&mut self, delta: f64) -> Result<ServoMove, ServoError> {
        self.set_angle(self.current_angle() + delta, false)
    }

    /// 启动往返扫描
    ///
    /// 唯一的后台任务：在 [start_angle, end_angle] 间以 2° 步进往返，
    /// 到边界时钳制并反向，直到协作标志被清除。
    pub fn start_scan(
        &mut self,
        start_angle: f64,
        end_angle: f64,
        speed: &str,
    ) -> Result<ScanStarted, ServoError> {
        if !self.enabled {
            return Err(ServoError::NotEnabled);
        }
        if self.scanning.load(Ordering::Relaxed) {
            return Err(ServoError::AlreadyScanning);
        }

        let delay = ScanSpeed::parse(speed).step_delay();
        self.scanning.store(true, Ordering::Relaxed);

        let pin = self.pin;
        let daemon = Arc::clone(&self.daemon);
        let scanning = Arc::clone(&self.scanning);
        let current_angle = Arc::clone(&self.current_angle);
        let handle = thread::spawn(move || {
            scan_worker(pin, daemon, scanning, current_angle, start_angle, end_angle, delay);
        });
        self.scan_thread = Some(handle);

        info!(pin, start_angle, end_angle, speed, "scan started");

        Ok(ScanStarted {
            start_angle,
            end_angle,
            speed: speed.to_string(),
            message: "Scan started".to_string(),
        })
    }

    /// 停止扫描
    ///
    /// 未在扫描时为无操作成功。清除标志后最多等待 1 秒让后台线程
    /// 观察到并退出。
    pub fn stop_scan(&mut self) -> Result<ScanStopped, ServoError> {
        if !self.scanning.load(Ordering::Relaxed) {
            return Ok(ScanStopped {
                current_angle: self.current_angle(),
                message: "Not scanning".to_string(),
            });
        }

        self.scanning.store(false, Ordering::Relaxed);
        if let Some(handle) = self.scan_thread.take() {
            join_timeout(handle, SCAN_JOIN_TIMEOUT);
        }
        info!(pin = self.pin, "scan stopped");

        Ok(ScanStopped {
            current_angle: self.current_angle(),
            message: "Scan stopped".to_string(),
        })
    }

    /// 急停：停扫描并禁用（无论当前状态）
    pub fn emergency_stop(&mut self) -> Result<ScanStopped, ServoError> {
        let _ = self.stop_scan();
        self.disable()
    }

    /// 舵机状态快照
    pub fn get_status(&self) -> ServoStatus {
        let current = self.current_angle();
        let pulse = angle_to_pulse_width(current);

        ServoStatus {
            pin: self.pin,
            enabled: self.enabled,
            current_angle: (current * 10.0).round() / 10.0,
            target_angle: self.target_angle,
            pulse_width: f64::from(pulse) / 1000.0,
            duty_cycle: duty_cycle_for_pulse(pulse),
            frequency: PWM_FREQUENCY,
            scanning: self.scanning.load(Ordering::Relaxed),
            daemon_available: self.daemon_present(),
            timestamp: wall_clock_hms(),
        }
    }

    /// 终态清理：停扫描、置零输出、关闭并丢弃守护进程句柄
    ///
    /// 幂等；后端错误只告警。
    pub fn cleanup(&mut self) {
        let _ = self.stop_scan();

        let mut guard = self.daemon.lock();
        if let Some(mut dm) = guard.take() {
            if let Err(e) = dm.set_pwm_duty_cycle(self.pin, 0) {
                warn!(error = %e, "servo cleanup warning");
            }
            if let Err(e) = dm.close() {
                warn!(error = %e, "servo cleanup warning");
            } else {
                info!("servo cleanup completed");
            }
        }
    }
}

/// 扫描工作线程
fn scan_worker(
    pin: u8,
    daemon: SharedDaemon,
    scanning: Arc<AtomicBool>,
    current_angle: Arc<AtomicU64>,
    start_angle: f64,
    end_angle: f64,
    delay: Duration,
) {
    let mut direction = 1.0;
    let mut position = start_angle;

    while scanning.load(Ordering::Relaxed) {
        {
            let mut guard = daemon.lock();
            match guard.as_mut() {
                Some(dm) => {
                    if let Err(e) = dm.set_servo_pulse_width(pin, angle_to_pulse_width(position)) {
                        warn!(error = %e, pin, "scan write failed, stopping scan");
                        scanning.store(false, Ordering::Relaxed);
                        break;
                    }
                }
                // 句柄被 cleanup 拿走，扫描随之结束
                None => {
                    scanning.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
        current_angle.store(position.to_bits(), Ordering::Relaxed);

        position += SCAN_STEP_DEG * direction;
        if position >= end_angle {
            position = end_angle;
            direction = -1.0;
        } else if position <= start_angle {
            position = start_angle;
            direction = 1.0;
        }

        spin_sleep::sleep(delay);
    }
}

fn wall_clock_hms() -> String {
    let now = time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(time::macros::format_description!(
        "[hour]:[minute]:[second]"
    ))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 线性映射端点
    #[test]
    fn test_angle_to_pulse_width_endpoints() {
        assert_eq!(angle_to_pulse_width(0.0), 500);
        assert_eq!(angle_to_pulse_width(90.0), 1500);
        assert_eq!(angle_to_pulse_width(180.0), 2500);
    }

    /// 越界角度先钳制再映射
    #[test]
    fn test_angle_clamping() {
        assert_eq!(angle_to_pulse_width(200.0), 2500);
        assert_eq!(angle_to_pulse_width(-20.0), 500);
    }

    /// 逆映射在舍入精度内还原角度
    #[test]
    fn test_pulse_width_inverse() {
        assert_eq!(pulse_width_to_angle(500), 0.0);
        assert_eq!(pulse_width_to_angle(1500), 90.0);
        assert_eq!(pulse_width_to_angle(2500), 180.0);
    }

    /// 占空比：50 Hz 周期 20 000 µs
    #[test]
    fn test_duty_cycle_for_pulse() {
        assert_eq!(duty_cycle_for_pulse(1000), 5.0);
        assert_eq!(duty_cycle_for_pulse(1500), 7.5);
        assert_eq!(duty_cycle_for_pulse(2000), 10.0);
    }

    /// 速度档位映射与未知档位回落
    #[test]
    fn test_scan_speed_parse() {
        assert_eq!(ScanSpeed::parse("slow").step_delay(), Duration::from_millis(50));
        assert_eq!(ScanSpeed::parse("medium").step_delay(), Duration::from_millis(30));
        assert_eq!(ScanSpeed::parse("fast").step_delay(), Duration::from_millis(10));
        assert_eq!(ScanSpeed::parse("warp").step_delay(), Duration::from_millis(30));
    }
}
