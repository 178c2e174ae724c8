//! SG90 舵机控制器集成测试
//!
//! 通过 MockDaemon 验证脉宽序列、扫描生命周期与清理语义。

use pindeck_core::servo::{ServoController, PWM_FREQUENCY};
use pindeck_core::ServoError;
use pindeck_hal::mock::MockDaemon;
use std::time::Duration;

const SERVO_PIN: u8 = 18;

fn servo_with_mock() -> (ServoController, MockDaemon) {
    let daemon = MockDaemon::new();
    let servo = ServoController::new(SERVO_PIN, Some(Box::new(daemon.clone())));
    (servo, daemon)
}

/// 启用时设置 50 Hz 并移动到默认 90°（1500 µs）
#[test]
fn test_enable_moves_to_default_angle() {
    let (mut servo, daemon) = servo_with_mock();

    let result = servo.enable().unwrap();
    assert_eq!(result.angle, 90.0);
    assert_eq!(daemon.pwm_frequencies(), vec![(SERVO_PIN, PWM_FREQUENCY)]);
    assert_eq!(daemon.last_servo_pulse(), Some((SERVO_PIN, 1500)));
    assert!(servo.get_status().enabled);
}

/// 45° → 1.0 ms 脉宽、5% 占空比
#[test]
fn test_set_angle_45_degrees() {
    let (mut servo, daemon) = servo_with_mock();
    servo.enable().unwrap();

    let result = servo.set_angle(45.0, false).unwrap();
    assert_eq!(result.angle, 45.0);
    assert_eq!(result.target_angle, 45.0);
    assert_eq!(result.pulse_width, 1.0);
    assert_eq!(result.duty_cycle, 5.0);
    assert_eq!(daemon.last_servo_pulse(), Some((SERVO_PIN, 1000)));
}

/// 越界角度钳制到 [0, 180]
#[test]
fn test_set_angle_clamps_out_of_range() {
    let (mut servo, daemon) = servo_with_mock();
    servo.enable().unwrap();

    let result = servo.set_angle(200.0, false).unwrap();
    assert_eq!(result.angle, 180.0);
    assert_eq!(daemon.last_servo_pulse(), Some((SERVO_PIN, 2500)));

    let result = servo.set_angle(-30.0, false).unwrap();
    assert_eq!(result.angle, 0.0);
    assert_eq!(daemon.last_servo_pulse(), Some((SERVO_PIN, 500)));
}

/// 未启用时角度命令被拒绝
#[test]
fn test_set_angle_requires_enable() {
    let (mut servo, _daemon) = servo_with_mock();

    let err = servo.set_angle(45.0, false).unwrap_err();
    assert_eq!(err.to_string(), "Servo not enabled");
}

/// 无守护进程句柄时所有硬件操作失败
#[test]
fn test_missing_daemon_rejected() {
    let mut servo = ServoController::new(SERVO_PIN, None);

    assert!(matches!(servo.enable(), Err(ServoError::DaemonUnavailable)));
    assert!(matches!(servo.disable(), Err(ServoError::DaemonUnavailable)));
}

/// 句柄存在但连接已断开时等同于守护进程缺失
#[test]
fn test_disconnected_daemon_treated_as_unavailable() {
    let (mut servo, daemon) = servo_with_mock();
    servo.enable().unwrap();
    daemon.disconnect();

    let err = servo.set_angle(45.0, false).unwrap_err();
    assert_eq!(err.to_string(), "pigpio daemon not available");
    assert!(matches!(servo.enable(), Err(ServoError::DaemonUnavailable)));
    assert!(!servo.get_status().daemon_available);
}

/// 平滑移动产生中间脉冲序列，最后精确到达
#[test]
fn test_smooth_move_emits_intermediate_pulses() {
    let (mut servo, daemon) = servo_with_mock();
    servo.enable().unwrap();

    let result = servo.set_angle(100.0, true).unwrap();
    assert_eq!(result.angle, 100.0);

    let pulses: Vec<u32> = daemon
        .servo_pulses()
        .into_iter()
        .skip(1) // enable 时的初始移动
        .map(|(_, p)| p)
        .collect();
    // 90 → 100 以 2° 步进：至少 4 个中间脉冲加最终值
    assert!(pulses.len() >= 5, "expected stepped transition, got {pulses:?}");
    assert_eq!(*pulses.last().unwrap(), angle_pulse(100.0));
    // 序列单调递增
    assert!(pulses.windows(2).all(|w| w[0] <= w[1]));
}

/// 角度差不超过 5° 时单步到位
#[test]
fn test_small_move_is_single_pulse() {
    let (mut servo, daemon) = servo_with_mock();
    servo.enable().unwrap();

    servo.set_angle(93.0, true).unwrap();
    // enable 的初始脉冲 + 一次到位
    assert_eq!(daemon.servo_pulses().len(), 2);
}

/// 相对步进基于当前角度
#[test]
fn test_step_move_relative() {
    let (mut servo, _daemon) = servo_with_mock();
    servo.enable().unwrap();

    let result = servo.step_move(10.0).unwrap();
    assert_eq!(result.angle, 100.0);
    let result = servo.step_move(-30.0).unwrap();
    assert_eq!(result.angle, 70.0);
}

/// 扫描生命周期：启动 → 角度进入范围 → 停止
#[test]
fn test_scan_lifecycle() {
    let (mut servo, daemon) = servo_with_mock();
    servo.enable().unwrap();

    let started = servo.start_scan(30.0, 150.0, "fast").unwrap();
    assert_eq!(started.start_angle, 30.0);
    assert_eq!(started.end_angle, 150.0);
    assert_eq!(started.speed, "fast");
    assert!(servo.get_status().scanning);

    // 留出时间让扫描线程推进若干步
    std::thread::sleep(Duration::from_millis(120));

    let stopped = servo.stop_scan().unwrap();
    assert_eq!(stopped.message, "Scan stopped");
    assert!((30.0..=150.0).contains(&stopped.current_angle));
    assert!(!servo.get_status().scanning);

    // 扫描写出的每个脉冲都落在范围内
    for (_, pulse) in daemon.servo_pulses().into_iter().skip(1) {
        assert!((angle_pulse(30.0)..=angle_pulse(150.0)).contains(&pulse));
    }
}

/// 重复启动扫描被拒绝
#[test]
fn test_start_scan_twice_rejected() {
    let (mut servo, _daemon) = servo_with_mock();
    servo.enable().unwrap();

    servo.start_scan(0.0, 180.0, "medium").unwrap();
    let err = servo.start_scan(0.0, 180.0, "medium").unwrap_err();
    assert_eq!(err.to_string(), "Already scanning");

    servo.stop_scan().unwrap();
}

/// 未扫描时停止是无操作成功
#[test]
fn test_stop_scan_when_idle() {
    let (mut servo, _daemon) = servo_with_mock();
    servo.enable().unwrap();

    let stopped = servo.stop_scan().unwrap();
    assert_eq!(stopped.message, "Not scanning");
}

/// 未启用时扫描被拒绝
#[test]
fn test_scan_requires_enable() {
    let (mut servo, _daemon) = servo_with_mock();

    let err = servo.start_scan(0.0, 180.0, "slow").unwrap_err();
    assert_eq!(err.to_string(), "Servo not enabled");
}

/// 禁用：先停扫描，再置零输出
#[test]
fn test_disable_stops_scan_and_zeroes_output() {
    let (mut servo, daemon) = servo_with_mock();
    servo.enable().unwrap();
    servo.start_scan(60.0, 120.0, "fast").unwrap();

    servo.disable().unwrap();
    assert!(!servo.get_status().enabled);
    assert!(!servo.get_status().scanning);
    assert_eq!(daemon.duty_cycles(), vec![(SERVO_PIN, 0)]);
}

/// 急停在扫描中立即生效
#[test]
fn test_emergency_stop() {
    let (mut servo, daemon) = servo_with_mock();
    servo.enable().unwrap();
    servo.start_scan(0.0, 180.0, "fast").unwrap();

    servo.emergency_stop().unwrap();
    let status = servo.get_status();
    assert!(!status.enabled);
    assert!(!status.scanning);
    assert_eq!(daemon.duty_cycles(), vec![(SERVO_PIN, 0)]);
}

/// 状态快照字段派生一致
#[test]
fn test_status_snapshot() {
    let (mut servo, _daemon) = servo_with_mock();
    servo.enable().unwrap();
    servo.set_angle(45.0, false).unwrap();

    let status = servo.get_status();
    assert_eq!(status.pin, SERVO_PIN);
    assert_eq!(status.current_angle, 45.0);
    assert_eq!(status.target_angle, 45.0);
    assert_eq!(status.pulse_width, 1.0);
    assert_eq!(status.duty_cycle, 5.0);
    assert_eq!(status.frequency, PWM_FREQUENCY);
    assert!(status.daemon_available);
    assert!(!status.timestamp.is_empty());
}

/// cleanup 关闭连接且幂等
#[test]
fn test_cleanup_idempotent() {
    let (mut servo, daemon) = servo_with_mock();
    servo.enable().unwrap();

    servo.cleanup();
    assert!(!daemon.is_connected());
    assert!(!servo.get_status().daemon_available);

    // 第二次 cleanup 无事发生
    servo.cleanup();
    assert!(matches!(servo.enable(), Err(ServoError::DaemonUnavailable)));
}

fn angle_pulse(angle: f64) -> u32 {
    pindeck_core::servo::angle_to_pulse_width(angle)
}
