//! 角度/脉宽映射的属性测试
//!
//! 使用 proptest 验证数学属性。

use pindeck_core::servo::{
    angle_to_pulse_width, duty_cycle_for_pulse, pulse_width_to_angle,
};
use proptest::prelude::*;

proptest! {
    /// 测试脉宽始终落在 SG90 允许范围内
    #[test]
    fn pulse_width_in_range(angle in -1000.0..1000.0f64) {
        let pulse = angle_to_pulse_width(angle);
        prop_assert!((500..=2500).contains(&pulse));
    }

    /// 测试映射在范围内单调不减
    #[test]
    fn pulse_width_monotonic(a in 0.0..180.0f64, b in 0.0..180.0f64) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(angle_to_pulse_width(lo) <= angle_to_pulse_width(hi));
    }

    /// 测试角度到脉宽的往返转换（截断到整数微秒，误差 < 0.2°）
    #[test]
    fn angle_pulse_roundtrip(angle in 0.0..180.0f64) {
        let pulse = angle_to_pulse_width(angle);
        let back = pulse_width_to_angle(pulse);
        prop_assert!((angle - back).abs() < 0.2);
    }

    /// 测试越界角度钳制到端点
    #[test]
    fn out_of_range_clamps_to_endpoints(excess in 0.0..1000.0f64) {
        prop_assert_eq!(angle_to_pulse_width(180.0 + excess), 2500);
        prop_assert_eq!(angle_to_pulse_width(-excess), 500);
    }

    /// 测试占空比与脉宽成正比（50 Hz 周期 20 000 µs）
    #[test]
    fn duty_cycle_proportional(pulse in 500u32..=2500) {
        let duty = duty_cycle_for_pulse(pulse);
        let exact = f64::from(pulse) / 20_000.0 * 100.0;
        prop_assert!((duty - exact).abs() <= 0.005);
        prop_assert!((2.5..=12.5).contains(&duty));
    }
}
