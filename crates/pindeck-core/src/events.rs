//! 事件通知
//!
//! 尽力而为的单向通知通道：引脚电平变化与全量快照两类事件。投递
//! 失败绝不影响触发它的命令，只在 debug 级别记录。
//!
//! 实现约定：`GpioEventSink` 的实现必须是非阻塞的（禁止 IO、长时间
//! 持锁）。推荐通过有界 channel 的 `try_send` 异步转交。

use crate::results::PinSnapshot;
use crossbeam_channel::{Receiver, Sender, bounded};
use pindeck_hal::Direction;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// 对外广播的事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GpioEvent {
    /// 单引脚电平变化
    PinStateChanged { pin: u8, state: u8, mode: Direction },
    /// 全量快照
    AllPinsState { states: BTreeMap<u8, PinSnapshot> },
}

/// 事件接收端接口
///
/// 由分发器注入；组件在写入、全量读取等操作后触发。
pub trait GpioEventSink: Send + Sync {
    /// 引脚电平变化（write_pin / toggle_pin 之后）
    fn pin_changed(&self, pin: u8, state: u8, mode: Direction);

    /// 全量快照（read_all_pins 之后）
    fn all_pins(&self, states: &BTreeMap<u8, PinSnapshot>);
}

/// 丢弃所有事件的空实现
pub struct NullEventSink;

impl GpioEventSink for NullEventSink {
    fn pin_changed(&self, _pin: u8, _state: u8, _mode: Direction) {}

    fn all_pins(&self, _states: &BTreeMap<u8, PinSnapshot>) {}
}

/// 经由有界 channel 转交事件的接收端
///
/// 满载时丢弃新事件（实时遥测，旧事件无需排队追赶）。
pub struct ChannelEventSink {
    tx: Sender<GpioEvent>,
}

impl ChannelEventSink {
    /// 创建接收端及对应的消费者
    pub fn new(capacity: usize) -> (Arc<Self>, Receiver<GpioEvent>) {
        let (tx, rx) = bounded(capacity);
        (Arc::new(Self { tx }), rx)
    }
}

impl GpioEventSink for ChannelEventSink {
    fn pin_changed(&self, pin: u8, state: u8, mode: Direction) {
        if self
            .tx
            .try_send(GpioEvent::PinStateChanged { pin, state, mode })
            .is_err()
        {
            debug!(pin, "pin_state_changed event dropped");
        }
    }

    fn all_pins(&self, states: &BTreeMap<u8, PinSnapshot>) {
        let event = GpioEvent::AllPinsState {
            states: states.clone(),
        };
        if self.tx.try_send(event).is_err() {
            debug!("all_pins_state event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 事件经 channel 按序到达
    #[test]
    fn test_channel_sink_delivers() {
        let (sink, rx) = ChannelEventSink::new(8);
        sink.pin_changed(17, 1, Direction::Output);
        sink.pin_changed(17, 0, Direction::Output);

        match rx.try_recv().unwrap() {
            GpioEvent::PinStateChanged { pin, state, .. } => {
                assert_eq!((pin, state), (17, 1));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    /// 满载时丢弃而不是阻塞
    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, rx) = ChannelEventSink::new(1);
        sink.pin_changed(1, 1, Direction::Output);
        sink.pin_changed(2, 1, Direction::Output);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
