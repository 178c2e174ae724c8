//! pigpio 守护进程客户端
//!
//! 通过 TCP socket 访问 pigpiod 的客户端库。协议为固定 16 字节的
//! 小端命令帧 `(cmd, p1, p2, p3)`，部分命令携带扩展载荷（p3 为
//! 扩展字节数）。响应同样为 16 字节，最后一个字为有符号结果，
//! 负值表示守护进程侧错误。

use crate::{Direction, HalError, HalErrorKind, Pull, PwmDaemon};
use bytes::{Buf, BufMut, BytesMut};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

/// pigpiod 默认监听地址
pub const DEFAULT_ADDR: &str = "127.0.0.1:8888";

/// 连接超时
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// 单次命令的读写超时
const IO_TIMEOUT: Duration = Duration::from_secs(2);

// pigpiod 命令码（参见 pigpio 的 command.h）
const CMD_MODES: u32 = 0; // set mode
const CMD_PUD: u32 = 2; // set pull up/down
const CMD_READ: u32 = 3; // gpio read
const CMD_WRITE: u32 = 4; // gpio write
const CMD_PWM: u32 = 5; // set PWM dutycycle (0-255)
const CMD_PFS: u32 = 7; // set PWM frequency
const CMD_SERVO: u32 = 8; // set servo pulsewidth
const CMD_HP: u32 = 86; // hardware PWM（带扩展载荷）

const MODE_INPUT: u32 = 0;
const MODE_OUTPUT: u32 = 1;

const PUD_OFF: u32 = 0;
const PUD_DOWN: u32 = 1;
const PUD_UP: u32 = 2;

/// 编码一个 16 字节命令帧
pub fn encode_request(cmd: u32, p1: u32, p2: u32, p3: u32) -> [u8; 16] {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_u32_le(cmd);
    buf.put_u32_le(p1);
    buf.put_u32_le(p2);
    buf.put_u32_le(p3);
    let mut out = [0u8; 16];
    out.copy_from_slice(&buf);
    out
}

/// pigpio 守护进程连接
///
/// 持有一条阻塞式 TCP 连接；pigpiod 按请求-响应顺序处理命令，
/// 因此同一连接不做并发复用（上层通过 `Mutex` 共享）。
#[derive(Debug)]
pub struct PigpiodClient {
    stream: Option<TcpStream>,
    addr: String,
}

impl PigpiodClient {
    /// 连接到 pigpiod
    ///
    /// # 错误
    /// - `NotConnected`: 守护进程未运行或地址不可达
    pub fn connect(addr: impl AsRef<str>) -> Result<Self, HalError> {
        let addr = addr.as_ref();
        let sock_addr = addr
            .to_socket_addrs()
            .map_err(|e| HalError::new(HalErrorKind::NotConnected, e.to_string()))?
            .next()
            .ok_or_else(|| {
                HalError::new(HalErrorKind::NotConnected, format!("cannot resolve {addr}"))
            })?;

        let stream = TcpStream::connect_timeout(&sock_addr, CONNECT_TIMEOUT)
            .map_err(|e| HalError::new(HalErrorKind::NotConnected, e.to_string()))?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        stream.set_nodelay(true)?;

        info!(addr, "pigpiod connected");

        Ok(Self {
            stream: Some(stream),
            addr: addr.to_string(),
        })
    }

    /// 连接到默认地址（`127.0.0.1:8888`）
    pub fn connect_default() -> Result<Self, HalError> {
        Self::connect(DEFAULT_ADDR)
    }

    /// 发送一条命令并读取结果
    ///
    /// 返回响应帧的结果字。负结果转换为 `Backend` 错误。
    fn command(&mut self, cmd: u32, p1: u32, p2: u32, p3: u32, ext: &[u8]) -> Result<i32, HalError> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            HalError::new(HalErrorKind::NotConnected, "pigpiod connection closed")
        })?;

        let header = encode_request(cmd, p1, p2, p3);
        stream.write_all(&header)?;
        if !ext.is_empty() {
            stream.write_all(ext)?;
        }

        let mut resp = [0u8; 16];
        stream.read_exact(&mut resp)?;
        let mut tail = &resp[12..16];
        let res = tail.get_u32_le() as i32;

        debug!(cmd, p1, p2, res, "pigpiod command");

        if res < 0 {
            return Err(HalError::new(
                HalErrorKind::Backend,
                format!("pigpiod error {res} for command {cmd}"),
            ));
        }
        Ok(res)
    }

    /// 守护进程地址（诊断用）
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl PwmDaemon for PigpiodClient {
    fn connected(&self) -> bool {
        self.stream.is_some()
    }

    fn set_direction(&mut self, pin: u8, dir: Direction) -> Result<(), HalError> {
        let mode = match dir {
            Direction::Input => MODE_INPUT,
            Direction::Output => MODE_OUTPUT,
        };
        self.command(CMD_MODES, u32::from(pin), mode, 0, &[])?;
        Ok(())
    }

    fn set_pull(&mut self, pin: u8, pull: Pull) -> Result<(), HalError> {
        let pud = match pull {
            Pull::Off => PUD_OFF,
            Pull::Down => PUD_DOWN,
            Pull::Up => PUD_UP,
        };
        self.command(CMD_PUD, u32::from(pin), pud, 0, &[])?;
        Ok(())
    }

    fn read_level(&mut self, pin: u8) -> Result<u8, HalError> {
        let res = self.command(CMD_READ, u32::from(pin), 0, 0, &[])?;
        Ok(if res != 0 { 1 } else { 0 })
    }

    fn write_level(&mut self, pin: u8, level: u8) -> Result<(), HalError> {
        self.command(CMD_WRITE, u32::from(pin), u32::from(level.min(1)), 0, &[])?;
        Ok(())
    }

    fn hardware_pwm(&mut self, pin: u8, frequency_hz: u32, duty_ppm: u32) -> Result<(), HalError> {
        if duty_ppm > 1_000_000 {
            return Err(HalError::new(
                HalErrorKind::InvalidArgument,
                format!("duty {duty_ppm} exceeds 1_000_000 ppm"),
            ));
        }
        // HP 命令通过扩展载荷携带占空比
        let mut ext = BytesMut::with_capacity(4);
        ext.put_u32_le(duty_ppm);
        self.command(CMD_HP, u32::from(pin), frequency_hz, 4, &ext)?;
        Ok(())
    }

    fn set_pwm_frequency(&mut self, pin: u8, frequency_hz: u32) -> Result<(), HalError> {
        self.command(CMD_PFS, u32::from(pin), frequency_hz, 0, &[])?;
        Ok(())
    }

    fn set_pwm_duty_cycle(&mut self, pin: u8, duty: u32) -> Result<(), HalError> {
        if duty > 255 {
            return Err(HalError::new(
                HalErrorKind::InvalidArgument,
                format!("duty {duty} exceeds pigpio range 0-255"),
            ));
        }
        self.command(CMD_PWM, u32::from(pin), duty, 0, &[])?;
        Ok(())
    }

    fn set_servo_pulse_width(&mut self, pin: u8, pulse_us: u32) -> Result<(), HalError> {
        if pulse_us != 0 && !(500..=2500).contains(&pulse_us) {
            return Err(HalError::new(
                HalErrorKind::InvalidArgument,
                format!("servo pulse width {pulse_us}us outside 500-2500us"),
            ));
        }
        self.command(CMD_SERVO, u32::from(pin), pulse_us, 0, &[])?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), HalError> {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(std::net::Shutdown::Both) {
                warn!(error = %e, "pigpiod shutdown warning");
            }
            info!("pigpiod connection closed");
        }
        Ok(())
    }
}

impl Drop for PigpiodClient {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 命令帧为 16 字节小端布局
    #[test]
    fn test_encode_request_layout() {
        let frame = encode_request(CMD_WRITE, 17, 1, 0);
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[0..4], &4u32.to_le_bytes());
        assert_eq!(&frame[4..8], &17u32.to_le_bytes());
        assert_eq!(&frame[8..12], &1u32.to_le_bytes());
        assert_eq!(&frame[12..16], &0u32.to_le_bytes());
    }

    /// HP 扩展命令声明 4 字节扩展载荷
    #[test]
    fn test_encode_hardware_pwm_header() {
        let frame = encode_request(CMD_HP, 18, 50, 4);
        assert_eq!(&frame[0..4], &86u32.to_le_bytes());
        assert_eq!(&frame[12..16], &4u32.to_le_bytes());
    }

    /// 连接失败时返回 NotConnected 而不是 panic
    #[test]
    fn test_connect_refused() {
        // 端口 1 几乎必然拒绝连接
        let err = PigpiodClient::connect("127.0.0.1:1").unwrap_err();
        assert_eq!(err.kind, HalErrorKind::NotConnected);
    }
}
