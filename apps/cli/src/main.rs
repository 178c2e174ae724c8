//! # PinDeck CLI
//!
//! 树莓派 GPIO 与 SG90 舵机控制的命令行工具。
//!
//! ## One-shot 模式
//!
//! 每条命令独立完成：探测后端 -> 执行 -> 清理。结果以 JSON 打印到
//! 标准输出，适合脚本与 CI。
//!
//! ```bash
//! # 引脚操作
//! pindeck pin write 17 1
//! pindeck pin toggle 17
//! pindeck pin read 22
//!
//! # PWM
//! pindeck pwm start 12 --frequency 1000 --duty-cycle 50
//!
//! # 舵机（scan 持续运行直到 Ctrl-C）
//! pindeck servo angle 90 --smooth
//! pindeck servo scan --start 0 --end 180 --speed fast
//! ```
//!
//! 后端自动探测：pigpiod 守护进程（127.0.0.1:8888）与 rppal 数字
//! 驱动（仅 Linux）。两者都缺失时进入模拟模式。

use anyhow::Result;
use clap::{Parser, Subcommand};
use pindeck_core::{GpioController, PinModeRequest, ServoController};
use pindeck_hal::{DigitalGpio, PigpiodClient, PwmDaemon};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// 舵机信号引脚（BCM 编号）
const DEFAULT_SERVO_PIN: u8 = 18;

/// PinDeck CLI - GPIO/舵机命令行工具
#[derive(Parser, Debug)]
#[command(name = "pindeck")]
#[command(about = "Command-line interface for Raspberry Pi GPIO and servo control", long_about = None)]
#[command(version)]
struct Cli {
    /// pigpiod 守护进程地址
    #[arg(long, default_value = "127.0.0.1:8888")]
    daemon_addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 系统状态
    Status,

    /// 引脚操作
    #[command(subcommand)]
    Pin(PinCommand),

    /// PWM 输出
    #[command(subcommand)]
    Pwm(PwmCommand),

    /// SG90 舵机控制
    #[command(subcommand)]
    Servo(ServoCommand),
}

#[derive(Subcommand, Debug)]
enum PinCommand {
    /// 配置引脚模式
    Setup {
        pin: u8,
        /// input / output / input_pullup / input_pulldown
        #[arg(value_parser = parse_pin_mode)]
        mode: PinModeRequest,
    },

    /// 读引脚电平
    Read { pin: u8 },

    /// 写引脚电平（0/1）
    Write { pin: u8, value: u8 },

    /// 翻转引脚输出
    Toggle { pin: u8 },

    /// 读取全部已配置引脚
    ReadAll,

    /// 复位全部引脚
    Reset,

    /// 引脚详情
    Info { pin: u8 },
}

#[derive(Subcommand, Debug)]
enum PwmCommand {
    /// 启动 PWM 输出
    Start {
        pin: u8,
        /// 频率（Hz，上限 50 kHz）
        #[arg(short, long)]
        frequency: f64,
        /// 占空比（0-100%）
        #[arg(short, long)]
        duty_cycle: f64,
    },

    /// 停止 PWM 输出
    Stop { pin: u8 },
}

#[derive(Subcommand, Debug)]
enum ServoCommand {
    /// 启用舵机
    Enable,

    /// 禁用舵机
    Disable,

    /// 设置角度（0-180°）
    Angle {
        angle: f64,
        /// 大角度差时分步平滑过渡
        #[arg(long)]
        smooth: bool,
    },

    /// 相对步进（度，可为负）
    Step {
        #[arg(allow_hyphen_values = true)]
        delta: f64,
    },

    /// 往返扫描（运行直到 Ctrl-C）
    Scan {
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        #[arg(long, default_value_t = 180.0)]
        end: f64,
        /// slow / medium / fast
        #[arg(long, default_value = "medium")]
        speed: String,
    },

    /// 停止扫描
    Stop,

    /// 急停
    Estop,

    /// 舵机状态
    Status,
}

fn parse_pin_mode(s: &str) -> Result<PinModeRequest, String> {
    match s {
        "input" => Ok(PinModeRequest::Input),
        "output" => Ok(PinModeRequest::Output),
        "input_pullup" => Ok(PinModeRequest::InputPullup),
        "input_pulldown" => Ok(PinModeRequest::InputPulldown),
        _ => Err(format!(
            "unknown mode '{s}' (expected input, output, input_pullup or input_pulldown)"
        )),
    }
}

/// 探测 pigpiod 连接
fn probe_daemon(addr: &str) -> Option<Box<dyn PwmDaemon>> {
    match PigpiodClient::connect(addr) {
        Ok(client) => Some(Box::new(client)),
        Err(e) => {
            warn!(error = %e, addr, "pigpiod not reachable");
            None
        }
    }
}

/// 探测数字 GPIO 驱动（仅 Linux）
fn probe_digital() -> Option<Box<dyn DigitalGpio>> {
    #[cfg(target_os = "linux")]
    {
        match pindeck_hal::RppalGpio::new() {
            Ok(gpio) => Some(Box::new(gpio)),
            Err(e) => {
                warn!(error = %e, "rppal GPIO driver unavailable");
                None
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        warn!("digital GPIO driver unavailable on this platform");
        None
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_gpio_command(cli: &Cli) -> Result<()> {
    let mut controller = GpioController::new(probe_digital(), probe_daemon(&cli.daemon_addr));

    let result = match &cli.command {
        Commands::Status => print_json(&controller.get_system_status()),
        Commands::Pin(cmd) => match cmd {
            PinCommand::Setup { pin, mode } => print_json(&controller.set_pin_mode(*pin, *mode)?),
            PinCommand::Read { pin } => print_json(&controller.read_pin(*pin)?),
            PinCommand::Write { pin, value } => print_json(&controller.write_pin(*pin, *value)?),
            PinCommand::Toggle { pin } => print_json(&controller.toggle_pin(*pin)?),
            PinCommand::ReadAll => print_json(&controller.read_all_pins()?),
            PinCommand::Reset => print_json(&controller.reset_all_pins()),
            PinCommand::Info { pin } => print_json(&controller.get_pin_info(*pin)),
        },
        Commands::Pwm(cmd) => match cmd {
            PwmCommand::Start {
                pin,
                frequency,
                duty_cycle,
            } => print_json(&controller.start_pwm(*pin, *frequency, *duty_cycle)?),
            PwmCommand::Stop { pin } => print_json(&controller.stop_pwm(*pin)?),
        },
        Commands::Servo(_) => unreachable!("servo commands are dispatched separately"),
    };

    // reset/复位类命令已自带拆除；这里只断开守护进程连接
    controller.cleanup();
    result
}

fn run_servo_command(cli: &Cli, cmd: &ServoCommand) -> Result<()> {
    let mut servo = ServoController::new(DEFAULT_SERVO_PIN, probe_daemon(&cli.daemon_addr));

    match cmd {
        ServoCommand::Enable => print_json(&servo.enable()?)?,
        ServoCommand::Disable => print_json(&servo.disable()?)?,
        ServoCommand::Angle { angle, smooth } => {
            servo.enable()?;
            print_json(&servo.set_angle(*angle, *smooth)?)?;
        }
        ServoCommand::Step { delta } => {
            servo.enable()?;
            print_json(&servo.step_move(*delta)?)?;
        }
        ServoCommand::Scan { start, end, speed } => {
            servo.enable()?;
            print_json(&servo.start_scan(*start, *end, speed)?)?;

            // 扫描在后台线程运行；前台等待 Ctrl-C
            let running = Arc::new(AtomicBool::new(true));
            let flag = Arc::clone(&running);
            ctrlc::set_handler(move || {
                flag.store(false, Ordering::SeqCst);
            })?;
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
            }

            print_json(&servo.stop_scan()?)?;
        }
        ServoCommand::Stop => print_json(&servo.stop_scan()?)?,
        ServoCommand::Estop => print_json(&servo.emergency_stop()?)?,
        ServoCommand::Status => print_json(&servo.get_status())?,
    }

    servo.cleanup();
    Ok(())
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pindeck=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Servo(cmd) => run_servo_command(&cli, cmd),
        _ => run_gpio_command(&cli),
    }
}
