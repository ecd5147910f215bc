//! # NorthLock CLI
//!
//! 北向锁定稳定器命令行工具。
//!
//! ```bash
//! # 列出串口
//! northlock-cli ports
//!
//! # 执行器一次性操作
//! northlock-cli --actuator /dev/ttyUSB0 info
//! northlock-cli --actuator /dev/ttyUSB0 move 90
//!
//! # 测量陀螺漂移
//! northlock-cli --gyro /dev/ttyUSB1 drift --seconds 30
//!
//! # 稳定运行（Ctrl-C 停止）
//! northlock-cli --config northlock.toml run
//! ```
//!
//! 日志级别通过 `RUST_LOG` 调整。

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod connection;
mod interrupt;

use commands::{DriftCommand, MoveCommand, RunCommand, SoakCommand};
use connection::ConnectionArgs;

/// NorthLock CLI - 北向锁定稳定器命令行工具
#[derive(Parser, Debug)]
#[command(name = "northlock-cli")]
#[command(about = "Command-line tool for the north-lock stabilizer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出可用串口
    Ports,

    /// 读取执行器型号信息与错误标志
    Info,

    /// 读取一次执行器状态与单圈角度
    Status,

    /// 清除执行器错误标志
    ClearErrors,

    /// 移动到绝对角度
    Move {
        #[command(flatten)]
        args: MoveCommand,
    },

    /// 测量陀螺漂移
    Drift {
        #[command(flatten)]
        args: DriftCommand,
    },

    /// 连接、零点并运行稳定控制
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 执行器可靠性测试
    Soak {
        #[command(flatten)]
        args: SoakCommand,
    },
}

const DEFAULT_LOG_FILTER: &str = "northlock_cli=info,northlock_control=info,northlock_driver=info";

fn main() -> Result<()> {
    // 初始化日志（RUST_LOG 优先）
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ports => commands::ports::list_ports(),

        Commands::Info => {
            let settings = cli.connection.resolve()?;
            commands::actuator::info(&settings)
        },

        Commands::Status => {
            let settings = cli.connection.resolve()?;
            commands::actuator::status(&settings)
        },

        Commands::ClearErrors => {
            let settings = cli.connection.resolve()?;
            commands::actuator::clear_errors(&settings)
        },

        Commands::Move { args } => {
            let settings = cli.connection.resolve()?;
            args.execute(&settings)
        },

        Commands::Drift { args } => {
            let settings = cli.connection.resolve()?;
            args.execute(&settings)
        },

        Commands::Run { args } => {
            let settings = cli.connection.resolve()?;
            args.execute(&settings)
        },

        Commands::Soak { args } => {
            let settings = cli.connection.resolve()?;
            args.execute(&settings)
        },
    }
}
