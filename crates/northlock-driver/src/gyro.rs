//! 光纤速率陀螺解码器
//!
//! 陀螺上电后以固定采样率持续推送数据包，不需要请求。[`GyroDecoder`] 在独立线程中
//! 读取字节流，交给 [`GyroIntegrator`] 完成重同步、漂移补偿和角度积分；
//! 其他线程通过加锁的快照读取结果。
//!
//! 积分角度不做 360° 回绕，由调用方换算航向。

use crate::error::LinkError;
use northlock_protocol::{GYRO_PACKET_LEN, GyroPacket, GyroStreamParser};
use northlock_serial::{PortSettings, SerialError, SerialPortTransport, SerialTransport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// 陀螺解码配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroConfig {
    /// 陀螺内部采样率（Hz）
    pub sampling_rate_hz: f64,
    /// 角速度滑动平均窗口（包数）
    pub rate_window_samples: usize,
    /// 单次读取的最大字节数
    pub read_chunk: usize,
    /// 单次读取超时（也决定关闭时线程的最大响应延迟）
    pub read_timeout: Duration,
    /// 串口读错误后的退避时间
    pub error_backoff: Duration,
}

impl Default for GyroConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 1024.0,
            rate_window_samples: 64,
            read_chunk: 256,
            read_timeout: Duration::from_millis(20),
            error_backoff: Duration::from_millis(100),
        }
    }
}

impl GyroConfig {
    /// 校验配置
    ///
    /// # 错误
    /// - `LinkError::InvalidConfig`: 采样率不是正的有限数值，或读取超时为 0
    pub fn validate(&self) -> Result<(), LinkError> {
        if !(self.sampling_rate_hz.is_finite() && self.sampling_rate_hz > 0.0) {
            return Err(LinkError::InvalidConfig(format!(
                "gyro sampling_rate_hz must be a positive finite number, got {}",
                self.sampling_rate_hz
            )));
        }
        if self.read_timeout.is_zero() {
            return Err(LinkError::InvalidConfig(
                "gyro read_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// 陀螺积分状态
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GyroState {
    /// 累积角度（度，不回绕）
    pub integrated_angle_deg: f64,
    /// 当前漂移估计（°/s）
    pub drift_deg_per_sec: f64,
    /// 漂移补偿后的角速度（°/s，滑动平均）
    pub rate_deg_per_sec: f64,
    /// 有效数据包计数
    pub valid_packet_count: u64,
    /// 重同步丢弃的字节数
    pub skipped_byte_count: u64,
    /// 是否正在测量漂移
    pub drift_measurement_active: bool,
}

#[derive(Debug, Clone, Copy)]
struct DriftWindow {
    started: Instant,
    duration: Duration,
    sum_deg: f64,
}

/// 陀螺积分器（无 IO）
///
/// 每个有效包：
///
/// ```text
/// corrected = raw_delta - drift / sampling_rate
/// angle    += corrected
/// ```
///
/// 漂移测量窗口内累加未补偿的 `raw_delta`，窗口结束时
/// `drift = sum / elapsed_seconds` 替换旧值。窗口期间仍使用旧漂移补偿；
/// 结束窗口的那个包已经使用新漂移。
#[derive(Debug)]
pub struct GyroIntegrator {
    config: GyroConfig,
    parser: GyroStreamParser,
    state: GyroState,
    drift_window: Option<DriftWindow>,
    rate_window: VecDeque<f64>,
    last_packet_at: Option<Instant>,
}

impl GyroIntegrator {
    /// # 错误
    /// - `LinkError::InvalidConfig`: 见 [`GyroConfig::validate`]
    pub fn new(config: GyroConfig) -> Result<Self, LinkError> {
        config.validate()?;
        Ok(Self {
            parser: GyroStreamParser::new(),
            state: GyroState::default(),
            drift_window: None,
            rate_window: VecDeque::with_capacity(config.rate_window_samples.max(1)),
            last_packet_at: None,
            config,
        })
    }

    pub fn config(&self) -> &GyroConfig {
        &self.config
    }

    /// 喂入新读到的字节，返回解出的有效包数量
    ///
    /// `now` 为这批字节的接收时刻，用于漂移窗口计时。
    pub fn ingest(&mut self, bytes: &[u8], now: Instant) -> usize {
        self.parser.push(bytes);

        let mut packets = 0;
        while let Some(packet) = self.parser.next_packet() {
            self.apply_packet(&packet, now);
            packets += 1;
        }

        self.state.skipped_byte_count = self.parser.skipped_bytes();
        packets
    }

    fn apply_packet(&mut self, packet: &GyroPacket, now: Instant) {
        let raw_delta = packet.angle_delta_deg();

        if let Some(drift) = self.drift_window.as_mut() {
            drift.sum_deg += raw_delta;

            let elapsed = now.saturating_duration_since(drift.started);
            if elapsed >= drift.duration && !elapsed.is_zero() {
                let drift_deg_per_sec = drift.sum_deg / elapsed.as_secs_f64();
                info!(
                    "Gyro drift measured: {:.6} °/s over {:.2} s",
                    drift_deg_per_sec,
                    elapsed.as_secs_f64()
                );
                self.state.drift_deg_per_sec = drift_deg_per_sec;
                self.state.drift_measurement_active = false;
                self.drift_window = None;
            }
        }

        let corrected = raw_delta - self.state.drift_deg_per_sec / self.config.sampling_rate_hz;

        self.state.integrated_angle_deg += corrected;
        self.state.valid_packet_count += 1;
        self.last_packet_at = Some(now);

        let window = self.config.rate_window_samples.max(1);
        if self.rate_window.len() == window {
            self.rate_window.pop_front();
        }
        self.rate_window.push_back(corrected);
        let mean = self.rate_window.iter().sum::<f64>() / self.rate_window.len() as f64;
        self.state.rate_deg_per_sec = mean * self.config.sampling_rate_hz;
    }

    pub fn state(&self) -> GyroState {
        self.state
    }

    /// 积分角度清零（漂移估计与计数保留）
    pub fn reset_angle(&mut self) {
        self.state.integrated_angle_deg = 0.0;
    }

    /// 开始一个漂移测量窗口（已有窗口被重新开始）
    pub fn begin_drift_measurement(&mut self, duration: Duration, now: Instant) {
        self.drift_window = Some(DriftWindow {
            started: now,
            duration,
            sum_deg: 0.0,
        });
        self.state.drift_measurement_active = true;
    }

    /// 最近一个有效包的接收时刻
    pub fn last_packet_at(&self) -> Option<Instant> {
        self.last_packet_at
    }
}

/// 陀螺解码器
///
/// 持有串口并在后台线程 `northlock-gyro` 中持续解码。Drop 时自动关闭。
///
/// # Example
///
/// ```rust,no_run
/// use northlock_driver::{GyroConfig, GyroDecoder};
/// use std::time::Duration;
///
/// let gyro = GyroDecoder::open("/dev/ttyUSB1", GyroConfig::default())?;
/// gyro.begin_drift_measurement(Duration::from_secs(30));
/// std::thread::sleep(Duration::from_secs(31));
/// println!("drift = {:.6} °/s", gyro.drift_deg_per_sec());
/// # Ok::<(), northlock_driver::LinkError>(())
/// ```
pub struct GyroDecoder {
    integrator: Arc<Mutex<GyroIntegrator>>,
    is_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    port_name: String,
}

impl GyroDecoder {
    /// 按陀螺预设（375000 8O1）打开串口并启动解码线程
    pub fn open(port: &str, config: GyroConfig) -> Result<Self, LinkError> {
        let settings = PortSettings::gyro().with_read_timeout(config.read_timeout);
        let transport = SerialPortTransport::open(port, settings)?;
        Self::start(transport, config)
    }

    /// 在已打开的传输上启动解码线程
    ///
    /// # 错误
    /// - `LinkError::InvalidConfig`: 配置不合法（传输被释放）
    /// - `LinkError::Serial`: 清空缓冲或设置超时失败
    pub fn start(mut transport: impl SerialTransport + 'static, config: GyroConfig) -> Result<Self, LinkError> {
        let integrator = Arc::new(Mutex::new(GyroIntegrator::new(config)?));
        transport.clear_input()?;
        transport.set_read_timeout(config.read_timeout)?;

        let port_name = transport.name().to_string();
        let is_running = Arc::new(AtomicBool::new(true));

        let thread = {
            let integrator = Arc::clone(&integrator);
            let is_running = Arc::clone(&is_running);
            std::thread::Builder::new()
                .name("northlock-gyro".to_string())
                .spawn(move || ingest_loop(transport, integrator, is_running, config))
                .map_err(SerialError::Io)?
        };

        info!("Gyro decoder started on {}", port_name);

        Ok(Self {
            integrator,
            is_running,
            thread: Some(thread),
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 累积角度（度）
    pub fn angle_deg(&self) -> f64 {
        self.integrator.lock().state.integrated_angle_deg
    }

    /// 当前漂移估计（°/s）
    pub fn drift_deg_per_sec(&self) -> f64 {
        self.integrator.lock().state.drift_deg_per_sec
    }

    /// 漂移补偿后的角速度（°/s）
    pub fn rate_deg_per_sec(&self) -> f64 {
        self.integrator.lock().state.rate_deg_per_sec
    }

    pub fn state(&self) -> GyroState {
        self.integrator.lock().state()
    }

    /// 距离上一个有效包的时间；尚未收到任何包时为 `None`
    pub fn last_packet_age(&self) -> Option<Duration> {
        self.integrator
            .lock()
            .last_packet_at()
            .map(|at| at.elapsed())
    }

    pub fn reset_angle(&self) {
        self.integrator.lock().reset_angle();
    }

    pub fn begin_drift_measurement(&self, duration: Duration) {
        info!("Gyro drift measurement started ({:.1} s)", duration.as_secs_f64());
        self.integrator
            .lock()
            .begin_drift_measurement(duration, Instant::now());
    }

    /// 停止解码线程并释放串口（幂等）
    pub fn close(&mut self) {
        self.is_running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Gyro ingestion thread panicked");
            }
            info!("Gyro decoder on {} closed", self.port_name);
        }
    }
}

impl Drop for GyroDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

fn ingest_loop(
    mut transport: impl SerialTransport,
    integrator: Arc<Mutex<GyroIntegrator>>,
    is_running: Arc<AtomicBool>,
    config: GyroConfig,
) {
    let mut buf = vec![0u8; config.read_chunk.max(GYRO_PACKET_LEN)];
    let mut error_streak = 0u32;

    while is_running.load(Ordering::Acquire) {
        match transport.read_timeout(&mut buf, config.read_timeout) {
            Ok(n) => {
                error_streak = 0;
                let packets = integrator.lock().ingest(&buf[..n], Instant::now());
                trace!("Gyro RX {} bytes, {} packets", n, packets);
            },
            Err(SerialError::Timeout) => {
                error_streak = 0;
            },
            Err(e) => {
                if error_streak == 0 {
                    error!("Gyro read error on {}: {}", transport.name(), e);
                } else {
                    debug!("Gyro read error on {} (x{}): {}", transport.name(), error_streak + 1, e);
                }
                error_streak = error_streak.saturating_add(1);
                std::thread::sleep(config.error_backoff);
            },
        }
    }

    trace!("Gyro thread: is_running flag is false, exiting");
}
