//! 稳定控制器
//!
//! 状态机：
//!
//! ```text
//! Disconnected --connect--> Idle --start--> Running --stop--> Idle --disconnect--> Disconnected
//!                                           Running --watchdog--> Idle
//! ```
//!
//! 运行时有三个线程：
//! - `northlock-control`: 读取陀螺角速度，计算并仅写发送速度指令（默认 10 Hz）
//! - `northlock-status`: 清空残留应答后读取状态与单圈角度，驱动看门狗（默认 1 Hz）
//! - `northlock-gyro`: 陀螺解码（由 [`GyroDecoder`] 持有）
//!
//! 锁：
//! - 状态锁保护快照与零点偏移，只做拷入/拷出，不跨 IO 持有
//! - 执行器 IO 锁串行化所有执行器访问。状态任务整段持有；控制任务使用
//!   `try_lock_for(response_timeout)`，拿不到锁就跳过本周期指令

use crate::config::NorthLockConfig;
use crate::error::ControllerError;
use crate::law;
use crate::params::{ControllerParams, ParamsUpdate};
use crate::scheduler::FixedRateScheduler;
use crate::snapshot::{ControllerSnapshot, ZeroOffsets};
use crate::watchdog::StatusWatchdog;
use arc_swap::ArcSwap;
use northlock_driver::{
    ActuatorLink, GyroConfig, GyroDecoder, GyroState, LinkConfig, LinkError, MotorStatus,
    SerialTransport,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct SharedState {
    snapshot: ControllerSnapshot,
    offsets: ZeroOffsets,
    started_at: Option<Instant>,
}

/// 任务线程之间共享的上下文
struct Shared {
    state: Mutex<SharedState>,
    params: ArcSwap<ControllerParams>,
    is_running: AtomicBool,
}

impl Shared {
    fn params(&self) -> ControllerParams {
        **self.params.load()
    }

    fn set_error(&self, message: String) {
        self.state.lock().snapshot.last_error = Some(message);
    }
}

/// 单轴北向锁定稳定控制器
///
/// # Example
///
/// ```rust,no_run
/// use northlock_control::{ControllerParams, StabilizationController};
///
/// let mut controller = StabilizationController::new(ControllerParams::default())?;
/// controller.connect("/dev/ttyUSB0", "/dev/ttyUSB1")?;
/// controller.start()?;
///
/// let snapshot = controller.snapshot();
/// println!("heading {:.2}°", snapshot.gyro_heading_deg);
///
/// controller.disconnect();
/// # Ok::<(), northlock_control::ControllerError>(())
/// ```
pub struct StabilizationController {
    shared: Arc<Shared>,
    link_config: LinkConfig,
    gyro_config: GyroConfig,
    actuator: Option<Arc<Mutex<ActuatorLink>>>,
    gyro: Option<Arc<GyroDecoder>>,
    control_thread: Option<JoinHandle<()>>,
    status_thread: Option<JoinHandle<()>>,
}

impl StabilizationController {
    /// 使用默认链路配置创建
    pub fn new(params: ControllerParams) -> Result<Self, ControllerError> {
        Self::with_configs(params, LinkConfig::default(), GyroConfig::default())
    }

    pub fn with_configs(
        params: ControllerParams,
        link_config: LinkConfig,
        gyro_config: GyroConfig,
    ) -> Result<Self, ControllerError> {
        params.validate()?;
        gyro_config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SharedState::default()),
                params: ArcSwap::from_pointee(params),
                is_running: AtomicBool::new(false),
            }),
            link_config,
            gyro_config,
            actuator: None,
            gyro: None,
            control_thread: None,
            status_thread: None,
        })
    }

    /// 使用配置文件中的链路配置与控制参数创建
    pub fn from_config(config: &NorthLockConfig) -> Result<Self, ControllerError> {
        Self::with_configs(
            config.controller,
            config.actuator.link_config(),
            config.gyro.gyro_config(),
        )
    }

    pub fn is_connected(&self) -> bool {
        self.actuator.is_some() && self.gyro.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running.load(Ordering::Acquire)
    }

    // ==================== 连接 ====================

    /// 打开两条串口链路
    ///
    /// 任一链路失败时已打开的链路会被关闭，控制器保持未连接状态。
    pub fn connect(&mut self, actuator_port: &str, gyro_port: &str) -> Result<(), ControllerError> {
        let link_config = self.link_config;
        let gyro_config = self.gyro_config;
        self.connect_via(
            || ActuatorLink::open(actuator_port, link_config),
            || GyroDecoder::open(gyro_port, gyro_config),
        )
    }

    /// 在已打开的传输上建立链路（与 [`connect`](Self::connect) 语义相同）
    pub fn connect_transports(
        &mut self,
        actuator: impl SerialTransport + 'static,
        gyro: impl SerialTransport + 'static,
    ) -> Result<(), ControllerError> {
        let link_config = self.link_config;
        let gyro_config = self.gyro_config;
        self.connect_via(
            move || ActuatorLink::new(actuator, link_config),
            move || GyroDecoder::start(gyro, gyro_config),
        )
    }

    fn connect_via(
        &mut self,
        open_actuator: impl FnOnce() -> Result<ActuatorLink, LinkError>,
        open_gyro: impl FnOnce() -> Result<GyroDecoder, LinkError>,
    ) -> Result<(), ControllerError> {
        if self.is_connected() {
            return Err(ControllerError::AlreadyConnected);
        }

        self.shared.state.lock().snapshot = ControllerSnapshot::default();

        let result = open_actuator().and_then(|actuator| {
            // 陀螺打开失败时 actuator 在此处被释放（串口关闭）
            let gyro = open_gyro()?;
            Ok((actuator, gyro))
        });

        match result {
            Ok((actuator, gyro)) => self.connect_with(actuator, gyro),
            Err(e) => {
                error!("Connect failed: {}", e);
                self.shared.set_error(format!("connect failed: {e}"));
                Err(e.into())
            },
        }
    }

    /// 接管已建立的链路
    ///
    /// 连接后立即以当前姿态为零点。
    pub fn connect_with(&mut self, actuator: ActuatorLink, gyro: GyroDecoder) -> Result<(), ControllerError> {
        if self.is_connected() {
            return Err(ControllerError::AlreadyConnected);
        }

        self.actuator = Some(Arc::new(Mutex::new(actuator)));
        self.gyro = Some(Arc::new(gyro));

        self.zero_orientation();

        {
            let mut state = self.shared.state.lock();
            state.snapshot.connected = true;
        }
        info!("Controller connected");
        Ok(())
    }

    /// 停止任务，发送零速指令并关闭两条链路（幂等）
    pub fn disconnect(&mut self) {
        self.stop();

        if let Some(actuator) = self.actuator.take() {
            let mut link = actuator.lock();
            if let Err(e) = link.set_speed_fire_and_forget(0.0) {
                debug!("Zero-speed command on disconnect failed: {}", e);
            }
            link.close();
        }

        // 任务线程已退出，这里是最后一个引用，Drop 时关闭解码线程
        self.gyro = None;

        let was_connected = {
            let mut state = self.shared.state.lock();
            std::mem::replace(&mut state.snapshot.connected, false)
        };
        if was_connected {
            info!("Controller disconnected");
        }
    }

    // ==================== 运行 ====================

    /// 启动控制与状态任务
    ///
    /// 已在运行时不做任何事。
    pub fn start(&mut self) -> Result<(), ControllerError> {
        let (Some(actuator), Some(gyro)) = (self.actuator.clone(), self.gyro.clone()) else {
            return Err(ControllerError::NotConnected);
        };
        if self.is_running() {
            return Ok(());
        }

        // 回收看门狗停止后遗留的线程
        self.join_tasks();

        let io_timeout = self.link_config.response_timeout;
        {
            let mut state = self.shared.state.lock();
            state.started_at = Some(Instant::now());
            let snapshot = &mut state.snapshot;
            snapshot.running = true;
            snapshot.watchdog_tripped = false;
            snapshot.elapsed_s = 0.0;
            snapshot.status_ok = 0;
            snapshot.status_timeouts = 0;
            snapshot.consecutive_status_failures = 0;
            snapshot.skipped_commands = 0;
        }
        self.shared.is_running.store(true, Ordering::Release);

        let control = {
            let shared = Arc::clone(&self.shared);
            let actuator = Arc::clone(&actuator);
            std::thread::Builder::new()
                .name("northlock-control".to_string())
                .spawn(move || control_loop(shared, actuator, gyro, io_timeout))
        };
        let control = match control {
            Ok(handle) => handle,
            Err(source) => {
                self.abort_start();
                return Err(ControllerError::Spawn {
                    name: "control",
                    source,
                });
            },
        };
        self.control_thread = Some(control);

        let status = {
            let shared = Arc::clone(&self.shared);
            std::thread::Builder::new()
                .name("northlock-status".to_string())
                .spawn(move || status_loop(shared, actuator))
        };
        match status {
            Ok(handle) => self.status_thread = Some(handle),
            Err(source) => {
                self.abort_start();
                return Err(ControllerError::Spawn {
                    name: "status",
                    source,
                });
            },
        }

        let params = self.shared.params();
        info!(
            "Controller started (control {:.1} Hz, status {:.1} Hz)",
            params.control_rate_hz, params.status_rate_hz
        );
        Ok(())
    }

    fn abort_start(&mut self) {
        self.shared.is_running.store(false, Ordering::Release);
        self.join_tasks();
        self.shared.state.lock().snapshot.running = false;
    }

    /// 停止任务并发送一次零速指令（尽力而为）
    ///
    /// 先等待任务线程退出再发送零速，保证零速是最后一条指令。
    pub fn stop(&mut self) {
        let was_running = self.shared.is_running.swap(false, Ordering::AcqRel);
        self.join_tasks();

        if was_running {
            if let Some(actuator) = &self.actuator {
                let mut link = actuator.lock();
                if let Err(e) = link.set_speed_fire_and_forget(0.0) {
                    warn!("Zero-speed command on stop failed: {}", e);
                }
            }
            self.shared.state.lock().snapshot.command_deg_per_sec = 0.0;
            info!("Controller stopped");
        }

        self.shared.state.lock().snapshot.running = false;
    }

    fn join_tasks(&mut self) {
        for (name, handle) in [
            ("control", self.control_thread.take()),
            ("status", self.status_thread.take()),
        ] {
            if let Some(handle) = handle
                && handle.join().is_err()
            {
                error!("{} thread panicked", name);
            }
        }
    }

    // ==================== 参数 ====================

    pub fn params(&self) -> ControllerParams {
        self.shared.params()
    }

    /// 原子地替换提供的字段，下一个周期生效
    ///
    /// # 错误
    /// - `ControllerError::InvalidParams`: 任一字段不合法，整个更新被拒绝
    pub fn set_params(&self, update: ParamsUpdate) -> Result<(), ControllerError> {
        update.validate()?;
        self.shared
            .params
            .rcu(|current| Arc::new(current.merged(&update)));
        debug!("Params updated: {:?}", self.shared.params());
        Ok(())
    }

    // ==================== 零点与漂移 ====================

    /// 以当前姿态为零点（航向 0°）
    ///
    /// 读取失败的一侧以 0 作为偏移。两侧都读取成功时清除 `last_error`。
    pub fn zero_orientation(&self) {
        let gyro_state = self.gyro.as_ref().map(|g| g.state());
        let gyro_angle = gyro_state.map(|s| s.integrated_angle_deg);

        let actuator_angle = match &self.actuator {
            Some(actuator) => match actuator.lock().read_single_turn_angle_deg() {
                Ok(angle) => Some(angle),
                Err(e) => {
                    warn!("Zero: actuator angle read failed: {}", e);
                    self.shared
                        .set_error(format!("zero: actuator angle read failed: {e}"));
                    None
                },
            },
            None => None,
        };

        let gyro_zero = gyro_angle.unwrap_or(0.0);
        let actuator_zero = actuator_angle.unwrap_or(0.0);

        let mut state = self.shared.state.lock();
        state.offsets = ZeroOffsets {
            gyro_zero_deg: gyro_zero,
            actuator_zero_deg: actuator_zero,
        };
        let snapshot = &mut state.snapshot;
        snapshot.gyro_angle_deg = gyro_zero;
        snapshot.actuator_angle_deg = actuator_zero;
        snapshot.gyro_heading_deg = 0.0;
        snapshot.actuator_heading_deg = 0.0;
        if let Some(gyro_state) = gyro_state {
            snapshot.gyro_drift_deg_per_sec = gyro_state.drift_deg_per_sec;
        }
        if gyro_angle.is_some() && actuator_angle.is_some() {
            snapshot.last_error = None;
        }
        drop(state);

        info!(
            "Orientation zeroed (gyro {:.3}°, actuator {:.2}°)",
            gyro_zero, actuator_zero
        );
    }

    /// 开始陀螺漂移测量
    pub fn begin_gyro_drift_measurement(&self, duration: Duration) -> Result<(), ControllerError> {
        let gyro = self.gyro.as_ref().ok_or(ControllerError::NotConnected)?;
        gyro.begin_drift_measurement(duration);
        Ok(())
    }

    /// 陀螺积分状态（未连接时为 `None`）
    pub fn gyro_state(&self) -> Option<GyroState> {
        self.gyro.as_ref().map(|g| g.state())
    }

    pub fn zero_offsets(&self) -> ZeroOffsets {
        self.shared.state.lock().offsets
    }

    // ==================== 快照 ====================

    /// 当前快照的副本
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.shared.state.lock().snapshot.clone()
    }
}

impl Drop for StabilizationController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn control_loop(
    shared: Arc<Shared>,
    actuator: Arc<Mutex<ActuatorLink>>,
    gyro: Arc<GyroDecoder>,
    io_timeout: Duration,
) {
    let mut scheduler = FixedRateScheduler::new(
        "control",
        shared.params().control_period(),
        Instant::now(),
    );

    while scheduler.wait_next(&shared.is_running) {
        let params = shared.params();
        scheduler.set_period(params.control_period());

        let gyro_state = gyro.state();
        let rate = gyro_state.rate_deg_per_sec;
        let angle = gyro_state.integrated_angle_deg;
        let command = law::compute_command(rate, &params);

        // None: IO 锁忙，跳过本周期
        let sent = actuator.try_lock_for(io_timeout).map(|mut link| {
            // 看门狗在持有 IO 锁时清除运行标志，之后不能再有非零指令
            if shared.is_running.load(Ordering::Acquire) {
                link.set_speed_fire_and_forget(command)
            } else {
                Ok(())
            }
        });

        let mut state = shared.state.lock();
        let heading = state.offsets.gyro_heading(angle);
        let elapsed = state.started_at.map(|t| t.elapsed().as_secs_f64());
        let snapshot = &mut state.snapshot;
        if let Some(elapsed) = elapsed {
            snapshot.elapsed_s = elapsed;
        }
        snapshot.gyro_rate_deg_per_sec = rate;
        snapshot.gyro_angle_deg = angle;
        snapshot.gyro_heading_deg = heading;
        snapshot.gyro_drift_deg_per_sec = gyro_state.drift_deg_per_sec;
        snapshot.command_deg_per_sec = command;

        match sent {
            Some(Ok(())) => {},
            Some(Err(e)) => {
                snapshot.last_error = Some(format!("speed command failed: {e}"));
                drop(state);
                warn!("Speed command failed: {}", e);
            },
            None => {
                snapshot.skipped_commands += 1;
                drop(state);
                warn!("Actuator busy for {:?}, skipped speed command", io_timeout);
            },
        }
    }

    debug!("Control loop exited");
}

/// 一次状态轮询：清空残留应答、读状态、读单圈角度
fn poll_status(link: &mut ActuatorLink) -> Result<(MotorStatus, f64), LinkError> {
    link.drain_receive_buffer()?;
    let status = link.read_status_default()?;
    let angle = link.read_single_turn_angle_deg()?;
    Ok((status, angle))
}

fn status_loop(shared: Arc<Shared>, actuator: Arc<Mutex<ActuatorLink>>) {
    let mut scheduler = FixedRateScheduler::new(
        "status",
        shared.params().status_period(),
        Instant::now(),
    );
    let mut watchdog = StatusWatchdog::new();

    while scheduler.wait_next(&shared.is_running) {
        let params = shared.params();
        scheduler.set_period(params.status_period());

        let mut link = actuator.lock();
        let result = poll_status(&mut link);

        match result {
            Ok((status, angle)) => {
                drop(link);
                watchdog.record_success();

                let mut state = shared.state.lock();
                let heading = state.offsets.actuator_heading(angle);
                let snapshot = &mut state.snapshot;
                snapshot.motor_status = Some(status);
                snapshot.actuator_angle_deg = angle;
                snapshot.actuator_heading_deg = heading;
                publish_counters(snapshot, &watchdog);
            },
            Err(e) if e.is_timeout() => {
                let tripped = watchdog.record_timeout(params.max_consecutive_status_failures);
                let mut state = shared.state.lock();
                publish_counters(&mut state.snapshot, &watchdog);

                if !tripped {
                    drop(state);
                    drop(link);
                    warn!(
                        "Status poll timed out ({}/{}): {}",
                        watchdog.consecutive_failures(),
                        params.max_consecutive_status_failures,
                        e
                    );
                    continue;
                }

                let err = ControllerError::WatchdogTriggered {
                    failures: watchdog.consecutive_failures(),
                };
                error!("{}, stopping", err);

                // 先清除运行标志，控制任务不再发出新指令
                shared.is_running.store(false, Ordering::Release);
                state.snapshot.running = false;
                state.snapshot.watchdog_tripped = true;
                state.snapshot.command_deg_per_sec = 0.0;
                state.snapshot.last_error = Some(err.to_string());
                drop(state);

                if let Err(e) = link.set_speed_fire_and_forget(0.0) {
                    warn!("Zero-speed command after watchdog failed: {}", e);
                }
                return;
            },
            Err(e) => {
                drop(link);
                warn!("Status poll failed: {}", e);
                let mut state = shared.state.lock();
                state.snapshot.last_error = Some(format!("status poll failed: {e}"));
                publish_counters(&mut state.snapshot, &watchdog);
            },
        }
    }

    debug!("Status loop exited");
}

fn publish_counters(snapshot: &mut ControllerSnapshot, watchdog: &StatusWatchdog) {
    snapshot.status_ok = watchdog.successes();
    snapshot.status_timeouts = watchdog.timeouts();
    snapshot.consecutive_status_failures = watchdog.consecutive_failures();
}
