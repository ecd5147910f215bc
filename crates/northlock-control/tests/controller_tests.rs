//! 控制器集成测试（内存串口）

use northlock_control::{
    ControllerError, ControllerParams, GyroConfig, LinkConfig, ParamsUpdate,
    StabilizationController,
};
use northlock_protocol::{ActuatorFrame, CommandCode, GyroPacket};
use northlock_serial::{MockHandle, MockTransport};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// 0.04768° per sample
const RAW: i32 = -1_000_000;
/// 0.25° per sample
const QUARTER_DEG_RAW: i32 = -5_243_289;

const ZERO_SPEED_FRAME: [u8; 10] = [0x3E, 0xA2, 0x01, 0x04, 0xE5, 0x00, 0x00, 0x00, 0x00, 0x00];

fn fast_link() -> LinkConfig {
    LinkConfig {
        response_timeout: Duration::from_millis(30),
        inter_command_delay: Duration::ZERO,
        status_retries: 0,
        retry_backoff: Duration::from_millis(1),
        drain_settle: Duration::from_millis(1),
        drain_rounds: 1,
        ..LinkConfig::default()
    }
}

fn fast_params() -> ControllerParams {
    ControllerParams {
        control_rate_hz: 50.0,
        status_rate_hz: 50.0,
        ..ControllerParams::default()
    }
}

fn reply(command: CommandCode, payload: &[u8]) -> Vec<u8> {
    ActuatorFrame::new(command, 0x01, payload).unwrap().encode()
}

fn status_reply() -> Vec<u8> {
    let mut payload = vec![30u8];
    payload.extend_from_slice(&0i16.to_le_bytes());
    payload.extend_from_slice(&0i16.to_le_bytes());
    payload.extend_from_slice(&2048u16.to_le_bytes());
    reply(CommandCode::ReadStatus, &payload)
}

fn angle_reply(centi_deg: u16) -> Vec<u8> {
    reply(CommandCode::ReadSingleTurnAngle, &centi_deg.to_le_bytes())
}

/// 应答状态与角度请求的执行器；`status_timeouts` 次状态请求不应答
fn actuator_responding(handle: &MockHandle, status_timeouts: usize) -> Arc<AtomicUsize> {
    let status_requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&status_requests);
    handle.set_responder(move |bytes| match bytes.get(1).copied() {
        Some(0x9C) => {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            (n >= status_timeouts).then(status_reply)
        },
        Some(0x94) => Some(angle_reply(4200)),
        _ => None,
    });
    status_requests
}

fn connected(params: ControllerParams) -> (StabilizationController, MockHandle, MockHandle) {
    let (actuator, actuator_handle) = MockTransport::new("mock-actuator");
    let (gyro, gyro_handle) = MockTransport::new("mock-gyro");
    actuator_responding(&actuator_handle, 0);

    let mut controller =
        StabilizationController::with_configs(params, fast_link(), GyroConfig::default()).unwrap();
    controller.connect_transports(actuator, gyro).unwrap();
    (controller, actuator_handle, gyro_handle)
}

fn push_packets(handle: &MockHandle, raw: i32, count: usize) {
    let mut bytes = Vec::with_capacity(count * 5);
    for _ in 0..count {
        bytes.extend_from_slice(&GyroPacket::encode(raw, 0x00));
    }
    handle.push_rx(&bytes);
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn speed_payloads(handle: &MockHandle) -> Vec<i32> {
    handle
        .written()
        .iter()
        .filter(|frame| frame.len() == 10 && frame[1] == 0xA2)
        .map(|frame| i32::from_le_bytes([frame[5], frame[6], frame[7], frame[8]]))
        .collect()
}

#[test]
fn test_connect_zeroes_orientation() {
    let (controller, _actuator, _gyro) = connected(fast_params());

    let snapshot = controller.snapshot();
    assert!(snapshot.connected);
    assert!(!snapshot.running);
    assert_eq!(snapshot.gyro_heading_deg, 0.0);
    assert_eq!(snapshot.actuator_heading_deg, 0.0);
    assert_eq!(snapshot.last_error, None);
    assert!((controller.zero_offsets().actuator_zero_deg - 42.0).abs() < 1e-9);
}

#[test]
fn test_connect_twice_is_rejected() {
    let (mut controller, _actuator, _gyro) = connected(fast_params());
    let (actuator, _) = MockTransport::new("other-actuator");
    let (gyro, _) = MockTransport::new("other-gyro");

    assert!(matches!(
        controller.connect_transports(actuator, gyro),
        Err(ControllerError::AlreadyConnected)
    ));
    assert!(controller.is_connected());
}

#[test]
fn test_heading_follows_gyro_after_zero() {
    let (controller, _actuator, gyro) = connected(fast_params());

    push_packets(&gyro, QUARTER_DEG_RAW, 10);
    assert!(wait_until(Duration::from_secs(2), || {
        controller.gyro_state().map(|s| s.valid_packet_count) == Some(10)
    }));

    let state = controller.gyro_state().unwrap();
    let heading = controller
        .zero_offsets()
        .gyro_heading(state.integrated_angle_deg);
    assert!((heading - 2.5).abs() < 1e-3, "heading = {heading}");

    controller.zero_orientation();
    let offsets = controller.zero_offsets();
    assert!((offsets.gyro_zero_deg - state.integrated_angle_deg).abs() < 1e-9);
    assert_eq!(controller.snapshot().gyro_heading_deg, 0.0);
}

#[test]
fn test_rate_drives_speed_command_and_stop_sends_zero() {
    let params = ControllerParams {
        status_rate_hz: 1.0,
        ..fast_params()
    };
    let (mut controller, actuator, gyro) = connected(params);

    push_packets(&gyro, RAW, 64);
    assert!(wait_until(Duration::from_secs(2), || {
        controller.gyro_state().map(|s| s.valid_packet_count) == Some(64)
    }));

    controller.start().unwrap();
    assert!(controller.is_running());
    assert!(wait_until(Duration::from_secs(2), || {
        speed_payloads(&actuator).contains(&4882)
    }));

    let snapshot = controller.snapshot();
    assert!(snapshot.running);
    assert!((snapshot.gyro_rate_deg_per_sec - 48.82432).abs() < 1e-6);
    assert!((snapshot.command_deg_per_sec - 48.82432).abs() < 1e-6);

    controller.stop();
    assert!(!controller.is_running());
    assert_eq!(actuator.written().last().unwrap(), &ZERO_SPEED_FRAME.to_vec());
    assert_eq!(controller.snapshot().command_deg_per_sec, 0.0);
}

#[test]
fn test_params_update_takes_effect_while_running() {
    let (mut controller, actuator, gyro) = connected(fast_params());

    push_packets(&gyro, RAW, 64);
    assert!(wait_until(Duration::from_secs(2), || {
        controller.gyro_state().map(|s| s.valid_packet_count) == Some(64)
    }));

    controller.start().unwrap();
    controller
        .set_params(ParamsUpdate {
            max_command_deg_per_sec: Some(10.0),
            ..ParamsUpdate::default()
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        speed_payloads(&actuator).contains(&1000)
    }));
    controller.stop();
}

#[test]
fn test_watchdog_stops_after_consecutive_timeouts() {
    let (actuator, actuator_handle) = MockTransport::new("mock-actuator");
    let (gyro, _gyro_handle) = MockTransport::new("mock-gyro");
    let status_requests = actuator_responding(&actuator_handle, usize::MAX);

    let mut controller =
        StabilizationController::with_configs(fast_params(), fast_link(), GyroConfig::default())
            .unwrap();
    controller.connect_transports(actuator, gyro).unwrap();
    controller.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || !controller.is_running()));

    let snapshot = controller.snapshot();
    assert!(snapshot.watchdog_tripped);
    assert!(!snapshot.running);
    assert_eq!(snapshot.consecutive_status_failures, 5);
    assert_eq!(snapshot.status_timeouts, 5);
    assert_eq!(status_requests.load(Ordering::SeqCst), 5);
    assert!(
        snapshot
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("watchdog"))
    );
    assert_eq!(
        actuator_handle.written().last().unwrap(),
        &ZERO_SPEED_FRAME.to_vec()
    );

    // 可以重新启动，看门狗状态被清除
    controller.stop();
    controller.start().unwrap();
    assert!(!controller.snapshot().watchdog_tripped);
    controller.stop();
}

#[test]
fn test_success_resets_timeout_streak() {
    let (actuator, actuator_handle) = MockTransport::new("mock-actuator");
    let (gyro, _gyro_handle) = MockTransport::new("mock-gyro");
    actuator_responding(&actuator_handle, 4);

    let mut controller =
        StabilizationController::with_configs(fast_params(), fast_link(), GyroConfig::default())
            .unwrap();
    controller.connect_transports(actuator, gyro).unwrap();
    controller.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        controller.snapshot().status_ok >= 2
    }));

    let snapshot = controller.snapshot();
    assert!(controller.is_running());
    assert!(!snapshot.watchdog_tripped);
    assert_eq!(snapshot.status_timeouts, 4);
    assert_eq!(snapshot.consecutive_status_failures, 0);
    assert_eq!(snapshot.motor_status.map(|s| s.encoder_pos), Some(2048));
    assert!((snapshot.actuator_angle_deg - 42.0).abs() < 1e-9);

    controller.stop();
}

#[test]
fn test_failed_speed_command_is_recorded_and_loop_continues() {
    let params = ControllerParams {
        status_rate_hz: 1.0,
        ..fast_params()
    };
    let (mut controller, actuator, gyro) = connected(params);
    push_packets(&gyro, RAW, 64);

    controller.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        !speed_payloads(&actuator).is_empty()
    }));

    actuator.set_write_failure(true);
    assert!(wait_until(Duration::from_secs(2), || {
        controller
            .snapshot()
            .last_error
            .is_some_and(|e| e.starts_with("speed command failed"))
    }));
    assert!(controller.is_running());
    assert!(controller.snapshot().running);

    // 写入恢复后继续发送
    actuator.set_write_failure(false);
    let sent = speed_payloads(&actuator).len();
    assert!(wait_until(Duration::from_secs(2), || {
        speed_payloads(&actuator).len() > sent
    }));

    controller.stop();
    assert_eq!(actuator.written().last().unwrap(), &ZERO_SPEED_FRAME.to_vec());
}

#[test]
fn test_corrupt_status_reply_does_not_count_toward_watchdog() {
    let (actuator, actuator_handle) = MockTransport::new("mock-actuator");
    let (gyro, _gyro_handle) = MockTransport::new("mock-gyro");
    let status_requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&status_requests);
    actuator_handle.set_responder(move |bytes| match bytes.get(1).copied() {
        Some(0x9C) => {
            counter.fetch_add(1, Ordering::SeqCst);
            // 负载校验和错误
            let mut frame = status_reply();
            if let Some(last) = frame.last_mut() {
                *last ^= 0xFF;
            }
            Some(frame)
        },
        Some(0x94) => Some(angle_reply(4200)),
        _ => None,
    });

    let mut controller =
        StabilizationController::with_configs(fast_params(), fast_link(), GyroConfig::default())
            .unwrap();
    controller.connect_transports(actuator, gyro).unwrap();
    controller.start().unwrap();

    // 超过看门狗阈值的次数
    assert!(wait_until(Duration::from_secs(5), || {
        status_requests.load(Ordering::SeqCst) >= 8
    }));

    let snapshot = controller.snapshot();
    assert!(controller.is_running());
    assert!(snapshot.running);
    assert!(!snapshot.watchdog_tripped);
    assert_eq!(snapshot.consecutive_status_failures, 0);
    assert_eq!(snapshot.status_timeouts, 0);
    assert_eq!(snapshot.status_ok, 0);
    assert!(
        snapshot
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("checksum mismatch"))
    );

    controller.stop();
}

#[test]
fn test_snapshot_publishes_drift_from_control_tick() {
    let (mut controller, _actuator, gyro) = connected(fast_params());
    assert_eq!(controller.snapshot().gyro_drift_deg_per_sec, 0.0);

    controller
        .begin_gyro_drift_measurement(Duration::ZERO)
        .unwrap();
    std::thread::sleep(Duration::from_millis(2));
    push_packets(&gyro, RAW, 1);
    assert!(wait_until(Duration::from_secs(2), || {
        controller
            .gyro_state()
            .is_some_and(|s| !s.drift_measurement_active)
    }));
    let drift = controller.gyro_state().unwrap().drift_deg_per_sec;
    assert!(drift > 0.0);

    controller.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        controller.snapshot().gyro_drift_deg_per_sec == drift
    }));
    controller.stop();
}

#[test]
fn test_gyro_failure_releases_actuator() {
    let (actuator, actuator_handle) = MockTransport::new("mock-actuator");
    let (gyro, gyro_handle) = MockTransport::new("mock-gyro");
    actuator_responding(&actuator_handle, 0);
    gyro_handle.set_closed(true);

    let mut controller =
        StabilizationController::with_configs(fast_params(), fast_link(), GyroConfig::default())
            .unwrap();
    let err = controller.connect_transports(actuator, gyro).unwrap_err();

    assert!(matches!(err, ControllerError::Link(_)));
    assert!(!controller.is_connected());
    assert!(actuator_handle.is_dropped());
    assert!(gyro_handle.is_dropped());

    let snapshot = controller.snapshot();
    assert!(!snapshot.connected);
    assert!(snapshot.last_error.is_some());
    assert!(matches!(controller.start(), Err(ControllerError::NotConnected)));
}

#[test]
fn test_disconnect_releases_ports() {
    let (mut controller, actuator, gyro) = connected(fast_params());
    controller.start().unwrap();

    controller.disconnect();
    assert!(!controller.is_connected());
    assert!(!controller.is_running());
    assert!(actuator.is_dropped());
    assert!(gyro.is_dropped());
    assert_eq!(actuator.written().last().unwrap(), &ZERO_SPEED_FRAME.to_vec());
    assert!(!controller.snapshot().connected);

    // 幂等
    controller.disconnect();
}
