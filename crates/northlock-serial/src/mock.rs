//! 内存串口（测试用）
//!
//! [`MockTransport`] 交给被测代码持有，[`MockHandle`] 留在测试侧用于注入接收数据、
//! 设置应答器和检查写出的字节。两者共享同一份状态。

use crate::{SerialError, SerialTransport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 应答器：每次写入后调用，返回值追加到接收缓冲区
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct MockState {
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    responder: Option<Responder>,
    fail_writes: bool,
    closed: bool,
    dropped: bool,
    clear_count: usize,
}

/// 内存串口
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
    read_timeout: Duration,
}

/// 测试侧句柄
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(name: &str) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let transport = Self {
            name: name.to_string(),
            state: Arc::clone(&state),
            read_timeout: Duration::from_millis(10),
        };
        (transport, MockHandle { state })
    }

    fn check_open(&self) -> Result<(), SerialError> {
        if self.state.lock().closed {
            Err(SerialError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.state.lock().dropped = true;
    }
}

impl SerialTransport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(SerialError::Closed);
        }
        if state.fail_writes {
            return Err(SerialError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }

        state.writes.push(bytes.to_vec());
        if let Some(responder) = state.responder.as_mut()
            && let Some(reply) = responder(bytes)
        {
            state.rx.extend(reply);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        let deadline = Instant::now() + self.read_timeout;
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(SerialError::Closed);
                }
                if !state.rx.is_empty() {
                    let n = buf.len().min(state.rx.len());
                    for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SerialError::Timeout);
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(1)));
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), SerialError> {
        self.check_open()?;
        self.read_timeout = timeout;
        Ok(())
    }

    fn bytes_to_read(&mut self) -> Result<usize, SerialError> {
        self.check_open()?;
        Ok(self.state.lock().rx.len())
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SerialError::Closed);
        }
        state.rx.clear();
        state.clear_count += 1;
        Ok(())
    }

    fn clear_all(&mut self) -> Result<(), SerialError> {
        self.clear_input()
    }
}

impl MockHandle {
    /// 注入接收数据
    pub fn push_rx(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    /// 接收缓冲区剩余字节数
    pub fn rx_len(&self) -> usize {
        self.state.lock().rx.len()
    }

    /// 设置应答器（替换已有应答器）
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        self.state.lock().responder = None;
    }

    /// 之后的写入全部失败
    pub fn set_write_failure(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// 模拟设备拔出：之后所有操作返回 [`SerialError::Closed`]
    pub fn set_closed(&self, closed: bool) {
        self.state.lock().closed = closed;
    }

    /// 每次 `write_all` 调用写出的字节（按顺序）
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// 取出并清空写入记录
    pub fn take_written(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.lock().writes)
    }

    /// 接收缓冲区被清空的次数
    pub fn clear_count(&self) -> usize {
        self.state.lock().clear_count
    }

    /// 传输对象是否已被释放（链路已关闭）
    pub fn is_dropped(&self) -> bool {
        self.state.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responder_feeds_rx() {
        let (mut transport, handle) = MockTransport::new("mock0");
        handle.set_responder(|written| Some(written.iter().rev().copied().collect()));

        transport.write_all(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 8];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[3, 2, 1]);
        assert_eq!(handle.written(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_read_times_out_when_empty() {
        let (mut transport, _handle) = MockTransport::new("mock0");
        let mut buf = [0u8; 4];
        let start = Instant::now();
        let err = transport.read_timeout(&mut buf, Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, SerialError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_try_read_without_data() {
        let (mut transport, handle) = MockTransport::new("mock0");
        let mut buf = [0u8; 4];
        assert_eq!(transport.try_read(&mut buf).unwrap(), 0);

        handle.push_rx(&[9, 8]);
        assert_eq!(transport.try_read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[9, 8]);
    }

    #[test]
    fn test_closed_and_dropped() {
        let (mut transport, handle) = MockTransport::new("mock0");
        handle.set_closed(true);
        assert!(matches!(transport.write_all(&[0]), Err(SerialError::Closed)));
        assert!(!handle.is_dropped());

        drop(transport);
        assert!(handle.is_dropped());
    }
}
