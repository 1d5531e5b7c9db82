//! Simulated capture device
//!
//! Stands in for the kernel driver in tests and for the `test` camera input.
//! Buffers complete in the order they were queued. Completion is either
//! scripted event by event or free-running at a fixed frame interval.

use crate::buffer::{Buffer, MemoryKind};
use crate::device::{CaptureBackend, CaptureDevice, Dequeued};
use crate::format::{FieldTag, FormatRequest, StreamFormat};
use crate::{CaptureError, Owner};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One scripted driver event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// Complete the oldest queued buffer with this field tag
    Field(FieldTag),
    /// Report exactly this completion, whatever is queued
    Raw(Dequeued),
    /// Let one wait time out
    Timeout,
    /// Wake up with nothing to dequeue
    Spurious,
    /// Fail the next enqueue
    FailEnqueue,
}

/// Calls observed by the simulated driver, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Open(PathBuf),
    NegotiateFormat,
    RequestBuffers(usize),
    Enqueue(usize),
    Dequeue(i64),
    StreamOn,
    StreamOff,
    Close,
}

/// Setup step to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFailure {
    Open,
    Format,
    RequestBuffers,
    StreamOn,
}

/// Shared, ordered record of device calls
#[derive(Debug, Clone, Default)]
pub struct DeviceJournal(Arc<Mutex<Vec<DeviceCall>>>);

impl DeviceJournal {
    fn push(&self, call: DeviceCall) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(call);
        }
    }

    /// Snapshot of all calls so far
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.0.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Position of the first matching call
    pub fn position(&self, call: &DeviceCall) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }
}

/// Free-running frame source
#[derive(Debug, Clone, Copy)]
struct FreeRun {
    interval: Duration,
    alternate_fields: bool,
}

/// Description of the devices a `SimulatedBackend` opens
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    script: Vec<SimEvent>,
    free_run: Option<FreeRun>,
    failure: Option<SimFailure>,
    journal: DeviceJournal,
}

impl SimulatedBackend {
    /// Devices that play `script` and then go quiet
    pub fn scripted(script: impl IntoIterator<Item = SimEvent>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Devices that complete a buffer every `interval`
    pub fn free_running(interval: Duration) -> Self {
        Self {
            free_run: Some(FreeRun {
                interval,
                alternate_fields: false,
            }),
            ..Default::default()
        }
    }

    /// Fail a setup step
    pub fn failing(mut self, failure: SimFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Journal shared by every device this backend opens
    pub fn journal(&self) -> DeviceJournal {
        self.journal.clone()
    }
}

impl CaptureBackend for SimulatedBackend {
    type Device = SimulatedDevice;

    fn name(&self) -> &'static str {
        "simulated"
    }

    fn device_path(&self, device_id: u32) -> PathBuf {
        PathBuf::from(format!("sim://camera{}", device_id))
    }

    fn open(&self, path: &Path) -> Result<SimulatedDevice, CaptureError> {
        self.journal.push(DeviceCall::Open(path.to_path_buf()));
        if self.failure == Some(SimFailure::Open) {
            return Err(CaptureError::Open {
                path: path.display().to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        info!("Opened simulated camera {}", path.display());
        Ok(SimulatedDevice {
            script: self.script.iter().copied().collect(),
            free_run: self.free_run,
            failure: self.failure,
            journal: self.journal.clone(),
            ..SimulatedDevice::default()
        })
    }
}

/// Simulated driver instance
#[derive(Debug)]
pub struct SimulatedDevice {
    script: VecDeque<SimEvent>,
    free_run: Option<FreeRun>,
    failure: Option<SimFailure>,
    journal: DeviceJournal,
    format: Option<StreamFormat>,
    queue: VecDeque<usize>,
    ready: Option<Dequeued>,
    failing_enqueues: usize,
    streaming: bool,
    sequence: u32,
    next_top: bool,
    last_completion: Option<Instant>,
    idle_wait: Duration,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self {
            script: VecDeque::new(),
            free_run: None,
            failure: None,
            journal: DeviceJournal::default(),
            format: None,
            queue: VecDeque::new(),
            ready: None,
            failing_enqueues: 0,
            streaming: false,
            sequence: 0,
            next_top: true,
            last_completion: None,
            idle_wait: Duration::from_millis(1),
        }
    }
}

impl SimulatedDevice {
    /// Buffers currently queued, oldest first
    pub fn queued(&self) -> Vec<usize> {
        self.queue.iter().copied().collect()
    }

    fn idle(&self, timeout: Duration) -> bool {
        std::thread::sleep(self.idle_wait.min(timeout));
        false
    }

    fn complete_oldest(&mut self, field: FieldTag) -> bool {
        let Some(index) = self.queue.pop_front() else {
            return false;
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.ready = Some(Dequeued {
            index: index as i64,
            field,
            bytes_used: self.format.map(|f| f.size_image).unwrap_or(0),
            sequence: self.sequence,
        });
        true
    }

    fn next_free_run_field(&mut self, free_run: FreeRun) -> FieldTag {
        if !free_run.alternate_fields {
            return FieldTag::None;
        }
        let field = if self.next_top {
            FieldTag::Top
        } else {
            FieldTag::Bottom
        };
        self.next_top = !self.next_top;
        field
    }
}

impl CaptureDevice for SimulatedDevice {
    fn negotiate_format(&mut self, request: &FormatRequest) -> Result<StreamFormat, CaptureError> {
        self.journal.push(DeviceCall::NegotiateFormat);
        if self.failure == Some(SimFailure::Format) {
            return Err(CaptureError::Format(format!(
                "{}x{} {} rejected",
                request.width, request.height, request.pixel_format
            )));
        }
        let format = StreamFormat::from_request(request);
        if let Some(free_run) = self.free_run.as_mut() {
            free_run.alternate_fields = format.is_interlaced();
        }
        self.format = Some(format);
        Ok(format)
    }

    fn request_buffers(&mut self, count: usize, memory: MemoryKind) -> Result<(), CaptureError> {
        self.journal.push(DeviceCall::RequestBuffers(count));
        if self.failure == Some(SimFailure::RequestBuffers) {
            return Err(CaptureError::Buffer(format!(
                "driver refused {} {:?} buffers",
                count, memory
            )));
        }
        Ok(())
    }

    fn enqueue(&mut self, buffer: &Buffer) -> Result<(), CaptureError> {
        let index = buffer.index();
        self.journal.push(DeviceCall::Enqueue(index));
        if self.failing_enqueues > 0 {
            self.failing_enqueues -= 1;
            return Err(CaptureError::Stream(format!(
                "enqueue of buffer {} failed",
                index
            )));
        }
        if self.queue.contains(&index) {
            return Err(CaptureError::Ownership {
                index,
                owner: Owner::Driver,
            });
        }
        self.queue.push_back(index);
        Ok(())
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<bool, CaptureError> {
        if !self.streaming {
            return Ok(self.idle(timeout));
        }

        while let Some(event) = self.script.pop_front() {
            match event {
                SimEvent::Timeout => return Ok(self.idle(timeout)),
                SimEvent::Spurious => {
                    self.ready = None;
                    return Ok(true);
                }
                SimEvent::Raw(dequeued) => {
                    self.ready = Some(dequeued);
                    return Ok(true);
                }
                SimEvent::FailEnqueue => {
                    self.failing_enqueues += 1;
                }
                SimEvent::Field(field) => {
                    if self.complete_oldest(field) {
                        return Ok(true);
                    }
                    // Starved: nothing queued to fill yet
                    self.script.push_front(event);
                    return Ok(self.idle(timeout));
                }
            }
        }

        let Some(free_run) = self.free_run else {
            return Ok(self.idle(timeout));
        };
        if self.queue.is_empty() {
            return Ok(self.idle(timeout));
        }
        if let Some(last) = self.last_completion {
            let due = last + free_run.interval;
            let now = Instant::now();
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    std::thread::sleep(timeout);
                    return Ok(false);
                }
                std::thread::sleep(wait);
            }
        }
        self.last_completion = Some(Instant::now());
        let field = self.next_free_run_field(free_run);
        Ok(self.complete_oldest(field))
    }

    fn dequeue(&mut self) -> Result<Option<Dequeued>, CaptureError> {
        let dequeued = self.ready.take();
        if let Some(d) = &dequeued {
            self.journal.push(DeviceCall::Dequeue(d.index));
        }
        Ok(dequeued)
    }

    fn stream_on(&mut self) -> Result<(), CaptureError> {
        self.journal.push(DeviceCall::StreamOn);
        if self.failure == Some(SimFailure::StreamOn) {
            return Err(CaptureError::Stream("stream-on refused".to_string()));
        }
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<(), CaptureError> {
        self.journal.push(DeviceCall::StreamOff);
        debug!(
            "Simulated stream off, dropping {} queued buffers",
            self.queue.len()
        );
        self.streaming = false;
        self.queue.clear();
        self.ready = None;
        Ok(())
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        self.journal.push(DeviceCall::Close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::format::PixelFormat;

    fn open(backend: &SimulatedBackend) -> (SimulatedDevice, BufferPool) {
        let mut device = backend.open(&backend.device_path(0)).unwrap();
        device
            .negotiate_format(&FormatRequest::new(64, 4, PixelFormat::Uyvy))
            .unwrap();
        let pool = BufferPool::allocate(3, 512, MemoryKind::Mapped).unwrap();
        (device, pool)
    }

    #[test]
    fn test_completes_in_queue_order() {
        let backend = SimulatedBackend::scripted([
            SimEvent::Field(FieldTag::Top),
            SimEvent::Field(FieldTag::Bottom),
        ]);
        let (mut device, pool) = open(&backend);
        device.enqueue(&pool[2]).unwrap();
        device.enqueue(&pool[0]).unwrap();
        device.stream_on().unwrap();

        assert!(device.wait_ready(Duration::from_millis(5)).unwrap());
        let first = device.dequeue().unwrap().unwrap();
        assert_eq!((first.index, first.field), (2, FieldTag::Top));
        assert_eq!(first.bytes_used, 512);

        assert!(device.wait_ready(Duration::from_millis(5)).unwrap());
        let second = device.dequeue().unwrap().unwrap();
        assert_eq!((second.index, second.field), (0, FieldTag::Bottom));
        assert_eq!(second.sequence, first.sequence + 1);

        // Script exhausted
        assert!(!device.wait_ready(Duration::from_millis(5)).unwrap());
    }

    #[test]
    fn test_rejects_double_enqueue() {
        let backend = SimulatedBackend::default();
        let (mut device, pool) = open(&backend);
        device.enqueue(&pool[1]).unwrap();
        assert!(device
            .enqueue(&pool[1])
            .unwrap_err()
            .is_protocol_violation());
    }

    #[test]
    fn test_starved_field_waits_for_buffer() {
        let backend = SimulatedBackend::scripted([SimEvent::Field(FieldTag::None)]);
        let (mut device, pool) = open(&backend);
        device.stream_on().unwrap();
        assert!(!device.wait_ready(Duration::from_millis(5)).unwrap());

        device.enqueue(&pool[0]).unwrap();
        assert!(device.wait_ready(Duration::from_millis(5)).unwrap());
        assert_eq!(device.dequeue().unwrap().unwrap().index, 0);
    }

    #[test]
    fn test_free_running_alternates_fields() {
        let backend = SimulatedBackend::free_running(Duration::from_millis(1));
        let mut device = backend.open(Path::new("sim://camera0")).unwrap();
        let mut request = FormatRequest::new(64, 4, PixelFormat::Uyvy);
        request.field = crate::format::FieldMode::Alternate;
        device.negotiate_format(&request).unwrap();
        let pool = BufferPool::allocate(2, 512, MemoryKind::Mapped).unwrap();
        device.enqueue(&pool[0]).unwrap();
        device.enqueue(&pool[1]).unwrap();
        device.stream_on().unwrap();

        let mut fields = Vec::new();
        while device.wait_ready(Duration::from_millis(50)).unwrap() {
            fields.push(device.dequeue().unwrap().unwrap().field);
        }
        assert_eq!(fields, vec![FieldTag::Top, FieldTag::Bottom]);
    }

    #[test]
    fn test_journal_and_failures() {
        let backend = SimulatedBackend::default().failing(SimFailure::StreamOn);
        let journal = backend.journal();
        let (mut device, _pool) = open(&backend);
        assert!(device.stream_on().is_err());
        device.close().unwrap();

        let calls = journal.calls();
        assert_eq!(calls[0], DeviceCall::Open(PathBuf::from("sim://camera0")));
        assert_eq!(calls.last(), Some(&DeviceCall::Close));
        assert!(journal.position(&DeviceCall::StreamOn).is_some());

        let failing = SimulatedBackend::default().failing(SimFailure::Open);
        assert!(failing.open(Path::new("sim://camera1")).is_err());
    }
}
