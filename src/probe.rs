//! Probe extraction/injection pipeline and the prober state machine
//! (C10, C11, C12).
//!
//! Grounded on `cAVS::ProbeExtractor`/`cAVS::ProbeInjector`/
//! `cAVS::linux::Prober` (`ProbeExtractor.hpp`, `ProbeInjector.hpp`,
//! `Linux/Prober.hpp`): a single demultiplexing extraction task, one
//! injection task per active injection probe, and a small state machine
//! driving `Idle -> Owned -> Allocated -> Active` on top of the control
//! endpoint and the compressed-stream lifecycle.

use crate::blocking_queue::BlockingQueue;
use crate::byte_stream::{ByteStreamReader, ByteStreamWriter};
use crate::compress_stream::{
    CompressedStream, CompressedStreamConfig, Role, StreamMode, StreamReader, WAIT_FOREVER,
};
use crate::device::ControlEndpoint;
use crate::device::{probe_extractor_control, probe_injector_control};
use crate::ids::{ProbeConfig, ProbePointId, ProbePurpose, PROBE_COUNT};
use crate::packet::Packet;
use crate::ring_buffer::RingBuffer;
use crate::{AgentError, Buffer, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Per-probe extraction queue byte budget, matching
/// `linux::Prober::mQueueSize` ("5 meg Queues, aligned with windows
/// adaptation layer").
const QUEUE_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Byte capacity of each injection probe's HTTP-fed input ring. The
/// original source does not size this constant in the headers available
/// here; reusing `QUEUE_SIZE_BYTES` keeps injection and extraction on the
/// same budget rather than inventing an unrelated figure.
const INJECTION_RING_SIZE_BYTES: usize = QUEUE_SIZE_BYTES;

const FRAGMENT_SIZE: usize = 2048;
const NB_FRAGMENTS: usize = 16;

fn stream_config() -> CompressedStreamConfig {
    CompressedStreamConfig {
        fragment_size: FRAGMENT_SIZE,
        fragments: NB_FRAGMENTS,
        codec: 0,
    }
}

// ---------------------------------------------------------------------
// C10: probe extractor
// ---------------------------------------------------------------------

/// Reads one multiplexed capture stream and demultiplexes [`Packet`]s into
/// per-probe queues by `probePointId`.
pub struct ProbeExtractor {
    input_stream: Arc<dyn CompressedStream>,
    handle: Option<JoinHandle<()>>,
}

impl ProbeExtractor {
    /// Start the extraction task. `extraction_queues` is indexed by probe
    /// id and cleared before the task begins, per spec. `probe_point_map`
    /// resolves an incoming `probePointId` to the queue it belongs to.
    pub fn new(
        extraction_queues: Arc<Vec<Arc<BlockingQueue<Buffer>>>>,
        probe_point_map: HashMap<ProbePointId, usize>,
        input_stream: Arc<dyn CompressedStream>,
    ) -> Self {
        for queue in extraction_queues.iter() {
            queue.clear();
        }
        let task_stream = input_stream.clone();
        let handle = std::thread::Builder::new()
            .name("probe-extractor".into())
            .spawn(move || extract(task_stream, extraction_queues, probe_point_map))
            .expect("failed to spawn probe extractor thread");
        Self {
            input_stream,
            handle: Some(handle),
        }
    }

    /// Stop the extraction task: closes the input stream (which unblocks
    /// its `wait()` with an I/O error), then joins it.
    pub fn stop(&mut self) {
        let _ = self.input_stream.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProbeExtractor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn extract(
    input_stream: Arc<dyn CompressedStream>,
    extraction_queues: Arc<Vec<Arc<BlockingQueue<Buffer>>>>,
    probe_point_map: HashMap<ProbePointId, usize>,
) {
    let mut reader = ByteStreamReader::new(StreamReader::new(input_stream));
    loop {
        let packet: Packet = match reader.read() {
            Ok(packet) => packet,
            Err(AgentError::DecodeEos) => {
                log::debug!("probe extractor: end of stream, exiting");
                return;
            }
            Err(e) => {
                log::error!("probe extractor: aborting extraction due to: {e}");
                return;
            }
        };

        let probe_index = match probe_point_map.get(&packet.probe_point_id) {
            Some(&index) => index,
            None => {
                log::error!(
                    "probe extractor: aborting extraction due to: {}",
                    AgentError::ProbeUnknownPoint(packet.probe_point_id)
                );
                return;
            }
        };
        if probe_index >= extraction_queues.len() {
            log::error!(
                "probe extractor: aborting extraction due to: {}",
                AgentError::ProbeWrongId(probe_index as u32)
            );
            return;
        }

        // Re-serialize with the legacy u32 checksum trailer (Packet's own
        // `ToStream` impl already truncates to u32, see `packet.rs`).
        let mut buf = Vec::new();
        if let Err(e) = ByteStreamWriter::new(&mut buf).write(&packet) {
            log::error!("probe extractor: aborting extraction due to: {e}");
            return;
        }

        if !extraction_queues[probe_index].add(buf) {
            log::warn!("extraction packet dropped");
        }
    }
}

// ---------------------------------------------------------------------
// C11: probe injector
// ---------------------------------------------------------------------

/// Copies bytes from an HTTP-fed input ring to an injection playback
/// device, padding with silence at sample granularity whenever the input
/// ring runs dry.
pub struct ProbeInjector {
    output_stream: Arc<dyn CompressedStream>,
    input_ring: Arc<RingBuffer>,
    handle: Option<JoinHandle<()>>,
}

impl ProbeInjector {
    /// Pre-fill `output_stream` (already `open()`-ed by the caller) with
    /// exactly `floor(buffer_size / sample_byte_size) * sample_byte_size`
    /// zero octets — this doubles as the device's "writes-starts-stream"
    /// first write, so `start()` is called immediately after — then spawns
    /// the injection task.
    pub fn new(
        output_stream: Arc<dyn CompressedStream>,
        input_ring: Arc<RingBuffer>,
        sample_byte_size: usize,
    ) -> Result<Self> {
        let buffer_size = output_stream.get_buffer_size()?;
        let prefill_samples = buffer_size / sample_byte_size;
        let prefill = vec![0u8; prefill_samples * sample_byte_size];
        output_stream.write(&prefill)?;
        output_stream.start()?;

        let task_stream = output_stream.clone();
        let task_ring = input_ring.clone();
        let handle = std::thread::Builder::new()
            .name("probe-injector".into())
            .spawn(move || inject(task_stream, task_ring, sample_byte_size))
            .expect("failed to spawn probe injector thread");

        Ok(Self {
            output_stream,
            input_ring,
            handle: Some(handle),
        })
    }
}

impl Drop for ProbeInjector {
    fn drop(&mut self) {
        let _ = self.output_stream.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let _ = self.output_stream.close();
        // Cleared at session stop, not start, so the input ring can be
        // provisioned ahead of the next session's start.
        self.input_ring.close();
        self.input_ring.clear();
    }
}

fn inject(output_stream: Arc<dyn CompressedStream>, input_ring: Arc<RingBuffer>, sample_byte_size: usize) {
    loop {
        match output_stream.wait(WAIT_FOREVER) {
            Ok(_) => {}
            Err(_) => {
                log::debug!("probe injector: device stopped, exiting");
                return;
            }
        }

        let available_bytes = match output_stream.get_available() {
            Ok(n) => n,
            Err(e) => {
                log::error!("probe injector: aborting injection due to: {e}");
                return;
            }
        };
        let available_samples = available_bytes / sample_byte_size;
        if available_samples == 0 {
            continue;
        }

        let input_samples = input_ring.used_size() / sample_byte_size;
        let copy_samples = input_samples.min(available_samples);
        let copy_bytes = copy_samples * sample_byte_size;

        let mut buf = vec![0u8; available_samples * sample_byte_size];
        if copy_bytes > 0 {
            let read = input_ring.read_non_blocking(&mut buf[..copy_bytes]);
            debug_assert_eq!(read, copy_bytes, "available data was just queried");
        }
        // Remainder of `buf` stays zero-filled: silence, sample-aligned.

        if let Err(e) = output_stream.write(&buf) {
            log::error!("probe injector: aborting injection due to: {e}");
            return;
        }
    }
}

// ---------------------------------------------------------------------
// Wire encoding of one probe control slot
// ---------------------------------------------------------------------

const PROBE_STATE_DISCONNECT: u8 = 0;
const PROBE_STATE_CONNECT: u8 = 1;

fn purpose_to_wire(purpose: ProbePurpose) -> u32 {
    match purpose {
        ProbePurpose::Inject => 0,
        ProbePurpose::Extract => 1,
        ProbePurpose::InjectReextract => 2,
    }
}

fn encode_probe_control(config: &ProbeConfig) -> Result<Buffer> {
    let mut buf = Vec::new();
    let mut w = ByteStreamWriter::new(&mut buf);
    w.write_u8(if config.enabled {
        PROBE_STATE_CONNECT
    } else {
        PROBE_STATE_DISCONNECT
    })?;
    w.write_u32(purpose_to_wire(config.purpose))?;
    w.write_u32(config.point_id.to_u32())?;
    Ok(buf)
}

// ---------------------------------------------------------------------
// C12: prober state machine
// ---------------------------------------------------------------------

/// State of the firmware probe service (spec.md §3, §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeServiceState {
    /// No probe resources are owned.
    Idle,
    /// Probe configuration has been pushed to the firmware.
    Owned,
    /// Compressed-stream devices are open but not yet streaming.
    Allocated,
    /// Extraction and injection tasks are running.
    Active,
}

/// Creates the compressed-stream devices the prober needs: one capture
/// device carrying every extraction probe multiplexed, one playback device
/// per active injection probe. Grounded on
/// `cAVS::Linux::CompressDeviceFactory`.
pub trait CompressedStreamFactory: Send + Sync {
    /// Build the (unopened) multiplexed extraction capture device.
    fn create_extraction_stream(&self) -> Result<Arc<dyn CompressedStream>>;

    /// Build the (unopened) playback device for injection probe `id`.
    fn create_injection_stream(&self, id: usize) -> Result<Arc<dyn CompressedStream>>;
}

/// Drives the firmware probe service through `Idle -> Owned -> Allocated ->
/// Active` on top of the control endpoint and the compressed-stream
/// lifecycle; owns the extractor and injector sets (§4.12).
pub struct Prober<'a> {
    control: &'a dyn ControlEndpoint,
    factory: &'a dyn CompressedStreamFactory,
    state: ProbeServiceState,
    configs: [ProbeConfig; PROBE_COUNT],
    /// Per-probe injection sample byte size, cached from `set_probe_config`
    /// (`linux::Prober::mCachedInjectionSampleByteSizes`) rather than
    /// re-derived from module-instance properties on every transition.
    sample_byte_sizes: HashMap<usize, usize>,
    extraction_queues: Arc<Vec<Arc<BlockingQueue<Buffer>>>>,
    injection_rings: HashMap<usize, Arc<RingBuffer>>,
    extractor: Option<ProbeExtractor>,
    injectors: Vec<ProbeInjector>,
    capture_device: Option<Arc<dyn CompressedStream>>,
    playback_devices: Vec<(usize, Arc<dyn CompressedStream>)>,
}

impl<'a> Prober<'a> {
    /// Build a prober in the `Idle` state with all [`PROBE_COUNT`] slots
    /// disabled.
    pub fn new(control: &'a dyn ControlEndpoint, factory: &'a dyn CompressedStreamFactory) -> Self {
        let extraction_queues = (0..PROBE_COUNT)
            .map(|_| Arc::new(BlockingQueue::new(QUEUE_SIZE_BYTES, |item: &Buffer| item.len())))
            .collect();
        Self {
            control,
            factory,
            state: ProbeServiceState::Idle,
            configs: [ProbeConfig::disabled(); PROBE_COUNT],
            sample_byte_sizes: HashMap::new(),
            extraction_queues: Arc::new(extraction_queues),
            injection_rings: HashMap::new(),
            extractor: None,
            injectors: Vec::new(),
            capture_device: None,
            playback_devices: Vec::new(),
        }
    }

    /// `is_active`.
    pub fn is_active(&self) -> bool {
        self.state == ProbeServiceState::Active
    }

    /// Current state, mainly for diagnostics/tests.
    pub fn state(&self) -> ProbeServiceState {
        self.state
    }

    /// `set_state`. A no-op if already in the requested terminal state. On
    /// failure mid-walk, best-effort tears back down to `Idle` and returns
    /// the original error.
    pub fn set_state(&mut self, active: bool) -> Result<()> {
        if active {
            if self.state == ProbeServiceState::Active {
                return Ok(());
            }
            if let Err(e) = self.walk_up() {
                self.teardown_to_idle();
                return Err(e);
            }
            Ok(())
        } else {
            if self.state == ProbeServiceState::Idle {
                return Ok(());
            }
            self.teardown_to_idle();
            Ok(())
        }
    }

    fn walk_up(&mut self) -> Result<()> {
        if self.state == ProbeServiceState::Idle {
            self.push_probe_config()?;
            self.state = ProbeServiceState::Owned;
        }
        if self.state == ProbeServiceState::Owned {
            self.allocate()?;
            self.state = ProbeServiceState::Allocated;
        }
        if self.state == ProbeServiceState::Allocated {
            self.activate()?;
            self.state = ProbeServiceState::Active;
        }
        Ok(())
    }

    fn teardown_to_idle(&mut self) {
        self.injectors.clear(); // Drop stops + joins + clears rings.
        if let Some(mut extractor) = self.extractor.take() {
            extractor.stop();
        }
        for queue in self.extraction_queues.iter() {
            queue.close();
            queue.clear();
        }
        for (_, device) in self.playback_devices.drain(..) {
            let _ = device.close();
        }
        if let Some(device) = self.capture_device.take() {
            let _ = device.close();
        }
        self.injection_rings.clear();
        self.state = ProbeServiceState::Idle;
    }

    fn push_probe_config(&self) -> Result<()> {
        for (index, config) in self.configs.iter().enumerate() {
            let wire = encode_probe_control(config)?;
            match config.purpose {
                ProbePurpose::Inject => {
                    self.control.ctl_write(&probe_injector_control(index), &wire)?;
                }
                ProbePurpose::Extract => {
                    self.control.ctl_write(&probe_extractor_control(index), &wire)?;
                }
                ProbePurpose::InjectReextract => {
                    self.control.ctl_write(&probe_injector_control(index), &wire)?;
                    self.control.ctl_write(&probe_extractor_control(index), &wire)?;
                }
            }
        }
        Ok(())
    }

    fn allocate(&mut self) -> Result<()> {
        let capture = self.factory.create_extraction_stream()?;
        capture.open(StreamMode::NonBlocking, Role::Capture, stream_config())?;
        self.capture_device = Some(capture);

        for (index, config) in self.configs.iter().enumerate() {
            if config.enabled && injects(config.purpose) {
                let device = self.factory.create_injection_stream(index)?;
                device.open(StreamMode::Blocking, Role::Playback, stream_config())?;
                self.playback_devices.push((index, device));
            }
        }
        Ok(())
    }

    fn activate(&mut self) -> Result<()> {
        let capture = self
            .capture_device
            .clone()
            .expect("allocate() ran before activate()");
        capture.start()?;
        for queue in self.extraction_queues.iter() {
            queue.open();
        }
        let probe_point_map = extraction_point_map(&self.configs);
        self.extractor = Some(ProbeExtractor::new(
            self.extraction_queues.clone(),
            probe_point_map,
            capture,
        ));

        for (index, device) in &self.playback_devices {
            let ring = Arc::new(RingBuffer::new(INJECTION_RING_SIZE_BYTES));
            ring.open();
            let sample_byte_size = *self.sample_byte_sizes.get(index).unwrap_or(&1);
            let injector = ProbeInjector::new(device.clone(), ring.clone(), sample_byte_size)?;
            self.injection_rings.insert(*index, ring);
            self.injectors.push(injector);
        }
        Ok(())
    }

    /// `set_probe_config`. Legal only while `Idle`/`Owned`; `id` is
    /// checked against [`PROBE_COUNT`].
    pub fn set_probe_config(&mut self, id: usize, config: ProbeConfig, sample_byte_size: usize) -> Result<()> {
        if id >= PROBE_COUNT {
            return Err(AgentError::ProbeWrongId(id as u32));
        }
        match self.state {
            ProbeServiceState::Idle | ProbeServiceState::Owned => {
                self.configs[id] = config;
                self.sample_byte_sizes.insert(id, sample_byte_size);
                Ok(())
            }
            _ => Err(AgentError::StateInvalid(
                "cannot change probe configuration while allocated or active".into(),
            )),
        }
    }

    /// `get_probe_config`. Same state restriction as `set_probe_config`.
    pub fn get_probe_config(&self, id: usize) -> Result<ProbeConfig> {
        if id >= PROBE_COUNT {
            return Err(AgentError::ProbeWrongId(id as u32));
        }
        match self.state {
            ProbeServiceState::Idle | ProbeServiceState::Owned => Ok(self.configs[id]),
            _ => Err(AgentError::StateInvalid(
                "cannot read probe configuration while allocated or active".into(),
            )),
        }
    }

    /// `dequeue_extraction_block`.
    pub fn dequeue_extraction_block(&self, probe_id: usize) -> Result<Option<Buffer>> {
        if probe_id >= PROBE_COUNT {
            return Err(AgentError::ProbeWrongId(probe_id as u32));
        }
        if self.state != ProbeServiceState::Active {
            return Err(AgentError::StateInvalid(
                "cannot dequeue extraction data unless active".into(),
            ));
        }
        Ok(self.extraction_queues[probe_id].remove())
    }

    /// `enqueue_injection_block`.
    pub fn enqueue_injection_block(&self, probe_id: usize, buffer: &[u8]) -> Result<bool> {
        if probe_id >= PROBE_COUNT {
            return Err(AgentError::ProbeWrongId(probe_id as u32));
        }
        if self.state != ProbeServiceState::Active {
            return Err(AgentError::StateInvalid(
                "cannot enqueue injection data unless active".into(),
            ));
        }
        match self.injection_rings.get(&probe_id) {
            Some(ring) => Ok(ring.write_blocking(buffer)),
            None => Ok(false),
        }
    }
}

fn injects(purpose: ProbePurpose) -> bool {
    matches!(purpose, ProbePurpose::Inject | ProbePurpose::InjectReextract)
}

fn extracts(purpose: ProbePurpose) -> bool {
    matches!(purpose, ProbePurpose::Extract | ProbePurpose::InjectReextract)
}

fn extraction_point_map(configs: &[ProbeConfig; PROBE_COUNT]) -> HashMap<ProbePointId, usize> {
    configs
        .iter()
        .enumerate()
        .filter(|(_, c)| c.enabled && extracts(c.purpose))
        .map(|(index, c)| (c.point_id, index))
        .collect()
}
