//! In-memory fakes for the transcoder and the voice platform.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;

use super::{
    transcode::{AudioOutput, TranscodeOptions, TranscodeProcess, Transcoder},
    voice::{AudioSink, FinishSignal, SinkOptions, VoiceConnection, VoiceGateway},
};
use crate::error::{PlayerError, PlayerResult};

/// Lo que le pasó a los procesos falsos, en orden.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessEvent {
    Spawned,
    Reaped,
}

#[derive(Default)]
struct ProcessCounters {
    live: AtomicUsize,
    peak: AtomicUsize,
    terminated: AtomicUsize,
    log: Mutex<Vec<ProcessEvent>>,
}

impl ProcessCounters {
    fn reaped(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().push(ProcessEvent::Reaped);
    }
}

pub struct FakeTranscoder {
    duration: Option<f64>,
    fail_spawn: AtomicBool,
    reap_delay: Option<Duration>,
    counters: Arc<ProcessCounters>,
    spawned: Mutex<Vec<(PathBuf, f64)>>,
}

impl FakeTranscoder {
    pub fn new(duration: Option<f64>) -> Self {
        Self {
            duration,
            fail_spawn: AtomicBool::new(false),
            reap_delay: None,
            counters: Arc::new(ProcessCounters::default()),
            spawned: Mutex::new(Vec::new()),
        }
    }

    /// Los procesos tardan `delay` en salir después de terminate(), como
    /// un ffmpeg real que se recoge en segundo plano.
    pub fn with_reap_delay(mut self, delay: Duration) -> Self {
        self.reap_delay = Some(delay);
        self
    }

    pub fn process_log(&self) -> Vec<ProcessEvent> {
        self.counters.log.lock().clone()
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Máximo de procesos vivos a la vez.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.counters.terminated.load(Ordering::SeqCst)
    }

    /// Offsets de seek de cada spawn, en orden.
    pub fn seeks(&self) -> Vec<f64> {
        self.spawned.lock().iter().map(|(_, seek)| *seek).collect()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe_duration(&self, _path: &Path) -> Option<f64> {
        self.duration
    }

    fn spawn(&self, path: &Path, options: &TranscodeOptions) -> PlayerResult<Box<dyn TranscodeProcess>> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(PlayerError::unavailable("could not start fake transcoder"));
        }
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(live, Ordering::SeqCst);
        self.counters.log.lock().push(ProcessEvent::Spawned);
        self.spawned
            .lock()
            .push((path.to_path_buf(), options.seek_seconds));

        Ok(Box::new(FakeProcess {
            counters: self.counters.clone(),
            reap_delay: self.reap_delay,
            output: Some(Box::new(std::io::empty())),
        }))
    }
}

struct FakeProcess {
    counters: Arc<ProcessCounters>,
    reap_delay: Option<Duration>,
    output: Option<AudioOutput>,
}

impl TranscodeProcess for FakeProcess {
    fn take_output(&mut self) -> Option<AudioOutput> {
        self.output.take()
    }

    fn terminate(self: Box<Self>) -> Option<JoinHandle<()>> {
        let FakeProcess { counters, reap_delay, .. } = *self;
        counters.terminated.fetch_add(1, Ordering::SeqCst);
        match reap_delay {
            Some(delay) => Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                counters.reaped();
            })),
            None => {
                counters.reaped();
                None
            }
        }
    }
}

pub struct FakeSinkState {
    pub volume: Mutex<f32>,
    pub stopped: AtomicBool,
    finish: Mutex<Option<FinishSignal>>,
}

impl FakeSinkState {
    /// El stream se acabó, como cuando una pista llega al final.
    pub fn finish(&self) {
        if let Some(signal) = self.finish.lock().take() {
            signal.fire();
        }
    }
}

struct FakeSink(Arc<FakeSinkState>);

impl AudioSink for FakeSink {
    fn set_volume(&self, gain: f32) {
        *self.0.volume.lock() = gain;
    }

    fn stop(&self) {
        // songbird también emite End cuando se detiene una pista
        self.0.stopped.store(true, Ordering::SeqCst);
        self.0.finish();
    }
}

#[derive(Default)]
struct GatewayShared {
    sinks: Mutex<Vec<Arc<FakeSinkState>>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    ready_delay: Duration,
    disconnect_delay: Duration,
}

#[derive(Default)]
pub struct FakeGateway {
    shared: Arc<GatewayShared>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conexiones que tardan `ready` en quedar listas y `disconnect` en cerrarse.
    pub fn with_delays(ready: Duration, disconnect: Duration) -> Self {
        Self {
            shared: Arc::new(GatewayShared {
                ready_delay: ready,
                disconnect_delay: disconnect,
                ..GatewayShared::default()
            }),
        }
    }

    pub fn sinks(&self) -> Vec<Arc<FakeSinkState>> {
        self.shared.sinks.lock().clone()
    }

    pub fn latest_sink(&self) -> Option<Arc<FakeSinkState>> {
        self.shared.sinks.lock().last().cloned()
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn resolve_channel(&self, _guild_id: &str, channel: &str) -> PlayerResult<String> {
        if channel == "missing" {
            return Err(PlayerError::not_found(format!("voice channel {}", channel)));
        }
        Ok(channel.to_string())
    }

    async fn connect(&self, _guild_id: &str, channel_id: &str) -> PlayerResult<Arc<dyn VoiceConnection>> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeConnection {
            channel_id: channel_id.to_string(),
            shared: self.shared.clone(),
        }))
    }
}

async fn pause_for(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

struct FakeConnection {
    channel_id: String,
    shared: Arc<GatewayShared>,
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn ready(&self) -> PlayerResult<()> {
        pause_for(self.shared.ready_delay).await;
        Ok(())
    }

    async fn play(&self, _output: AudioOutput, options: SinkOptions) -> PlayerResult<Box<dyn AudioSink>> {
        let state = Arc::new(FakeSinkState {
            volume: Mutex::new(options.volume),
            stopped: AtomicBool::new(false),
            finish: Mutex::new(Some(options.on_finish)),
        });
        self.shared.sinks.lock().push(state.clone());
        Ok(Box::new(FakeSink(state)))
    }

    async fn disconnect(&self) -> PlayerResult<()> {
        pause_for(self.shared.disconnect_delay).await;
        self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
