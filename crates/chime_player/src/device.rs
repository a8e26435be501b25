//! 设备引擎
//!
//! symphonia 解码 + cpal 输出。解码器和输出流都活在专用的设备线程上，
//! [`DeviceEngine`] 通过命令通道驱动它，位置和播放标志用原子量共享。

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::{
    AudioDecoder, AudioEngine, AudioOutput, CompletionCallback, EngineError, EngineFactory,
    MediaSource, OutputConfig,
};

/// 设备线程命令
#[derive(Debug, Clone, Copy)]
enum DeviceCommand {
    Play,
    Pause,
    Seek(u32),
    Shutdown,
}

#[derive(Default)]
struct DeviceShared {
    playing: AtomicBool,
    position_ms: AtomicU32,
    on_completion: Mutex<Option<CompletionCallback>>,
}

struct DeviceThread {
    cmd_tx: Sender<DeviceCommand>,
    handle: JoinHandle<()>,
    duration_ms: u32,
}

/// 基于声卡的音频引擎
pub struct DeviceEngine {
    buffer_size: usize,
    source: Option<MediaSource>,
    device: Option<DeviceThread>,
    shared: Arc<DeviceShared>,
    released: bool,
}

impl DeviceEngine {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            source: None,
            device: None,
            shared: Arc::new(DeviceShared::default()),
            released: false,
        }
    }

    /// 供控制器使用的工厂
    pub fn factory(buffer_size: usize) -> EngineFactory {
        Box::new(move || Ok(Box::new(DeviceEngine::new(buffer_size)) as Box<dyn AudioEngine>))
    }

    fn ensure_alive(&self) -> Result<(), EngineError> {
        if self.released {
            Err(EngineError::Released)
        } else {
            Ok(())
        }
    }

    fn send(&self, cmd: DeviceCommand) -> Result<(), EngineError> {
        self.ensure_alive()?;
        let device = self.device.as_ref().ok_or(EngineError::NotPrepared)?;
        device
            .cmd_tx
            .send(cmd)
            .map_err(|_| EngineError::Other("device thread is gone".to_string()))
    }

    fn shutdown_device(&mut self) {
        if let Some(device) = self.device.take() {
            let _ = device.cmd_tx.send(DeviceCommand::Shutdown);
            if device.handle.join().is_err() {
                log::error!("Device thread panicked");
            }
        }
        self.shared.playing.store(false, Ordering::Release);
        self.shared.position_ms.store(0, Ordering::Release);
    }
}

impl AudioEngine for DeviceEngine {
    fn set_source(&mut self, source: &MediaSource) -> Result<(), EngineError> {
        self.ensure_alive()?;
        if self.device.is_some() {
            return Err(EngineError::Other(
                "source already prepared, reset first".to_string(),
            ));
        }
        self.source = Some(source.clone());
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        if self.device.is_some() {
            return Ok(());
        }
        let source = self.source.clone().ok_or(EngineError::NoSource)?;

        let (cmd_tx, cmd_rx) = bounded(32);
        let (ready_tx, ready_rx) = bounded(1);
        let shared = Arc::clone(&self.shared);
        let buffer_size = self.buffer_size;

        let handle = thread::Builder::new()
            .name("chime-device".to_string())
            .spawn(move || run_device(source, buffer_size, cmd_rx, shared, ready_tx))?;

        // prepare 是同步的：等设备线程打开解码器和输出流
        match ready_rx.recv() {
            Ok(Ok(duration_ms)) => {
                self.device = Some(DeviceThread {
                    cmd_tx,
                    handle,
                    duration_ms,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(EngineError::Other(
                    "device thread exited during prepare".to_string(),
                ))
            }
        }
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.send(DeviceCommand::Play)?;
        self.shared.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.send(DeviceCommand::Pause)?;
        self.shared.playing.store(false, Ordering::Release);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.shutdown_device();
        self.source = None;
        Ok(())
    }

    fn seek_to(&mut self, position_ms: u32) -> Result<(), EngineError> {
        self.send(DeviceCommand::Seek(position_ms))?;
        self.shared
            .position_ms
            .store(position_ms.min(self.duration()), Ordering::Release);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    fn current_position(&self) -> u32 {
        self.shared.position_ms.load(Ordering::Acquire)
    }

    fn duration(&self) -> u32 {
        self.device.as_ref().map_or(0, |d| d.duration_ms)
    }

    fn set_on_completion(&mut self, callback: CompletionCallback) {
        let mut slot = self
            .shared
            .on_completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(callback);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.shutdown_device();
        self.source = None;
        self.released = true;
        let mut slot = self
            .shared
            .on_completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }
}

impl Drop for DeviceEngine {
    fn drop(&mut self) {
        self.shutdown_device();
    }
}

fn run_device(
    source: MediaSource,
    buffer_size: usize,
    cmd_rx: Receiver<DeviceCommand>,
    shared: Arc<DeviceShared>,
    ready_tx: Sender<Result<u32, EngineError>>,
) {
    let decoder = match AudioDecoder::open(&source) {
        Ok(d) => d,
        Err(e) => {
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };

    let output_config = OutputConfig {
        sample_rate: decoder.info.sample_rate,
        channels: decoder.info.channels,
        buffer_size,
    };
    let output = match AudioOutput::new(output_config) {
        Ok(o) => o,
        Err(e) => {
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };

    let duration_ms = decoder.info.duration_ms();
    let _ = ready_tx.send(Ok(duration_ms));

    let mut player = DevicePlayer {
        decoder,
        output,
        shared,
        pending: Vec::new(),
        base_ms: 0,
        duration_ms,
        playing: false,
        eof: false,
    };

    loop {
        // 空闲时阻塞等命令，播放时轮询
        let cmd = if player.playing {
            match cmd_rx.try_recv() {
                Ok(cmd) => Some(cmd),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match cmd_rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            }
        };

        if let Some(cmd) = cmd {
            if !player.handle(cmd) {
                break;
            }
            continue;
        }

        player.pump();
        thread::sleep(Duration::from_millis(5));
    }

    player.output.set_playing(false);
    log::debug!("Device thread for {} exiting", source);
}

struct DevicePlayer {
    decoder: AudioDecoder,
    output: AudioOutput,
    shared: Arc<DeviceShared>,
    /// 已解码但还没写进输出缓冲区的采样
    pending: Vec<f32>,
    base_ms: u32,
    duration_ms: u32,
    playing: bool,
    eof: bool,
}

impl DevicePlayer {
    fn handle(&mut self, cmd: DeviceCommand) -> bool {
        match cmd {
            DeviceCommand::Play => {
                self.playing = true;
                self.output.set_playing(true);
            }
            DeviceCommand::Pause => {
                self.playing = false;
                self.output.set_playing(false);
            }
            DeviceCommand::Seek(position_ms) => self.seek(position_ms),
            DeviceCommand::Shutdown => return false,
        }
        true
    }

    fn seek(&mut self, position_ms: u32) {
        if let Err(e) = self.decoder.seek(position_ms) {
            log::warn!("Seek to {} ms failed: {}", position_ms, e);
            return;
        }
        self.output.clear();
        self.output.reset_position();
        self.pending.clear();
        self.base_ms = position_ms;
        self.eof = false;
        self.store_position();
    }

    /// 解码直到输出缓冲区写满
    fn pump(&mut self) {
        while !self.eof {
            if self.pending.is_empty() {
                match self.decoder.decode_next() {
                    Ok(Some(samples)) => self.pending = samples,
                    Ok(None) => self.eof = true,
                    Err(e) => {
                        log::error!("Decode error: {}", e);
                        self.eof = true;
                    }
                }
                continue;
            }

            let written = self.output.write(&self.pending);
            self.pending.drain(..written);
            if !self.pending.is_empty() {
                break;
            }
        }

        self.store_position();

        if self.eof && self.output.buffered() == 0 {
            self.finish();
        }
    }

    fn store_position(&self) {
        let played = u32::try_from(self.output.played_ms()).unwrap_or(u32::MAX);
        let mut position = self.base_ms.saturating_add(played);
        if self.duration_ms > 0 {
            position = position.min(self.duration_ms);
        }
        self.shared.position_ms.store(position, Ordering::Release);
    }

    fn finish(&mut self) {
        self.playing = false;
        self.output.set_playing(false);
        self.shared.playing.store(false, Ordering::Release);
        self.shared.position_ms.store(self.duration_ms, Ordering::Release);

        let callback = self
            .shared
            .on_completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback();
        }
    }
}
