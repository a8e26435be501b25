//! 音频输出
//!
//! 使用 cpal 进行音频播放。`cpal::Stream` 不能跨线程移动，
//! 因此 [`AudioOutput`] 只在设备线程上创建和使用。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};

/// 音频输出错误
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    #[error("No output device available")]
    NoDevice,
    #[error("No supported config")]
    NoConfig,
    #[error("Stream error: {0}")]
    Stream(String),
}

/// 音频输出配置
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// 环形缓冲区容量（采样数）
    pub buffer_size: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            buffer_size: 8192,
        }
    }
}

/// 音频输出流
pub struct AudioOutput {
    _stream: Stream,
    ring: Arc<RingBuffer>,
    is_playing: Arc<AtomicBool>,
    position_frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl AudioOutput {
    /// 在默认设备上创建音频输出
    pub fn new(config: OutputConfig) -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(OutputError::NoDevice)?;

        Self::with_device(&device, config)
    }

    /// 使用指定设备创建音频输出
    pub fn with_device(device: &Device, config: OutputConfig) -> Result<Self, OutputError> {
        let supported_config = device
            .supported_output_configs()
            .map_err(|e| OutputError::Stream(e.to_string()))?
            .find(|c| {
                c.channels() == config.channels
                    && c.min_sample_rate().0 <= config.sample_rate
                    && c.max_sample_rate().0 >= config.sample_rate
                    && c.sample_format() == SampleFormat::F32
            })
            .ok_or(OutputError::NoConfig)?;

        let stream_config: StreamConfig = supported_config
            .with_sample_rate(cpal::SampleRate(config.sample_rate))
            .into();

        let ring = Arc::new(RingBuffer::new(config.buffer_size));
        let is_playing = Arc::new(AtomicBool::new(false));
        let position_frames = Arc::new(AtomicU64::new(0));

        let ring_cb = Arc::clone(&ring);
        let playing_cb = Arc::clone(&is_playing);
        let position_cb = Arc::clone(&position_frames);
        let channels = usize::from(config.channels.max(1));

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let read = if playing_cb.load(Ordering::Relaxed) {
                        ring_cb.read(data)
                    } else {
                        0
                    };
                    // 未填充部分输出静音
                    for sample in &mut data[read..] {
                        *sample = 0.0;
                    }
                    position_cb.fetch_add((read / channels) as u64, Ordering::Relaxed);
                },
                |err| {
                    log::error!("Audio output error: {}", err);
                },
                None,
            )
            .map_err(|e| OutputError::Stream(e.to_string()))?;

        stream.play().map_err(|e| OutputError::Stream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            ring,
            is_playing,
            position_frames,
            sample_rate: config.sample_rate,
        })
    }

    /// 写入采样，返回实际写入的数量（缓冲区满时少于输入）
    pub fn write(&self, samples: &[f32]) -> usize {
        self.ring.write(samples)
    }

    /// 缓冲区中尚未播放的采样数
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// 丢弃未播放的采样（seek 时使用）
    pub fn clear(&self) {
        self.ring.clear();
    }

    pub fn set_playing(&self, playing: bool) {
        self.is_playing.store(playing, Ordering::Relaxed);
    }

    /// 自上次重置以来已播放的毫秒数
    pub fn played_ms(&self) -> u64 {
        let frames = self.position_frames.load(Ordering::Relaxed);
        frames * 1000 / u64::from(self.sample_rate.max(1))
    }

    pub fn reset_position(&self) {
        self.position_frames.store(0, Ordering::Relaxed);
    }
}

/// 有界环形缓冲区，满时拒绝写入
struct RingBuffer {
    buffer: Mutex<VecDeque<f32>>,
    capacity: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn write(&self, data: &[f32]) -> usize {
        let mut buf = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let free = self.capacity.saturating_sub(buf.len());
        let count = free.min(data.len());
        buf.extend(data[..count].iter().copied());
        count
    }

    fn read(&self, output: &mut [f32]) -> usize {
        let mut buf = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let to_read = output.len().min(buf.len());
        for (dst, src) in output.iter_mut().zip(buf.drain(..to_read)) {
            *dst = src;
        }
        to_read
    }

    fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn clear(&self) {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_rejects_overflow() {
        let ring = RingBuffer::new(4);
        assert_eq!(ring.write(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(ring.write(&[4.0, 5.0]), 1);
        assert_eq!(ring.len(), 4);

        let mut out = [0.0; 3];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_ring_buffer_clear() {
        let ring = RingBuffer::new(8);
        ring.write(&[0.5; 6]);
        ring.clear();

        let mut out = [9.0; 2];
        assert_eq!(ring.read(&mut out), 0);
        assert_eq!(out, [9.0, 9.0]);
    }
}
