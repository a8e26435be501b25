//! 音频解码器
//!
//! 使用 symphonia 解码 [`MediaSource`]

use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::MediaSource;

/// 解码器错误
#[derive(thiserror::Error, Debug)]
pub enum DecoderError {
    #[error("No supported audio track found")]
    NoTrack,
    #[error("Unsupported codec")]
    UnsupportedCodec,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SymphoniaError> for DecoderError {
    fn from(e: SymphoniaError) -> Self {
        DecoderError::Decode(e.to_string())
    }
}

/// 音频信息
#[derive(Debug, Clone)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: Duration,
    pub codec: String,
}

impl AudioInfo {
    pub fn duration_ms(&self) -> u32 {
        u32::try_from(self.duration.as_millis()).unwrap_or(u32::MAX)
    }
}

/// 音频解码器
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<f32>>,
    pub info: AudioInfo,
}

impl AudioDecoder {
    /// 打开音源并探测格式
    pub fn open(source: &MediaSource) -> Result<Self, DecoderError> {
        let mss = MediaSourceStream::new(source.open()?, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = source.extension_hint() {
            hint.with_extension(&ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions {
                enable_gapless: true,
                ..Default::default()
            },
            &MetadataOptions::default(),
        )?;

        let format = probed.format;

        // 取第一个可解码的音轨
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoTrack)?;

        let track_id = track.id;
        let params = &track.codec_params;

        let sample_rate = params.sample_rate.unwrap_or(44100);
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let duration = params
            .n_frames
            .map(|frames| Duration::from_secs_f64(frames as f64 / sample_rate as f64))
            .unwrap_or(Duration::ZERO);

        let info = AudioInfo {
            sample_rate,
            channels,
            duration,
            codec: format!("{:?}", params.codec),
        };

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|_| DecoderError::UnsupportedCodec)?;

        log::debug!(
            "Opened {} ({} Hz, {} ch, {:?})",
            source,
            info.sample_rate,
            info.channels,
            info.duration
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_buf: None,
            info,
        })
    }

    /// 解码下一包，返回交织的 f32 采样；`None` 表示已到结尾
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // 单个坏包直接跳过
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity();

            let sample_buf = match &mut self.sample_buf {
                Some(buf) if buf.capacity() >= capacity => buf,
                slot => slot.insert(SampleBuffer::new(capacity as u64, spec)),
            };
            sample_buf.copy_interleaved_ref(decoded);

            return Ok(Some(sample_buf.samples().to_vec()));
        }
    }

    /// 跳转到指定毫秒
    pub fn seek(&mut self, position_ms: u32) -> Result<(), DecoderError> {
        let seek_to = SeekTo::Time {
            time: Time::from(Duration::from_millis(u64::from(position_ms)).as_secs_f64()),
            track_id: Some(self.track_id),
        };

        self.format.seek(SeekMode::Accurate, seek_to)?;
        self.decoder.reset();
        Ok(())
    }
}
