//! Payload validation per data kind
//!
//! Image and audio payloads travel with the generic typed-buffer encoding;
//! the formats here only check that a value fits the channel it is sent on.

use crate::error::ChannelError;
use codec::{DType, TypedBuffer, Value};
use config::ChannelOptions;
use parking_lot::Mutex;
use tracing::debug;

/// Checks values against a channel's configured shape
pub trait PayloadFormat: Send + Sync + 'static {
    fn data_kind(&self) -> &'static str;

    /// Reject a value that does not fit the channel, before anything is sent
    fn validate(&self, channel: &str, value: &Value) -> Result<(), ChannelError>;
}

/// Any codec value
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFormat;

impl PayloadFormat for NativeFormat {
    fn data_kind(&self) -> &'static str {
        crate::descriptor::kinds::NATIVE_OBJECT
    }

    fn validate(&self, _channel: &str, _value: &Value) -> Result<(), ChannelError> {
        Ok(())
    }
}

fn describe(dtype: DType, shape: &[usize]) -> String {
    format!("{} {:?}", dtype, shape)
}

fn describe_dim(dim: Option<u32>) -> String {
    dim.map_or_else(|| "*".to_string(), |d| d.to_string())
}

fn dim_matches(expected: Option<u32>, actual: usize) -> bool {
    expected.map_or(true, |expected| expected as usize == actual)
}

/// Image frames: `[height, width, 3]` when `rgb`, `[height, width]` otherwise
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFormat {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub rgb: bool,
    pub fp: bool,
}

impl ImageFormat {
    pub fn from_options(options: &ChannelOptions) -> Self {
        Self {
            width: options.width,
            height: options.height,
            rgb: options.rgb,
            fp: options.fp,
        }
    }

    pub fn dtype(&self) -> DType {
        if self.fp {
            DType::Float32
        } else {
            DType::UInt8
        }
    }

    fn expected(&self) -> String {
        let mut dims = vec![describe_dim(self.height), describe_dim(self.width)];
        if self.rgb {
            dims.push("3".to_string());
        }
        format!("{} image [{}]", self.dtype(), dims.join(", "))
    }

    /// Zeroed frame matching this format, when both dimensions are fixed
    pub fn blank_frame(&self) -> Option<TypedBuffer> {
        let (width, height) = (self.width?, self.height?);
        let mut shape = vec![height as usize, width as usize];
        if self.rgb {
            shape.push(3);
        }
        TypedBuffer::zeros(self.dtype(), shape).ok()
    }
}

impl PayloadFormat for ImageFormat {
    fn data_kind(&self) -> &'static str {
        crate::descriptor::kinds::IMAGE
    }

    fn validate(&self, channel: &str, value: &Value) -> Result<(), ChannelError> {
        let frame = value.as_buffer().ok_or_else(|| {
            ChannelError::shape_mismatch(channel, self.expected(), value.kind())
        })?;
        let shape = frame.shape();
        let rank_ok = if self.rgb {
            shape.len() == 3 && shape[2] == 3
        } else {
            shape.len() == 2
        };
        let fits = frame.dtype() == self.dtype()
            && rank_ok
            && dim_matches(self.height, shape[0])
            && dim_matches(self.width, shape[1]);
        if !fits {
            return Err(ChannelError::shape_mismatch(
                channel,
                self.expected(),
                describe(frame.dtype(), shape),
            ));
        }
        Ok(())
    }
}

/// One chunk of float32 audio plus its sample rate
///
/// Encoded as the two-element list `[samples, rate]`, with `samples` shaped
/// `[chunk, channels]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: TypedBuffer,
    pub rate: u32,
}

impl AudioChunk {
    pub fn new(samples: TypedBuffer, rate: u32) -> Self {
        Self { samples, rate }
    }

    /// Interleaved samples, `channels` per frame
    pub fn from_interleaved(samples: &[f32], channels: usize, rate: u32) -> Result<Self, ChannelError> {
        if channels == 0 || samples.len() % channels != 0 {
            return Err(ChannelError::shape_mismatch(
                "audio",
                format!("a multiple of {} samples", channels),
                format!("{} samples", samples.len()),
            ));
        }
        let buffer = TypedBuffer::from_slice(vec![samples.len() / channels, channels], samples)?;
        Ok(Self::new(buffer, rate))
    }

    pub fn chunk(&self) -> usize {
        self.samples.shape().first().copied().unwrap_or(0)
    }

    pub fn channels(&self) -> usize {
        self.samples.shape().get(1).copied().unwrap_or(1)
    }

    pub fn into_value(self) -> Value {
        Value::List(vec![Value::Buffer(self.samples), Value::Int(self.rate as i64)])
    }

    /// Parse the `[samples, rate]` list form
    pub fn from_value(value: &Value) -> Option<Self> {
        match value.as_list()? {
            [Value::Buffer(samples), Value::Int(rate)] if *rate >= 0 => Some(Self {
                samples: samples.clone(),
                rate: u32::try_from(*rate).ok()?,
            }),
            _ => None,
        }
    }
}

impl From<AudioChunk> for Value {
    fn from(chunk: AudioChunk) -> Self {
        chunk.into_value()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AudioLayout {
    chunk: Option<u32>,
    channels: Option<u32>,
}

/// Audio chunks; unset `chunk`/`channels` adopt the first chunk seen
#[derive(Debug)]
pub struct AudioFormat {
    rate: Option<u32>,
    layout: Mutex<AudioLayout>,
}

impl AudioFormat {
    pub fn from_options(options: &ChannelOptions) -> Self {
        Self {
            rate: options.rate,
            layout: Mutex::new(AudioLayout {
                chunk: options.chunk,
                channels: options.channels,
            }),
        }
    }

    /// Current `(chunk, channels)` expectation
    pub fn layout(&self) -> (Option<u32>, Option<u32>) {
        let layout = self.layout.lock();
        (layout.chunk, layout.channels)
    }

    fn expected(&self, layout: &AudioLayout) -> String {
        format!(
            "float32 audio [{}, {}] at {} Hz",
            describe_dim(layout.chunk),
            describe_dim(layout.channels),
            describe_dim(self.rate)
        )
    }
}

impl PayloadFormat for AudioFormat {
    fn data_kind(&self) -> &'static str {
        crate::descriptor::kinds::AUDIO_CHUNK
    }

    fn validate(&self, channel: &str, value: &Value) -> Result<(), ChannelError> {
        let mut layout = self.layout.lock();
        let Some(audio) = AudioChunk::from_value(value) else {
            return Err(ChannelError::shape_mismatch(
                channel,
                self.expected(&layout),
                value.kind(),
            ));
        };

        let actual = || {
            format!(
                "{} at {} Hz",
                describe(audio.samples.dtype(), audio.samples.shape()),
                audio.rate
            )
        };
        let fits = audio.samples.dtype() == DType::Float32
            && audio.samples.ndim() == 2
            && dim_matches(self.rate, audio.rate as usize)
            && dim_matches(layout.chunk, audio.chunk())
            && dim_matches(layout.channels, audio.channels());
        if !fits {
            return Err(ChannelError::shape_mismatch(
                channel,
                self.expected(&layout),
                actual(),
            ));
        }

        if layout.chunk.is_none() || layout.channels.is_none() {
            let chunk = u32::try_from(audio.chunk()).ok();
            let channels = u32::try_from(audio.channels()).ok();
            layout.chunk = layout.chunk.or(chunk);
            layout.channels = layout.channels.or(channels);
            debug!(
                "Audio channel '{}' adopted chunk {:?}, channels {:?}",
                channel, layout.chunk, layout.channels
            );
        }
        Ok(())
    }
}
