//! Raw capture bytes → sample window.

/// Sample encodings a loopback endpoint can deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleEncoding {
    Int16,
    Int32,
    Float32,
    /// Anything else; decodes to nothing.
    Unsupported,
}

impl SampleEncoding {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Unsupported => 0,
        }
    }
}

/// Shape of the captured stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
}

impl StreamFormat {
    /// Bytes of one interleaved frame (one sample per channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels.max(1) as usize
    }

    /// One millisecond of samples; the size of the analysis window.
    pub fn window_len(&self) -> usize {
        (self.sample_rate / 1000).max(1) as usize
    }
}

/// Decode the first channel of each interleaved frame in `bytes` into the
/// front of `window`, never past its end. Returns how many samples were
/// written; the rest of the window keeps its previous contents.
pub fn decode_into(window: &mut [f64], bytes: &[u8], format: &StreamFormat) -> usize {
    let frame_len = format.bytes_per_frame();
    if frame_len == 0 {
        return 0;
    }

    let count = (bytes.len() / frame_len).min(window.len());
    for (i, slot) in window.iter_mut().take(count).enumerate() {
        let at = i * frame_len;
        *slot = match format.encoding {
            SampleEncoding::Int16 => i16::from_le_bytes([bytes[at], bytes[at + 1]]) as f64,
            SampleEncoding::Int32 => {
                i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as f64
            }
            SampleEncoding::Float32 => {
                f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as f64
            }
            SampleEncoding::Unsupported => 0.0,
        };
    }
    count
}
