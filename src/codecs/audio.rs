//! Audio leaves: PCM frames stored with the tensor layout, decoded lazily.
//!
//! The first axis is time; any remaining axes (channels) are carried along
//! when a time range is cut out of the clip.

use super::LeafCodec;
use super::numeric::{decode_tensor, encode_tensor, wrong_feature};
use crate::error::{ShardError, ShardResult};
use crate::features::Feature;
use crate::types::Tensor;
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct AudioCodec;

impl LeafCodec for AudioCodec {
    fn encode(&self, feature: &Feature, value: &Value) -> ShardResult<Vec<u8>> {
        let Feature::Audio { shape, dtype, .. } = feature else {
            return Err(wrong_feature("audio", feature));
        };
        encode_tensor(shape, *dtype, value)
    }

    fn decode(&self, feature: &Feature, data: &[u8]) -> ShardResult<Value> {
        let Feature::Audio { shape, dtype, .. } = feature else {
            return Err(wrong_feature("audio", feature));
        };
        decode_tensor(shape, *dtype, data).map(Value::Tensor)
    }

    fn decodes_lazily(&self) -> bool {
        true
    }
}

/// Frames of `clip` falling in `[start_secs, end_secs)`.
///
/// Bounds past the end of the clip are clamped.
pub fn frames_between(
    clip: &Tensor,
    sample_rate: u32,
    start_secs: f64,
    end_secs: f64,
) -> ShardResult<Tensor> {
    if start_secs.is_nan() || start_secs < 0.0 {
        return Err(ShardError::Codec(format!(
            "start must be >= 0, got {start_secs}"
        )));
    }
    if end_secs.is_nan() || end_secs < start_secs {
        return Err(ShardError::Codec(format!(
            "end must be >= start, got {end_secs} < {start_secs}"
        )));
    }
    let Some((&frames, rest)) = clip.shape().split_first() else {
        return Err(ShardError::Codec("audio clip has no time axis".into()));
    };

    let rate = f64::from(sample_rate);
    let first = ((start_secs * rate).floor() as usize).min(frames);
    let last = ((end_secs * rate).floor() as usize).clamp(first, frames);

    let per_frame: usize = rest.iter().product();
    let data = clip.data().slice(first * per_frame..last * per_frame);
    let mut shape = Vec::with_capacity(clip.shape().len());
    shape.push(last - first);
    shape.extend_from_slice(rest);
    Tensor::new(shape, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Tensor {
        Tensor::vector((0..len).map(|i| i as f32).collect::<Vec<_>>())
    }

    #[test]
    fn audio_payload_roundtrips() {
        let feature = Feature::audio(Some(16_000));
        let clip = ramp(32);
        let bytes = AudioCodec.encode(&feature, &Value::from(clip.clone())).unwrap();
        assert_eq!(AudioCodec.decode(&feature, &bytes).unwrap(), Value::Tensor(clip));
        assert!(AudioCodec.decodes_lazily());
    }

    #[test]
    fn audio_rejects_wrong_dtype() {
        let feature = Feature::audio(None);
        let clip = Tensor::vector(vec![1i16, 2, 3]);
        assert!(AudioCodec.encode(&feature, &Value::from(clip)).is_err());
    }

    #[test]
    fn frames_between_cuts_whole_frames() {
        let clip = ramp(10);
        let cut = frames_between(&clip, 4, 0.5, 1.5).unwrap();
        assert_eq!(cut.shape(), &[4]);
        assert_eq!(cut, Tensor::vector(vec![2.0f32, 3.0, 4.0, 5.0]));
    }

    #[test]
    fn frames_between_clamps_and_keeps_channels() {
        let clip = Tensor::new(vec![3, 2], vec![0.0f32, 0.5, 1.0, 1.5, 2.0, 2.5]).unwrap();
        let cut = frames_between(&clip, 1, 1.0, 100.0).unwrap();
        assert_eq!(cut.shape(), &[2, 2]);
        assert_eq!(cut.data().len(), 4);

        let empty = frames_between(&clip, 1, 5.0, 6.0).unwrap();
        assert_eq!(empty.shape(), &[0, 2]);
    }

    #[test]
    fn frames_between_validates_bounds() {
        let clip = ramp(4);
        assert!(frames_between(&clip, 1, -1.0, 2.0).is_err());
        assert!(frames_between(&clip, 1, 2.0, 1.0).is_err());
    }
}
