//! PCM16 codec integration tests
//!
//! Exercises the encode/decode pair end to end without audio hardware.

use chime::codec::{self, AUDIO_INPUT_MIME, PLAYBACK_SAMPLE_RATE, WireChunk};

#[test]
fn encode_then_decode_recovers_samples() {
    let samples = vec![0.0, 0.25, -0.25, 0.99, -0.99, 0.001, -0.001];

    let chunk = codec::encode_pcm16(&samples);
    assert_eq!(chunk.mime_type, AUDIO_INPUT_MIME);

    let frame = codec::decode(&chunk, PLAYBACK_SAMPLE_RATE).unwrap();
    assert_eq!(frame.len(), samples.len());
    assert_eq!(frame.sample_rate, PLAYBACK_SAMPLE_RATE);

    // Quantization error is bounded by one PCM16 step
    for (original, recovered) in samples.iter().zip(&frame.samples) {
        assert!(
            (original - recovered).abs() <= 1.0 / 32768.0,
            "sample {original} decoded as {recovered}"
        );
    }
}

#[test]
fn out_of_range_samples_clamp_instead_of_wrapping() {
    let chunk = codec::encode_pcm16(&[1.5, -1.5]);
    let frame = codec::decode(&chunk, PLAYBACK_SAMPLE_RATE).unwrap();

    // Clamped values stay at the rails, never wrap to the other sign
    assert!(frame.samples[0] > 0.99);
    assert!(frame.samples[1] < -0.99);
}

#[test]
fn empty_chunk_decodes_to_empty_frame() {
    let chunk = codec::encode_pcm16(&[]);
    let frame = codec::decode(&chunk, PLAYBACK_SAMPLE_RATE).unwrap();
    assert!(frame.is_empty());
    assert_eq!(frame.duration(), std::time::Duration::ZERO);
}

#[test]
fn decode_rejects_image_chunks() {
    let chunk = WireChunk::jpeg("AAAA".to_string());
    assert!(codec::decode(&chunk, PLAYBACK_SAMPLE_RATE).is_err());
}

#[test]
fn decode_rejects_invalid_base64() {
    let chunk = WireChunk::audio("not base64!!!".to_string());
    assert!(codec::decode(&chunk, PLAYBACK_SAMPLE_RATE).is_err());
}

#[test]
fn decode_rejects_truncated_payload() {
    // Three bytes cannot form whole PCM16 samples
    let chunk = WireChunk::audio("AAAB".to_string());
    assert!(codec::decode(&chunk, PLAYBACK_SAMPLE_RATE).is_err());
}

#[test]
fn wire_chunk_serializes_with_camel_case_fields() {
    let chunk = codec::encode_pcm16(&[0.5]);
    let json = serde_json::to_value(&chunk).unwrap();
    assert_eq!(json["mimeType"], AUDIO_INPUT_MIME);
    assert!(json["data"].is_string());
}
