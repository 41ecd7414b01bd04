//! Production implementations of the collaborator traits.

pub mod ffmpeg;
pub mod http_inference;
pub mod http_speech;

pub use ffmpeg::FfmpegTransform;
pub use http_inference::HttpInferenceClient;
pub use http_speech::HttpSpeechClient;
