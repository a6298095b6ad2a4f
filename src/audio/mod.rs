//! Audio subsystem module

pub mod capture;
pub mod channel;
pub mod device;
pub mod normalize;
pub mod resample;

pub use capture::{CaptureSink, CaptureSource, CpalCapture, NativeFormat, SampleKind};
pub use channel::{create_shared_channel, ByteChannel, SharedByteChannel};
pub use device::{get_device_by_id, list_devices, AudioDevice};
pub use normalize::Normalizer;
pub use resample::PcmResampler;
