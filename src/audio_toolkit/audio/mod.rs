// Re-export all audio components
pub mod device;
pub mod recorder;
pub mod resampler;
pub mod utils;

pub use device::{list_input_devices, CpalDeviceInfo};
pub use recorder::{CaptureConfig, CaptureHandle};
pub use resampler::FrameResampler;
pub use utils::save_wav_file;
