pub mod audio;

pub use audio::{
    list_input_devices, save_wav_file, CaptureConfig, CaptureHandle, CpalDeviceInfo,
    FrameResampler,
};
