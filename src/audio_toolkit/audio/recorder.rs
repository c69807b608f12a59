use cpal::traits::{DeviceTrait, StreamTrait};
use log::{debug, error, info};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use super::device;
use super::resampler::FrameResampler;
use crate::error::ClientError;
use crate::protocol::AudioFrame;

/// Capture parameters for one session.
pub struct CaptureConfig {
    /// Open this device by name, or the host default when `None`.
    pub device_name: Option<String>,
    /// Rate the emitted frames are resampled to.
    pub target_rate: u32,
    pub frame_duration: Duration,
}

enum CaptureCtl {
    Start,
    Shutdown,
}

/// Owner handle for a capture thread.
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread; the
/// handle only passes control messages. Dropping the handle stops capture
/// and releases the microphone.
pub struct CaptureHandle {
    ctl_tx: mpsc::Sender<CaptureCtl>,
    join: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Begin delivering audio. Frames start flowing after this call.
    pub fn start(&self) {
        let _ = self.ctl_tx.send(CaptureCtl::Start);
    }

    /// Stop capture and release the device.
    pub fn shutdown(self) {
        // Drop does the work.
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        let _ = self.ctl_tx.send(CaptureCtl::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Acquire the microphone and build the capture graph, leaving it paused.
///
/// Resolves once the device is open and the stream is built, so acquisition
/// failures surface here rather than mid-session.
pub(crate) async fn spawn_capture(
    config: CaptureConfig,
    frames: UnboundedSender<AudioFrame>,
) -> Result<CaptureHandle, ClientError> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (ctl_tx, ctl_rx) = mpsc::channel();

    let join = thread::Builder::new()
        .name("mic-capture".into())
        .spawn(move || capture_thread(config, frames, ready_tx, ctl_rx))
        .map_err(|e| ClientError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

    let handle = CaptureHandle {
        ctl_tx,
        join: Some(join),
    };

    match ready_rx.await {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ClientError::CaptureFailed(
            "capture thread exited before opening the device".into(),
        )),
    }
}

fn capture_thread(
    config: CaptureConfig,
    frames: UnboundedSender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<(), ClientError>>,
    ctl_rx: mpsc::Receiver<CaptureCtl>,
) {
    let stream = match build_stream(&config, frames) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    loop {
        match ctl_rx.recv() {
            Ok(CaptureCtl::Start) => {
                if let Err(e) = stream.play() {
                    error!("failed to start capture stream: {e}");
                }
            }
            Ok(CaptureCtl::Shutdown) | Err(_) => break,
        }
    }

    drop(stream);
    debug!("capture thread exited");
}

fn build_stream(
    config: &CaptureConfig,
    frames: UnboundedSender<AudioFrame>,
) -> Result<cpal::Stream, ClientError> {
    let device = device::select_input_device(config.device_name.as_deref())?;
    let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());

    let supported = device
        .default_input_config()
        .map_err(device::map_config_error)?;
    let in_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    if channels == 0 {
        return Err(ClientError::CaptureFailed("device reports no channels".into()));
    }

    info!("capturing from '{device_name}' at {in_rate} Hz, {channels} channel(s)");

    let mut resampler = FrameResampler::new(in_rate, config.target_rate, config.frame_duration);
    let stream_config = supported.config();
    let err_fn = |e| error!("input stream error: {e}");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &_| {
                    feed(&mut resampler, data, channels, &frames);
                },
                err_fn,
                None,
            )
            .map_err(device::map_build_error)?,
        cpal::SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _: &_| {
                    let floats: Vec<f32> =
                        data.iter().map(|&s| s as f32 / 32768.0).collect();
                    feed(&mut resampler, &floats, channels, &frames);
                },
                err_fn,
                None,
            )
            .map_err(device::map_build_error)?,
        other => {
            return Err(ClientError::CaptureFailed(format!(
                "unsupported input sample format {other:?}"
            )))
        }
    };

    Ok(stream)
}

/// Runs inside the audio callback: downmix, resample, hand frames off.
///
/// The channel send never blocks, so a slow consumer cannot stall capture.
fn feed(
    resampler: &mut FrameResampler,
    data: &[f32],
    channels: usize,
    frames: &UnboundedSender<AudioFrame>,
) {
    if channels > 1 {
        let mono: Vec<f32> = data
            .chunks(channels)
            .map(|c| c.iter().sum::<f32>() / c.len() as f32)
            .collect();
        resampler.push(&mono, |frame| {
            let _ = frames.send(AudioFrame::from(frame));
        });
    } else {
        resampler.push(data, |frame| {
            let _ = frames.send(AudioFrame::from(frame));
        });
    }
}
