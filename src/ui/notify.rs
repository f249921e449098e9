use std::time::Duration;

use anyhow::{Context, Result};
use rodio::Source;

const CUE_FREQUENCY_HZ: f32 = 880.0;
const CUE_LENGTH: Duration = Duration::from_millis(160);

/// Plays the short reply cue on a background thread. Audio failures are logged only.
pub fn play_cue() {
    let spawned = std::thread::Builder::new()
        .name("reply-cue".to_string())
        .spawn(|| {
            if let Err(error) = play_blocking() {
                tracing::debug!("Notification cue unavailable: {:#}", error);
            }
        });
    if let Err(error) = spawned {
        tracing::warn!("Failed to spawn notification thread: {}", error);
    }
}

fn play_blocking() -> Result<()> {
    let (_stream, handle) =
        rodio::OutputStream::try_default().context("no audio output device")?;
    let sink = rodio::Sink::try_new(&handle).context("failed to open audio sink")?;
    sink.append(
        rodio::source::SineWave::new(CUE_FREQUENCY_HZ)
            .take_duration(CUE_LENGTH)
            .fade_in(Duration::from_millis(10))
            .amplify(0.15),
    );
    sink.sleep_until_end();
    Ok(())
}
