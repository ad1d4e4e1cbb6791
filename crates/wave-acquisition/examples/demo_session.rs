//! Run a short acquisition on the demo board, print what came back and save
//! it as a checksummed record.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p wave-acquisition --example demo_session
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use wave_acquisition::{AcquisitionController, AcquisitionEvent, SessionConfig};
use wave_analysis::{spectrum_multi, Window};
use wave_core::{ChannelConfig, SensorType, WaveConfig};
use wave_driver_demo::DemoBackend;
use wave_storage::{record_path, RecordMetadata, SampleMatrix};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = WaveConfig::load().context("loading configuration")?;

    let channels = vec![
        ChannelConfig::new(0, "WG1").with_sensor_type(SensorType::WaveGauge),
        ChannelConfig::new(1, "WG2").with_sensor_type(SensorType::WaveGauge),
        ChannelConfig::new(2, "WG3").with_sensor_type(SensorType::WaveGauge),
    ];

    let mut controller = AcquisitionController::with_config(Box::new(DemoBackend::new()), &config);
    let mut events = controller.subscribe();

    controller.configure(SessionConfig::from_settings(channels, &config.acquisition))?;
    controller.start()?;
    std::thread::sleep(Duration::from_secs(2));
    let session = controller.stop()?;

    let mut notifications = 0;
    while let Ok(event) = events.try_recv() {
        if let AcquisitionEvent::DataAvailable(_) = event {
            notifications += 1;
        }
    }

    println!(
        "session {}: {} scans at {} Hz over {:.2} s, {} overflowed, {} notifications",
        session.id,
        session.total_samples,
        session.effective_sample_rate(),
        session.acquired_duration().as_secs_f64(),
        session.overflow_count,
        notifications
    );

    let snapshot = controller.snapshot().context("no buffered data")?;
    let rate = session.effective_sample_rate();
    let window: Window = config.analysis.window.parse()?;
    let spectra = spectrum_multi(snapshot.channels(), rate, window)?;
    for (i, (name, values)) in session
        .channel_names()
        .iter()
        .zip(snapshot.channels())
        .enumerate()
    {
        let peak = values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let (freq, amplitude) = spectra.peak(i).unwrap_or_default();
        println!(
            "  {name}: {} samples, peak {:.3} V, strongest {:.2} Hz at {:.3} V",
            values.len(),
            peak,
            freq,
            amplitude
        );
    }

    std::fs::create_dir_all(&config.storage.output_dir)
        .with_context(|| format!("creating {}", config.storage.output_dir.display()))?;
    let path = record_path(&config.storage, &format!("session-{}", session.id))?;
    let data = SampleMatrix::from_channels(snapshot.channels())?;
    let meta = RecordMetadata::new(rate, session.channel_names()).with_session_summary(
        session.id,
        session.total_samples,
        session.overflow_count,
        rate,
    );
    let sha256 = wave_storage::write(&path, &data, &meta)?;
    println!("saved {} (sha256 {})", path.display(), sha256);
    Ok(())
}
