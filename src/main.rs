//! Helios decode pipeline demo against the simulated accelerator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use helios::decode::Codec;
use helios::device::sim::SimDevice;
use helios::device::{AspectCode, StreamType, TimingCode};
use helios::{playlist, Config, DecoderSession};

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("helios=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Helios launching...");

    // Load configuration
    let config = Config::load(None)?;

    // No hardware unit in the demo: run the software accelerator and let it
    // decode every accepted packet
    let device = Arc::new(SimDevice::new());
    device.set_auto_decode(true);

    let mut session = DecoderSession::new(device.clone(), config.decoder.clone());
    if !session.is_open() {
        return Err(eyre!("no decoding accelerator available"));
    }
    session.open(StreamType::Es, Codec::H264)?;
    device.push_format_change(1280, 720, TimingCode::Hd720p50, AspectCode::R16x9);

    // Feed a short synthetic elementary stream and drain decoded pictures
    let packet = vec![0u8; 4096];
    let mut pts = 0.02f64;
    let mut decoded = 0usize;
    let start = Instant::now();

    while decoded < 120 {
        if session.add_input(&packet, pts) {
            pts += 0.02;
        }
        while let Some(picture) = session.get_picture() {
            decoded += 1;
            if decoded % 30 == 0 {
                info!(
                    decoded,
                    pts = picture.pts,
                    width = picture.width,
                    height = picture.height,
                    field = ?picture.field(),
                    "picture"
                );
            }
        }
        session.clear_busy_list();
        std::thread::sleep(Duration::from_millis(2));

        if start.elapsed() > Duration::from_secs(10) {
            return Err(eyre!("pipeline stalled"));
        }
    }

    if let Some(format) = session.video_format() {
        info!(
            width = format.width,
            height = format.height,
            rate = %format.frame_rate,
            aspect_x = format.aspect.0,
            aspect_y = format.aspect.1,
            "final format"
        );
    }
    session.close();

    // Round-trip a playlist through the markup codec
    let list = playlist::Playlist {
        label: "Demo".into(),
        items: vec![playlist::PlaylistItem {
            path: "/tmp/demo.mp3".into(),
            title: "demo".into(),
            duration_secs: 120,
        }],
    };
    let playlist_path = std::env::temp_dir().join("helios-demo.b4s");
    playlist::save_path(&list, &playlist_path)?;
    let reloaded = playlist::load_path(&playlist_path, &config.playlist)?;
    info!(items = reloaded.items.len(), label = %reloaded.label, "playlist round trip");

    info!("Helios shutting down");
    Ok(())
}
