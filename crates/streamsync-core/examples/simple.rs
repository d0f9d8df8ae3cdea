use std::{
    thread,
    time::{Duration, Instant},
};
use streamsync_core::{Config, Producer, SyncManager, SyncedBundle, WithSequence};
use tracing::info;
use tracing_subscriber::EnvFilter;

// Define your message type
#[derive(Debug, Clone)]
struct Frame {
    seq: u32,
    captured_at: Instant,
}

impl WithSequence for Frame {
    type Seq = u32;

    fn sequence(&self) -> u32 {
        self.seq
    }
}

/// A fake camera publishing a color and a depth stream.
struct Camera;

impl Producer<&'static str> for Camera {
    fn streams(&self) -> Vec<&'static str> {
        vec!["color", "depth"]
    }
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let manager: SyncManager<&'static str, Frame> = SyncManager::<&'static str, Frame>::builder(Config::no_sync())
        .producer(&Camera)
        .build()?;

    // Color runs at 30 Hz and depth at 15 Hz, each on its own thread.
    let producers: Vec<_> = [("color", 33), ("depth", 66)]
        .into_iter()
        .map(|(key, period_ms)| {
            let sender = manager.stream(key)?;
            let handle = thread::spawn(move || -> eyre::Result<()> {
                for seq in 0..30 {
                    let frame = Frame {
                        seq,
                        captured_at: Instant::now(),
                    };
                    sender.send(frame)?;
                    thread::sleep(Duration::from_millis(period_ms));
                }
                Ok(())
            });
            Ok(handle)
        })
        .collect::<Result<_, streamsync_core::SyncError>>()?;

    // The main thread plays the role of a UI loop that owns the callback.
    let mut show = |bundle: SyncedBundle<&'static str, Frame>| {
        let skew = bundle
            .iter()
            .map(|(_, msg)| msg.payload().captured_at)
            .max()
            .zip(bundle.iter().map(|(_, msg)| msg.payload().captured_at).min())
            .map(|(newest, oldest)| newest - oldest)
            .unwrap_or_default();

        info!(
            color = bundle["color"].payload().seq,
            depth = bundle["depth"].payload().seq,
            skew = ?skew,
            "synced bundle"
        );
    };

    while producers.iter().any(|handle| !handle.is_finished()) {
        manager.poll_timeout(Duration::from_millis(16), &mut show);
    }

    for handle in producers {
        handle
            .join()
            .map_err(|_| eyre::eyre!("producer thread panicked"))??;
    }

    manager.close();
    let remaining = manager.drain(&mut show);
    info!(remaining, stats = ?manager.stats(), "done");

    Ok(())
}
