//! Softcam demo: synthetic producer feeding an emulated camera, with a paced
//! in-process consumer standing in for a conferencing app.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use flume::bounded;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use softcam::{sender, Config, Frame, ProducerPacer, PullAdapter, PullOutcome};

const WIDTH: i32 = 640;
const HEIGHT: i32 = 480;
const FRAME_RATE: f32 = 30.0;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let config = Config::load(std::env::args().nth(1).map(PathBuf::from).as_deref())?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Softcam demo launching...");
    softcam::CONFIG.store(Arc::new(config));

    let camera = sender::create_camera(WIDTH, HEIGHT, FRAME_RATE)?;
    let session = sender::session(camera)?;
    let running = Arc::new(AtomicBool::new(true));

    // Consumer side: paced pulls forwarded to a channel
    let (tx, rx) = bounded::<Frame>(2);
    let consumer = {
        let running = Arc::clone(&running);
        let mut adapter = PullAdapter::from_global_config(&session);
        std::thread::spawn(move || {
            // Give the producer a chance to block in wait_for_connection first
            std::thread::sleep(Duration::from_millis(500));
            if let Err(e) = adapter.attach() {
                error!("Consumer failed to attach: {}", e);
                return;
            }
            while running.load(Ordering::Relaxed) {
                match adapter.next_frame() {
                    PullOutcome::Closed => break,
                    PullOutcome::Stall => continue,
                    outcome => {
                        if let Some(frame) = outcome.into_frame() {
                            if tx.send(frame).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            let stats = adapter.stats();
            info!(
                fresh = stats.fresh,
                repeated = stats.repeated,
                blank = stats.blank,
                "Consumer finished"
            );
        })
    };
    drop(session);

    // Producer side: waits for the consumer, then pushes a moving gradient
    let producer = {
        let running = Arc::clone(&running);
        tokio::task::spawn_blocking(move || -> softcam::Result<()> {
            if !sender::wait_for_connection(camera, 5.0) {
                warn!("No consumer within 5s, pushing anyway");
            }
            let session = sender::session(camera)?;
            let mut pacer = ProducerPacer::new(session.clock());
            let mut pixels = vec![0u8; session.frame_size()];
            drop(session);
            let mut shade = 0u8;
            while running.load(Ordering::Relaxed) {
                pixels.fill(shade);
                shade = shade.wrapping_add(4);
                sender::send_frame(camera, &pixels)?;
                pacer.wait();
            }
            Ok(())
        })
    };

    // Report delivery rate until Ctrl-C
    let reporter = tokio::spawn(async move {
        let mut window = Instant::now();
        let mut count = 0u32;
        while let Ok(frame) = rx.recv_async().await {
            count += 1;
            if window.elapsed() >= Duration::from_secs(1) {
                info!(
                    fps = count,
                    sequence = frame.sequence(),
                    latency_us = frame.timestamp.elapsed().as_micros() as u64,
                    "Consumer delivery"
                );
                window = Instant::now();
                count = 0;
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received");
    running.store(false, Ordering::Relaxed);

    if let Err(e) = producer.await? {
        error!("Producer error: {}", e);
    }
    sender::delete_camera(camera)?;
    if consumer.join().is_err() {
        error!("Consumer thread panicked");
    }
    reporter.await?;

    info!(live_cameras = sender::live_cameras(), "Softcam demo shutting down");
    Ok(())
}
