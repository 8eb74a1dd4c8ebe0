//! # Example: Live relay
//!
//! A publisher writes a 25 fps stream (keyframe every 25 frames) into an [`AVTrack`] from a
//! timer task on the root supervisor. Two players read it under a child supervisor: one live
//! (`Real`), one that waits for the next keyframe (`WaitKey`) and falls behind on purpose
//! to show the slow-reader jump.
//!
//! Run with: `RUST_LOG=debug cargo run --example relay --features logging`

use std::sync::Arc;
use std::time::Duration;

use streamvisor::{
    AVTrack, LogWriter, PublishConfig, RuntimeConfig, SubMode, SubscribeConfig, Subscribe,
    Supervisor, TaskContext, TaskError, TaskFn, TaskSpec, TrackView,
};
use tracing_subscriber::EnvFilter;

const FRAME: Duration = Duration::from_millis(40);
const GOP: u32 = 25;

fn player(view: TrackView<Vec<u8>>, name: &'static str, mode: SubMode, lag: Duration) -> TaskSpec {
    let task = TaskFn::arc(name, move |ctx: TaskContext| {
        let mut reader = view.subscribe(name);
        async move {
            let conf = SubscribeConfig::with_mode(mode);
            loop {
                let read = tokio::select! {
                    _ = ctx.stopped() => return Ok(()),
                    read = reader.read_frame(&conf) => read,
                };
                read.map_err(|e| TaskError::fail(e.to_string()))?;
                if let Some(frame) = reader.frame() {
                    if frame.idr {
                        tracing::info!(
                            player = name,
                            seq = frame.sequence,
                            abs_ms = reader.abs_time(),
                            delay = reader.delay(),
                            "keyframe"
                        );
                    }
                }
                if !lag.is_zero() {
                    tokio::time::sleep(lag).await;
                }
            }
        }
    });
    TaskSpec::from_arc(task)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let root = Supervisor::builder(RuntimeConfig::default())
        .with_subscribers(subs)
        .build_root();
    root.listen_os_signals()?;

    let mut track: AVTrack<Vec<u8>> = AVTrack::new("live/demo", &PublishConfig::default());
    let view = track.view();

    let mut n: u32 = 0;
    root.add_timer(FRAME, move |_| {
        let frame = track.writer_mut().value_mut();
        frame.idr = n % GOP == 0;
        frame.timestamp = FRAME * n;
        frame.payload.resize(if frame.idr { 4096 } else { 512 }, 0);
        let len = frame.payload.len();
        track.add_bytes_in(len);
        track.writer_mut().step();
        if n == 0 {
            track.ready(Ok(()));
        }
        n += 1;
    });

    view.wait_ready().await?;
    let players = root.new_child();
    players.spawn(player(view.clone(), "live", SubMode::Real, Duration::ZERO));
    players.spawn(player(view.clone(), "sleepy", SubMode::WaitKey, FRAME * 2));

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        reason = root.wait_stopped() => tracing::info!(%reason, "root stopped"),
    }
    tracing::info!(bps = view.bps(), fps = view.fps(), readers = view.ring().readers(), "stats");
    root.shutdown_with_grace().await?;
    Ok(())
}
