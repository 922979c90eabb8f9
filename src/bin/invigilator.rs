//! invigilator - exam room monitoring daemon
//!
//! This daemon:
//! 1. Captures frames from the configured source and resizes them
//! 2. Runs pose estimation and object detection on every frame
//! 3. Classifies leaning, turning back, hand raises, paper passing and phones
//! 4. Debounces each behaviour and records a proof clip per episode
//! 5. Archives confirmed episodes and writes malpractice records
//!
//! Ctrl-C stops the loop; open recordings are released before exit.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use exam_invigilator::{
    detect::{build_backends, BackendKind},
    ui::{Ui, UiMode},
    FileConfig, FileSource, FrameSource, Monitor, MonitorConfig, PersistenceGateway,
    Y4mClipFactory,
};

#[derive(Parser, Debug)]
#[command(name = "invigilator", version, about = "Exam room malpractice monitor")]
struct Args {
    /// Video file or stub://name (overrides capture.source)
    #[arg(long)]
    source: Option<String>,

    /// Replay detections from a JSON-lines file instead of running models
    #[arg(long, value_name = "PATH")]
    replay: Option<PathBuf>,

    /// Directory for proof clips (overrides media_dir)
    #[arg(long, value_name = "DIR")]
    media_dir: Option<PathBuf>,

    /// Path to the malpractice SQLite DB (overrides db_path)
    #[arg(long, value_name = "PATH")]
    db: Option<String>,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// Register the configured lecture hall before monitoring
    #[arg(long)]
    register_hall: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::new(UiMode::parse(Some(&args.ui)), std::io::stderr().is_terminal());

    let cfg = {
        let stage = ui.stage("Load configuration");
        let loaded = MonitorConfig::load().and_then(|mut cfg| {
            apply_args(&mut cfg, &args);
            cfg.validate()?;
            Ok(cfg)
        });
        stage.finish(loaded)?
    };

    let mut gateway = {
        let stage = ui.stage("Open event store");
        stage.finish(PersistenceGateway::from_config(&cfg))?
    };
    if args.register_hall {
        let id = gateway
            .store_mut()
            .add_lecture_hall(&cfg.lecture_hall.name, &cfg.lecture_hall.building)?;
        log::info!(
            "lecture hall {} / {} registered as {}",
            cfg.lecture_hall.name,
            cfg.lecture_hall.building,
            id
        );
    }

    let backends = {
        let stage = ui.stage("Load inference backends");
        let built = build_backends(&cfg.inference).and_then(|mut backends| {
            backends.warm_up()?;
            Ok(backends)
        });
        stage.finish(built)?
    };

    let mut source = {
        let stage = ui.stage("Connect frame source");
        let connected = FileSource::new(FileConfig::from(&cfg.capture)).and_then(|mut source| {
            source.connect()?;
            Ok(source)
        });
        stage.finish(connected)?
    };

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    log::info!(
        "invigilator running: hall={} / {} source={} db={} media={}",
        cfg.lecture_hall.name,
        cfg.lecture_hall.building,
        cfg.capture.source,
        cfg.db_path,
        cfg.media_dir.display()
    );
    if gateway.is_distributed() {
        log::info!("distributed deployment mode enabled");
    }

    let mut monitor = Monitor::new(
        &cfg,
        backends,
        Box::new(Y4mClipFactory),
        Box::new(gateway),
    );
    let mut status = ui.session(&cfg.lecture_hall.name);
    let summary = monitor.run_with(&mut source, &stop, args.max_frames, &mut |report| {
        status.frame(report)
    })?;
    if summary.interrupted_recordings > 0 {
        log::info!(
            "{} episode(s) were open at shutdown; partial clips left in {}",
            summary.interrupted_recordings,
            cfg.temp_dir.display()
        );
    }
    status.finish(&summary);
    Ok(())
}

fn apply_args(cfg: &mut MonitorConfig, args: &Args) {
    if let Some(source) = &args.source {
        cfg.capture.source = source.clone();
    }
    if let Some(path) = &args.replay {
        cfg.inference.pose_backend = BackendKind::Replay;
        cfg.inference.object_backend = BackendKind::Replay;
        cfg.inference.replay_path = Some(path.clone());
    }
    if let Some(dir) = &args.media_dir {
        cfg.media_dir = dir.clone();
    }
    if let Some(db) = &args.db {
        cfg.db_path = db.clone();
    }
}
