//! Headless watch client (native).
//!
//! Joins a room and logs every primitive the board would render.
//!
//! ```text
//! inkboard <room> [server_url]
//! ```
//!
//! `INKBOARD_CONFIG` may point at a JSON [`BoardConfig`] file.

use std::time::{Duration, Instant};

use inkboard_core::transport::NativeWebSocket;
use inkboard_core::{BoardConfig, BoardController, DrawPrimitive, ParticipantId, RenderSurface};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, PartialEq)]
struct Args {
    room: String,
    server_url: Option<String>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Option<Self> {
        let room = args.next()?;
        let server_url = args.next();
        if args.next().is_some() || room.starts_with('-') {
            return None;
        }
        Some(Self { room, server_url })
    }
}

/// Render surface that writes primitives to the log.
#[derive(Debug, Default)]
struct LogSurface {
    drawn: usize,
}

impl RenderSurface for LogSurface {
    fn draw(&mut self, primitive: &DrawPrimitive) {
        self.drawn += 1;
        match primitive {
            DrawPrimitive::Stroke { tool, color, width, points } => {
                let color = color.map_or_else(|| "none".to_string(), |c| c.to_hex());
                log::info!("draw {:?} color={} width={} points={}", tool, color, width, points.len());
            }
            DrawPrimitive::Clear => log::info!("clear"),
        }
    }

    fn full_redraw(&mut self) {
        log::info!("full redraw after {} primitives", self.drawn);
        self.drawn = 0;
    }
}

fn load_config(args: &Args) -> Result<BoardConfig, Box<dyn std::error::Error>> {
    let mut config = match std::env::var("INKBOARD_CONFIG") {
        Ok(path) => BoardConfig::load(path)?,
        Err(_) => BoardConfig::default(),
    };
    if let Some(url) = &args.server_url {
        config.server_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let Some(args) = Args::parse(std::env::args().skip(1)) else {
        eprintln!("usage: inkboard <room> [server_url]");
        std::process::exit(2);
    };
    let config = load_config(&args)?;
    log::info!("Joining room {} via {}", args.room, config.server_url);

    let participant = ParticipantId::random();
    let mut board = BoardController::new(participant, NativeWebSocket::new(), LogSurface::default(), config);
    board.connect(&args.room, Instant::now())?;

    loop {
        board.pump(Instant::now());
        std::thread::sleep(POLL_INTERVAL);
    }
}
