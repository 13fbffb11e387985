mod node;
mod source;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use bodylink::{
    AxisRevision, JsonFileStore, MemoryStore, Settings, SettingsStore, TransportKind,
};
use node::Node;
use tui::TuiState;

#[derive(Parser)]
#[command(name = "bodylink-node")]
#[command(about = "Wearable motion node streaming to a Bodynodes host")]
struct Args {
    #[arg(short, long, help = "datagram, stream or peripheral")]
    transport: Option<TransportKind>,

    #[arg(long)]
    player: Option<String>,

    #[arg(long)]
    bodypart: Option<String>,

    #[arg(long)]
    glove_bodypart: Option<String>,

    #[arg(short, long, help = "Sensor sampling interval in ms")]
    interval_ms: Option<u64>,

    #[arg(long)]
    local_port: Option<u16>,

    #[arg(long)]
    remote_port: Option<u16>,

    #[arg(long)]
    multicast_port: Option<u16>,

    #[arg(short, long, help = "Multicast group tag the node answers to")]
    group: Option<String>,

    #[arg(short, long, help = "Settings file, kept in memory when omitted")]
    config: Option<PathBuf>,

    #[arg(long, help = "Use the older orientation axis mapping")]
    legacy_axes: bool,

    #[arg(long)]
    headless: bool,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(transport) = self.transport {
            settings.transport = transport;
        }
        if let Some(player) = &self.player {
            settings.player = player.clone();
        }
        if let Some(bodypart) = &self.bodypart {
            settings.bodypart = bodypart.clone();
        }
        if let Some(glove_bodypart) = &self.glove_bodypart {
            settings.glove_bodypart = glove_bodypart.clone();
        }
        if let Some(interval) = self.interval_ms {
            settings.sensor_interval_ms = interval;
        }
        if let Some(port) = self.local_port {
            settings.local_port = port;
        }
        if let Some(port) = self.remote_port {
            settings.remote_port = port;
        }
        if let Some(port) = self.multicast_port {
            settings.multicast_port = port;
        }
        if let Some(group) = &self.group {
            settings.multicast_group = group.clone();
        }
        if self.legacy_axes {
            settings.axis_table = AxisRevision::Legacy;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut store: Box<dyn SettingsStore> = match &args.config {
        Some(path) => Box::new(JsonFileStore::new(path)),
        None => Box::new(MemoryStore::default()),
    };
    let mut settings = store.load()?;
    args.apply(&mut settings);
    store.save(&settings)?;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        let mut node = Node::start(settings, store)?;
        log::info!(
            "Node {}/{} started over {}",
            node.settings().player,
            node.settings().bodypart,
            node.settings().transport
        );

        let running = node.running();
        while running.load(Ordering::SeqCst) {
            for event in node.step() {
                log::info!("{}", node::describe(&event));
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        for event in node.shutdown() {
            log::info!("{}", node::describe(&event));
        }
        log::info!("Node shutting down");
    } else {
        let mut node = Node::start(settings, store)?;
        run_with_tui(&mut node)?;
    }

    Ok(())
}

fn run_with_tui(node: &mut Node) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = node.running();
    let mut tui_state = TuiState::new();

    tui_state.log_info(format!(
        "Node started over {}",
        node.settings().transport
    ));

    while running.load(Ordering::SeqCst) {
        for event in node.step() {
            match event {
                bodylink::SessionEvent::StateChanged(bodylink::ConnectionState::Disconnected) => {
                    tui_state.log_warn(node::describe(&event));
                }
                _ => tui_state.log_info(node::describe(&event)),
            }
        }

        if event::poll(Duration::from_millis(5))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Char('r') => {
                            node.request_reset();
                            tui_state.log_info("Orientation reset requested");
                        }
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        _ => {}
                    }
                }
            }
        }

        let status = node.status();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, node.settings(), &status);
        })?;
    }

    node.shutdown();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
