use std::io;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use friendlink_server::tui::{self, Dashboard};
use friendlink_server::{RelayServer, ServerConfig, ServerEvent};

#[derive(Parser)]
#[command(name = "friendlink-server")]
#[command(about = "FriendLink position relay server")]
struct Args {
    /// Server display name
    #[arg(short, long, default_value = "FriendLink Server")]
    name: String,

    /// Slot count, 0-255
    #[arg(long = "max_players", visible_alias = "mp", default_value_t = 6)]
    max_players: u16,

    /// Server TCP listen port; clients receive UDP on it too
    #[arg(long = "port1", visible_alias = "p1", default_value_t = friendlink::DEFAULT_CLIENT_PORT)]
    port1: u16,

    /// Server UDP receive port
    #[arg(long = "port2", visible_alias = "p2", default_value_t = friendlink::DEFAULT_SERVER_PORT)]
    port2: u16,

    /// Run without the dashboard, logging events to stderr
    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.max_players > 255 {
        eprintln!("Error: max players must be between 0 and 255");
        std::process::exit(1);
    }

    let config = ServerConfig {
        name: args.name,
        max_clients: args.max_players as u8,
        tcp_port: args.port1,
        udp_port: args.port2,
    };

    let (events_tx, events_rx) = mpsc::channel();
    let mut server = RelayServer::start(&config, events_tx)?;

    if args.headless {
        run_headless(&server, events_rx);
    } else {
        run_with_tui(&server, &config, events_rx)?;
    }

    server.shutdown();
    Ok(())
}

fn run_headless(server: &RelayServer, events: Receiver<ServerEvent>) {
    let running = server.running();
    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(250)) {
            Ok(ServerEvent::ClientJoined { slot, addr }) => {
                log::info!("slot {slot} joined from {addr}")
            }
            Ok(ServerEvent::ClientLeft { slot }) => log::info!("slot {slot} left"),
            Ok(ServerEvent::Error(message)) => log::error!("{message}"),
            Ok(ServerEvent::Relayed(_)) | Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_with_tui(
    server: &RelayServer,
    config: &ServerConfig,
    events: Receiver<ServerEvent>,
) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut dashboard = Dashboard::new(config.name.clone(), config.max_clients);

    while running.load(Ordering::SeqCst) {
        while let Ok(event) = events.try_recv() {
            dashboard.apply(event);
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        _ => {}
                    }
                }
            }
        }

        terminal.draw(|frame| {
            tui::render(frame, &dashboard);
        })?;
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
