mod events;
mod node;
mod status;
mod tui;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use node::{Node, NodeSettings};
use simnet::NetworkConfig;
use simnet::net::PeerId;
use tui::TuiState;

#[derive(Parser)]
#[command(name = "simnet-node")]
#[command(about = "Peer node speaking the simnet transport")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = 7000)]
    port: u16,

    #[arg(short, long, default_value_t = 0, help = "Local peer id")]
    id: u16,

    #[arg(long = "peer", value_parser = parse_peer, help = "Known peer as ID=HOST:PORT (repeatable)")]
    peers: Vec<(PeerId, SocketAddr)>,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long, default_value_t = 1000, help = "Ping interval in ms")]
    ping_interval: u64,

    #[arg(long, default_value_t = 1000, help = "Status broadcast interval in ms")]
    status_interval: u64,

    #[arg(long, default_value_t = 0.25, help = "Share of a stalled lane shed per drain (0-1)")]
    drop_fraction: f32,

    #[arg(long, default_value_t = 0, help = "Per-peer bandwidth cap in bytes/s (0 = unlimited)")]
    bandwidth: u32,

    #[arg(long, help = "Admit datagrams from peers not in the peer list")]
    accept_unknown: bool,

    #[arg(long, help = "Label carried in status broadcasts")]
    label: Option<String>,

    #[arg(long)]
    headless: bool,
}

fn parse_peer(value: &str) -> Result<(PeerId, SocketAddr), String> {
    let (id, addr) = value
        .split_once('=')
        .ok_or_else(|| format!("expected ID=HOST:PORT, got '{}'", value))?;
    let id = id
        .trim()
        .parse::<u16>()
        .map_err(|e| format!("invalid peer id '{}': {}", id, e))?;
    let addr = addr
        .trim()
        .parse::<SocketAddr>()
        .map_err(|e| format!("invalid peer address '{}': {}", addr, e))?;
    Ok((PeerId(id), addr))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let bind_addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.bind, args.port))?;

    let config = NetworkConfig {
        local_id: PeerId(args.id),
        drop_fraction: args.drop_fraction.clamp(0.0, 1.0),
        accept_unknown_peers: args.accept_unknown,
        default_incoming_bandwidth: args.bandwidth,
        default_outgoing_bandwidth: args.bandwidth,
        ..Default::default()
    };

    let settings = NodeSettings {
        tick_rate: args.tick_rate,
        ping_interval: Duration::from_millis(args.ping_interval),
        status_interval: Duration::from_millis(args.status_interval),
        label: args.label,
    };

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut node = Node::new(bind_addr, config, settings, &args.peers)
        .with_context(|| format!("failed to start node on {}", bind_addr))?;

    if args.headless {
        if let Some(addr) = node.local_addr() {
            log::info!("Node {} listening on {}", args.id, addr);
        }
        node.run();
        log::info!("Node shutting down");
    } else {
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

    if let Some(addr) = node.local_addr() {
        tui_state.log_info(format!("Node listening on {}", addr));
    }

    while running.load(Ordering::SeqCst) {
        node.tick_once();

        for event in node.drain_events() {
            match event {
                events::NodeEvent::Error { message } => tui_state.log_error(message),
                other if other.is_warning() => tui_state.log_warn(other.describe()),
                other => tui_state.log_info(other.describe()),
            }
        }

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Char('r') => {
                            node.reset_stats();
                            tui_state.log_info("Statistics reset");
                        }
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        _ => {}
                    }
                }
            }
        }

        let stats = node.stats();
        let peers = node.peer_rows();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats, &peers);
        })?;
    }

    node.shutdown();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
