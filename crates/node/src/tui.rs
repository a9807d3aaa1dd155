use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table};

use crate::node::{NodeStats, PeerRow};

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn color(self) -> Color {
        match self {
            LogLevel::Info => Color::White,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
        }
    }
}

#[derive(Debug, Default)]
pub struct TuiState {
    log: VecDeque<(LogLevel, String)>,
    scroll: usize,
}

impl TuiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if self.log.len() >= MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((level, message));
    }

    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 5).min(self.log.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(5);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }

    /// The newest `height` lines, offset upward by the scroll position.
    fn visible(&self, height: usize) -> impl Iterator<Item = &(LogLevel, String)> {
        let end = self.log.len().saturating_sub(self.scroll);
        let start = end.saturating_sub(height);
        self.log.range(start..end)
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &NodeStats, peers: &[PeerRow]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(peers.len().clamp(1, 8) as u16 + 3),
            Constraint::Length(7),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_peers(frame, chunks[1], peers);
    render_network(frame, chunks[2], stats);
    render_log(frame, chunks[3], state);
    render_help(frame, chunks[4]);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &NodeStats) {
    let uptime = format_duration(stats.uptime_secs);
    let title = format!(" simnet node {} - Uptime: {} ", stats.local_id, uptime);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let addr = stats
        .local_addr
        .map_or_else(|| "unbound".to_string(), |addr| addr.to_string());
    let text = format!(
        "Listening: {}  |  Tick: {}  |  Peers: {}  |  Awaiting ack: {}",
        addr, stats.tick, stats.peer_count, stats.reliable_outstanding
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_peers(frame: &mut Frame, area: Rect, peers: &[PeerRow]) {
    let block = Block::default()
        .title(" Peers ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let header = Row::new(["Peer", "Address", "RTT", "Jitter", "Idle", "Sent", "Recv"])
        .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD));

    let rows = peers.iter().map(|peer| {
        let rtt = if peer.rtt_samples == 0 {
            "-".to_string()
        } else {
            format!("{:.1}ms", peer.srtt_ms)
        };
        let idle_style = if peer.idle_secs > 5.0 {
            Style::default().fg(Color::Red)
        } else {
            Style::default().fg(Color::White)
        };
        Row::new(vec![
            peer.id.to_string(),
            peer.addr.to_string(),
            rtt,
            format!("{:.1}ms", peer.rtt_var_ms),
            format!("{:.1}s", peer.idle_secs),
            peer.packets_sent.to_string(),
            peer.packets_received.to_string(),
        ])
        .style(idle_style)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(9),
            Constraint::Length(22),
            Constraint::Length(9),
            Constraint::Length(9),
            Constraint::Length(7),
            Constraint::Length(8),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(block);

    frame.render_widget(table, area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &NodeStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &stats.network;
    let faults = net.packets_bad + net.packets_dropped + net.packets_throttled;
    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} sent / {} recv", net.packets_sent, net.packets_received),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv",
                    format_bytes(net.bytes_sent),
                    format_bytes(net.bytes_received)
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Reliable: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} acked / {} resent ({:.1}%) / {} abandoned",
                    net.packets_acked,
                    net.packets_resent,
                    net.resend_percent(),
                    net.packets_abandoned
                ),
                Style::default().fg(if net.packets_abandoned > 0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
        Line::from(vec![
            Span::styled("Faults: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} bad / {} dropped / {} throttled",
                    net.packets_bad, net.packets_dropped, net.packets_throttled
                ),
                Style::default().fg(if faults > 0 { Color::Yellow } else { Color::White }),
            ),
        ]),
        Line::from(vec![
            Span::styled("Pings: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} sent / {} answered", net.pings_sent, net.pongs_received),
                Style::default().fg(Color::White),
            ),
        ]),
    ];

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let height = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .visible(height)
        .map(|(level, message)| {
            Line::from(Span::styled(
                message.as_str(),
                Style::default().fg(level.color()),
            ))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("q/ESC quit  |  r reset stats  |  PgUp/PgDn scroll  |  End latest")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
