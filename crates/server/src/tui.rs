use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, Tabs};

use replica::server::{ClientInfo, ServerStats};
use replica::session::ClientId;
use replica::{ConnectionState, TICRATE};

use crate::events::Severity;

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Overview,
    Connections,
    Log,
}

impl Tab {
    const ALL: [Tab; 3] = [Tab::Overview, Tab::Connections, Tab::Log];

    fn title(self) -> &'static str {
        match self {
            Tab::Overview => "Overview",
            Tab::Connections => "Connections",
            Tab::Log => "Log",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }
}

/// Operator requests collected from key presses, applied by the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Kick(ClientId),
    Ban(ClientId),
    ToggleLoss(ClientId),
    NextMap,
}

pub struct TuiState {
    tab: Tab,
    log: VecDeque<(Severity, String)>,
    scroll: usize,
    selected: usize,
    pending: Vec<Request>,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            tab: Tab::Overview,
            log: VecDeque::new(),
            scroll: 0,
            selected: 0,
            pending: Vec::new(),
        }
    }

    pub fn log(&mut self, severity: Severity, line: impl Into<String>) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((severity, line.into()));
    }

    pub fn active_tab(&self) -> Tab {
        self.tab
    }

    pub fn next_tab(&mut self) {
        self.tab = Tab::ALL[(self.tab.index() + 1) % Tab::ALL.len()];
    }

    pub fn prev_tab(&mut self) {
        self.tab = Tab::ALL[(self.tab.index() + Tab::ALL.len() - 1) % Tab::ALL.len()];
    }

    pub fn scroll_up(&mut self) {
        self.scroll = self.scroll.saturating_add(10);
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(10);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn select_next(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1).min(count - 1);
        }
    }

    /// Queues `make(id)` for the selected connection, if there is one.
    pub fn request_for_selected(
        &mut self,
        clients: &[ClientInfo],
        make: fn(ClientId) -> Request,
    ) {
        if let Some(client) = clients.get(self.selected) {
            self.pending.push(make(client.id));
        }
    }

    pub fn request(&mut self, request: Request) {
        self.pending.push(request);
    }

    pub fn take_requests(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.pending)
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &ServerStats, clients: &[ClientInfo]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);

    let titles: Vec<Line> = Tab::ALL.iter().map(|t| Line::from(t.title())).collect();
    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL))
        .select(state.tab.index())
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(tabs, chunks[1]);

    match state.tab {
        Tab::Overview => render_overview(frame, chunks[2], stats),
        Tab::Connections => render_connections(frame, chunks[2], clients, state.selected),
        Tab::Log => render_log(frame, chunks[2], state),
    }
    render_help(frame, chunks[3], state.tab);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let uptime = format_duration((stats.tick / TICRATE) as u64);
    let title = format!(" Replica Server - Uptime: {} ", uptime);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Map: {}  |  Tick: {}  |  Players: {}  |  Actors: {}  |  Bans: {}",
        stats.map, stats.tick, stats.spawned, stats.actor_count, stats.bans
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_overview(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let block = Block::default()
        .title(" Slots ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));
    let max = stats.max_clients.max(1);
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio((stats.connections as f64 / max as f64).min(1.0))
        .label(format!("{}/{} clients", stats.connections, stats.max_clients));
    frame.render_widget(gauge, chunks[0]);

    let net = &stats.network_stats;
    let bus = &stats.bus_stats;
    let lines = vec![
        stat_line(
            "Packets: ",
            format!("{} sent / {} recv", net.packets_sent, net.packets_received),
        ),
        stat_line(
            "Bytes: ",
            format!(
                "{} sent / {} recv",
                format_bytes(net.bytes_sent),
                format_bytes(net.bytes_received)
            ),
        ),
        stat_line(
            "Dropped: ",
            format!("{} (malformed in: {})", net.packets_dropped, net.malformed),
        ),
        stat_line(
            "Commands: ",
            format!(
                "{} delivered / {} dropped / {} rerouted",
                bus.delivered, bus.dropped, bus.rerouted
            ),
        ),
        stat_line(
            "Move axes: ",
            format!("{} skipped / {} reused", bus.axes_skipped, bus.axes_reused),
        ),
    ];
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    frame.render_widget(Paragraph::new(lines).block(block), chunks[1]);
}

fn stat_line(label: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(label, Style::default().fg(Color::Gray)),
        Span::styled(value, Style::default().fg(Color::White)),
    ])
}

fn render_connections(frame: &mut Frame, area: Rect, clients: &[ClientInfo], selected: usize) {
    let header = Row::new(["Slot", "Name", "Address", "State", "Ping", "Time", "Seq"])
        .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = clients
        .iter()
        .enumerate()
        .map(|(i, client)| {
            let state_color = match client.state {
                ConnectionState::Spawned => Color::Green,
                ConnectionState::AuthenticatedButOutdatedMap => Color::Magenta,
                _ => Color::Yellow,
            };
            let ping = if client.lagging {
                Cell::from("LAG").style(Style::default().fg(Color::Red))
            } else {
                Cell::from(format!("{}ms", client.ping_ms))
            };
            let row = Row::new(vec![
                Cell::from(client.slot.to_string()),
                Cell::from(client.name.clone()),
                Cell::from(client.addr.clone()),
                Cell::from(client.state.name()).style(Style::default().fg(state_color)),
                ping,
                Cell::from(format_duration(client.connected_secs as u64)),
                Cell::from(client.next_sequence.to_string()),
            ]);
            if i == selected {
                row.style(Style::default().bg(Color::DarkGray))
            } else {
                row
            }
        })
        .collect();

    let widths = [
        Constraint::Length(5),
        Constraint::Min(12),
        Constraint::Length(22),
        Constraint::Length(14),
        Constraint::Length(7),
        Constraint::Length(9),
        Constraint::Length(8),
    ];
    let table = Table::new(rows, widths).header(header).block(
        Block::default()
            .title(" Connections ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)),
    );
    frame.render_widget(table, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let visible = area.height.saturating_sub(2) as usize;
    let end = state.log.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(visible);

    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(start)
        .take(end - start)
        .map(|(severity, text)| {
            let color = match severity {
                Severity::Info => Color::White,
                Severity::Warn => Color::Yellow,
                Severity::Error => Color::Red,
            };
            Line::from(Span::styled(text.as_str(), Style::default().fg(color)))
        })
        .collect();

    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect, tab: Tab) {
    let text = match tab {
        Tab::Connections => {
            "Up/Down select  k kick  b ban  l toggle 25% loss  Tab switch  q quit"
        }
        Tab::Log => "PgUp/PgDn scroll  End follow  Tab switch  q quit",
        Tab::Overview => "m next map  Tab switch  q quit",
    };
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let help = Paragraph::new(text).block(block).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );

    frame.render_widget(help, area);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let mut state = TuiState::new();
        for i in 0..(MAX_LOG_LINES + 10) {
            state.log(Severity::Info, format!("line {}", i));
        }
        assert_eq!(state.log.len(), MAX_LOG_LINES);
        assert_eq!(state.log.front().unwrap().1, "line 10");
    }

    #[test]
    fn test_tabs_wrap() {
        let mut state = TuiState::new();
        state.prev_tab();
        assert_eq!(state.active_tab(), Tab::Log);
        state.next_tab();
        assert_eq!(state.active_tab(), Tab::Overview);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_duration(3725), "01:02:05");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
    }
}
