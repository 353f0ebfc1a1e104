mod events;
mod simulation;
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

use events::Severity;
use replica::net::DEFAULT_MAX_PACKET_SIZE;
use replica::{GameMode, PacketLossSimulation, Server, ServerConfig};
use simulation::Activity;
use tui::{Request, Tab, TuiState};

/// Loss applied to a client from the connections tab.
const OPERATOR_LOSS_PERCENT: f32 = 25.0;

#[derive(Parser)]
#[command(name = "replica-server")]
#[command(about = "Replica game server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = replica::DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value = "MAP01")]
    map: String,

    #[arg(short = 'g', long, default_value = "cooperative", value_parser = parse_game_mode)]
    game_mode: GameMode,

    #[arg(long, default_value = "Replica Server")]
    host_name: String,

    #[arg(long, default_value = "")]
    motd: String,

    #[arg(short, long, default_value_t = 8)]
    max_clients: usize,

    #[arg(long, default_value_t = 2)]
    max_clients_per_ip: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    max_packet_size: usize,

    #[arg(long, help = "Require this password to join")]
    password: Option<String>,

    #[arg(long, help = "Keep bans in this JSON file across restarts")]
    ban_file: Option<PathBuf>,

    #[arg(long, help = "Do not answer LAN broadcast queries")]
    no_lan: bool,

    #[arg(long, help = "Send stored frames instead of Huffman-coded ones")]
    no_compression: bool,

    #[arg(long, help = "Keep monsters wandering so clients see traffic")]
    ambient: bool,

    #[arg(long)]
    headless: bool,

    #[arg(long, help = "Enable global packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

fn parse_game_mode(value: &str) -> Result<GameMode, String> {
    let wanted = value.to_ascii_lowercase().replace(['-', '_'], " ");
    (0..=u8::MAX)
        .map_while(GameMode::from_byte)
        .find(|mode| mode.name() == wanted)
        .ok_or_else(|| format!("unknown game mode '{}'", value))
}

impl Args {
    fn config(&self) -> ServerConfig {
        let packet_loss = self.simulate_packet_loss.then(|| PacketLossSimulation {
            enabled: true,
            loss_percent: self.loss_percent,
            min_latency_ms: self.min_latency,
            max_latency_ms: self.max_latency,
            jitter_ms: self.jitter,
        });

        ServerConfig {
            bind_address: self.bind.clone(),
            port: self.port,
            host_name: self.host_name.clone(),
            motd: self.motd.clone(),
            map: self.map.clone(),
            game_mode: self.game_mode,
            max_clients: self.max_clients,
            max_clients_per_ip: self.max_clients_per_ip,
            max_packet_size: self.max_packet_size,
            force_password: self.password.is_some(),
            password: self.password.clone().unwrap_or_default(),
            ban_file: self.ban_file.clone(),
            compression: !self.no_compression,
            lan_discovery: !self.no_lan,
            packet_loss,
            ..ServerConfig::default()
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut server = Server::new(args.config())?;
    let mut activity = args.ambient.then(Activity::new);

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        log::info!("Server started on {}", server.local_addr());
        run_headless(&mut server, activity.as_mut());
        log::info!("Server shutting down");
    } else {
        run_with_tui(&mut server, activity.as_mut())?;
    }

    Ok(())
}

fn run_headless(server: &mut Server, mut activity: Option<&mut Activity>) {
    let running = server.running();
    while running.load(Ordering::SeqCst) {
        server.tick_once();
        if let Some(activity) = activity.as_deref_mut() {
            activity.update(server);
        }
        for event in server.drain_events() {
            // Lifecycle is already logged by the server itself.
            if let (Severity::Error, message) = events::describe(&event) {
                log::error!("{}", message);
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    server.shutdown_connections();
}

fn run_with_tui(server: &mut Server, mut activity: Option<&mut Activity>) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut tui_state = TuiState::new();
    let mut lossy = Vec::new();
    let mut map_number = 1;

    tui_state.log(
        Severity::Info,
        format!("Server started on {}", server.local_addr()),
    );

    while running.load(Ordering::SeqCst) {
        server.tick_once();
        if let Some(activity) = activity.as_deref_mut() {
            activity.update(server);
        }

        for event in server.drain_events() {
            let (severity, line) = events::describe(&event);
            tui_state.log(severity, line);
        }

        for request in tui_state.take_requests() {
            let target = match request {
                Request::Kick(id) | Request::Ban(id) | Request::ToggleLoss(id) => {
                    match server.resolve(id) {
                        Some(slot) => Some(slot),
                        None => {
                            tui_state.log(Severity::Warn, "That client has already left");
                            continue;
                        }
                    }
                }
                Request::NextMap => None,
            };
            match (request, target) {
                (Request::Kick(_), Some(slot)) => {
                    server.kick(slot, "Kicked by the operator.");
                }
                (Request::Ban(_), Some(slot)) => {
                    server.ban(slot, "Banned by the operator.", 0);
                }
                (Request::ToggleLoss(id), Some(slot)) => {
                    let simulation = if lossy.contains(&id) {
                        lossy.retain(|other| *other != id);
                        PacketLossSimulation::default()
                    } else {
                        lossy.push(id);
                        PacketLossSimulation::lossy(OPERATOR_LOSS_PERCENT)
                    };
                    let enabled = simulation.enabled;
                    if server.set_packet_loss_for(slot, simulation) {
                        tui_state.log(
                            Severity::Info,
                            format!(
                                "Packet loss for client {} {}",
                                slot,
                                if enabled { "on" } else { "off" }
                            ),
                        );
                    }
                }
                (Request::NextMap, _) => {
                    map_number = map_number % 32 + 1;
                    server.change_map(&format!("MAP{:02}", map_number));
                }
                _ => {}
            }
        }

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let clients = server.client_infos();
                    let on_connections = tui_state.active_tab() == Tab::Connections;
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Tab => tui_state.next_tab(),
                        KeyCode::BackTab => tui_state.prev_tab(),
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        KeyCode::Up if on_connections => tui_state.select_prev(),
                        KeyCode::Down if on_connections => tui_state.select_next(clients.len()),
                        KeyCode::Char('k') if on_connections => {
                            tui_state.request_for_selected(&clients, Request::Kick)
                        }
                        KeyCode::Char('b') if on_connections => {
                            tui_state.request_for_selected(&clients, Request::Ban)
                        }
                        KeyCode::Char('l') if on_connections => {
                            tui_state.request_for_selected(&clients, Request::ToggleLoss)
                        }
                        KeyCode::Char('m') => tui_state.request(Request::NextMap),
                        _ => {}
                    }
                }
            }
        }

        let stats = server.stats();
        let clients = server.client_infos();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats, &clients);
        })?;
    }

    tui_state.log(Severity::Info, "Shutting down...");
    server.shutdown_connections();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_mode_names() {
        assert_eq!(parse_game_mode("deathmatch"), Ok(GameMode::Deathmatch));
        assert_eq!(
            parse_game_mode("Capture-The-Flag"),
            Ok(GameMode::CaptureTheFlag)
        );
        assert!(parse_game_mode("tag").is_err());
    }

    #[test]
    fn test_args_map_onto_config() {
        let args = Args::parse_from([
            "replica-server",
            "--port",
            "12000",
            "--password",
            "hunter2",
            "--no-lan",
            "-g",
            "duel",
        ]);
        let config = args.config();
        assert_eq!(config.port, 12000);
        assert!(config.force_password);
        assert_eq!(config.password, "hunter2");
        assert!(!config.lan_discovery);
        assert_eq!(config.game_mode, GameMode::Duel);
        assert!(config.packet_loss.is_none());
        assert!(config.ban_file.is_none());

        let args = Args::parse_from(["replica-server", "--ban-file", "bans.json"]);
        assert_eq!(args.config().ban_file, Some(PathBuf::from("bans.json")));
    }
}
