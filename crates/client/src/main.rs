mod bot;

use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;

use bot::{STEP_INTERVAL, Wanderer};
use replica::server::QUERY_PLAYERS;
use replica::{
    ClientConfig, ClientEvent, ClientPhase, ClientSession, PacketLossSimulation, TICK_DURATION,
    TICRATE, query_server,
};

/// Seconds between status lines.
const STATUS_INTERVAL: u32 = 5;

#[derive(Parser)]
#[command(name = "replica-client")]
#[command(about = "Headless Replica client")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:10666",
        help = "Server address to connect to"
    )]
    server: String,

    #[arg(short, long, default_value = "Player")]
    name: String,

    #[arg(long, default_value = "")]
    password: String,

    #[arg(long)]
    spectate: bool,

    #[arg(long, help = "Do not take back scores from an earlier visit")]
    no_restore_frags: bool,

    #[arg(long, help = "Send stored frames instead of Huffman-coded ones")]
    no_compression: bool,

    #[arg(long, help = "Stay disconnected when the server asks us to reconnect")]
    no_reconnect: bool,

    #[arg(long, help = "Walk around once spawned")]
    wander: bool,

    #[arg(long, help = "Disconnect after this many seconds")]
    seconds: Option<u64>,

    #[arg(long, help = "Print the server's launcher summary and exit")]
    query: bool,

    #[arg(long, default_value_t = 0.0, help = "Outgoing packet loss percentage (0-100)")]
    loss_percent: f32,
}

impl Args {
    fn server_addr(&self) -> Result<SocketAddr> {
        self.server
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve {}", self.server))?
            .next()
            .with_context(|| format!("no address for {}", self.server))
    }

    fn config(&self, server: SocketAddr) -> ClientConfig {
        let mut config = ClientConfig::new(server).with_name(&self.name);
        config.password = self.password.clone();
        config.spectate = self.spectate;
        config.no_restore_frags = self.no_restore_frags;
        config.compression = !self.no_compression;
        config.auto_reconnect = !self.no_reconnect;
        if self.loss_percent > 0.0 {
            config.packet_loss = Some(PacketLossSimulation::lossy(self.loss_percent));
        }
        config
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let server = args.server_addr()?;

    if args.query {
        return query(server);
    }
    run(&args, server)
}

fn query(server: SocketAddr) -> Result<()> {
    let Some(info) = query_server(server, QUERY_PLAYERS, Duration::from_secs(2))? else {
        bail!("no answer from {}", server);
    };
    println!("{} ({})", info.host_name, server);
    println!(
        "  {} on {}, {}/{} players{}",
        info.game_mode.name(),
        info.map,
        info.player_count,
        info.max_clients,
        if info.passworded { ", passworded" } else { "" }
    );
    if !info.is_compatible() {
        println!("  version {} (incompatible)", info.version);
    }
    for player in &info.players {
        println!(
            "  {:<20} {:>4} frags {:>4}ms{}",
            player.name,
            player.frags,
            player.ping,
            if player.spectating { " (spectating)" } else { "" }
        );
    }
    Ok(())
}

fn run(args: &Args, server: SocketAddr) -> Result<()> {
    let mut session = ClientSession::connect(args.config(server))?;
    let mut wanderer = args.wander.then(Wanderer::new);
    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));

    let mut tick: u32 = 0;
    let mut next_tick = Instant::now();
    let mut printed = 0;

    loop {
        session.poll()?;

        if Instant::now() >= next_tick {
            next_tick += TICK_DURATION;
            tick = tick.wrapping_add(1);
            session.tick()?;

            if let Some(wanderer) = wanderer.as_mut() {
                if *session.phase() == ClientPhase::Spawned && tick % STEP_INTERVAL == 0 {
                    if let Some((position, angle)) = wanderer.next_move(session.state()) {
                        session.move_to(position, angle)?;
                    }
                }
            }
            if tick % (STATUS_INTERVAL * TICRATE) == 0 {
                report(&session);
            }
        }

        for event in session.drain_events() {
            match event {
                ClientEvent::Reconnecting => {
                    if let Some(wanderer) = wanderer.as_mut() {
                        wanderer.reset();
                    }
                }
                ClientEvent::MissingRequested { sequences } => {
                    log::debug!("Asked for {} missing packet(s)", sequences.len());
                }
                other => log::debug!("{:?}", other),
            }
        }

        let messages = &session.state().messages;
        for (_, text) in messages.iter().skip(printed) {
            log::info!("> {}", text);
        }
        printed = messages.len();

        match session.phase() {
            ClientPhase::Refused(error) => bail!("refused: {}", error),
            ClientPhase::Kicked(reason) => bail!("kicked: {}", reason),
            ClientPhase::Disconnected => bail!("lost the server"),
            _ => {}
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            session.quit()?;
            log::info!("Disconnected");
            return Ok(());
        }

        thread::sleep(Duration::from_millis(1));
    }
}

fn report(session: &ClientSession) {
    let state = session.state();
    let stats = session.stats();
    log::info!(
        "{:?} on {}: {} players, {} actors, {} effects, {} reliable / {} unreliable applied, {} resend requests",
        session.phase(),
        state.world.level.name,
        state.world.player_count(),
        state.world.actor_count(),
        state.world.unnamed_count(),
        stats.reliable_applied,
        stats.unreliable_applied,
        stats.missing_requests
    );
}
