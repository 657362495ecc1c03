use std::collections::HashMap;
use std::time::{Duration, Instant};

use rlbridge::control::ControlField;
use rlbridge::manager::SyncManager;
use rlbridge::scene::SceneHost;
use rlbridge::vec3::Vector3;
use rlbridge_shared::config::BridgeConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_TICK_HZ: u32 = 60;

/// How often the driver logs a status line
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Turn (degrees) at which steering saturates
const FULL_LOCK_DEGREES: f64 = 45.0;

/// A scene with no renderer: entity moves are kept and logged.
struct LoggingScene {
    names: Vec<&'static str>,
    positions: HashMap<usize, Vector3>,
    headings: HashMap<usize, f64>,
    new_data: u64,
}

impl LoggingScene {
    fn new(names: &[&'static str]) -> Self {
        Self {
            names: names.to_vec(),
            positions: HashMap::new(),
            headings: HashMap::new(),
            new_data: 0,
        }
    }
}

impl SceneHost for LoggingScene {
    type Handle = usize;

    fn entities(&self) -> Vec<usize> {
        (0..self.names.len()).collect()
    }

    fn identity(&self, entity: usize) -> Option<String> {
        self.names.get(entity).map(|name| name.to_string())
    }

    fn set_position(&mut self, entity: usize, position: Vector3) {
        tracing::trace!("{:?} -> {}", self.names.get(entity), position);
        self.positions.insert(entity, position);
    }

    fn set_heading(&mut self, entity: usize, degrees: f64) {
        self.headings.insert(entity, degrees);
    }

    fn stop_scripts(&mut self, entity: usize) {
        tracing::info!("Stopping scripts on {:?}", self.names.get(entity));
    }

    fn broadcast_new_data(&mut self) {
        self.new_data += 1;
    }
}

fn tick_rate() -> u32 {
    match std::env::var("RLBRIDGE_TICK_HZ") {
        Ok(raw) => match raw.parse::<u32>() {
            Ok(hz) if hz > 0 => hz,
            _ => {
                eprintln!("Ignoring invalid RLBRIDGE_TICK_HZ={:?}", raw);
                DEFAULT_TICK_HZ
            }
        },
        Err(_) => DEFAULT_TICK_HZ,
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = BridgeConfig::default();
    if let Some(host) = std::env::args().nth(1) {
        config.host = host;
    }

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        eprintln!("Invalid bridge configuration: {}", e);
        std::process::exit(1);
    }

    let tick = Duration::from_secs_f64(1.0 / tick_rate() as f64);
    let scene = LoggingScene::new(&["ball", "player-1", "player-2"]);

    tracing::info!("Starting bridge to {}", config.endpoint());
    let mut manager = SyncManager::connect(config, scene);
    let mut connectivity = manager.events().subscribe_connectivity();

    manager.filter_player(0, true);

    let mut last_status = Instant::now();
    loop {
        let started = Instant::now();
        manager.poll(started);

        while let Ok(connected) = connectivity.try_recv() {
            tracing::info!("Simulator link {}", if connected { "up" } else { "down" });
        }

        if manager.snapshot().is_some() {
            let ball = manager.get_ball_location();
            let turn = manager.degrees_to(0, ball);
            manager.update_controller_state(0, ControlField::Throttle, 1.0);
            manager.update_controller_state(
                0,
                ControlField::Steer,
                (turn / FULL_LOCK_DEGREES).clamp(-1.0, 1.0),
            );
            manager.update_controller_state(
                0,
                ControlField::Boost,
                if turn.abs() < 10.0 { 1.0 } else { 0.0 },
            );
        }
        manager.step();

        if started.duration_since(last_status) >= STATUS_INTERVAL {
            last_status = started;
            let scene = manager.host();
            tracing::info!(
                "frames={} decode_errors={} new_data={} ball={:?} player1={:?} heading={:?}",
                manager.frames_received(),
                manager.decode_errors(),
                scene.new_data,
                scene.positions.get(&0).map(|p| p.to_string()),
                scene.positions.get(&1).map(|p| p.to_string()),
                scene.headings.get(&1),
            );
        }

        if let Some(remaining) = tick.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
}
