//! Headless demo client: joins a relay and walks a fake player in a
//! circle while logging whatever the peers do.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use friendlink::{LoadedState, Location, DEFAULT_CLIENT_PORT, DEFAULT_SERVER_PORT};
use friendlink_client::{read_config, ClientConfig, HostSession, ProxyRef, WorldDriver, CONFIG_FILE};

/// A world made of log lines. Remote proxies are counters; the local
/// player orbits the origin so peers have something to watch.
struct LoggingWorld {
    started: Instant,
    next_proxy: AtomicU64,
}

impl LoggingWorld {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            next_proxy: AtomicU64::new(1),
        }
    }
}

impl WorldDriver for LoggingWorld {
    fn place_proxy(&self) -> ProxyRef {
        let proxy = self.next_proxy.fetch_add(1, Ordering::SeqCst);
        log::info!("placed proxy {proxy}");
        proxy
    }

    fn remove_proxy(&self, proxy: ProxyRef) {
        log::info!("removed proxy {proxy}");
    }

    fn set_name(&self, proxy: ProxyRef, name: &str) {
        log::info!("proxy {proxy} is now \"{name}\"");
    }

    fn translate_to(&self, proxy: ProxyRef, target: &Location, speed: f32) {
        log::info!("proxy {proxy} translating to {target} at {speed:.0} u/s");
    }

    fn change_cell_to(&self, proxy: ProxyRef, target: &Location) {
        log::info!(
            "proxy {proxy} teleported to cell {:#x} at {target}",
            target.cell_id()
        );
    }

    fn cell_attached(&self, _target: &Location) -> bool {
        true
    }

    fn is_interior(&self, _cell_id: u32) -> bool {
        false
    }

    fn local_proxy(&self) -> ProxyRef {
        0
    }

    fn local_name(&self) -> String {
        "Demo".to_string()
    }

    fn local_cell_name(&self) -> String {
        "DemoCell".to_string()
    }

    fn local_world_space_name(&self) -> String {
        "DemoSpace".to_string()
    }

    fn local_location(&self) -> Location {
        let t = self.started.elapsed().as_secs_f32() / 4.0;
        let position = [t.cos() * 500.0, t.sin() * 500.0, 0.0];
        Location::new(Some(1), Some(2), position)
    }

    fn local_loaded_state(&self) -> LoadedState {
        LoadedState::default()
    }

    fn disconnected(&self) {
        log::warn!("server link went down");
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match read_config(Path::new(CONFIG_FILE)) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("no usable {CONFIG_FILE} ({e}), using localhost defaults");
            ClientConfig {
                host: "127.0.0.1".to_string(),
                tcp_port: DEFAULT_CLIENT_PORT,
                udp_port: DEFAULT_SERVER_PORT,
            }
        }
    };

    log::info!(
        "connecting to {}:{} (udp {})",
        config.host,
        config.tcp_port,
        config.udp_port
    );
    let driver = Arc::new(LoggingWorld::new());
    let mut session = HostSession::connect(
        &config.host,
        config.tcp_port,
        config.udp_port,
        driver as Arc<dyn WorldDriver>,
    )?;
    log::info!(
        "joined as slot {} of {}",
        session.my_slot(),
        session.max_players()
    );

    session.start_data_transfer()?;
    while session.is_active() {
        std::thread::sleep(Duration::from_millis(250));
    }
    log::info!("session over");
    Ok(())
}
