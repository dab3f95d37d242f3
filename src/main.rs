//! KoepelX: the observatory dome controller daemon. Reads the quadrature
//! encoder, drives the motor relays, and serves a line-oriented TCP command
//! protocol to one or more clients.

use clap::Parser;
use koepelx::config::Config;
use koepelx::motion::{spawn_dispatcher, MotionController};
use koepelx::port::{self, LinuxParallelPort};
use koepelx::position::{spawn_tracker, PositionStore};
use koepelx::server::Server;
use koepelx::state::DomeState;
use koepelx::telescope_link::TcpTelescopeLink;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = "KOEPELX_CONFIG", default_value = "koepelx.toml")]
    config: PathBuf,

    #[arg(long, env = "KOEPELX_PARALLEL_PORT", default_value = "/dev/port")]
    parallel_port: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to read config file {}: {err}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    let port: Arc<dyn port::ParallelPort> =
        match LinuxParallelPort::open(&args.parallel_port, config.port) {
            Ok(port) => Arc::new(port),
            Err(err) => {
                log::error!("cannot open parallel port {}: {err}", args.parallel_port);
                return ExitCode::FAILURE;
            }
        };

    let position_path = PathBuf::from(&config.server.current_pos_file);
    let (store, initial_pos) = match PositionStore::open(&position_path, &config) {
        Ok(result) => result,
        Err(err) => {
            log::error!("cannot open position file {}: {err}", position_path.display());
            return ExitCode::FAILURE;
        }
    };

    let telescope = Arc::new(TcpTelescopeLink::new(config.telescope.clone()));
    let state = DomeState::new(config, initial_pos);
    let motion = Arc::new(MotionController::new(port.clone(), state.clone(), telescope));

    let tracker = spawn_tracker(port, state.clone(), store);
    spawn_dispatcher(motion.clone());

    let server = Server::new(state, motion, args.config.clone());
    std::thread::Builder::new()
        .name("koepelx-server".to_string())
        .spawn(move || {
            if let Err(err) = server.run() {
                log::error!("command server failed: {err}");
            }
        })
        .expect("failed to spawn server thread");

    match tracker.join() {
        Ok(Ok(())) => {
            log::error!("tracker thread exited cleanly, which should never happen");
            ExitCode::FAILURE
        }
        Ok(Err(err)) => {
            log::error!("tracker thread failed, shutting down: {err}");
            ExitCode::FAILURE
        }
        Err(_) => {
            log::error!("tracker thread panicked, shutting down");
            ExitCode::FAILURE
        }
    }
}
