//! The command server. An acceptor thread owns the listener and feeds
//! accepted sockets into a bounded channel; a fixed pool of worker
//! threads drains it, one request per connection.

use crate::config::Config;
use crate::error::DomeError;
use crate::motion::{pulses, wrap, MotionController};
use crate::protocol::{parse_command, Command, GotoArgument, Response};
use crate::state::DomeState;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};

pub struct Server {
    state: Arc<DomeState>,
    motion: Arc<MotionController>,
    config_path: PathBuf,
}

impl Server {
    pub fn new(state: Arc<DomeState>, motion: Arc<MotionController>, config_path: PathBuf) -> Arc<Self> {
        Arc::new(Server {
            state,
            motion,
            config_path,
        })
    }

    pub fn run(self: Arc<Self>) -> std::io::Result<()> {
        let config = self.state.config();
        let listener = TcpListener::bind(("0.0.0.0", config.server.server_port))?;
        log::info!(
            "listening on {} (max_connections={}, client_threads={})",
            listener.local_addr()?,
            config.server.max_connections,
            config.server.client_threads
        );

        let (sender, receiver): (SyncSender<TcpStream>, Receiver<TcpStream>) =
            sync_channel(config.server.max_queue_size);
        let receiver = Arc::new(Mutex::new(receiver));

        for id in 0..config.server.client_threads {
            let server = self.clone();
            let receiver = receiver.clone();
            std::thread::Builder::new()
                .name(format!("koepelx-worker-{id}"))
                .spawn(move || server.worker_loop(&receiver))
                .expect("failed to spawn worker thread");
        }

        self.acceptor_loop(listener, sender)
    }

    fn acceptor_loop(&self, listener: TcpListener, sender: SyncSender<TcpStream>) -> std::io::Result<()> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if let Ok(peer) = stream.peer_addr() {
                        log::info!("connection received from {peer}");
                    }
                    if sender.send(stream).is_err() {
                        break;
                    }
                }
                Err(err) => log::error!("accept failed: {err}"),
            }
        }
        Ok(())
    }

    fn worker_loop(&self, receiver: &Mutex<Receiver<TcpStream>>) {
        loop {
            let stream = {
                let receiver = receiver.lock().expect("worker queue poisoned");
                receiver.recv()
            };
            match stream {
                Ok(stream) => self.handle_connection(stream),
                Err(_) => break,
            }
        }
    }

    fn handle_connection(&self, mut stream: TcpStream) {
        let peer = stream.peer_addr().ok();
        let buffer_size = self.state.config().server.buffer_size;
        let mut buf = vec![0u8; buffer_size];
        let read = match stream.read(&mut buf) {
            Ok(0) => {
                if let Some(peer) = peer {
                    log::info!("connection with {} lost", peer.ip());
                }
                return;
            }
            Ok(n) => n,
            Err(err) => {
                log::error!("error reading request: {err}");
                return;
            }
        };
        let request = String::from_utf8_lossy(&buf[..read]);
        if let Some(peer) = peer {
            log::info!("command given from {}: {}", peer.ip(), request.trim());
        }

        let response = self.handle_request(request.trim_end());

        if let Some(peer) = peer {
            log::info!(
                "returned to {}: {}, code: {}",
                peer.ip(),
                response.message,
                response.code
            );
        }
        let _ = stream.write_all(response.render().as_bytes());
    }

    pub fn handle_request(&self, request: &str) -> Response {
        match parse_command(request) {
            Ok(command) => self.dispatch(command),
            Err(DomeError::BadArgument(arg)) => {
                Response::new(0, format!("Invalid degree number: {arg}"))
            }
            Err(_) => Response::new(0, "Command doesn't exist"),
        }
    }

    fn dispatch(&self, command: Command) -> Response {
        match command {
            Command::Position => {
                let config = self.state.config();
                let full_circle = pulses(360.0, config.encoder.pulses_per_degree);
                let wrapped = wrap(self.state.current_pos(), full_circle);
                let degrees = (wrapped as f64 / config.encoder.pulses_per_degree) as i64;
                Response::new(degrees, format!("The current position is {degrees}"))
            }
            Command::PulsePosition => {
                let pos = self.state.current_pos();
                Response::new(pos, format!("The current position in pulses is {pos}"))
            }
            Command::DomeBusy => {
                let busy = self.state.is_busy();
                Response::new(busy as i64, busy.to_string())
            }
            Command::Goto(argument) => {
                let config = self.state.config();
                let target_degrees = match argument {
                    GotoArgument::Absolute(degrees) => degrees,
                    GotoArgument::Relative(delta) => {
                        self.state.current_pos() as f64 / config.encoder.pulses_per_degree + delta
                    }
                };
                if self.motion.request_goto(target_degrees) {
                    Response::new(1, format!("Moving dome to {}.", target_degrees as i64))
                } else {
                    Response::new(0, "Dome is busy")
                }
            }
            Command::Calibrate => {
                if self.motion.request_calibrate() {
                    Response::new(1, "Calibrating dome.")
                } else {
                    Response::new(0, "Dome is busy")
                }
            }
            Command::Left => {
                if self.motion.command_left() {
                    Response::new(1, "Moving dome to left.")
                } else {
                    Response::new(0, "Dome is busy")
                }
            }
            Command::Right => {
                if self.motion.command_right() {
                    Response::new(1, "Moving dome to right.")
                } else {
                    Response::new(0, "Dome is busy")
                }
            }
            Command::Stop => {
                self.motion.stop();
                Response::new(1, "Movement cleared.")
            }
            Command::Track => {
                if self.motion.request_track() {
                    Response::new(1, "Tracking telescope.")
                } else {
                    Response::new(0, "Dome is busy")
                }
            }
            Command::UpdateConfig => match self.reload_config() {
                Ok(()) => Response::new(1, "Config file read."),
                Err(err) => {
                    log::error!("error reading config file: {err}");
                    Response::new(0, "Error in reading config file")
                }
            },
        }
    }

    fn reload_config(&self) -> Result<(), DomeError> {
        let config = Config::load(&self.config_path)?;
        self.state.set_config(config);
        log::info!("config file read");
        Ok(())
    }
}
