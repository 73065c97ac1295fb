//! Tamagotchi P1 WebSocket bridge.
//!
//! Serves the emulator to browser clients over WebSocket: screen frames,
//! buzzer state, engine logs and state saves go out as JSON broadcasts;
//! button presses, execution control and ROM/state uploads come back in.
//!
//! The ROM comes from `--rom` or, when absent, from the first client that
//! sends a `rom` message.

mod transport;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use tama_ws_core::{
    rom, BridgeConfig, BridgeContext, Dispatcher, HardwareSink, IdleCore, LogLevel, Outbound,
};

use transport::{ClientHub, Server};

#[derive(Parser, Debug)]
#[command(name = "tama-ws", version, about = "Tamagotchi P1 emulator WebSocket bridge")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "TAMA_WS_HOST", default_value = "127.0.0.1")]
    host: String,

    /// WebSocket port
    #[arg(long, env = "TAMA_WS_PORT", default_value_t = 8080)]
    port: u16,

    /// ROM image file; without it the server waits for a client to upload one
    #[arg(long)]
    rom: Option<PathBuf>,

    /// Seconds to wait for an uploaded ROM (waits forever when omitted)
    #[arg(long, value_name = "SECS")]
    rom_timeout: Option<u64>,

    /// Least severe engine log category forwarded to clients
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    engine_log: LogLevel,

    /// Outbound messages buffered per client before frames are dropped
    #[arg(long, value_name = "N", default_value_t = 64)]
    queue_depth: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let ctx = Arc::new(BridgeContext::new());
    let hub = Arc::new(ClientHub::new(cli.queue_depth));
    let config = BridgeConfig { log_level: cli.engine_log };
    let mut outbound = Outbound::new(ctx.clone(), hub.clone(), config);
    let dispatcher = Dispatcher::new(ctx.clone());

    let server = match Server::bind(&cli.host, cli.port) {
        Ok(s) => s,
        Err(e) => {
            error!("cannot listen on {}:{}: {}", cli.host, cli.port, e);
            return ExitCode::FAILURE;
        }
    };
    let addr = server.local_addr();
    let sessions = server.spawn(hub.clone(), outbound.clone(), dispatcher);

    let program = match &cli.rom {
        Some(path) => {
            info!("Loading ROM from {}", path.display());
            rom::load_file(path)
        }
        None => {
            info!("Waiting for a client on ws://{} to upload a ROM", addr);
            rom::wait_for_wire_rom(&ctx, cli.rom_timeout.map(Duration::from_secs))
        }
    };
    let program = match program {
        Ok(p) => p,
        Err(e) => {
            error!("ROM unavailable: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut core = IdleCore::new(program);
    core.run(&mut outbound);
    outbound.halt();

    hub.close_all();
    let handles: Vec<_> = {
        let mut sessions = sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.drain(..).collect()
    };
    for handle in handles {
        let _ = handle.join();
    }
    info!("Bridge stopped after {} ticks", core.ticks());
    ExitCode::SUCCESS
}
