//! `taskboard-node`: a task board CLI entry point wiring startup
//! configuration (C11), the board (C7/C8), and the bridge (C9) together.
//! Invalid configuration prints a one-line usage message to stderr and
//! exits non-zero.

use std::process::ExitCode;

use log::{error, info};
use taskboard::board::TaskBoard;
use taskboard::bridge::{AlwaysTrue, Bridge, FanOutAll};
use taskboard::config::Args;
use taskboard::mqtt::RumqttcClient;

fn main() -> ExitCode {
    env_logger::init();

    let config = match Args::parse_and_validate(std::env::args_os()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!(
                "Usage: taskboard-node -a app_id [-t tag] [-g groupid] [-n num] [-p port] [-x executors]"
            );
            return ExitCode::FAILURE;
        }
    };

    info!(
        "starting task board: appid={} port={} executors={}",
        config.appid, config.port, config.num_executors
    );

    let board = match TaskBoard::create(config.num_executors) {
        Ok(b) => b,
        Err(e) => {
            error!("failed to create task board: {e}");
            return ExitCode::FAILURE;
        }
    };
    board.start();

    let client = RumqttcClient::connect(&config.appid, "localhost", config.port);
    let bridge = Bridge::new(
        board.clone(),
        Box::new(client),
        Box::new(FanOutAll {
            tiers: vec!["device".to_string(), "fog".to_string(), "cloud".to_string()],
        }),
        Box::new(AlwaysTrue),
    );

    // A minimal run loop: drain whatever the bridge's receive queue
    // accumulates until killed. Incoming publishes still need to be fed
    // into `board.msg_recv_queue()` by a subscriber task wired up
    // alongside `client`; that glue is deployment-specific and out of
    // scope here (DESIGN.md).
    loop {
        if let Some(cmd) = board.msg_recv_queue().pop_head() {
            bridge.dispatch(cmd);
            continue;
        }
        bridge.drain_outgoing();
        if board.is_shutdown() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    board.kill();
    board.destroy();
    ExitCode::SUCCESS
}
