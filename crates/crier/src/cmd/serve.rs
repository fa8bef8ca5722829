use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cmd::{build_node, ServeArgs};
use crate::exit::{node_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let node = build_node(&args.net, None, true);
    node.start_server(None, None)
        .map_err(|err| node_error("broadcaster start failed", err))?;

    println!(
        "broadcasting on {}:{} (fan-out {})",
        args.net.address,
        args.net.port,
        args.net.port + 1
    );

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    node.stop();
    Ok(SUCCESS)
}
