use std::sync::Arc;

use crier_bus::EventBus;
use crier_node::{Peer, Timing};

use crate::cmd::{parse_duration, CheckArgs};
use crate::exit::{node_error, CliResult, FAILURE, SUCCESS};

pub fn run(args: CheckArgs) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;

    let bus = Arc::new(EventBus::new());
    let peer = Peer::new(bus, &args.net.address, args.net.port, Timing::default())
        .map_err(|err| node_error("probe setup failed", err))?;

    if peer.probe(timeout) {
        println!(
            "broadcaster alive at {}:{}",
            args.net.address, args.net.port
        );
        Ok(SUCCESS)
    } else {
        eprintln!(
            "no broadcaster at {}:{} within {}",
            args.net.address, args.net.port, args.timeout
        );
        Ok(FAILURE)
    }
}
