use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cmd::{build_node, ListenArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ListenArgs) -> CliResult<i32> {
    let node = build_node(&args.net, args.id.as_deref(), !args.no_server);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    let topic = args.topic.clone();

    let mut builder = node.on(&args.topic);
    if let Some(sender) = &args.sender {
        builder = builder.sender(sender.clone());
    }
    let _subscription = builder.connect(move |payload| {
        let json = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
        println!("{topic} {json}");
        counter.fetch_add(1, Ordering::SeqCst);
    });

    while running.load(Ordering::SeqCst) {
        if let Some(count) = args.count {
            if received.load(Ordering::SeqCst) >= count {
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    node.stop();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
