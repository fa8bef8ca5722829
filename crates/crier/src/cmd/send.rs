use crier_frame::Payload;

use crate::cmd::{build_node, SendArgs};
use crate::exit::{node_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let node = build_node(&args.net, args.id.as_deref(), !args.no_server);

    let payload = resolve_payload(args.json.as_deref())?;
    let delivered = node
        .send(&args.topic, payload)
        .map_err(|err| node_error("send failed", err))?;

    if delivered {
        Ok(SUCCESS)
    } else {
        eprintln!("no acknowledgment from a broadcaster");
        Ok(TIMEOUT)
    }
}

fn resolve_payload(json: Option<&str>) -> CliResult<Payload> {
    match json {
        Some(json) => serde_json::from_str::<Payload>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not a JSON object: {err}"))),
        None => Ok(Payload::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_payload_accepts_objects() {
        let payload = resolve_payload(Some("{\"n\": 7}")).unwrap();
        assert_eq!(payload.get("n"), Some(&serde_json::json!(7)));
    }

    #[test]
    fn resolve_payload_rejects_non_objects() {
        assert!(resolve_payload(Some("[1, 2]")).is_err());
        assert!(resolve_payload(Some("not json")).is_err());
    }

    #[test]
    fn resolve_payload_defaults_to_empty() {
        assert!(resolve_payload(None).unwrap().is_empty());
    }
}
