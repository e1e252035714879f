use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use svcom_runtime::{
    ClientCallbacks, EventId, EventMode, Payload, Runtime, RuntimeConfig, ServiceInstance,
    ServiceState,
};

use crate::cmd::scenario::{self, Provider};
use crate::cmd::{parse_duration, WatchArgs};
use crate::exit::{plugin_error, runtime_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_event, OutputFormat};

const BIND_TIMEOUT: Duration = Duration::from_secs(5);

enum Received {
    State(ServiceState),
    Value(EventId, Payload),
}

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let runtime = Runtime::with_config(RuntimeConfig::default().with_name("svcom-watch"));
    let (host, _registration) = scenario::plugin_host();
    let transform = scenario::transform(&host, &runtime)?;

    let (tx, rx) = channel::unbounded();
    let (state_tx, update_tx) = (tx.clone(), tx);
    let callbacks = ClientCallbacks::new()
        .on_service_state_change(move |_, state, _| {
            let _ = state_tx.send(Received::State(state));
        })
        .on_event_update(move |_, id, payload| {
            let _ = update_tx.send(Received::Value(id, payload));
        })
        .on_requested_event_update(|_, id, _| {
            tracing::debug!(event = id, "ignoring requested value");
        });
    let client = runtime
        .make_client_connector(
            scenario::configuration(),
            ServiceInstance::new(args.instance.as_str()),
            callbacks,
        )
        .map_err(|err| runtime_error("consumer setup failed", err))?;

    let provider = Provider::start(&runtime, &host, &args.instance)?;
    match rx.recv_timeout(BIND_TIMEOUT) {
        Ok(Received::State(ServiceState::Available)) => {}
        Ok(_) | Err(_) => {
            return Err(CliError::new(TIMEOUT, "consumer did not bind to the provider"));
        }
    }
    client
        .subscribe_event(scenario::VALUE_EVENT, EventMode::Update)
        .map_err(|err| runtime_error("subscribe failed", err))?;
    tracing::info!(instance = %args.instance, "watching {}", scenario::interface());

    let interface = scenario::interface().to_string();
    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        provider.publish()?;

        let deadline = Instant::now() + interval;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Received::Value(id, payload)) => {
                    let local = transform
                        .from_wire(&payload)
                        .map_err(|err| plugin_error("decode failed", err))?;
                    print_event(&interface, &args.instance, id, local.data(), format);
                    printed = printed.saturating_add(1);
                    if args.count.is_some_and(|count| printed >= count) {
                        provider.shutdown();
                        return Ok(SUCCESS);
                    }
                }
                Ok(Received::State(state)) => {
                    tracing::warn!(?state, "service state changed while watching");
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Ok(SUCCESS),
            }
            if !running.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    provider.shutdown();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
