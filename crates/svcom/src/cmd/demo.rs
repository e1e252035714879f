use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use svcom_plugin::PayloadTransform;
use svcom_runtime::{
    ClientCallbacks, ClientConnector, EventMode, Payload, Runtime, RuntimeConfig,
    ServiceInstance, ServiceState,
};

use crate::cmd::scenario::{self, Provider};
use crate::cmd::{parse_duration, DemoArgs};
use crate::exit::{runtime_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_json, print_table, OutputFormat};

const INSTANCE: &str = "demo";

#[derive(Debug)]
enum Observed {
    State(ServiceState),
    Initial(Payload),
    Update(usize, Payload),
    Reply(bool),
    Found(usize),
}

#[derive(Debug, Default)]
struct Tally {
    available: usize,
    not_available: usize,
    initial_values: usize,
    updates_received: usize,
    out_of_order: usize,
    malformed: usize,
    replies: usize,
    replies_ok: usize,
    found_now: usize,
    found_peak: usize,
    last_value: Vec<u64>,
}

impl Tally {
    fn new(clients: usize) -> Self {
        Self {
            last_value: vec![0; clients],
            ..Self::default()
        }
    }

    fn apply(&mut self, observed: Observed, transform: &dyn PayloadTransform) {
        match observed {
            Observed::State(ServiceState::Available) => self.available += 1,
            Observed::State(ServiceState::NotAvailable) => self.not_available += 1,
            Observed::Initial(payload) => match scenario::decode(transform, &payload) {
                Ok(_) => self.initial_values += 1,
                Err(_) => self.malformed += 1,
            },
            Observed::Update(index, payload) => match scenario::decode(transform, &payload) {
                Ok(value) => {
                    self.updates_received += 1;
                    if let Some(last) = self.last_value.get_mut(index) {
                        if value != *last + 1 {
                            self.out_of_order += 1;
                        }
                        *last = value;
                    }
                }
                Err(_) => self.malformed += 1,
            },
            Observed::Reply(ok) => {
                self.replies += 1;
                if ok {
                    self.replies_ok += 1;
                }
            }
            Observed::Found(count) => {
                self.found_now = count;
                self.found_peak = self.found_peak.max(count);
            }
        }
    }
}

/// Drains observations into a [`Tally`] until a step completes.
struct Observer {
    rx: Receiver<Observed>,
    transform: Box<dyn PayloadTransform>,
    timeout: Duration,
    tally: Tally,
}

impl Observer {
    fn wait(&mut self, step: &str, done: impl Fn(&Tally) -> bool) -> CliResult<()> {
        let deadline = Instant::now() + self.timeout;
        while !done(&self.tally) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(observed) => self.tally.apply(observed, self.transform.as_ref()),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("timed out waiting for {step}"),
                    ))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CliError::new(
                        FAILURE,
                        format!("observers went away while waiting for {step}"),
                    ))
                }
            }
        }
        tracing::debug!(step, "demo step complete");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct DemoReport {
    schema_id: &'static str,
    interface: String,
    instance: &'static str,
    clients: usize,
    initial_values: usize,
    updates_published: u64,
    updates_received: usize,
    updates_in_order: bool,
    calls_made: usize,
    calls_succeeded: usize,
    instances_found: usize,
    disconnects_seen: usize,
    malformed_payloads: usize,
    elapsed_ms: u64,
    outcome: &'static str,
}

pub fn run(args: DemoArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let started = Instant::now();
    let clients = usize::from(args.clients);

    let runtime = Runtime::with_config(RuntimeConfig::default().with_name("svcom-demo"));
    let (host, _registration) = scenario::plugin_host();
    let (tx, rx) = channel::unbounded();
    let mut observer = Observer {
        rx,
        transform: scenario::transform(&host, &runtime)?,
        timeout,
        tally: Tally::new(clients),
    };

    let found = tx.clone();
    let _find = runtime.subscribe_find_service(
        move |instances: &[ServiceInstance]| {
            let _ = found.send(Observed::Found(instances.len()));
        },
        scenario::interface(),
        None,
    );

    let consumers = (0..clients)
        .map(|index| consumer(&runtime, index, &tx))
        .collect::<CliResult<Vec<_>>>()?;

    let provider = Provider::start(&runtime, &host, INSTANCE)?;
    observer.wait("consumers to bind", |t| {
        t.available == clients && t.found_now == 1
    })?;

    for client in &consumers {
        client
            .subscribe_event(scenario::VALUE_EVENT, EventMode::UpdateAndInitialValue)
            .map_err(|err| runtime_error("subscribe failed", err))?;
    }
    observer.wait("initial values", |t| t.initial_values + t.malformed >= clients)?;

    for _ in 0..args.updates {
        provider.publish()?;
    }
    let expected_updates = clients * args.updates as usize;
    observer.wait("event updates", |t| {
        t.updates_received >= expected_updates || t.malformed > 0
    })?;

    let mut invocations = Vec::new();
    for (index, client) in consumers.iter().enumerate() {
        for call in 0..args.calls {
            let reply = tx.clone();
            let invocation = client
                .call_method(
                    scenario::ECHO_METHOD,
                    Payload::from(format!("ping-{index}-{call}").into_bytes()),
                    move |result| {
                        let _ = reply.send(Observed::Reply(result.is_return()));
                    },
                )
                .map_err(|err| runtime_error("call failed", err))?;
            invocations.push(invocation);
        }
    }
    let calls_made = invocations.len();
    observer.wait("method replies", |t| t.replies == calls_made)?;
    drop(invocations);

    let updates_published = provider.current();
    provider.shutdown();
    observer.wait("consumers to unbind", |t| {
        t.not_available == clients && t.found_now == 0
    })?;
    drop(consumers);

    let tally = &observer.tally;
    let passed = tally.initial_values == clients
        && tally.updates_received == expected_updates
        && tally.out_of_order == 0
        && tally.malformed == 0
        && tally.replies_ok == calls_made;

    let report = DemoReport {
        schema_id: "https://schemas.3leaps.dev/svcom/cli/v1/demo-report.schema.json",
        interface: scenario::interface().to_string(),
        instance: INSTANCE,
        clients,
        initial_values: tally.initial_values,
        updates_published,
        updates_received: tally.updates_received,
        updates_in_order: tally.out_of_order == 0,
        calls_made,
        calls_succeeded: tally.replies_ok,
        instances_found: tally.found_peak,
        disconnects_seen: tally.not_available,
        malformed_payloads: tally.malformed,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        outcome: if passed { "pass" } else { "fail" },
    };
    print_report(&report, format);

    Ok(if passed { SUCCESS } else { FAILURE })
}

fn consumer(runtime: &Runtime, index: usize, tx: &Sender<Observed>) -> CliResult<ClientConnector> {
    let (state, update, requested) = (tx.clone(), tx.clone(), tx.clone());
    let callbacks = ClientCallbacks::new()
        .on_service_state_change(move |_, service_state, _| {
            let _ = state.send(Observed::State(service_state));
        })
        .on_event_update(move |_, _, payload| {
            let _ = update.send(Observed::Update(index, payload));
        })
        .on_requested_event_update(move |_, _, payload| {
            let _ = requested.send(Observed::Initial(payload));
        });
    runtime
        .make_client_connector(
            scenario::configuration(),
            ServiceInstance::new(INSTANCE),
            callbacks,
        )
        .map_err(|err| runtime_error("consumer setup failed", err))
}

fn print_report(report: &DemoReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => print_table(&["CHECK", "VALUE"], report_rows(report)),
        OutputFormat::Pretty => {
            println!("svcom demo\n");
            for [key, value] in report_rows(report) {
                println!("  {key:<20} {value}");
            }
        }
        OutputFormat::Raw => println!("{}", report.outcome),
    }
}

fn report_rows(report: &DemoReport) -> Vec<[String; 2]> {
    let rows: [(&str, String); 13] = [
        ("interface", report.interface.clone()),
        ("instance", report.instance.to_string()),
        ("clients", report.clients.to_string()),
        ("initial values", report.initial_values.to_string()),
        ("updates published", report.updates_published.to_string()),
        ("updates received", report.updates_received.to_string()),
        ("updates in order", report.updates_in_order.to_string()),
        (
            "calls",
            format!("{}/{}", report.calls_succeeded, report.calls_made),
        ),
        ("instances found", report.instances_found.to_string()),
        ("disconnects seen", report.disconnects_seen.to_string()),
        ("malformed payloads", report.malformed_payloads.to_string()),
        ("elapsed", format!("{} ms", report.elapsed_ms)),
        ("outcome", report.outcome.to_string()),
    ];
    rows.into_iter()
        .map(|(key, value)| [key.to_string(), value])
        .collect()
}
