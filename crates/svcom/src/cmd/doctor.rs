use std::time::Duration;

use crossbeam::channel;
use serde::Serialize;
use svcom_payload::PayloadMut;
use svcom_runtime::{
    ClientCallbacks, ConstructionError, Error, Payload, PosixCredentials, Runtime, RuntimeConfig,
    ServerCallbacks, ServiceInstance, ServiceState,
};

use crate::cmd::scenario::{self, Provider};
use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, OutputFormat};

const CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const INSTANCE: &str = "doctor";

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }

    fn from_outcome(name: &str, outcome: Result<String, String>) -> Self {
        match outcome {
            Ok(detail) => Self::new(name, CheckStatus::Pass, detail),
            Err(detail) => Self::new(name, CheckStatus::Fail, detail),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    schema_id: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        CheckResult::from_outcome("payload_layout", payload_layout_check()),
        CheckResult::from_outcome("transform_plugin", transform_check()),
        CheckResult::from_outcome("runtime_loopback", loopback_check()),
        CheckResult::from_outcome("duplicate_service", duplicate_service_check()),
        credentials_check(),
        compiled_features_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        schema_id: "https://schemas.3leaps.dev/svcom/cli/v1/doctor-report.schema.json",
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("svcom doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<20} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => println!("{}", output.overall),
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
    }
}

fn doctor_runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig::default().with_name("svcom-doctor"))
}

fn payload_layout_check() -> Result<String, String> {
    let mut buffer = PayloadMut::zeroed(8, 4, 0);
    buffer.header_mut().copy_from_slice(b"HDR!");
    buffer.extend_from_slice(b"data");
    let payload = buffer.freeze();

    if payload.lead().len() != 8 || payload.header() != b"HDR!" || payload.data() != b"data" {
        return Err(format!("unexpected layout {:?}", payload.layout()));
    }
    Ok("lead, header and data sections line up".to_string())
}

fn transform_check() -> Result<String, String> {
    let runtime = doctor_runtime();
    let (host, _registration) = scenario::plugin_host();
    let transform = scenario::transform(&host, &runtime).map_err(|err| err.to_string())?;
    let wire = scenario::encode(transform.as_ref(), 42).map_err(|err| err.to_string())?;
    match scenario::decode(transform.as_ref(), &wire) {
        Ok(42) => Ok(format!("{} round trip succeeded", scenario::TRANSFORM)),
        Ok(other) => Err(format!("decoded {other} instead of 42")),
        Err(err) => Err(err.to_string()),
    }
}

fn loopback_check() -> Result<String, String> {
    let runtime = doctor_runtime();
    let (host, _registration) = scenario::plugin_host();

    let (tx, rx) = channel::unbounded();
    let callbacks = ClientCallbacks::new()
        .on_service_state_change(move |_, state, _| {
            let _ = tx.send(state);
        })
        .on_event_update(|_, _, _| {})
        .on_requested_event_update(|_, _, _| {});
    let client = runtime
        .make_client_connector(
            scenario::configuration(),
            ServiceInstance::new(INSTANCE),
            callbacks,
        )
        .map_err(|err| format!("client setup failed: {err}"))?;

    let provider = Provider::start(&runtime, &host, INSTANCE).map_err(|err| err.to_string())?;
    match rx.recv_timeout(CHECK_TIMEOUT) {
        Ok(ServiceState::Available) => {}
        Ok(state) => return Err(format!("client reported {state:?}")),
        Err(_) => return Err("client did not bind to the local provider".to_string()),
    }

    let (reply_tx, reply_rx) = channel::bounded(1);
    let _invocation = client
        .call_method(
            scenario::ECHO_METHOD,
            Payload::from("ping"),
            move |result| {
                let _ = reply_tx.send(result);
            },
        )
        .map_err(|err| format!("call failed: {err}"))?;
    let result = reply_rx
        .recv_timeout(CHECK_TIMEOUT)
        .map_err(|_| "no reply within 2s".to_string())?;
    provider.shutdown();

    match result {
        svcom_runtime::MethodResult::Return(payload) if payload.data() == b"ping" => {
            Ok("bind, call and reply succeeded".to_string())
        }
        other => Err(format!("unexpected reply {other:?}")),
    }
}

fn duplicate_service_check() -> Result<String, String> {
    let runtime = doctor_runtime();
    let (host, _registration) = scenario::plugin_host();
    let _provider = Provider::start(&runtime, &host, INSTANCE).map_err(|err| err.to_string())?;

    let callbacks = ServerCallbacks::new()
        .on_method_call(|_, _| None)
        .on_event_subscription_change(|_, _, _| {})
        .on_event_update_request(|_, _| {});
    match runtime.make_server_connector(
        scenario::configuration(),
        ServiceInstance::new(INSTANCE),
        callbacks,
    ) {
        Err(Error::Construction(ConstructionError::DuplicateService)) => {
            Ok("second provider was refused".to_string())
        }
        Err(err) => Err(format!("unexpected error: {err}")),
        Ok(_) => Err("second provider was accepted".to_string()),
    }
}

fn credentials_check() -> CheckResult {
    let creds = PosixCredentials::current();
    CheckResult::new(
        "credentials",
        CheckStatus::Info,
        format!("uid={} gid={} pid={}", creds.uid, creds.gid, creds.pid),
    )
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "plugin") {
        features.push("plugin");
    }
    if cfg!(feature = "serde") {
        features.push("serde");
    }
    if cfg!(feature = "async") {
        features.push("async");
    }
    if cfg!(feature = "cli") {
        features.push("cli");
    }
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}
