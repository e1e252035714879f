use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table<I, R>(header: &[&str], rows: I)
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = String>,
{
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for row in rows {
        table.add_row(row.into_iter().collect::<Vec<_>>());
    }
    println!("{table}");
}

#[derive(Serialize)]
struct EventOutput<'a> {
    schema_id: &'a str,
    interface: &'a str,
    instance: &'a str,
    event: u16,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

/// Print one received event value.
pub fn print_event(interface: &str, instance: &str, event: u16, data: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&EventOutput {
            schema_id: "https://schemas.3leaps.dev/svcom/cli/v1/event-received.schema.json",
            interface,
            instance,
            event,
            payload_size: data.len(),
            payload: payload_preview(data),
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => print_table(
            &["INTERFACE", "INSTANCE", "EVENT", "SIZE", "PAYLOAD"],
            [vec![
                interface.to_string(),
                instance.to_string(),
                event.to_string(),
                data.len().to_string(),
                payload_preview(data),
            ]],
        ),
        OutputFormat::Pretty => println!(
            "{interface}/{instance} event={event} size={} payload={}",
            data.len(),
            payload_preview(data)
        ),
        OutputFormat::Raw => println!("{}", payload_preview(data)),
    }
}

pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_payloads_are_summarized() {
        assert_eq!(payload_preview(b"42"), "42");
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }
}
