use std::io::IsTerminal;
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use openpeer_channel::codec::timestamp;
use serde::Serialize;
use serde_json::Value;

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

#[derive(Serialize)]
struct PushOutput<'a> {
    session: &'a str,
    message_type: &'a str,
    message: &'a Value,
    received_at: String,
}

#[derive(Serialize)]
struct CallOutput<'a> {
    operation: &'a str,
    result: &'a Value,
    elapsed_ms: u128,
}

#[derive(Serialize)]
struct PingOutput {
    seq: usize,
    rtt_us: u128,
}

#[derive(Serialize)]
struct SignOutput<'a> {
    time: &'a str,
    version: &'a str,
    signature: &'a str,
}

pub fn print_push(session: &str, message_type: &str, message: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&PushOutput {
            session,
            message_type,
            message,
            received_at: timestamp(),
        }),
        OutputFormat::Table => print_table(
            &["SESSION", "TYPE", "MESSAGE"],
            vec![vec![
                session.to_string(),
                message_type.to_string(),
                message.to_string(),
            ]],
        ),
        OutputFormat::Pretty => println!("session={session} type={message_type} message={message}"),
        OutputFormat::Raw => println!("{message}"),
    }
}

pub fn print_call(operation: &str, result: &Value, elapsed: Duration, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&CallOutput {
            operation,
            result,
            elapsed_ms: elapsed.as_millis(),
        }),
        OutputFormat::Table => print_table(
            &["OPERATION", "RESULT", "ELAPSED"],
            vec![vec![
                operation.to_string(),
                result.to_string(),
                format!("{elapsed:?}"),
            ]],
        ),
        OutputFormat::Pretty => match serde_json::to_string_pretty(result) {
            Ok(text) => println!("{operation} => {text}"),
            Err(_) => println!("{operation} => {result}"),
        },
        OutputFormat::Raw => println!("{result}"),
    }
}

pub fn print_pings(rtts: &[Duration], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for (i, rtt) in rtts.iter().enumerate() {
                print_json(&PingOutput {
                    seq: i + 1,
                    rtt_us: rtt.as_micros(),
                });
            }
        }
        OutputFormat::Table => print_table(
            &["SEQ", "RTT"],
            rtts.iter()
                .enumerate()
                .map(|(i, rtt)| vec![(i + 1).to_string(), format!("{rtt:?}")])
                .collect(),
        ),
        OutputFormat::Pretty => {
            for (i, rtt) in rtts.iter().enumerate() {
                println!("seq={} rtt={rtt:?}", i + 1);
            }
        }
        OutputFormat::Raw => {
            for rtt in rtts {
                println!("{}", rtt.as_micros());
            }
        }
    }
}

pub fn print_signature(time: &str, version: &str, signature: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&SignOutput {
            time,
            version,
            signature,
        }),
        OutputFormat::Table => print_table(
            &["TIME", "VERSION", "SIGNATURE"],
            vec![vec![time.to_string(), version.to_string(), signature.to_string()]],
        ),
        OutputFormat::Pretty => println!("time={time} version={version} signature={signature}"),
        OutputFormat::Raw => println!("{signature}"),
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(header: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}
