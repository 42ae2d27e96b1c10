use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use cramrpc_peer::Capabilities;
use cramrpc_wire::ids::{is_auth_param, param_name};
use cramrpc_wire::{Record, Region};
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

/// One reply parameter as shown to the user.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ParamRow<'a> {
    pub id: String,
    pub name: &'static str,
    pub size: usize,
    pub value: String,
    #[serde(skip)]
    pub data: &'a [u8],
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    procedure: String,
    object: String,
    params: Vec<ParamRow<'a>>,
}

#[derive(Serialize)]
struct CapsOutput<'a> {
    address: &'a str,
    need_auth: bool,
    hash: Option<String>,
}

/// Reply parameters in wire order, without the signature records.
pub fn reply_rows(reply: &Region) -> Vec<ParamRow<'_>> {
    reply
        .records()
        .filter_map(|record| record.ok())
        .filter(|record| !is_auth_param(record.id))
        .map(row)
        .collect()
}

fn row(record: Record<'_>) -> ParamRow<'_> {
    ParamRow {
        id: format!("{:#010x}", record.id),
        name: param_name(record.id),
        size: record.data.len(),
        value: render_value(record.data),
        data: record.data,
    }
}

/// Strings are NUL-terminated UTF-8; 4 and 8 byte records read as
/// unsigned integers; anything else is shown as hex.
pub fn render_value(data: &[u8]) -> String {
    if let Some((0, text)) = data.split_last() {
        if let Ok(text) = std::str::from_utf8(text) {
            if !text.contains('\0') {
                return text.to_string();
            }
        }
    }
    match data.len() {
        4 => u32::from_be_bytes([data[0], data[1], data[2], data[3]]).to_string(),
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(data);
            u64::from_be_bytes(raw).to_string()
        }
        _ => data.iter().map(|b| format!("{b:02x}")).collect(),
    }
}

pub fn print_reply(reply: &Region, procedure: u32, object: u32, format: OutputFormat) {
    let rows = reply_rows(reply);
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                procedure: format!("{procedure:#010x}"),
                object: format!("{object:#010x}"),
                params: rows,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "NAME", "SIZE", "VALUE"]);
            for row in rows {
                table.add_row(vec![row.id, row.name.to_string(), row.size.to_string(), row.value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!("{} ({}) size={} value={}", row.id, row.name, row.size, row.value);
            }
        }
        OutputFormat::Raw => {
            for row in rows.iter().filter(|row| row.name == "USER") {
                let data = row.data.strip_suffix(&[0]).unwrap_or(row.data);
                print_raw(data);
                print_raw(b"\n");
            }
        }
    }
}

pub fn print_capabilities(address: &str, caps: Capabilities, format: OutputFormat) {
    let hash = caps.hash.map(|hash| hash.to_string());
    match format {
        OutputFormat::Json => {
            let out = CapsOutput {
                address,
                need_auth: caps.need_auth,
                hash,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ADDRESS", "NEED AUTH", "HASH"])
                .add_row(vec![
                    address.to_string(),
                    caps.need_auth.to_string(),
                    hash.unwrap_or_else(|| "-".to_string()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "address={} need_auth={} hash={}",
                address,
                caps.need_auth,
                hash.unwrap_or_else(|| "-".to_string())
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}
