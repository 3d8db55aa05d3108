use std::io::{IsTerminal, Write};
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

#[derive(Serialize)]
struct ChunkOutput<'a> {
    pipe: &'a str,
    sequence: usize,
    size: usize,
    data: String,
    timestamp: String,
}

/// Print one chunk received on `pipe`.
pub fn print_chunk(pipe: &str, sequence: usize, data: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ChunkOutput {
                pipe,
                sequence,
                size: data.len(),
                data: payload_preview(data),
                timestamp: now_unix_seconds(),
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
                .set_header(vec!["PIPE", "SEQ", "SIZE", "DATA"])
                .add_row(vec![
                    pipe.to_string(),
                    sequence.to_string(),
                    data.len().to_string(),
                    payload_preview(data),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "pipe={} seq={} size={} data={}",
                pipe,
                sequence,
                data.len(),
                payload_preview(data)
            );
        }
        OutputFormat::Raw => {
            print_raw(data);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
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
    fn binary_payload_is_summarized() {
        assert_eq!(payload_preview(&[0xff, 0xfe, 0x00]), "<binary 3 bytes>");
        assert_eq!(payload_preview(b"hello"), "hello");
    }
}
