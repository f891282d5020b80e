//! Command execution.

use crate::Commands;
use acrpc_client::Client;
use colored::Colorize;
use serde_json::Value;
use std::io::Write;
use tokio::io::AsyncWriteExt;

/// Executes a command, printing reply data to stdout, and returns a status
/// line for stderr.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Call {
            op,
            payload,
            json,
            content,
        } => {
            let request = encode_payload(payload.as_deref(), json)?;
            let content = read_arg_bytes(content.as_deref())?;

            let reply = client
                .call::<Vec<u8>, Vec<u8>>(op, &request, &content)
                .await?;

            print_payload(&reply.payload, json);
            if !reply.content.is_empty() {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&reply.content)?;
                stdout.flush()?;
            }

            Ok(format!(
                "{} op {} msg {} ({} payload, {} content)",
                "OK".green(),
                op,
                reply.msg_id,
                format_bytes(reply.payload.len() as u64),
                format_bytes(reply.content.len() as u64)
            ))
        }

        Commands::Put {
            op,
            payload,
            json,
            file,
        } => {
            let request = encode_payload(payload.as_deref(), json)?;
            let mut source = tokio::fs::File::open(&file).await?;
            let len = source.metadata().await?.len();
            let content_len = u32::try_from(len)
                .map_err(|_| format!("{} is too large to send ({})", file.display(), len))?;

            let reply = client
                .put::<Vec<u8>, Vec<u8>, _>(op, &request, content_len, &mut source)
                .await?;

            print_payload(&reply.payload, json);

            Ok(format!(
                "{} op {} msg {} (sent {} from {})",
                "OK".green(),
                op,
                reply.msg_id,
                format_bytes(content_len as u64),
                file.display().to_string().cyan()
            ))
        }

        Commands::Get {
            op,
            payload,
            json,
            content,
            out,
        } => {
            let request = encode_payload(payload.as_deref(), json)?;
            let content = read_arg_bytes(content.as_deref())?;

            let mut download = client
                .get::<Vec<u8>, Vec<u8>>(op, &request, &content)
                .await?;

            let copied = match &out {
                Some(path) => {
                    print_payload(&download.payload, json);
                    let mut file = tokio::fs::File::create(path).await?;
                    let copied = download.reader.copy_to(&mut file).await?;
                    file.sync_all().await?;
                    copied
                }
                None => {
                    // The payload would interleave with content on stdout.
                    if !download.payload.is_empty() {
                        eprintln!("{}", format_payload(&download.payload, json));
                    }
                    let mut stdout = tokio::io::stdout();
                    let copied = download.reader.copy_to(&mut stdout).await?;
                    stdout.flush().await?;
                    copied
                }
            };

            let dest = out
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "stdout".to_string());
            Ok(format!(
                "{} op {} msg {} (received {} to {})",
                "OK".green(),
                op,
                download.msg_id,
                format_bytes(copied),
                dest.cyan()
            ))
        }
    }
}

/// Reads an inline argument or, with a leading `@`, the named file.
fn read_arg_bytes(arg: Option<&str>) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match arg {
        None => Ok(Vec::new()),
        Some(arg) => match arg.strip_prefix('@') {
            Some(path) => Ok(std::fs::read(path)?),
            None => Ok(arg.as_bytes().to_vec()),
        },
    }
}

/// Builds the request payload. With `json`, the input must parse as JSON and
/// is sent in compact form.
fn encode_payload(arg: Option<&str>, json: bool) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let raw = read_arg_bytes(arg)?;
    if !json || raw.is_empty() {
        return Ok(raw);
    }
    let value: Value = serde_json::from_slice(&raw)?;
    Ok(serde_json::to_vec(&value)?)
}

fn print_payload(payload: &[u8], json: bool) {
    if !payload.is_empty() {
        println!("{}", format_payload(payload, json));
    }
}

/// Formats a reply payload for display.
fn format_payload(payload: &[u8], json: bool) -> String {
    if json {
        if let Ok(value) = serde_json::from_slice::<Value>(payload) {
            return serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        }
    }
    String::from_utf8_lossy(payload).into_owned()
}

/// Formats bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_arg_bytes() {
        assert!(read_arg_bytes(None).unwrap().is_empty());
        assert_eq!(read_arg_bytes(Some("inline")).unwrap(), b"inline");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, [0u8, 1, 2, 255]).unwrap();
        let arg = format!("@{}", path.display());
        assert_eq!(read_arg_bytes(Some(&arg)).unwrap(), vec![0u8, 1, 2, 255]);

        assert!(read_arg_bytes(Some("@/nonexistent/payload.bin")).is_err());
    }

    #[test]
    fn test_encode_payload_json() {
        let encoded = encode_payload(Some(r#"{ "name" : "blob", "size": 3 }"#), true).unwrap();
        assert_eq!(encoded, br#"{"name":"blob","size":3}"#);

        assert!(encode_payload(Some("{not json"), true).is_err());
        // Without --json the bytes pass through untouched.
        assert_eq!(encode_payload(Some("{not json"), false).unwrap(), b"{not json");
        assert!(encode_payload(None, true).unwrap().is_empty());
    }

    #[test]
    fn test_format_payload() {
        assert_eq!(format_payload(b"plain text", false), "plain text");
        assert_eq!(format_payload(br#"{"a":1}"#, true), "{\n  \"a\": 1\n}");
        assert_eq!(format_payload(b"not json", true), "not json");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }
}
