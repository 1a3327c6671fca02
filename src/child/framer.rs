//! Line framing for the child's stdout.

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::Decoder;
use tracing::error;

/// Decoder yielding one parsed JSON object per `\r?\n`-terminated line.
///
/// Partial trailing bytes stay buffered until their newline arrives. Blank
/// and whitespace-only lines are skipped. Lines that are not a JSON object
/// are logged at error level and discarded; framing of subsequent lines is
/// unaffected.
#[derive(Debug, Default)]
pub struct JsonLineCodec {
    // Offset already scanned for a newline, so repeated decode calls do not
    // rescan the growing buffer.
    scanned: usize,
}

impl Decoder for JsonLineCodec {
    type Item = Value;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<Value>> {
        loop {
            let Some(pos) = buf[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = buf.len();
                return Ok(None);
            };
            let line = buf.split_to(self.scanned + pos + 1);
            self.scanned = 0;

            let line = &line[..line.len() - 1];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let text = String::from_utf8_lossy(line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) if value.is_object() => return Ok(Some(value)),
                Ok(_) => {
                    error!(
                        "Discarding non-object JSON line from child: {}",
                        trimmed.chars().take(120).collect::<String>()
                    );
                }
                Err(e) => {
                    error!(
                        "Discarding non-JSON line from child: {} ({})",
                        trimmed.chars().take(120).collect::<String>(),
                        e
                    );
                }
            }
        }
    }
}
