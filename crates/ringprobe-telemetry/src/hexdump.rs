//! Hex-dump records emitted by the device's `read` command.
//!
//! Row format: `XXXX: b0 b1 .. b15  ascii`, optionally behind a log prefix
//! such as `I (1234) CommandSystem: `. The byte field is padded to 48 columns
//! and separated from the ASCII gutter by at least two spaces.

use tracing::warn;

use crate::counters::ParseAmbiguity;

const BYTES_PER_ROW: usize = 16;
const HEX_FIELD_WIDTH: usize = BYTES_PER_ROW * 3;

/// Decoded bytes plus every byte-field token that could not be read.
#[derive(Debug, Clone, Default)]
pub struct HexDumpParse {
    pub data: Vec<u8>,
    pub ambiguities: Vec<ParseAmbiguity>,
}

/// Decode every recognizable record in `lines`, in line order.
///
/// Lines without a record contribute nothing; tokens in the byte field that
/// are not a two-digit hex byte are skipped and logged.
pub fn decode_hex_dump<S: AsRef<str>>(lines: &[S]) -> Vec<u8> {
    let parse = parse_hex_dump(lines);
    for ambiguity in &parse.ambiguities {
        warn!(
            line = %ambiguity.line,
            reason = %ambiguity.reason,
            "skipping unreadable hex-dump token"
        );
    }
    parse.data
}

/// Like [`decode_hex_dump`], returning skipped tokens instead of logging them.
pub fn parse_hex_dump<S: AsRef<str>>(lines: &[S]) -> HexDumpParse {
    let mut parse = HexDumpParse::default();
    for line in lines {
        let line = line.as_ref();
        let Some(field) = record_bytes(line) else {
            continue;
        };
        for token in field.split_whitespace() {
            // from_str_radix would also accept a leading '+'.
            let byte = (token.len() == 2 && token.bytes().all(|b| b.is_ascii_hexdigit()))
                .then(|| u8::from_str_radix(token, 16).ok())
                .flatten();
            match byte {
                Some(b) => parse.data.push(b),
                None => parse.ambiguities.push(ParseAmbiguity {
                    line: line.to_string(),
                    label: "hexdump",
                    reason: format!("{token:?} is not a hex byte"),
                }),
            }
        }
    }
    parse
}

/// Render `bytes` in the device's row format, addresses starting at `base_offset`.
pub fn encode_hex_dump(base_offset: usize, bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(BYTES_PER_ROW)
        .enumerate()
        .map(|(row, chunk)| {
            let hex: String = chunk.iter().map(|b| format!("{b:02X} ")).collect();
            let ascii: String = chunk
                .iter()
                .map(|&b| if (32..127).contains(&b) { b as char } else { '.' })
                .collect();
            format!(
                "{:04X}: {:<width$} {}",
                base_offset + row * BYTES_PER_ROW,
                hex,
                ascii,
                width = HEX_FIELD_WIDTH
            )
        })
        .collect()
}

/// Locate the byte field of a record: the text after the first `ADDR: `
/// whose address is all hex digits, up to the ASCII gutter.
fn record_bytes(line: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(rel) = line[search_from..].find(": ") {
        let colon = search_from + rel;
        let address = line[..colon]
            .rsplit(|c: char| c.is_whitespace())
            .next()
            .unwrap_or("");
        if (1..=8).contains(&address.len()) && address.chars().all(|c| c.is_ascii_hexdigit()) {
            let field = &line[colon + 2..];
            return Some(field.split("  ").next().unwrap_or(field));
        }
        search_from = colon + 2;
    }
    None
}
