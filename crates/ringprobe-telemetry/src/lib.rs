pub mod counters;
pub mod hexdump;

pub use counters::{parse_counters, CounterParse, DeviceCounters, ParseAmbiguity, PartialCounters};
pub use hexdump::{decode_hex_dump, encode_hex_dump, parse_hex_dump, HexDumpParse};
