// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::fs;
use std::path::PathBuf;

use clap::Parser;

use nmf_protocol::records::Record;

/// Decode the message framing records journalled in a proxy trace file.
#[derive(Parser)]
struct Cli {
    /// Trace file with tab-separated rows ending in hex-encoded record
    /// bytes. Rows may or may not carry the timestamp and peer columns.
    trace_file: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Cli::parse();

    let contents = fs::read_to_string(&args.trace_file)?;

    for line in contents.lines() {
        let columns: Vec<&str> = line.trim().split('\t').collect();
        let (direction, hex) = match columns.as_slice() {
            [direction, hex] => (*direction, *hex),
            [_timestamp, _peer, direction, hex] => (*direction, *hex),
            _ => continue,
        };

        let data = parse_hex(hex).ok_or("invalid hex in trace file")?;

        let mut rest = data.as_slice();
        while !rest.is_empty() {
            let (consumed, record) = Record::parse(rest)?;
            rest = &rest[consumed..];
            println!("{direction} {record:?}");
        }
    }

    Ok(())
}

fn parse_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}
