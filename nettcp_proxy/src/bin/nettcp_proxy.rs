// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::net::TcpListener;
use std::path::PathBuf;

use clap::Parser;
use log::*;

use nettcp_proxy::{Proxy, TraceSink};
use nmf_protocol::stream::GssClientContext;

/// Intercepting proxy for net.tcp services: forwards message framing
/// records between a client and the target server, optionally negotiating
/// the authenticated upgrade with the server while the client side stays
/// in the clear.
#[derive(Parser)]
struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "localhost")]
    bind: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 8090)]
    port: u16,

    /// Journal every forwarded record to this file.
    #[arg(short, long)]
    trace_file: Option<PathBuf>,

    /// Negotiate the upgrade with the given server principal.
    #[arg(short, long)]
    negotiate: Option<String>,

    target_host: String,
    target_port: u16,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Cli::parse();

    // Fail right away when negotiation was requested but the provider
    // cannot build an initiator context for the principal.
    if let Some(principal) = &args.negotiate {
        if let Err(e) = GssClientContext::for_service(principal) {
            error!("Negotiation with {principal} not possible: {e}");
            std::process::exit(1);
        }
    }

    let trace = match &args.trace_file {
        Some(path) => Some(TraceSink::create(path)?),
        None => None,
    };

    let listener = TcpListener::bind((args.bind.as_str(), args.port))?;
    info!("Listening on {}:{}", args.bind, args.port);

    let proxy = Proxy {
        target_host: args.target_host,
        target_port: args.target_port,
        server_principal: args.negotiate,
        trace,
    };

    proxy.run(listener)
}
