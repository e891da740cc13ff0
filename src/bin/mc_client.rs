// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use clap::Parser;
use std::error::Error;
use tokio::time::Duration;

use rust_scale_gateway::plc::{DeviceAddress, DeviceKind, McClient, PlcModel, PlcTransport};
use rust_scale_gateway::utility::{from_fixed_point, join_dword, split_dword, to_fixed_point};

/// MC protocol client for inspecting the head devices written by the gateway
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// PLC address
    #[clap(long, default_value = "192.168.3.61")]
    address: String,

    /// PLC MC protocol port
    #[clap(long, default_value = "5014")]
    port: u16,

    /// CPU family
    #[clap(long, value_enum, default_value = "Q")]
    model: PlcModel,

    /// First device to read, e.g. D6364 or M3300
    #[clap(long, default_value = "D6364")]
    device: DeviceAddress,

    /// Number of points to read
    #[clap(long, default_value = "2")]
    quantity: usize,

    /// Fixed-point scale used to display double words
    #[clap(long, default_value = "100")]
    scale: u32,

    /// Write this weight to the double word at --device before reading
    #[clap(long, allow_hyphen_values = true)]
    write: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    println!("Connecting to PLC at {}:{}", args.address, args.port);
    let mut client = McClient::connect(
        &args.address,
        args.port,
        args.model,
        Duration::from_secs(3),
        Duration::from_secs(2),
    )
    .await?;

    if let Some(weight) = args.write {
        let raw = to_fixed_point(weight, args.scale)?;
        let words = split_dword(raw);
        client.write_words(&args.device, &words).await?;
        println!("Wrote {} (raw {}) to {}", weight, raw, args.device);
    }

    println!("Reading {} point(s) starting at {}", args.quantity, args.device);
    match args.device.kind() {
        DeviceKind::Bit => {
            let bits = client.read_bits(&args.device, args.quantity).await?;
            for (i, on) in bits.iter().enumerate() {
                println!("{}: {}", args.device.offset(i as u32), if *on { "ON" } else { "OFF" });
            }
        }
        DeviceKind::Word => {
            let words = client.read_words(&args.device, args.quantity).await?;
            println!("Raw word values: {:?}", words);
            for (i, pair) in words.chunks_exact(2).enumerate() {
                let head = args.device.offset(2 * i as u32);
                let raw = join_dword(pair[0], pair[1]);
                println!(
                    "{}: raw {} = {:.2}",
                    head,
                    raw,
                    from_fixed_point(raw, args.scale)
                );
            }
        }
    }

    Ok(())
}
