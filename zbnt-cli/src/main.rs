//! # ZBNT command line tool
//!
//! Offline helpers for preparing tests (compiling frame detector scripts, checking
//! frame templates) and online helpers for finding devices and listing what they
//! offer.
use std::error::Error;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use env_logger::Env;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use zbnt_client::{Builder, Client};
use zbnt_protocol::{
    DeviceKind,
    codec::FrameReceiver,
    discovery::{DISCOVERY_PORT, discovery_request, parse_response},
    script,
    template::FrameTemplate,
};

const DEFAULT_PORT: u16 = 5465;

#[derive(Subcommand)]
enum Command {
    /// Compile a frame detector script
    Compile {
        file: PathBuf,
        #[arg(short, long, value_parser = maybe_hex::<usize>, help = "Script size in slots")]
        max_size: usize,
        #[arg(short, long, help = "Write the binary program here instead of printing it")]
        output: Option<PathBuf>,
    },
    /// Parse a frame template and print its bytes
    Template { file: PathBuf },
    /// Look for devices on the local network
    Discover {
        #[arg(short, long = "address", default_value = "255.255.255.255")]
        addresses: Vec<IpAddr>,
        #[arg(short, long, default_value = "1000")]
        timeout_ms: u64,
    },
    /// Connect to a device and list its bitstreams
    Info {
        host: IpAddr,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(short, long, help = "Load this bitstream and list its devices")]
        load: Option<String>,
        #[arg(short, long, default_value = "5000")]
        timeout_ms: u64,
    },
}

#[derive(Parser)]
#[command(about = "Tools for ZBNT network testing devices", long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

fn compile(file: PathBuf, max_size: usize, output: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let source = std::fs::read_to_string(&file)?;
    log::debug!("Compiling {} for {} slots", file.display(), max_size);
    let program = script::compile(&source, max_size)?;

    if let Some(output) = output {
        std::fs::write(&output, program.to_bytes())?;
        log::info!("Wrote {} slots to {}", program.len(), output.display());
        return Ok(());
    }

    // Trailing all-zero slots are omitted.
    let used = program
        .slots()
        .iter()
        .rposition(|slot| slot.to_bytes() != [0; 4])
        .map_or(0, |last| last + 1);
    println!("slot  cmp  param  edit  param");
    for (i, slot) in program.slots()[..used].iter().enumerate() {
        let [cmp, cmp_param, edit, edit_param] = slot.to_bytes();
        println!("{i:4}  {cmp:02x}   {cmp_param:02x}     {edit:02x}    {edit_param:02x}");
    }
    println!("{} of {} slots used", used, program.len());
    Ok(())
}

fn template(file: PathBuf) -> Result<(), Box<dyn Error>> {
    let text = std::fs::read_to_string(&file)?;
    let template = FrameTemplate::parse(&text)?;

    println!("{} bytes", template.len());
    for (bytes, sources) in template.bytes().chunks(16).zip(template.sources().chunks(16)) {
        let line: Vec<String> = bytes
            .iter()
            .zip(sources)
            .map(|(byte, source)| match source {
                0 => format!("{byte:02x}"),
                1 => "xx".to_string(),
                2 => "nn".to_string(),
                _ => "nb".to_string(),
            })
            .collect();
        println!("{}", line.join(" "));
    }
    Ok(())
}

/// Responses echo this value, so answers to other hosts' requests are ignored.
fn discovery_validator() -> u64 {
    rand::random()
}

async fn discover(addresses: Vec<IpAddr>, timeout: Duration) -> Result<(), Box<dyn Error>> {
    let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).await?;
    socket.set_broadcast(true)?;

    let validator = discovery_validator();
    let mut request = Vec::new();
    discovery_request(validator).write_to(&mut request)?;
    for address in &addresses {
        log::debug!("Sending discovery request to {}", address);
        socket
            .send_to(&request, SocketAddr::new(*address, DISCOVERY_PORT))
            .await?;
    }

    let deadline = Instant::now() + timeout;
    let mut buf = vec![0u8; 2048];
    let mut found = 0;
    while let Ok(received) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
        let (len, source) = received?;
        // Each datagram is framed on its own.
        let mut receiver = FrameReceiver::new();
        for message in receiver.feed(&buf[..len]) {
            let Some(device) = parse_response(validator, source.ip(), &message) else {
                continue;
            };
            found += 1;
            let addresses: Vec<String> = device.addresses.iter().map(|a| a.to_string()).collect();
            println!(
                "{}  v{}  {}  port {}",
                device.name,
                device.version,
                addresses.join(", "),
                device.port
            );
        }
    }
    log::info!("Found {} devices", found);
    Ok(())
}

async fn info(addr: SocketAddr, load: Option<String>, timeout: Duration) -> Result<(), Box<dyn Error>> {
    let config = Builder::new().connect_timeout(timeout).build();
    let client = Client::connect(addr, config).await?;

    println!("Bitstreams:");
    for name in client.bitstreams() {
        println!("  {}", name);
    }

    if let Some(name) = load {
        if !client.load_bitstream(&name).await? {
            println!("Device rejected bitstream '{}'", name);
        }
        println!("Active bitstream: {}", client.active_bitstream());
        for device in client.devices().iter() {
            match device.kind() {
                DeviceKind::SimpleTimer(timer) => println!("  {} freq={} Hz", device, timer.freq),
                DeviceKind::FrameDetector(detector) => println!(
                    "  {} scripts={} script_size={} features={:#x}",
                    device, detector.num_scripts, detector.max_script_size, detector.features.0
                ),
                DeviceKind::TrafficGenerator(tgen) => {
                    println!("  {} max_template_size={}", device, tgen.max_template_size)
                }
                _ => println!("  {}", device),
            }
        }
    }

    client.disconnect();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match args.command {
        Command::Compile {
            file,
            max_size,
            output,
        } => compile(file, max_size, output),
        Command::Template { file } => template(file),
        Command::Discover {
            addresses,
            timeout_ms,
        } => discover(addresses, Duration::from_millis(timeout_ms)).await,
        Command::Info {
            host,
            port,
            load,
            timeout_ms,
        } => {
            let addr = SocketAddr::new(host, port);
            log::info!("Connecting to {}", addr);
            info(addr, load, Duration::from_millis(timeout_ms)).await
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validators_differ_between_requests() {
        let validators: Vec<u64> = (0..8).map(|_| discovery_validator()).collect();
        assert!(validators.windows(2).any(|pair| pair[0] != pair[1]));
    }
}
