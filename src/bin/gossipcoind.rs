// gossipcoind — a peer in the block-gossip simulation.
//
// Usage: gossipcoind <ip:port> <seed_ip:seed_port> <hash_power>
//                    <inter_arrival_time> <random_seed> [--selfish] [--kickoff]
//
// Exactly one peer per experiment should run with --kickoff; start it
// last so the sentinel reaches the whole overlay.

use std::env;
use std::path::Path;
use std::process::exit;

use gossipcoin::miner::MinerParams;
use gossipcoin::net::node::{PeerNode, bind_listener};
use gossipcoin::net::seed_client;

use colored::*;

struct Args {
    ip: String,
    port: u16,
    seed_addr: String,
    hash_power: f64,
    inter_arrival_time: u64,
    random_seed: u64,
    selfish: bool,
    kickoff: bool,
}

fn print_usage() {
    println!(
        "{}",
        "  Usage: gossipcoind <ip:port> <seed_ip:seed_port> <hash_power> \
         <inter_arrival_time> <random_seed> [--selfish] [--kickoff]"
            .bright_yellow()
            .bold()
    );
    println!();
    println!("  {} hash_power           float in (0, 1]", "❯".bright_black());
    println!("  {} inter_arrival_time   seconds between network blocks", "❯".bright_black());
    println!("  {} random_seed          integer, reproducible timers/nonces", "❯".bright_black());
    println!("  {} --selfish            withhold blocks per the selfish strategy", "❯".bright_black());
    println!("  {} --kickoff            emit START-MINING once connected", "❯".bright_black());
}

fn parse_args() -> Option<Args> {
    let mut positional = Vec::new();
    let mut selfish = false;
    let mut kickoff = false;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--selfish" => selfish = true,
            "--kickoff" => kickoff = true,
            _ => positional.push(arg),
        }
    }
    if positional.len() != 5 {
        return None;
    }

    let (ip, port) = positional[0].rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    let seed_addr = positional[1].clone();
    let hash_power: f64 = positional[2].parse().ok()?;
    if !(hash_power > 0.0 && hash_power <= 1.0) {
        return None;
    }
    let inter_arrival_time: u64 = positional[3].parse().ok()?;
    if inter_arrival_time == 0 {
        return None;
    }
    let random_seed: u64 = positional[4].parse().ok()?;

    Some(Args {
        ip: ip.to_string(),
        port,
        seed_addr,
        hash_power,
        inter_arrival_time,
        random_seed,
        selfish,
        kickoff,
    })
}

#[tokio::main]
async fn main() {
    let Some(args) = parse_args() else {
        print_usage();
        exit(2);
    };
    let identity = format!("{}:{}", args.ip, args.port);

    println!(
        "{} peer {} ({}, hash power {}, seed {})",
        "[init]".bright_blue().bold(),
        identity,
        if args.selfish { "selfish" } else { "honest" },
        args.hash_power,
        args.random_seed,
    );

    let params = MinerParams::new(args.hash_power, args.inter_arrival_time, args.random_seed);
    let node = match PeerNode::new(&args.ip, args.port, args.selfish, params, Path::new(".")) {
        Ok(node) => node,
        Err(e) => {
            eprintln!("{} cannot open output file: {e}", "[init]".bright_red().bold());
            exit(1);
        }
    };

    // bind before registering, so the roster never advertises a dead port
    let listener = match bind_listener(&identity) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("{} {e}", "[init]".bright_red().bold());
            exit(1);
        }
    };

    let roster = match seed_client::fetch_roster(&args.seed_addr, &identity).await {
        Ok(roster) => roster,
        Err(e) => {
            eprintln!("{} {e}", "[init]".bright_red().bold());
            exit(1);
        }
    };

    println!("{} client list", "[p2p] ".bright_green().bold());
    for peer_id in roster.keys() {
        println!("  {} {peer_id}", "❯".bright_black());
    }
    node.log_roster(&roster).await;

    node.connect_roster(&roster).await;
    tokio::spawn(node.clone().listen(listener));

    if args.kickoff {
        // give the dialed sessions a moment to finish their handshakes
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        node.kickoff().await;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("{} signal handler failed: {e}", "[init]".bright_red().bold());
        exit(1);
    }
    println!();
    println!("{}", node.final_report().await);
    exit(0);
}
