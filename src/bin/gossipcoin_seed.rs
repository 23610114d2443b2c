// gossipcoin-seed — the bootstrap registry.
//
// Usage: gossipcoin-seed <ip> <port>
//
// Replies to each registration with the roster as it stood before that
// peer. SIGINT writes the final peer map to client_list.json and exits 0.

use std::env;
use std::process::exit;

use gossipcoin::config::CLIENT_LIST_FILE;
use gossipcoin::net::node::bind_listener;
use gossipcoin::net::registry::Registry;

use colored::*;

fn print_usage() {
    println!(
        "{}",
        "  Usage: gossipcoin-seed <ip> <port>".bright_yellow().bold()
    );
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let [ip, port] = args.as_slice() else {
        print_usage();
        exit(2);
    };
    let Ok(port) = port.parse::<u16>() else {
        print_usage();
        exit(2);
    };
    let addr = format!("{ip}:{port}");

    let listener = match bind_listener(&addr) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("{} {e}", "[seed]".bright_red().bold());
            exit(1);
        }
    };
    println!("{} listening on {addr}", "[seed]".bright_green().bold());

    let peers = Registry::new()
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    match serde_json::to_string_pretty(&peers) {
        Ok(snapshot) => {
            if let Err(e) = std::fs::write(CLIENT_LIST_FILE, snapshot) {
                eprintln!("{} cannot write {CLIENT_LIST_FILE}: {e}", "[seed]".bright_red().bold());
                exit(1);
            }
            println!(
                "{} saved {} peer(s) to {CLIENT_LIST_FILE}",
                "[seed]".bright_green().bold(),
                peers.len()
            );
            exit(0);
        }
        Err(e) => {
            eprintln!("{} snapshot failed: {e}", "[seed]".bright_red().bold());
            exit(1);
        }
    }
}
