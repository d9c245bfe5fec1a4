//! Code for client.
//!
//! Connects to one replica, replays an optional script of operator lines,
//! then reads more from stdin until `exit`.
//!
//! ```sh
//! cargo run --bin client -- [port] [script]
//! ```

use std::{
    env, fs,
    io::{self, BufRead},
    net::SocketAddr,
    process,
};

use replikv::{
    init_logging,
    net::{Client, Request},
    Config, LOOPBACK,
};
use tracing::{error, warn};

fn run(client: &Client, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    match line.parse::<Request>() {
        Ok(req) => match client.call(req) {
            Ok(body) => println!("{body}"),
            Err(e) => println!("Request failed: {e}"),
        },
        Err(e) => println!("{e}. Use GET key | PUT key value | DELETE key"),
    }
}

/// Tries before the client gives up on connecting.
const CONNECT_ATTEMPTS: usize = 3;

fn connect(
    mut port: u16,
    cfg: &Config,
    lines: &mut impl Iterator<Item = io::Result<String>>,
) -> Option<(u16, Client)> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        let addr = SocketAddr::from((LOOPBACK, port));
        match Client::connect(addr, cfg.request_timeout()) {
            Ok(c) => return Some((port, c)),
            Err(e) => warn!(%addr, attempt, error = %e, "could not connect"),
        }
        if attempt == CONNECT_ATTEMPTS {
            break;
        }
        println!("Enter a new port number:");
        match lines.next() {
            Some(Ok(l)) => match l.trim().parse::<u16>() {
                Ok(p) => port = p,
                Err(_) => println!("Port number invalid, retrying port {port}"),
            },
            _ => return None,
        }
    }
    None
}

fn main() {
    init_logging();
    let cfg = Config::default();
    let port = env::args()
        .nth(1)
        .map(|p| {
            p.parse::<u16>().unwrap_or_else(|_| {
                warn!(port = %p, "port number invalid, using default");
                cfg.base_port
            })
        })
        .unwrap_or(cfg.base_port);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let Some((port, client)) = connect(port, &cfg, &mut lines) else {
        error!(attempts = CONNECT_ATTEMPTS, "giving up on connecting");
        process::exit(1);
    };
    println!("Connected to server in port:{port}");

    if let Some(script) = env::args().nth(2) {
        match fs::read_to_string(&script) {
            Ok(buf) => buf.lines().for_each(|l| run(&client, l)),
            Err(e) => println!("Error encountered during initial file read. {e}"),
        }
    }

    for line in lines {
        match line {
            Ok(l) if l.trim().eq_ignore_ascii_case("exit") => break,
            Ok(l) => run(&client, &l),
            Err(e) => {
                error!(error = %e, "stdin");
                break;
            }
        }
    }
}
