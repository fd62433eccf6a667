use clap::Parser;
use client::game::RemotePlayers;
use client::input::{parse_key, random_key};
use client::socket::{ClientSocket, ReceiveStatus};
use log::{error, info, warn};
use shared::{LineBuffer, Message};
use std::io::BufRead;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const FRAME_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Player name announced to the server
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    /// Press random keys instead of reading stdin
    #[arg(short = 'b', long)]
    bot: bool,

    /// Milliseconds between bot key presses
    #[arg(long, default_value = "200")]
    bot_interval_ms: u64,
}

/// Reads stdin on its own thread and forwards every recognised key.
fn spawn_stdin_reader() -> mpsc::Receiver<i32> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            for token in line.split_whitespace() {
                match parse_key(token) {
                    Some(key) => {
                        if tx.send(key).is_err() {
                            return;
                        }
                    }
                    None => warn!("Unknown key {:?}", token),
                }
            }
        }
    });
    rx
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut socket = ClientSocket::connect(&args.server)?;
    socket.send_message(&Message::PlayerName {
        name: args.name.clone(),
    })?;

    if args.bot {
        info!("Bot mode, pressing a key every {}ms", args.bot_interval_ms);
    } else {
        info!("Controls: type left, right, up or jump and press Enter");
    }
    let keys = (!args.bot).then(spawn_stdin_reader);

    let bot_interval = Duration::from_millis(args.bot_interval_ms.max(1));
    let mut next_bot_key = Instant::now() + bot_interval;
    let mut rng = rand::thread_rng();
    let mut lines = LineBuffer::new();
    let mut players = RemotePlayers::new();

    loop {
        let received = socket.receive();
        let mut changed = false;
        for chunk in &received.chunks {
            for line in lines.push(chunk) {
                match players.apply_line(&line) {
                    Ok(updated) => changed |= updated,
                    Err(e) => warn!("Bad line from server: {}", e),
                }
            }
        }
        if changed {
            for (name, (x, y)) in players.iter() {
                info!("{} at ({}, {})", name, x, y);
            }
        }

        match received.status {
            ReceiveStatus::Data => {}
            ReceiveStatus::Disconnected => {
                info!("Server closed the connection");
                break;
            }
            ReceiveStatus::Error => {
                error!("Lost connection to server");
                break;
            }
        }

        match &keys {
            Some(keys) => loop {
                match keys.try_recv() {
                    Ok(key) => socket.send_message(&Message::KeyPress { key })?,
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        info!("Input closed, leaving");
                        socket.close();
                        return Ok(());
                    }
                }
            },
            None => {
                if Instant::now() >= next_bot_key {
                    let key = random_key(&mut rng);
                    socket.send_message(&Message::KeyPress { key })?;
                    next_bot_key = Instant::now() + bot_interval;
                }
            }
        }

        thread::sleep(FRAME_INTERVAL);
    }

    socket.close();
    Ok(())
}
