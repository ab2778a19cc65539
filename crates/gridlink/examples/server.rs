//! Simple echo server using gridlink.
//!
//! Run:
//! - cargo run -p gridlink --example server
//! - cargo run -p gridlink --example server -- 127.0.0.1:7777

use std::{
    env,
    net::SocketAddr,
    thread,
    time::{Duration, Instant},
};

use gridlink::{BitBuffer, Config, NetEvent, Server};

fn parse_bind_addr() -> Option<SocketAddr> {
    let mut args = env::args().skip(1);
    args.next().and_then(|s| s.parse().ok())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let mut config = Config::new("GridlinkEcho");
    config.respond_to_discovery = true;
    // Uncomment to try conditions:
    // config.simulation = Some(gridlink::SimulatedConditions {
    //     loss_chance: 0.2,
    //     ..Default::default()
    // });

    let bind_addr = parse_bind_addr().unwrap_or_else(|| "127.0.0.1:9000".parse().unwrap());
    let mut server = Server::bind(bind_addr, config)?;
    let local = server.local_addr()?;
    println!("gridlink echo server listening on {}", local);
    println!("Send from the client example to this address to see echoes.");

    loop {
        server.manual_poll(Instant::now());

        while let Some(event) = server.recv() {
            match event {
                NetEvent::Connected { addr, hail } => {
                    println!("[connect] {} hail={:?}", addr, String::from_utf8_lossy(&hail));
                }
                NetEvent::Message(mut message) => {
                    let text = message.payload.read_str().unwrap_or_default();
                    println!(
                        "[message] from={} channel={} payload=\"{}\"",
                        message.addr, message.channel, text
                    );

                    // Echo back on the same channel.
                    let mut reply = BitBuffer::new();
                    reply.write_str(&text);
                    if let Err(e) = server.send(message.addr, message.channel, reply) {
                        eprintln!("failed to queue echo: {}", e);
                    }
                }
                NetEvent::Disconnected { addr, reason } => {
                    println!("[disconnect] {} ({})", addr, reason);
                }
                other => {
                    println!("[event] {:?}", other);
                }
            }
        }

        thread::sleep(Duration::from_millis(10));
    }
}
