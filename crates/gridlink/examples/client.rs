//! Simple client that sends messages to a gridlink server and prints replies.
//!
//! Run the server first:
//! - cargo run -p gridlink --example server -- 127.0.0.1:7777
//!
//! Then run the client:
//! - cargo run -p gridlink --example client -- 127.0.0.1:7777
//! - cargo run -p gridlink --example client -- 127.0.0.1:7777 10 200
//!   (sends 10 messages, 200ms apart)

use std::{
    env,
    net::SocketAddr,
    thread,
    time::{Duration, Instant},
};

use gridlink::{BitBuffer, Channel, Client, Config, NetEvent};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Args: <server_addr> [count] [interval_ms]
    let mut args = env::args().skip(1);
    let server_addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:9000".to_string())
        .parse()?;
    let count: usize = args.next().unwrap_or_else(|| "5".into()).parse().unwrap_or(5);
    let interval_ms: u64 = args
        .next()
        .unwrap_or_else(|| "300".into())
        .parse()
        .unwrap_or(300);

    let mut client = Client::connect(
        "127.0.0.1:0",
        server_addr,
        Config::new("GridlinkEcho"),
        b"demo client".to_vec(),
    )?;
    println!(
        "gridlink client -> sending {} messages to {} (every {}ms)",
        count, server_addr, interval_ms
    );

    for i in 0..count {
        let mut payload = BitBuffer::new();
        payload.write_str(&format!("hello {}", i));
        client.send(Channel::ReliableOrdered(1), payload)?;

        let start = Instant::now();
        let wait = Duration::from_millis(interval_ms);

        while start.elapsed() < wait {
            client.manual_poll(Instant::now());

            while let Some(event) = client.recv() {
                match event {
                    NetEvent::Connected { addr, .. } => {
                        println!("[connect] {}", addr);
                    }
                    NetEvent::Message(mut message) => {
                        let text = message.payload.read_str().unwrap_or_default();
                        println!(
                            "[reply] from={} channel={} payload=\"{}\"",
                            message.addr, message.channel, text
                        );
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

    client.disconnect("done")?;
    for _ in 0..50 {
        client.manual_poll(Instant::now());
        thread::sleep(Duration::from_millis(10));
    }
    println!("done");
    Ok(())
}
