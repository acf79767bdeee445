//! An echo server and a client on two interfaces joined by a software pipe.
//!
//! The client sends random messages and checks that each comes back unchanged. Loss on the pipe
//! can be simulated to watch the retransmission machinery at work.
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rand::Rng;
use structopt::StructOpt;

use unistack::iface::Interface;
use unistack::layer::tcp::{self, Connection};
use unistack::nic::{Pipe, PrngLoss};
use unistack::storage::{BufferConfig, BufferStore};
use unistack::time::Instant;
use unistack::wire::{EthernetAddress, Ipv4Address};

const SERVER_MAC: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 1]);
const CLIENT_MAC: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 2]);
const SERVER_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
const CLIENT_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);

fn main() {
    let Config { port, messages, size, loss, seed, tick } = Config::from_args();

    let store = || Arc::new(BufferStore::new(BufferConfig {
        buffer_size: 2048,
        buffer_count: 256,
        ..BufferConfig::default()
    }));
    let (server_store, client_store) = (store(), store());
    let (mut server_nic, mut client_nic) =
        Pipe::pair(Arc::clone(&server_store), Arc::clone(&client_store), 1514);
    if loss > 0.0 {
        let rate = Some((loss.min(1.0) * f64::from(u32::max_value())) as u32);
        server_nic.set_loss(PrngLoss::uniform(rate, seed));
        client_nic.set_loss(PrngLoss::uniform(rate, seed.wrapping_add(1)));
    }

    let config = tcp::Config::default();
    let mut server = Interface::new(server_nic, server_store, SERVER_MAC, SERVER_IP, config);
    let mut client = Interface::new(client_nic, client_store, CLIENT_MAC, CLIENT_IP, config);
    server.eth_mut().add_neighbor(CLIENT_IP, CLIENT_MAC);
    client.eth_mut().add_neighbor(SERVER_IP, SERVER_MAC);

    server.tcp_mut().listen(port, |conn: &mut Connection| {
        conn.on_read(|conn, data| {
            if let Err(err) = conn.write(data, true) {
                eprintln!("server: echo failed: {:?}", err);
            }
        });
    }).expect("Port is free on a new interface");

    let mut rng = rand::thread_rng();
    let sent: Vec<Vec<u8>> = (0..messages)
        .map(|_| {
            let mut message = vec![0; size];
            rng.fill(&mut message[..]);
            message
        })
        .collect();
    let expected: Vec<u8> = sent.concat();

    let echoed = Rc::new(RefCell::new(Vec::with_capacity(expected.len())));
    let sink = Rc::clone(&echoed);
    let tuple = client.tcp_mut().connect(SERVER_IP, port, move |conn: &mut Connection| {
        let sink = Rc::clone(&sink);
        conn.on_read(move |_, data| sink.borrow_mut().extend_from_slice(data));
        for message in &sent {
            conn.write(message, true).expect("Connection is established");
        }
    }).expect("Ephemeral ports available");

    let mut now = Instant::from_millis(0);
    let deadline = Instant::from_secs(600);
    while echoed.borrow().len() < expected.len() && now < deadline {
        server.poll(now).expect("Pipe never fails");
        client.poll(now).expect("Pipe never fails");
        if client.tcp().get(&tuple).is_none() {
            break;
        }
        now += std::time::Duration::from_millis(tick);
    }

    let complete = *echoed.borrow() == expected;
    println!("{} of {} bytes echoed after {}", echoed.borrow().len(), expected.len(), now);
    println!("client {:?}", client.tcp().stats());
    println!("server {:?}", server.tcp().stats());
    println!("{}", client.tcp());
    if !complete {
        eprintln!("echo incomplete or corrupted");
        std::process::exit(1);
    }

    client.tcp_mut().close(&tuple).expect("Connection still open");
    for _ in 0..10 {
        server.poll(now).expect("Pipe never fails");
        client.poll(now).expect("Pipe never fails");
    }
    println!("{}", server.tcp());
}

#[derive(StructOpt)]
#[structopt(name = "tcp_echo")]
struct Config {
    /// Port of the echo server.
    #[structopt(long, default_value = "7")]
    port: u16,
    /// Number of messages to send.
    #[structopt(long, default_value = "100")]
    messages: usize,
    /// Size of each message in bytes.
    #[structopt(long, default_value = "1000")]
    size: usize,
    /// Fraction of frames lost in each direction.
    #[structopt(long, default_value = "0")]
    loss: f64,
    /// Seed of the loss simulation.
    #[structopt(long, default_value = "0")]
    seed: u64,
    /// Milliseconds advanced per poll.
    #[structopt(long, default_value = "1")]
    tick: u64,
}
