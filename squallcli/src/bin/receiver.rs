//! Receives a stream from a sender and writes it to stdout as it arrives.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use squallstream::ControllerClient;
use squallcli::endpoint::{self, FilterSpec};

#[derive(Parser, Debug)]
#[command(name = "receiver", about = "Receives data from a sender")]
struct Args {
    /// Listen port.
    #[arg(long, default_value_t = 7000)]
    port: u16,

    /// Controller URL in the form http://<host>:<port>.
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    controller: String,

    /// Use the datagram channel instead of the default byte-stream channel.
    #[arg(long)]
    udp: bool,

    /// Public key file, used for decrypting received data.
    #[arg(long)]
    pub_key: Option<PathBuf>,

    /// Private key file, used for encrypting transmitted data.
    #[arg(long)]
    priv_key: Option<PathBuf>,
}

fn main() -> Result<()> {
    endpoint::init_tracing();
    let args = Args::parse();

    let controller = Arc::new(ControllerClient::new(&args.controller));
    tracing::info!(port = args.port, "waiting for a sender");
    let channel = endpoint::accept_channel(args.udp, args.port)?;
    let mut stream = endpoint::create_stream(
        channel,
        controller.clone(),
        FilterSpec {
            sent_key: "server_sent",
            recv_key: "server_recv",
            pub_key: args.pub_key,
            priv_key: args.priv_key,
        },
    )?;

    let mut stdout = io::stdout().lock();
    while stream.is_open() {
        let data = stream.read(1, None);
        if !data.is_empty() {
            stdout.write_all(&data)?;
            stdout.flush()?;
        }

        // The control plane can slow this consumer down to force the
        // zero-window path on the sender.
        let delay = controller.get_config("recv_delay", 0.0);
        if delay > 0.0 {
            thread::sleep(Duration::from_secs_f64(delay));
        }
    }
    Ok(())
}
