//! Transmits a file or stdin lines to a receiver over the squall transport.

use std::fs::File;
use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use squallstream::{ControllerClient, Stream};
use squallcli::endpoint::{self, FilterSpec};

#[derive(Parser, Debug)]
#[command(name = "sender", about = "Transmits data to a receiver")]
struct Args {
    /// Host the data is sent to (usually the proxy).
    #[arg(long, default_value = "127.0.0.1")]
    target: String,

    /// Port the data is sent to.
    #[arg(long, default_value_t = 6000)]
    target_port: u16,

    /// Transmit the given file. Without it, stdin is read line by line
    /// and each line is transmitted as it is entered.
    #[arg(long)]
    file: Option<PathBuf>,

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

const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

fn transmit_file(stream: &mut Stream, path: &Path) -> Result<()> {
    let mut file =
        File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut chunk = vec![0u8; stream.preferred_segment_size()];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        stream.write(&chunk[..n])?;
    }
    Ok(())
}

fn transmit_stdin(stream: &mut Stream) -> Result<()> {
    for line in io::stdin().lock().lines() {
        let mut line = line?;
        line.push('\n');
        println!("Writing: {}", line.trim_end());
        stream.write(line.as_bytes())?;
    }
    Ok(())
}

fn main() -> Result<()> {
    endpoint::init_tracing();
    let args = Args::parse();

    let controller = Arc::new(ControllerClient::new(&args.controller));
    let channel = endpoint::connect_channel(args.udp, &args.target, args.target_port)?;
    let mut stream = endpoint::create_stream(
        channel,
        controller,
        FilterSpec {
            sent_key: "client_sent",
            recv_key: "client_recv",
            pub_key: args.pub_key,
            priv_key: args.priv_key,
        },
    )?;

    if let Some(file) = &args.file {
        transmit_file(&mut stream, file)?;
    } else {
        transmit_stdin(&mut stream)?;
    }

    if !stream.flush(FLUSH_TIMEOUT) {
        tracing::warn!("receiver did not acknowledge the tail of the transfer");
    }
    stream.close();
    Ok(())
}
