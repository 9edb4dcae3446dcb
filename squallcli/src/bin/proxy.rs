//! On-path proxy: bridges a sender-facing channel to the receiver and
//! drops packets in either direction at controller-configured rates.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use squallstream::{
    share, Bridge, Composite, ControllerClient, Mutator, RandomDrop, StatsRelay,
};
use squallcli::endpoint;

#[derive(Parser, Debug)]
#[command(name = "proxy", about = "Proxy server for controlling data drop-rates")]
struct Args {
    /// Port the proxy service listens on.
    #[arg(long, default_value_t = 6000)]
    proxy_port: u16,

    /// Port data is proxied to.
    #[arg(long, default_value_t = 7000)]
    target_port: u16,

    /// Host data is proxied to.
    #[arg(long, default_value = "127.0.0.1")]
    target: String,

    /// Controller URL in the form http://<host>:<port>.
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    controller: String,

    /// Use the datagram channel instead of the default byte-stream channel.
    #[arg(long)]
    udp: bool,
}

/// How often the drop rates are refreshed from the controller.
const CONFIG_POLL: Duration = Duration::from_millis(200);

/// Count arrivals, maybe drop, count survivors.
fn direction_filter(
    controller: &Arc<ControllerClient>,
    drop: &Arc<RandomDrop>,
) -> Arc<dyn Mutator> {
    let arrivals: Arc<dyn Mutator> = Arc::new(StatsRelay::new("proxy_recv", controller.clone()));
    let dropper: Arc<dyn Mutator> = drop.clone();
    Arc::new(StatsRelay::with_inner(
        "proxy_sent",
        controller.clone(),
        Arc::new(Composite::new(dropper, arrivals)),
    ))
}

fn main() -> Result<()> {
    endpoint::init_tracing();
    let args = Args::parse();

    let controller = Arc::new(ControllerClient::new(&args.controller));

    tracing::info!(port = args.proxy_port, "waiting for a connection to the proxy");
    let client = endpoint::accept_channel(args.udp, args.proxy_port)?;

    tracing::info!(target = %args.target, port = args.target_port, "establishing connection to the target");
    let target = endpoint::connect_channel(args.udp, &args.target, args.target_port)?;

    let client_server_drop = Arc::new(RandomDrop::new(0.0));
    let server_client_drop = Arc::new(RandomDrop::new(0.0));

    tracing::info!("target connection established, bridging");
    let mut bridge = Bridge::start(
        share(client),
        share(target),
        Some(direction_filter(&controller, &client_server_drop)),
        Some(direction_filter(&controller, &server_client_drop)),
    );

    while bridge.is_alive() {
        thread::sleep(CONFIG_POLL);
        // Drop rates arrive from the control plane as percentages.
        client_server_drop.set_drop(controller.get_config("client_server_drop", 0.0) / 100.0);
        server_client_drop.set_drop(controller.get_config("server_client_drop", 0.0) / 100.0);
    }
    bridge.stop();
    Ok(())
}
