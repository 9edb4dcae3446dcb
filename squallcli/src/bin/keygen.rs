//! Generates an RSA keypair in the working directory.

use anyhow::{Context, Result};
use clap::Parser;
use squalltrust::{generate_keypair, DEFAULT_PRIME_BITS};
use squallcli::endpoint;

#[derive(Parser, Debug)]
#[command(
    name = "keygen",
    about = "Generates a public and private key file, placed in the working \
             directory as ./public.key and ./private.key"
)]
struct Args {}

fn main() -> Result<()> {
    endpoint::init_tracing();
    let _args = Args::parse();

    let (public, private) = generate_keypair(DEFAULT_PRIME_BITS);
    public.save("public.key").context("cannot write public.key")?;
    private.save("private.key").context("cannot write private.key")?;
    println!("wrote ./public.key and ./private.key");
    Ok(())
}
