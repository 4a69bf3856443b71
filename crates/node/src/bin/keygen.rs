// Path: crates/node/src/bin/keygen.rs
#![forbid(unsafe_code)]

//! Generates a service key pair and writes the passphrase-locked key file.

use anyhow::Result;
use arca_crypto::keys::{public_key_hash, save_key_file, KeyPair};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "arca-keygen")]
struct Opts {
    /// Where to write the key file.
    #[clap(long)]
    out: PathBuf,
    /// Passphrase locking the key file.
    #[clap(long, env = "ARCA_KEY_PASSPHRASE")]
    passphrase: String,
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    let pair = KeyPair::generate();
    save_key_file(&opts.out, &pair.secret, &opts.passphrase)?;
    println!("public key (base64): {}", BASE64.encode(pair.public.as_bytes()));
    println!("public key hash:     {}", public_key_hash(&pair.public));
    println!("key file written to  {}", opts.out.display());
    Ok(())
}
