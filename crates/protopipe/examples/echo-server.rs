//! Minimal echo server: accepts one peer and echoes bytes back until it closes.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send protopipe-echo-example hello there

use protopipe::PipeEndpoint;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let name = "protopipe-echo-example";
    let endpoint = PipeEndpoint::create()?;
    endpoint.listen(name)?;
    eprintln!("Listening on {name}");

    endpoint.accept()?;
    eprintln!("Peer connected");

    let mut buf = [0u8; 4096];
    loop {
        let n = endpoint.read(&mut buf)?;
        if n == 0 {
            eprintln!("Peer disconnected");
            break;
        }
        eprintln!("Received {n} bytes");
        endpoint.write(&buf[..n])?;
    }

    endpoint.close();
    Ok(())
}
