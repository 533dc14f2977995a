//! Dials a host the way the proxy would and prints the first response line.
//!
//! ```text
//! RUST_LOG=rttp_proxy=debug cargo run --example connect -- example.com 443
//! ```

use std::error::Error;
use std::time::Duration;

use rttp_proxy::context::Scope;
use rttp_proxy::dialer::{Dialer, DialerOptions};
use rttp_proxy::http::{Method, Request};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rttp_proxy=debug")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "example.com".to_owned());
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(443);
    let insecure = args.any(|arg| arg == "--insecure");

    let dialer = Dialer::new(
        DialerOptions::new()
            .timeout(Duration::from_secs(10))
            .tls_skip_verify(insecure),
    );
    let scope = Scope::background();

    let conn = dialer.dial(&scope, &host, port).await?;
    println!("connected to {}", conn.peer_addr()?);

    // absolute-form, as a client talking to a proxy would send it
    let mut request = Request::new(Method::Head, format!("http://{host}/"));
    dialer.patch_http_request(&mut request);
    request.headers_mut().insert("Connection", "close");

    if port == 443 {
        let tls = dialer.upgrade_to_tls(&scope, conn, &host).await?;
        println!("TLS established");
        print_status(tls, &request).await?;
    } else {
        print_status(conn, &request).await?;
    }

    println!("watchdogs alive: {}", dialer.active_watchdogs());
    Ok(())
}

async fn print_status<S>(stream: S, request: &Request) -> Result<(), Box<dyn Error>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = format!(
        "{} {} HTTP/1.1\r\n{}\r\n",
        request.method(),
        request.target(),
        request.headers()
    );

    let mut stream = BufReader::new(stream);
    stream.get_mut().write_all(head.as_bytes()).await?;
    stream.get_mut().flush().await?;

    let mut status = String::new();
    stream.read_line(&mut status).await?;
    println!("{}", status.trim_end());
    Ok(())
}
