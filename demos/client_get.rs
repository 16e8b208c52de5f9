//! ```text
//! cargo run --example client_get -- 127.0.0.1:8080 /hello/world
//! ```

use webgate::{HttpClient, HttpConfig, Method, Request};

fn main() -> Result<(), webgate::Error> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1:8080".into());
    let path = args.next().unwrap_or_else(|| "/".into());

    let mut client = HttpClient::new(HttpConfig::default());
    let resp = client.send(&address, &Request::new(Method::Get, &path))?;

    println!("{} {}", resp.get_status(), resp.version());
    for entry in resp.headers().entries() {
        println!("{}: {}", entry.name(), entry.value());
    }
    println!();
    println!("{}", resp.get_body().text()?);
    Ok(())
}
