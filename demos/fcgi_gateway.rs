//! Serves `/<letters>.php` through a FastCGI responder such as php-fpm.
//!
//! ```text
//! cargo run --example fcgi_gateway -- 127.0.0.1:9000 /var/www/html
//! ```

use std::sync::Arc;
use webgate::{FcgiClient, HttpConfig, Method, Server, StatusCode};

#[tokio::main]
async fn main() -> Result<(), webgate::Error> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let upstream = args.next().unwrap_or_else(|| "127.0.0.1:9000".into());
    let root = args.next().unwrap_or_else(|| "/var/www/html".into());

    let config = HttpConfig {
        server_port: 8080,
        root_folder: root.into(),
        server_name: "webgate-demo".into(),
        ..HttpConfig::default()
    };

    let mut client = FcgiClient::new(&upstream, config.clone());
    client.set_keep_connection(true);
    let client = Arc::new(client);

    Server::builder()
        .config(config)
        // An untyped `{script}` would swallow the `.php` suffix.
        .fastcgi(Method::Get, "/{script:alpha}.php", client.clone())
        .fastcgi(Method::Post, "/{script:alpha}.php", client)
        .on_get("/health", |_, resp| {
            resp.status(StatusCode::Ok).body("ok");
            true
        })
        .build()
        .run()
        .await
}
