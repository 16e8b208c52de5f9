use std::time::Duration;
use webgate::{HttpConfig, Server, StatusCode};

#[tokio::main]
async fn main() -> Result<(), webgate::Error> {
    tracing_subscriber::fmt::init();

    Server::builder()
        .config(HttpConfig {
            server_address: "127.0.0.1".into(),
            server_port: 8080,
            keep_alive_timeout: Duration::from_secs(10),
            ..HttpConfig::default()
        })
        .on_get("/", |_, resp| {
            resp.status(StatusCode::Ok).body("Hello world!");
            true
        })
        .on_get("/hello/{name:alpha}", |req, resp| {
            resp.status(StatusCode::Ok)
                .body(format!("Hello, {}!", req.arg("name")));
            true
        })
        .on_get("/sum/{a:numeric}/{b:numeric}?", |req, resp| {
            let a: u64 = req.arg("a").parse().unwrap_or(0);
            let b: u64 = req.arg("b").parse().unwrap_or(0);
            resp.body((a + b).to_string());
            true
        })
        .on_post("/form", |req, resp| {
            match req.get_body().form_values() {
                Ok(values) => {
                    let mut names: Vec<_> = values.keys().cloned().collect();
                    names.sort();
                    resp.body(names.join(","))
                }
                Err(_) => resp.status(StatusCode::BadRequest),
            };
            true
        })
        .build()
        .run()
        .await
}
