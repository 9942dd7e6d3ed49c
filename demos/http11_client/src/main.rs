//! HTTP/1.1 クライアントの例
//!
//! 使い方:
//!   cargo run -p http11_client -- http://httpbin.org/get
//!   cargo run -p http11_client -- http://httpbin.org/post --method POST --data hello
//!   cargo run -p http11_client -- http://httpbin.org/post --method POST --data hello --chunked

use std::io::Write;

use bytes::Bytes;
use tokio_http11_transport::{
    AbortSignal, Body, Connection, ConnectionOptions, Dispatched, Error, ErrorContext, Flow,
    RequestDescriptor, ResponseHandler, ResponseHead, ResumeHandle, Warning,
};
use tracing_subscriber::EnvFilter;

/// レスポンスを標準出力に書き出すハンドラー
#[derive(Default)]
struct Printer {
    received: usize,
}

impl ResponseHandler for Printer {
    fn on_connect(&mut self, _signal: &AbortSignal) {
        tracing::debug!("request dispatched");
    }

    fn on_headers(&mut self, head: &ResponseHead, _resume: &ResumeHandle) -> Flow {
        println!("{} {} {}", head.version, head.status_code, head.reason_phrase);
        for (name, value) in &head.headers {
            println!("{}: {}", name, value);
        }
        println!();
        Flow::Continue
    }

    fn on_data(&mut self, chunk: &[u8]) -> Flow {
        self.received += chunk.len();
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(chunk) {
            tracing::warn!(error = %e, "failed to write body");
        }
        Flow::Continue
    }

    fn on_complete(&mut self, trailers: &[(String, String)]) {
        for (name, value) in trailers {
            println!("{}: {}", name, value);
        }
        tracing::info!(bytes = self.received, "response complete");
    }

    fn on_warning(&mut self, warning: &Warning) {
        eprintln!("警告: {}", warning);
    }

    fn on_error(&mut self, err: &Error, ctx: &ErrorContext) {
        eprintln!("エラー ({:?}): {}", ctx.phase, err);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = noargs::raw_args();
    args.metadata_mut().app_name = "http11_client";

    // --help フラグ
    noargs::HELP_FLAG.take_help(&mut args);

    // --version フラグ
    let version_flag: bool = noargs::flag("version")
        .short('V')
        .doc("Show version")
        .take(&mut args)
        .is_present();
    if version_flag {
        println!("{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    // --debug フラグ
    let debug: bool = noargs::flag("debug")
        .doc("Enable debug logging")
        .take(&mut args)
        .is_present();

    // --chunked フラグ
    let chunked: bool = noargs::flag("chunked")
        .doc("Send the request body with chunked transfer coding")
        .take(&mut args)
        .is_present();

    // --method オプション
    let method: String = noargs::opt("method")
        .short('X')
        .doc("Request method (default: GET)")
        .default("GET")
        .take(&mut args)
        .then(|o| Ok::<_, &str>(o.value().to_string()))
        .map_err(|e| format!("{:?}", e))?;

    // --data オプション
    let data: Option<String> = noargs::opt("data")
        .short('d')
        .doc("Request body")
        .take(&mut args)
        .present_and_then(|o| Ok::<_, &str>(o.value().to_string()))
        .map_err(|e| format!("{:?}", e))?;

    // 位置引数: URL
    let url: String = noargs::arg("<URL>")
        .doc("URL to fetch (e.g., http://example.com/)")
        .take(&mut args)
        .then(|a| Ok::<_, &str>(a.value().to_string()))
        .map_err(|e| format!("{:?}", e))?;

    // 未知の引数があればエラー、ヘルプが返されたら表示
    if let Some(help) = args.finish().map_err(|e| format!("{:?}", e))? {
        print!("{}", help);
        return Ok(());
    }

    let level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let (host, port, path) = parse_url(&url)?;
    tracing::info!(%host, port, "connecting");

    let options = ConnectionOptions::new().default_host(&host);
    let mut conn = Connection::connect(&format!("{}:{}", host, port), options).await?;

    let desc = RequestDescriptor::new(&method, &path)
        .header("user-agent", concat!("http11_client/", env!("CARGO_PKG_VERSION")))
        .header("accept", "*/*");

    let body = match data {
        Some(data) if chunked => {
            // 長さを知らせずにストリームとして送る
            let (tx, body) = Body::channel(4);
            tokio::spawn(async move {
                for piece in data.into_bytes().chunks(16) {
                    if tx.send(Bytes::copy_from_slice(piece)).await.is_err() {
                        break;
                    }
                }
            });
            body
        }
        Some(data) => Body::from(data),
        None => Body::Empty,
    };

    let mut printer = Printer::default();
    let outcome = conn.dispatch(desc, body, &mut printer).await;
    println!();

    match outcome {
        Dispatched::Completed => {
            tracing::debug!(reusable = conn.can_dispatch(), "done");
            conn.close().await;
            Ok(())
        }
        other => Err(format!("request did not complete: {:?}", other).into()),
    }
}

fn parse_url(url: &str) -> Result<(String, u16, String), Box<dyn std::error::Error>> {
    let Some(rest) = url.strip_prefix("http://") else {
        return Err("URL must start with http://".into());
    };

    let (host_port, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };

    let (host, port) = match host_port.find(':') {
        Some(i) => {
            let port: u16 = host_port[i + 1..].parse()?;
            (&host_port[..i], port)
        }
        None => (host_port, 80),
    };

    Ok((host.to_string(), port, path.to_string()))
}
