mod cli;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use jsfetch::prelude::*;
use jsfetch::transport::config::default_config_path;

#[derive(Debug, Serialize)]
struct FetchSummary {
    status: u16,
    status_text: String,
    url: String,
    headers: Vec<(String, String)>,
    body: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jsfetch=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Fetch { url, method, header, data, config, timeout_ms, json } => {
            let cfg = BridgeConfig::load(config.as_deref())?;
            let transport = HttpTransport::new(cfg)?;
            let mut context = ExecContext::new().with_transport(Arc::new(transport));
            if let Some(ms) = timeout_ms {
                context = context.with_timeout(Duration::from_millis(ms));
            }
            let mut realm = Realm::new(context);
            let summary = run_fetch(&mut realm, &url, method, &header, data)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("HTTP {} {}", summary.status, summary.status_text);
                for (name, value) in &summary.headers {
                    println!("{}: {}", name, value);
                }
                println!();
                print!("{}", summary.body);
            }
        }
        Commands::Config { config } => {
            let path = config.clone().or_else(default_config_path);
            let cfg = BridgeConfig::load(config.as_deref())?;
            match path {
                Some(p) => println!("# {}", p.display()),
                None => println!("# no config directory on this platform"),
            }
            print!("{}", toml::to_string_pretty(&cfg)?);
        }
    }
    Ok(())
}

/// Issue one request through the guest-facing object model, as a guest module would.
fn run_fetch(
    realm: &mut Realm,
    url: &str,
    method: Option<String>,
    headers: &[String],
    data: Option<String>,
) -> Result<FetchSummary> {
    let global = realm.global();
    let fetch = realm.get(&global, "fetch")?;
    if fetch.is_undefined() {
        bail!("fetch is not available in this realm");
    }

    let ctor = realm.get(&global, "Headers")?;
    let request_headers = realm.invoke(&ctor, vec![])?;
    for raw in headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid header {:?}, expected 'Name: value'", raw))?;
        realm.call(&request_headers, "append", vec![name.trim().into(), value.trim().into()])?;
    }

    let method = method.unwrap_or_else(|| if data.is_some() { "POST" } else { "GET" }.to_string());
    let mut props = vec![("method", Value::from(method)), ("headers", request_headers)];
    if let Some(data) = data {
        props.push(("body", Value::from(data)));
    }
    let options = realm.object(props);

    let promise = realm.invoke(&fetch, vec![Value::from(url), options])?;
    let res = settle(realm, &promise)?;

    let status = realm.get(&res, "status")?.as_number().unwrap_or_default() as u16;
    let status_text = realm.get(&res, "statusText")?.as_str().unwrap_or_default().to_string();
    let final_url = realm.get(&res, "url")?.as_str().unwrap_or_default().to_string();

    let res_headers = realm.get(&res, "headers")?;
    let it = realm.call(&res_headers, "entries", vec![])?;
    let mut pairs = Vec::new();
    loop {
        let step = realm.call(&it, "next", vec![])?;
        if realm.get(&step, "done")?.as_bool() == Some(true) {
            break;
        }
        let pair = realm.get(&step, "value")?;
        let name = realm.get(&pair, "0")?.as_str().unwrap_or_default().to_string();
        let value = realm.get(&pair, "1")?.as_str().unwrap_or_default().to_string();
        pairs.push((name, value));
    }

    let body_promise = realm.call(&res, "arrayBuffer", vec![])?;
    let buf = settle(realm, &body_promise)?;
    let body = String::from_utf8_lossy(realm.bytes(&buf)?).into_owned();

    Ok(FetchSummary { status, status_text, url: final_url, headers: pairs, body })
}

/// `then` with a pass-through success callback; a rejection becomes an error.
fn settle(realm: &mut Realm, promise: &Value) -> Result<Value> {
    let failure: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let on_success = realm.function(|_: &mut Realm, args: Vec<Value>| {
        Ok(args.into_iter().next().unwrap_or(Value::Undefined))
    });
    let sink = failure.clone();
    let on_failure = realm.function(move |realm: &mut Realm, args: Vec<Value>| {
        let message = match args.first() {
            Some(err) => format!("{:#}", realm.native_error(err)?),
            None => "promise rejected".to_string(),
        };
        *sink.borrow_mut() = Some(message);
        Ok(Value::Undefined)
    });

    let value = realm.call(promise, "then", vec![on_success.clone(), on_failure.clone()])?;
    realm.release(&on_success)?;
    realm.release(&on_failure)?;

    let failed = failure.borrow_mut().take();
    if let Some(message) = failed {
        bail!(message);
    }
    Ok(value)
}
