use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use cs_core::config::Config;
use cs_core::run::{run, RunOptions};
use tokio_util::sync::CancellationToken;

fn print_help() {
    println!("chatstream: stream a chat answer to the terminal");
    println!();
    println!("Usage:");
    println!("  chatstream [OPTIONS] \"message\"");
    println!("  echo \"message\" | chatstream [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --session <id>    Continue this chat session");
    println!("  --parent <id>     Reply to this message id");
    println!("  --replay <file>   Render a captured NDJSON stream instead of calling the server");
    println!("  --no-citations    Do not ask for citations");
    println!("  --no-cache        Ignore and do not update the session cache");
    println!("  --verbose         Debug logging (RUST_LOG overrides)");
    println!("  --version         Print version");
    println!("  --help            Print this help");
}

fn usage_error(msg: &str) -> ! {
    eprintln!("[cs] error: {msg}");
    eprintln!("try 'chatstream --help'");
    std::process::exit(2);
}

/// Parse arguments into run options and the verbosity flag.
fn parse_args(args: &[String]) -> (RunOptions, bool) {
    let mut options = RunOptions::default();
    let mut verbose = false;
    let mut positional: Vec<&str> = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| match iter.next() {
            Some(v) => v.clone(),
            None => usage_error(&format!("{flag} needs a value")),
        };
        match arg.as_str() {
            "--session" => options.session = Some(value("--session")),
            "--parent" => {
                let raw = value("--parent");
                match raw.parse::<i64>() {
                    Ok(id) => options.parent = Some(id),
                    Err(_) => usage_error(&format!("invalid message id '{raw}'")),
                }
            }
            "--replay" => options.replay = Some(PathBuf::from(value("--replay"))),
            "--no-citations" => options.no_citations = true,
            "--no-cache" => options.no_cache = true,
            "--verbose" | "-v" => verbose = true,
            flag if flag.starts_with('-') => usage_error(&format!("unknown option '{flag}'")),
            text => positional.push(text),
        }
    }

    options.message = positional.join(" ");
    (options, verbose)
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("chatstream {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let (mut options, verbose) = parse_args(&args);

    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    // Message from the command line, or piped on stdin
    if options.message.trim().is_empty() && !io::stdin().is_terminal() {
        let mut buf = String::new();
        if io::stdin().read_to_string(&mut buf).is_ok() {
            options.message = buf.trim().to_string();
        }
    }
    if options.message.trim().is_empty() && options.replay.is_none() {
        usage_error("no message given");
    }

    let config = Config::load_or_default();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("[cs] error: failed to create async runtime: {e}");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let code = runtime.block_on(async {
        let on_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::debug!("interrupt received; cancelling");
                on_ctrl_c.cancel();
            }
        });
        run(&config, &options, cancel).await
    });
    std::process::exit(code);
}
