//! balloonbook - command-line front end for SOOP balloon records.
//!
//! Logs a streamer in through the backend's OAuth code exchange, keeps the
//! session on disk between runs, and uses it for the record endpoints.

use std::io;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use balloonbook_core::api::{extract_code, ExportKind, DEFAULT_PAGE_LIMIT};
use balloonbook_core::models::NewBalloonRecord;
use balloonbook_core::{ApiClient, ChatSdk, Config, FileStore, SessionStore};

type Session = SessionStore<FileStore>;

/// File name the backend suggests for exports
const DEFAULT_EXPORT_FILE: &str = "balloon_records.xlsx";

const USAGE: &str = "\
Usage: balloonbook <command>

Commands:
  login <code | redirect-url>        Exchange an OAuth code and store the session
  status                             Show the stored session
  logout [--purge]                   Forget the session (--purge wipes all stored data)
  balloons [--tag TAG] [--page N]    List balloon records for the logged-in streamer
  memo <record-id> <text>            Set the memo on a balloon record
  save <user-id> <count> [--nickname NAME] [--tag TAG]
                                     Record a balloon donation
  export [--tag TAG] [--summary] [--out FILE]
                                     Download records (or donor totals) as xlsx
  config                             Show the resolved configuration";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = Config::from_env();
    info!(data_dir = ?config.data_dir, "balloonbook starting");

    let mut session = SessionStore::hydrate(FileStore::in_dir(&config.data_dir));
    let api = ApiClient::new(config.api_root())?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("status");
    let rest = args.get(1..).unwrap_or(&[]);

    match command {
        "login" => login(&mut session, &api, rest).await,
        "status" => {
            status(&session, &config);
            Ok(())
        }
        "logout" => logout(&mut session, rest),
        "balloons" => balloons(&session, &api, rest).await,
        "memo" => memo(&session, &api, rest).await,
        "save" => save(&session, &api, rest).await,
        "export" => export(&session, &api, rest).await,
        "config" => {
            show_config(&config);
            Ok(())
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

async fn login(session: &mut Session, api: &ApiClient, args: &[String]) -> Result<()> {
    let input = args
        .first()
        .ok_or_else(|| anyhow::anyhow!("login needs an authorization code or the redirect URL"))?;

    let code = if input.starts_with("http://") || input.starts_with("https://") {
        extract_code(input)?
    } else {
        input.clone()
    };

    let payload = api.exchange_code(&code).await?;
    session.set_auth(payload).context("Login response was not usable")?;

    info!(streamer_id = %session.streamer_id(), "Logged in");
    println!(
        "Logged in as {} ({})",
        display_or_id(session.display_name(), session.platform_id()),
        session.platform_id()
    );
    Ok(())
}

fn status(session: &Session, config: &Config) {
    if session.is_logged_in() {
        println!(
            "Logged in as {} ({}), streamer #{}",
            display_or_id(session.display_name(), session.platform_id()),
            session.platform_id(),
            session.streamer_id()
        );
    } else {
        println!("Not logged in");
    }

    let chat = ChatSdk::detect(config.chat_sdk_path.as_deref());
    match chat {
        ChatSdk::Available => println!("Chat: available"),
        ChatSdk::Unavailable(reason) => println!("Chat: disabled ({})", reason),
    }
}

fn logout(session: &mut Session, args: &[String]) -> Result<()> {
    let purge = args.iter().any(|a| a == "--purge");
    if purge {
        session.purge()?;
        println!("Logged out; all stored data removed");
    } else {
        session.logout()?;
        println!("Logged out");
    }
    Ok(())
}

fn require_login(session: &Session) -> Result<()> {
    if !session.is_logged_in() {
        return Err(anyhow::anyhow!("Not logged in. Run `balloonbook login` first."));
    }
    Ok(())
}

async fn balloons(session: &Session, api: &ApiClient, args: &[String]) -> Result<()> {
    require_login(session)?;

    let mut tag = None;
    let mut page = 1u32;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--tag" => tag = iter.next().cloned(),
            "--page" => {
                let value = iter.next().ok_or_else(|| anyhow::anyhow!("--page needs a number"))?;
                page = value.parse().with_context(|| format!("Invalid page: {}", value))?;
            }
            other => return Err(anyhow::anyhow!("Unknown option: {}", other)),
        }
    }

    let client = api.from_session(session);
    let result = client
        .fetch_balloons(session.streamer_id(), tag.as_deref(), page, DEFAULT_PAGE_LIMIT)
        .await?;

    println!(
        "Page {}/{} ({} records)",
        result.page,
        result.total_pages().max(1),
        result.total
    );
    for record in &result.records {
        let when = record
            .recorded_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "#{:<6} {:<16} {:>6} {:<10} {:<24} {}",
            record.id,
            when,
            record.count,
            record.tag.as_deref().unwrap_or(""),
            record.donor_name(),
            record.memo.as_deref().unwrap_or("")
        );
    }

    if !result.summary.is_empty() {
        println!("\nTop donors:");
        for donor in result.summary.iter().take(10) {
            println!(
                "  {:<24} {:>8} balloons in {} donations",
                donor.user_nickname.as_deref().unwrap_or(&donor.user_id),
                donor.total_count,
                donor.donation_count
            );
        }
    }
    Ok(())
}

async fn memo(session: &Session, api: &ApiClient, args: &[String]) -> Result<()> {
    let (id, text) = match args {
        [id, text @ ..] if !text.is_empty() => (id, text.join(" ")),
        _ => return Err(anyhow::anyhow!("memo needs a record id and text")),
    };
    let record_id: i64 = id.parse().with_context(|| format!("Invalid record id: {}", id))?;

    api.from_session(session).update_memo(record_id, &text).await?;
    println!("Memo saved on record #{}", record_id);
    Ok(())
}

async fn save(session: &Session, api: &ApiClient, args: &[String]) -> Result<()> {
    require_login(session)?;

    let (user_id, count, options) = match args {
        [user_id, count, options @ ..] => (user_id, count, options),
        _ => return Err(anyhow::anyhow!("save needs a user id and a balloon count")),
    };
    let count: i64 = count.parse().with_context(|| format!("Invalid count: {}", count))?;

    let mut record = NewBalloonRecord {
        user_id: user_id.clone(),
        user_nickname: String::new(),
        count,
        tag: String::new(),
        recorded_at: None,
    };
    let mut iter = options.iter();
    while let Some(arg) = iter.next() {
        let value = iter
            .next()
            .ok_or_else(|| anyhow::anyhow!("{} needs a value", arg))?;
        match arg.as_str() {
            "--nickname" => record.user_nickname = value.clone(),
            "--tag" => record.tag = value.clone(),
            other => return Err(anyhow::anyhow!("Unknown option: {}", other)),
        }
    }

    let inserted = api
        .from_session(session)
        .save_balloons(session.streamer_id(), std::slice::from_ref(&record))
        .await?;
    println!("Saved {} record(s)", inserted);
    Ok(())
}

async fn export(session: &Session, api: &ApiClient, args: &[String]) -> Result<()> {
    require_login(session)?;

    let mut tag = None;
    let mut kind = ExportKind::Records;
    let mut out = DEFAULT_EXPORT_FILE.to_string();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--tag" => tag = iter.next().cloned(),
            "--summary" => kind = ExportKind::Summary,
            "--out" => {
                out = iter
                    .next()
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("--out needs a file name"))?;
            }
            other => return Err(anyhow::anyhow!("Unknown option: {}", other)),
        }
    }

    let workbook = api
        .from_session(session)
        .export(session.streamer_id(), tag.as_deref(), kind)
        .await?;
    std::fs::write(&out, &workbook).with_context(|| format!("Failed to write {}", out))?;
    println!("Wrote {} ({} bytes)", out, workbook.len());
    Ok(())
}

fn show_config(config: &Config) {
    println!("client_id:     {}", config.client_id);
    println!(
        "client_secret: {}",
        if config.client_secret.is_empty() { "(unset)" } else { "(set)" }
    );
    println!("redirect_uri:  {}", config.redirect_uri);
    println!("api_base:      {}", config.api_root());
    println!("data_dir:      {}", config.data_dir.display());
    match &config.chat_sdk_path {
        Some(path) => println!("chat_sdk:      {}", path.display()),
        None => println!("chat_sdk:      (unset)"),
    }
}

fn display_or_id<'a>(display_name: &'a str, platform_id: &'a str) -> &'a str {
    if display_name.is_empty() {
        platform_id
    } else {
        display_name
    }
}
