use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "cleaner_ctl", version)]
struct Args {
    /// Core base URL, e.g. http://127.0.0.1:17700
    #[arg(long, default_value = "http://127.0.0.1:17700")]
    core_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete history from the last hour.
    Quick,
    /// Delete all history plus cache, cookies and site storage.
    Full,
    /// Delete every history entry whose URL contains this one (scheme, www. and trailing / ignored).
    Url { url: String },
    /// Delete history entries whose URL or title contains the keyword (case-sensitive).
    Keyword { keyword: String },
    /// Run the URL clear for many URLs, given as arguments and/or one per line in a file.
    Bulk {
        #[arg(long)]
        file: Option<PathBuf>,
        urls: Vec<String>,
    },
    /// Clear selected data kinds. At least one flag is required.
    Categories {
        #[arg(long)]
        history: bool,
        #[arg(long)]
        cache: bool,
        #[arg(long)]
        cookies: bool,
        #[arg(long)]
        local_storage: bool,
    },
    /// Delete history from the last N hours.
    Range { hours: u32 },
    /// Delete all history (site data untouched).
    AllHistory,
    /// Change the periodic cleaning schedule. Omitted options keep their value.
    Schedule {
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: Option<bool>,
        /// Minutes between runs.
        #[arg(long)]
        interval: Option<u32>,
        #[arg(long, action = clap::ArgAction::Set)]
        history: Option<bool>,
        #[arg(long, action = clap::ArgAction::Set)]
        cache: Option<bool>,
    },
    /// Replace the browser-start cleaning policy.
    Startup {
        #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
        enabled: bool,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        history: bool,
        #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
        cache: bool,
    },
    Settings,
    Stats,
    /// When the scheduled cleaner runs next.
    Next,
    /// Print the next scheduled run every few seconds until interrupted.
    Watch {
        #[arg(long, default_value_t = 60)]
        every_seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cleaner_ctl=info".into()),
        )
        .init();

    let args = Args::parse();
    let client = reqwest::Client::new();
    let endpoint = format!("{}/action", args.core_url.trim_end_matches('/'));

    if let Command::Watch { every_seconds } = args.command {
        return watch(&client, &endpoint, every_seconds).await;
    }

    let payload = build_request(&args.command)?;
    let body = send(&client, &endpoint, &payload).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if body.get("success") == Some(&Value::Bool(false)) {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        anyhow::bail!("core reported failure: {reason}");
    }
    Ok(())
}

async fn send(client: &reqwest::Client, endpoint: &str, payload: &Value) -> anyhow::Result<Value> {
    tracing::debug!("POST {endpoint} {payload}");
    let resp = client.post(endpoint).json(payload).send().await?;
    let status = resp.status();
    let body: Value = resp.json().await?;
    if !status.is_success() {
        anyhow::bail!("core returned {status}: {body}");
    }
    Ok(body)
}

async fn watch(client: &reqwest::Client, endpoint: &str, every_seconds: u64) -> anyhow::Result<()> {
    use tokio::time::{sleep, Duration};
    use tracing::{error, info};

    let payload = json!({"action": "getNextCleanTime"});
    loop {
        match send(client, endpoint, &payload).await {
            Ok(body) => info!(
                "next clean: {}",
                body.get("nextCleanTime")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("?")
            ),
            Err(e) => error!("poll failed: {e}"),
        }
        sleep(Duration::from_secs(every_seconds.max(1))).await;
    }
}

/// Splits pasted text into URLs: one per line, trimmed, blanks dropped.
fn parse_bulk_urls(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rejects blank input but returns it untouched; keywords match literally.
fn non_blank<'a>(value: &'a str, what: &str) -> anyhow::Result<&'a str> {
    if value.trim().is_empty() {
        anyhow::bail!("please enter a {what}");
    }
    Ok(value)
}

fn build_request(command: &Command) -> anyhow::Result<Value> {
    let payload = match command {
        Command::Quick => json!({"action": "quickClear"}),
        Command::Full => json!({"action": "fullClean"}),
        Command::Url { url } => json!({"action": "clearUrl", "url": non_blank(url, "URL")?.trim()}),
        Command::Keyword { keyword } => {
            json!({"action": "clearKeyword", "keyword": non_blank(keyword, "keyword")?})
        }
        Command::Bulk { file, urls } => {
            let mut all: Vec<String> = urls
                .iter()
                .map(|u| u.trim())
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
            if let Some(path) = file {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
                all.extend(parse_bulk_urls(&text));
            }
            if all.is_empty() {
                anyhow::bail!("please enter at least one URL");
            }
            json!({"action": "clearBulk", "urls": all})
        }
        Command::Categories {
            history,
            cache,
            cookies,
            local_storage,
        } => {
            if !(*history || *cache || *cookies || *local_storage) {
                anyhow::bail!("select at least one data type to clear");
            }
            json!({
                "action": "clearCache",
                "options": {
                    "history": history,
                    "cache": cache,
                    "cookies": cookies,
                    "localStorage": local_storage,
                }
            })
        }
        Command::Range { hours } => {
            if *hours == 0 {
                anyhow::bail!("hours must be at least 1");
            }
            json!({"action": "clearTimeRange", "hours": hours})
        }
        Command::AllHistory => json!({"action": "clearAllHistory"}),
        Command::Schedule {
            enabled,
            interval,
            history,
            cache,
        } => {
            if *interval == Some(0) {
                anyhow::bail!("interval must be at least 1 minute");
            }
            let mut schedule = serde_json::Map::new();
            if let Some(v) = enabled {
                schedule.insert("enabled".into(), json!(v));
            }
            if let Some(v) = interval {
                schedule.insert("interval".into(), json!(v));
            }
            if let Some(v) = history {
                schedule.insert("clearHistory".into(), json!(v));
            }
            if let Some(v) = cache {
                schedule.insert("clearCache".into(), json!(v));
            }
            json!({"action": "saveSchedule", "schedule": schedule})
        }
        Command::Startup {
            enabled,
            history,
            cache,
        } => json!({
            "action": "saveStartup",
            "startup": {"enabled": enabled, "clearHistory": history, "clearCache": cache}
        }),
        Command::Settings => json!({"action": "getSettings"}),
        Command::Stats => json!({"action": "getStats"}),
        Command::Next | Command::Watch { .. } => json!({"action": "getNextCleanTime"}),
    };
    Ok(payload)
}
