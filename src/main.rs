use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use kebun_sync::clock::SystemClock;
use kebun_sync::{
  Config, EngineSettings, FilePart, HttpProbe, HttpTransport, OfflineEngine, Payload,
  PersistentStore, SqliteStore, SyncOutcome,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kebun-sync")]
#[command(about = "Offline-first client for the farm records API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kebun-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// SQLite file for cache and queue (overrides config)
  #[arg(long)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity and queue length
  Status,
  /// Read a path, network first
  Get { path: String },
  /// Read a path, cache first within the freshness window
  Fetch { path: String },
  /// Create a record from a JSON object
  Create { entity: String, json: String },
  /// Update a record from a JSON object
  Update {
    entity: String,
    id: String,
    json: String,
  },
  /// Delete a record
  Delete { entity: String, id: String },
  /// Create or update a record with an attached file
  Upload {
    entity: String,
    /// Plain form fields as a JSON object
    fields: String,
    /// Form field name for the file
    #[arg(long, default_value = "gambar")]
    field: String,
    #[arg(long)]
    file: PathBuf,
    /// Update this record instead of creating one
    #[arg(long)]
    id: Option<String>,
  },
  /// List pending actions
  Queue,
  /// Replay pending actions now
  Sync,
  /// Drop every pending action
  ClearQueue,
  /// Stay running and sync whenever the server becomes reachable
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let db_path = match args.db.or_else(|| config.storage.path.clone()) {
    Some(path) => path,
    None => SqliteStore::default_path()?,
  };

  let _log_guard = init_logging(&db_path)?;

  let transport = HttpTransport::new(
    &config.server.url,
    config.server.timeout(),
    Config::get_api_token(),
  )?;
  let probe_url = transport.endpoint(&config.sync.probe_path)?;
  let probe = Arc::new(HttpProbe::new(
    probe_url,
    config.sync.probe_interval(),
    config.server.timeout(),
  )?);

  let store = PersistentStore::new(SqliteStore::open(&db_path)?);
  let engine = OfflineEngine::new(
    store,
    Arc::new(transport),
    probe.clone(),
    Arc::new(SystemClock),
    EngineSettings {
      cache_policy: config.cache.policy(),
      settle_delay: config.sync.settle_delay(),
    },
  );

  run(&engine, &probe, args.command).await
}

async fn run(engine: &OfflineEngine, probe: &Arc<HttpProbe>, command: Command) -> Result<()> {
  // One-shot commands act on the state at startup; watch keeps probing
  if !matches!(command, Command::Watch) {
    probe.check().await;
  }

  let client = &engine.client;
  match command {
    Command::Status => {
      print_json(&serde_json::json!({
        "online": client.is_online(),
        "pending": client.pending_count().await,
      }))?;
    }
    Command::Get { path } => print_json(&client.get(&path).await?)?,
    Command::Fetch { path } => print_json(&client.fetch(&path).await?)?,
    Command::Create { entity, json } => {
      print_json(&client.post(&entity, Payload::Json(parse_json(&json)?)).await?)?
    }
    Command::Update { entity, id, json } => {
      print_json(&client.put(&entity, &id, Payload::Json(parse_json(&json)?)).await?)?
    }
    Command::Delete { entity, id } => print_json(&client.delete(&entity, &id).await?)?,
    Command::Upload {
      entity,
      fields,
      field,
      file,
      id,
    } => {
      let payload = Payload::Multipart {
        fields: parse_object(&fields)?,
        file: read_file_part(&field, &file)?,
      };
      let response = match id {
        Some(id) => client.put(&entity, &id, payload).await?,
        None => client.post(&entity, payload).await?,
      };
      print_json(&response)?;
    }
    Command::Queue => print_json(&client.queue().peek_all().await)?,
    Command::Sync => {
      if !client.is_online() {
        return Err(eyre!("Server is not reachable; nothing was replayed"));
      }
      match engine.manager.sync_all().await {
        SyncOutcome::Completed(result) => print_json(&result)?,
        SyncOutcome::AlreadySyncing => println!("already syncing"),
      }
    }
    Command::ClearQueue => {
      let dropped = client.pending_count().await;
      client.queue().clear().await;
      println!("dropped {} pending action(s)", dropped);
    }
    Command::Watch => watch(engine, probe).await?,
  }
  Ok(())
}

async fn watch(engine: &OfflineEngine, probe: &Arc<HttpProbe>) -> Result<()> {
  let mut events = engine.manager.subscribe();
  let auto_sync = engine.start_auto_sync();
  let probing = probe.spawn();

  // Catch up on anything queued by an earlier run
  if probe.check().await {
    engine.manager.sync_all().await;
  }

  info!("watching for connectivity changes");
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      Some(event) = events.next() => {
        println!("{:?}", event);
      }
    }
  }

  probing.abort();
  auto_sync.abort();
  Ok(())
}

fn init_logging(db_path: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = db_path
    .parent()
    .map(Path::to_path_buf)
    .unwrap_or_else(|| PathBuf::from("."));
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "kebun-sync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_env("KEBUN_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn parse_json(text: &str) -> Result<Value> {
  serde_json::from_str(text).map_err(|e| eyre!("Invalid JSON '{}': {}", text, e))
}

fn parse_object(text: &str) -> Result<Map<String, Value>> {
  match parse_json(text)? {
    Value::Object(map) => Ok(map),
    _ => Err(eyre!("Expected a JSON object, got '{}'", text)),
  }
}

fn read_file_part(field: &str, path: &Path) -> Result<FilePart> {
  let bytes =
    std::fs::read(path).map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .ok_or_else(|| eyre!("{} has no file name", path.display()))?;

  Ok(FilePart {
    field: field.to_string(),
    mime_type: guess_mime(&file_name).map(String::from),
    file_name,
    bytes,
  })
}

fn guess_mime(file_name: &str) -> Option<&'static str> {
  let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
  match ext.as_str() {
    "jpg" | "jpeg" => Some("image/jpeg"),
    "png" => Some("image/png"),
    "webp" => Some("image/webp"),
    "pdf" => Some("application/pdf"),
    _ => None,
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_guess_mime() {
    assert_eq!(guess_mime("daun.JPG"), Some("image/jpeg"));
    assert_eq!(guess_mime("laporan.pdf"), Some("application/pdf"));
    assert_eq!(guess_mime("nota"), None);
  }

  #[test]
  fn test_parse_object_rejects_arrays() {
    assert!(parse_object(r#"{"kg": 4}"#).is_ok());
    assert!(parse_object("[1, 2]").is_err());
    assert!(parse_json("{oops").is_err());
  }

  #[test]
  fn test_args_parse() {
    let args = Args::try_parse_from([
      "kebun-sync",
      "upload",
      "pemeriksaan",
      r#"{"pokok_id": 3}"#,
      "--file",
      "daun.jpg",
      "--id",
      "8",
    ])
    .unwrap();
    match args.command {
      Command::Upload { entity, field, id, .. } => {
        assert_eq!(entity, "pemeriksaan");
        assert_eq!(field, "gambar");
        assert_eq!(id.as_deref(), Some("8"));
      }
      other => panic!("unexpected command {:?}", other),
    }
  }

  #[test]
  fn test_watch_is_a_regular_command() {
    let args = Args::try_parse_from(["kebun-sync", "--db", "/tmp/kebun.db", "watch"]).unwrap();
    assert!(matches!(args.command, Command::Watch));
    assert_eq!(args.db.as_deref(), Some(Path::new("/tmp/kebun.db")));
  }
}
