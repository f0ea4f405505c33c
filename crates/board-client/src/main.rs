use anyhow::{Context, Result};
use board_client::connection::ConnectionManager;
use board_client::endpoint::{channel_url, parse_origin};
use board_client::runtime::{event_channel, TokioScheduler, WsConnector};
use board_client::store::{SessionState, SessionStore};
use board_core::paths::resolve_project_path;
use board_core::protocol::{ClientMessage, ServerMessage};
use board_core::settings::Preferences;
use board_core::sort::{SortConfig, SortDirection, SortMode};
use board_core::{ConnectionStatus, Session};
use clap::Parser;
use std::cell::{Cell, RefCell};
use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};
use url::Url;

const DEFAULT_ORIGIN: &str = "http://127.0.0.1:4040";
const DEFAULT_SETTINGS_PATH: &str = "~/.agentboard/settings.json";
const DEFAULT_LOG_DIR: &str = ".agentboard/logs";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

#[derive(Parser, Debug)]
#[command(name = "board-watch")]
struct Args {
    #[arg(long, default_value = "")]
    origin: String,
    #[arg(long, default_value = "")]
    settings: String,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,
}

#[derive(Clone, Debug)]
struct Config {
    channel_url: Url,
    settings_path: PathBuf,
    log_dir: String,
    log_stderr: bool,
    reconnect_delay: Duration,
}

struct LogGuard {
    file: Option<Arc<StdMutex<std::fs::File>>>,
}

/// Log sink fan-out. The console copy goes to stderr so it never interleaves with the
/// board rendered on stdout.
struct MultiWriter<W: Write> {
    console: Option<W>,
    file: Option<Arc<StdMutex<std::fs::File>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Refresh,
    Select(String),
    Create { path: String, name: Option<String> },
    Kill(String),
    Rename { session_id: String, name: String },
    Sort {
        mode: SortMode,
        direction: Option<SortDirection>,
    },
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{command}: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("{command}: invalid {argument} '{value}'")]
    InvalidArgument {
        command: &'static str,
        argument: &'static str,
        value: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args)?;
    let _log_guard = init_logging(&config);

    let mut preferences = match Preferences::load(&config.settings_path) {
        Ok(preferences) => preferences,
        Err(err) => {
            warn!(event = "settings_load_failed", error = %err);
            Preferences::default()
        }
    };

    let store = Rc::new(RefCell::new(SessionStore::new(preferences.sort_config())));
    let dirty = Rc::new(Cell::new(true));
    let refresh_due = Rc::new(Cell::new(false));

    {
        let dirty = dirty.clone();
        store.borrow().subscribe(move |_| dirty.set(true));
    }

    let (events_tx, mut events_rx) = event_channel();
    let mut manager = ConnectionManager::new(
        config.channel_url.clone(),
        WsConnector::new(events_tx.clone()),
        TokioScheduler::new(events_tx),
    )
    .with_reconnect_delay(config.reconnect_delay);

    {
        let store = store.clone();
        let refresh_due = refresh_due.clone();
        manager.subscribe_status(move |status| {
            store.borrow_mut().set_connection_status(*status);
            if *status == ConnectionStatus::Connected {
                refresh_due.set(true);
            }
        });
    }
    {
        let store = store.clone();
        manager.subscribe(move |message| {
            match message {
                ServerMessage::Error { message } => {
                    warn!(event = "server_error", message = %message);
                }
                ServerMessage::SessionCreated { session } => {
                    info!(event = "session_created", session_id = %session.id, name = %session.name);
                }
                _ => {}
            }
            store.borrow_mut().apply_server_message(message);
        });
    }

    info!(
        event = "board_watch_start",
        url = %config.channel_url,
        settings = %config.settings_path.display()
    );
    manager.connect();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                manager.dispatch(event);
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match parse_command(&line) {
                            Ok(Command::Quit) => break,
                            Ok(command) => run_command(command, &mut manager, &store, &mut preferences),
                            Err(err) => eprintln!("{err}"),
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(err) => {
                        warn!(event = "stdin_read_failed", error = %err);
                        stdin_open = false;
                    }
                }
            }
            _ = &mut shutdown => break,
        }

        store
            .borrow_mut()
            .set_connection_error(manager.last_error().map(str::to_string));
        if refresh_due.replace(false) {
            manager.send(&ClientMessage::SessionRefresh);
        }
        if dirty.replace(false) {
            let store = store.borrow();
            print!("{}", render_board(store.state(), &store.sorted_sessions()));
            let _ = io::stdout().flush();
        }
    }

    manager.disconnect();
    preferences
        .save(&config.settings_path)
        .with_context(|| format!("save settings to {}", config.settings_path.display()))?;
    info!(event = "board_watch_stop");
    Ok(())
}

fn run_command<C, S>(
    command: Command,
    manager: &mut ConnectionManager<C, S>,
    store: &Rc<RefCell<SessionStore>>,
    preferences: &mut Preferences,
) where
    C: board_client::connection::Connector,
    S: board_client::connection::Scheduler,
{
    let message = match command {
        Command::Refresh => ClientMessage::SessionRefresh,
        Command::Select(session_id) => {
            store.borrow_mut().select(Some(&session_id));
            return;
        }
        Command::Create { path, name } => {
            let project_path = resolve_project_path(&path);
            preferences.set_last_project_path(project_path.clone());
            preferences.add_recent_path(project_path.clone());
            ClientMessage::SessionCreate {
                project_path,
                name,
                command: Some(preferences.default_command.clone()),
            }
        }
        Command::Sort { mode, direction } => {
            apply_sort(&mut store.borrow_mut(), preferences, mode, direction);
            return;
        }
        Command::Kill(session_id) => ClientMessage::SessionKill { session_id },
        Command::Rename { session_id, name } => ClientMessage::SessionRename {
            session_id,
            new_name: name,
        },
        Command::Quit => return,
    };
    if !manager.send(&message) {
        eprintln!("not connected; command dropped");
    }
}

/// Switches the display order and records it as the persisted preference.
/// Without a direction the current one is kept.
fn apply_sort(
    store: &mut SessionStore,
    preferences: &mut Preferences,
    mode: SortMode,
    direction: Option<SortDirection>,
) {
    let config = SortConfig {
        mode,
        direction: direction.unwrap_or(store.sort_config().direction),
    };
    store.set_sort_config(config);
    preferences.set_session_sort_mode(config.mode);
    preferences.set_session_sort_direction(config.direction);
}

fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let required = |command: &'static str, argument: &'static str, value: &str| {
        if value.is_empty() {
            Err(CommandError::MissingArgument { command, argument })
        } else {
            Ok(value.to_string())
        }
    };
    match verb {
        "" => Err(CommandError::Empty),
        "refresh" => Ok(Command::Refresh),
        "quit" | "exit" => Ok(Command::Quit),
        "select" => Ok(Command::Select(required("select", "session id", rest)?)),
        "kill" => Ok(Command::Kill(required("kill", "session id", rest)?)),
        "create" => {
            let (path, name) = match rest.split_once(char::is_whitespace) {
                Some((path, name)) => (path, name.trim()),
                None => (rest, ""),
            };
            Ok(Command::Create {
                path: required("create", "project path", path)?,
                name: (!name.is_empty()).then(|| name.to_string()),
            })
        }
        "rename" => {
            let (session_id, name) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            Ok(Command::Rename {
                session_id: required("rename", "session id", session_id)?,
                name: required("rename", "new name", name.trim())?,
            })
        }
        "sort" => {
            let mut args = rest.split_whitespace();
            let mode = match args.next() {
                Some("created") => SortMode::Created,
                Some("status") => SortMode::Status,
                Some(other) => {
                    return Err(CommandError::InvalidArgument {
                        command: "sort",
                        argument: "mode",
                        value: other.to_string(),
                    })
                }
                None => {
                    return Err(CommandError::MissingArgument {
                        command: "sort",
                        argument: "mode",
                    })
                }
            };
            let direction = match args.next() {
                Some("asc") => Some(SortDirection::Asc),
                Some("desc") => Some(SortDirection::Desc),
                Some(other) => {
                    return Err(CommandError::InvalidArgument {
                        command: "sort",
                        argument: "direction",
                        value: other.to_string(),
                    })
                }
                None => None,
            };
            Ok(Command::Sort { mode, direction })
        }
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn render_board(state: &SessionState, sorted: &[Session]) -> String {
    let mut out = format!("[{}]", state.connection_status);
    if let Some(error) = &state.connection_error {
        out.push_str(&format!(" error: {error}"));
    }
    out.push('\n');
    if !state.has_loaded {
        out.push_str("  (waiting for sessions)\n");
        return out;
    }
    if sorted.is_empty() {
        out.push_str("  (no sessions)\n");
        return out;
    }
    for session in sorted {
        let marker = if state.selected_session_id.as_deref() == Some(session.id.as_str()) {
            '>'
        } else {
            ' '
        };
        out.push_str(&format!(
            "{marker} {:<10} {:<24} {:<8} {}\n",
            session.id, session.name, session.status, session.project_path
        ));
    }
    out
}

fn load_config(args: Args) -> Result<Config> {
    let origin = resolve_origin(&args.origin);
    let origin = parse_origin(&origin)?;
    let channel_url = channel_url(&origin)?;
    debug!(event = "channel_url_resolved", origin = %origin, url = %channel_url);
    Ok(Config {
        channel_url,
        settings_path: PathBuf::from(resolve_project_path(&resolve_settings_path(&args.settings))),
        log_dir: resolve_log_dir(&args.log_dir),
        log_stderr: resolve_log_stderr(),
        reconnect_delay: Duration::from_millis(resolve_reconnect_delay_ms(args.reconnect_delay_ms)),
    })
}

fn resolve_origin(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = env::var("BOARD_ORIGIN") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    DEFAULT_ORIGIN.to_string()
}

fn resolve_settings_path(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = env::var("BOARD_SETTINGS") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    DEFAULT_SETTINGS_PATH.to_string()
}

fn resolve_log_dir(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = env::var("BOARD_LOG_DIR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    DEFAULT_LOG_DIR.to_string()
}

fn resolve_reconnect_delay_ms(flag: Option<u64>) -> u64 {
    if let Some(value) = flag {
        return value;
    }
    if let Ok(value) = env::var("BOARD_RECONNECT_DELAY_MS") {
        if let Ok(parsed) = value.trim().parse::<u64>() {
            return parsed;
        }
    }
    DEFAULT_RECONNECT_DELAY_MS
}

fn resolve_log_stderr() -> bool {
    if let Ok(value) = env::var("BOARD_LOG_STDERR") {
        match value.trim() {
            "1" | "true" | "TRUE" | "yes" | "YES" => return true,
            "0" | "false" | "FALSE" | "no" | "NO" => return false,
            _ => {}
        }
    }
    false
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = env::var("BOARD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(&config.log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = guard.file.clone();
    let stderr_enabled = config.log_stderr;
    let make_writer =
        BoxMakeWriter::new(move || MultiWriter::new(file.clone(), stderr_enabled.then(io::stderr)));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("board-watch.log"))?;
    Ok(LogGuard {
        file: Some(Arc::new(StdMutex::new(file))),
    })
}

impl<W: Write> MultiWriter<W> {
    fn new(file: Option<Arc<StdMutex<std::fs::File>>>, console: Option<W>) -> Self {
        Self { console, file }
    }
}

impl<W: Write> Write for MultiWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(console) = self.console.as_mut() {
            let _ = console.write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(console) = self.console.as_mut() {
            let _ = console.flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}
