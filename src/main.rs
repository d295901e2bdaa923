mod app;
mod cache;
mod report;
mod state;

use crate::app::App;
use crate::cache::preview_cache::PreviewCache;
use crate::cache::round_store::RoundStore;
use crate::cache::store::{FileStore, KvStore};
use crate::state::app_settings::AppSettings;
use crate::state::messages::{NetworkRequest, NetworkResponse, UiEvent};
use crate::state::network::{NetworkWorker, Pipeline};
use crate::state::refresher::{PeriodicRefresher, PollControl};
use anyhow::Context;
use broadcast_api::client::BroadcastApi;
use broadcast_api::feed::FeedFetcher;
use broadcast_api::roster::Roster;
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc, watch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if handle_cli_args() {
        return Ok(());
    }

    better_panic::install();

    let settings = AppSettings::load();
    env_logger::Builder::new().filter_level(settings.log_level).init();

    if !settings.has_source() {
        anyhow::bail!("set BOARDCAST_TOURNAMENT or BOARDCAST_OFFICIAL_PGN\n\n{}", usage_text());
    }

    let roster = load_roster(&settings)?;
    let store: Arc<dyn KvStore> = Arc::new(FileStore::new(&settings.cache_dir));

    let fetcher = FeedFetcher::new(BroadcastApi::with_base_url(settings.api_base.clone()));
    fetcher.register(settings.feed_config());

    let pipeline = Arc::new(Pipeline {
        fetcher,
        roster: Arc::new(roster),
        rounds: Mutex::new(RoundStore::new(store.clone(), settings.tournament_key.clone())),
        store: store.clone(),
        tournament_key: settings.tournament_key.clone(),
        broadcast_id: settings.broadcast_id.clone(),
        min_boards: settings.min_boards,
    });

    info!(
        "following {} (cache in {})",
        settings.tournament_key,
        settings.cache_dir.display()
    );
    let app = Arc::new(Mutex::new(App::new(settings, PreviewCache::new(store))));

    let (ui_event_tx, ui_event_rx) = mpsc::channel::<UiEvent>(100);
    let (network_req_tx, network_req_rx) = mpsc::channel::<NetworkRequest>(100);
    let (network_resp_tx, network_resp_rx) = mpsc::channel::<NetworkResponse>(100);
    let (control_tx, control_rx) = watch::channel(PollControl::default());

    // Command input thread
    let input_handler = tokio::spawn(input_handler_task(ui_event_tx.clone()));

    // Network thread
    let network_worker = NetworkWorker::new(pipeline, network_req_rx, network_resp_tx);
    let network_task = tokio::spawn(network_worker.run());

    // Periodic polling thread (games 15s, live overlay 5s, schedule 30s)
    let periodic_updater = PeriodicRefresher::new(ui_event_tx.clone(), control_rx);
    let periodic_task = tokio::spawn(periodic_updater.run());

    let shutdown_tx = ui_event_tx.clone();
    let shutdown_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(UiEvent::Quit).await;
        }
    });

    // Trigger the first load on startup
    let _ = ui_event_tx.send(UiEvent::AppStarted).await;

    main_loop(app.clone(), ui_event_rx, network_req_tx, network_resp_rx, control_tx).await;

    input_handler.abort();
    network_task.abort();
    periodic_task.abort();
    shutdown_task.abort();

    let flushed = app.lock().await.flush_previews().await;
    info!("flushed {flushed} pending cache writes");
    Ok(())
}

fn handle_cli_args() -> bool {
    let mut args = std::env::args().skip(1);
    let Some(arg) = args.next() else {
        return false;
    };

    match arg.as_str() {
        "-h" | "--help" => {
            println!("{}", usage_text());
            true
        }
        "-V" | "--version" => {
            println!("boardcast {}", env!("CARGO_PKG_VERSION"));
            true
        }
        _ => {
            eprintln!("Unknown argument: {arg}\n\n{}", usage_text());
            std::process::exit(2);
        }
    }
}

fn usage_text() -> &'static str {
    "boardcast - follow a live chess broadcast round by round

Usage:
  boardcast
  boardcast --help
  boardcast --version

Commands (type and press enter):
  <n>        show round n
  a          back to automatic round selection
  g <board>  follow one board with fast refreshes (g alone stops)
  r          drop cached data for the round and reload
  clear      drop cached data for the whole tournament
  p          pause / resume polling
  q          quit

Environment:
  BOARDCAST_TOURNAMENT   Lichess broadcast tournament ID
  BOARDCAST_SLUG         Tournament slug used for cache keys (default: the ID)
  BOARDCAST_OFFICIAL_PGN Official PGN URL template containing {round}
  BOARDCAST_ROSTER       Roster JSON file
  BOARDCAST_CACHE_DIR    Cache directory (default .boardcast-cache)
  BOARDCAST_API_BASE     Lichess base URL (default https://lichess.org)
  BOARDCAST_MIN_BOARDS   Boards expected per round (default 1)
  BOARDCAST_ROUND        Start on this round instead of the automatic pick
  BOARDCAST_LOG          Log level (default info, falls back to RUST_LOG)"
}

fn load_roster(settings: &AppSettings) -> anyhow::Result<Roster> {
    let Some(path) = &settings.roster_path else {
        return Ok(Roster::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading roster {}", path.display()))?;
    let roster = Roster::from_json(&json).with_context(|| format!("parsing roster {}", path.display()))?;
    info!("roster loaded with {} players", roster.len());
    Ok(roster)
}

async fn main_loop(
    app: Arc<Mutex<App>>,
    mut ui_events: mpsc::Receiver<UiEvent>,
    network_requests: mpsc::Sender<NetworkRequest>,
    mut network_responses: mpsc::Receiver<NetworkResponse>,
    control: watch::Sender<PollControl>,
) {
    loop {
        tokio::select! {
            Some(ui_event) = ui_events.recv() => {
                if ui_event == UiEvent::Quit {
                    break;
                }
                let should_report = handle_ui_event(ui_event, &app, &network_requests).await;
                if should_report {
                    report(&app).await;
                }
            }

            Some(response) = network_responses.recv() => {
                let should_report = handle_network_response(response, &app, &network_requests).await;
                if should_report {
                    report(&app).await;
                }
            }

            else => break,
        }

        let next = app.lock().await.poll_control();
        control.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }
}

async fn send_all(network_requests: &mpsc::Sender<NetworkRequest>, requests: Vec<NetworkRequest>) {
    for request in requests {
        if let Err(e) = network_requests.send(request).await {
            error!("Failed to queue network request: {e}");
        }
    }
}

async fn handle_ui_event(
    ui_event: UiEvent,
    app: &Arc<Mutex<App>>,
    network_requests: &mpsc::Sender<NetworkRequest>,
) -> bool {
    let now = Utc::now();
    let mut guard = app.lock().await;
    let (requests, should_report) = match ui_event {
        UiEvent::AppStarted => (guard.startup_requests(), false),
        UiEvent::PollTick(kind) => (guard.poll_requests(kind, now), false),
        UiEvent::SelectRound(round) => (guard.select_round(round, now), true),
        UiEvent::FocusBoard(board) => {
            guard.focus_board(board);
            (Vec::new(), false)
        }
        UiEvent::ResetRound => (guard.reset_round(now), true),
        UiEvent::Reload => (guard.reload().await, false),
        UiEvent::ClearCache => (guard.clear_cache().await, false),
        UiEvent::TogglePause => {
            guard.toggle_pause();
            (Vec::new(), true)
        }
        UiEvent::Quit => (Vec::new(), false),
    };
    drop(guard);
    send_all(network_requests, requests).await;
    should_report
}

async fn handle_network_response(
    response: NetworkResponse,
    app: &Arc<Mutex<App>>,
    network_requests: &mpsc::Sender<NetworkRequest>,
) -> bool {
    let now = Utc::now();
    let mut guard = app.lock().await;
    let requests = match response {
        NetworkResponse::RoundLoaded { tournament_key, round, games, source, stale, round_id } => {
            guard.on_round_loaded(&tournament_key, round, games, source, stale, round_id, now)
        }
        NetworkResponse::RoundHydrated { tournament_key, round, previews, persisted, archive } => {
            guard.on_round_hydrated(&tournament_key, round, previews, persisted, archive);
            Vec::new()
        }
        NetworkResponse::LiveStatusLoaded { tournament_key, info, status } => {
            guard.on_live_status(&tournament_key, info, status, now)
        }
        NetworkResponse::GameRefreshed { tournament_key, round, game } => {
            guard.on_game_refreshed(&tournament_key, round, game, now);
            Vec::new()
        }
        NetworkResponse::Error { message } => {
            warn!("Network error: {message}");
            guard.on_error(message);
            Vec::new()
        }
    };
    drop(guard);
    send_all(network_requests, requests).await;
    true
}

async fn report(app: &Arc<Mutex<App>>) {
    let guard = app.lock().await;
    info!("\n{}", report::render_round(&guard.state, Utc::now()));
}

/// Line-based commands from stdin.
async fn input_handler_task(ui_events: mpsc::Sender<UiEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some(ui_event) = parse_command(&line) else {
            continue;
        };
        if ui_events.send(ui_event).await.is_err() {
            break;
        }
    }
}

fn parse_command(line: &str) -> Option<UiEvent> {
    let mut words = line.split_whitespace();
    let command = words.next()?;
    if let Ok(round) = command.parse::<u32>()
        && round > 0
    {
        return Some(UiEvent::SelectRound(round));
    }
    match command {
        "a" | "auto" => Some(UiEvent::ResetRound),
        "g" | "game" => Some(UiEvent::FocusBoard(words.next().and_then(|b| b.parse().ok()))),
        "r" | "reload" => Some(UiEvent::Reload),
        "clear" => Some(UiEvent::ClearCache),
        "p" | "pause" => Some(UiEvent::TogglePause),
        "q" | "quit" => Some(UiEvent::Quit),
        _ => None,
    }
}
