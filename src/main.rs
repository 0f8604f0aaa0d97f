use std::path::PathBuf;

use anime_reconciler::cancellation::CancellationFlag;
use anime_reconciler::config_persistence::{ensure_config_file, load_config_file, persist_config_file};
use anime_reconciler::hint::read_hint_file;
use anime_reconciler::service::ReconciliationEngine;
use log::info;

const CONFIG_FILE_NAME: &str = "anime-reconciler.toml";
const USAGE: &str = "usage: anime-reconciler <series-dir|hint-file> [season]";

fn init_logging() {
    let mut clog = colog::default_builder();
    let level = if std::env::var_os("RECONCILER_DEBUG").is_some() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    clog.filter(None, level);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let Some(target) = args.next().map(PathBuf::from) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let season_number = match args.next() {
        Some(raw) => Some(
            raw.parse::<i32>()
                .map_err(|err| format!("season must be a number ({raw}): {err}"))?,
        ),
        None => None,
    };

    let config_dir = dirs::config_dir().ok_or("no config directory on this platform")?;
    let config_file = config_dir.join(CONFIG_FILE_NAME);
    ensure_config_file(&config_file);
    let config = load_config_file(&config_file);
    // Fills keys added since the file was written; user comments survive.
    persist_config_file(&config, &config_file);

    let hint = read_hint_file(&target)?;
    info!("Resolving {}", hint.label());
    let engine = ReconciliationEngine::with_default_transport(config);
    let cancel = CancellationFlag::new();

    let output = match season_number {
        Some(season_number) => {
            let root_id = engine.resolve_root_for_hint(&hint, &cancel)?;
            serde_json::to_string_pretty(&engine.resolve_season(root_id, season_number, &cancel)?)?
        }
        None => serde_json::to_string_pretty(&engine.resolve_series(&hint, &cancel)?)?,
    };
    println!("{output}");
    Ok(())
}
