mod app;
mod events;
mod logging;
mod store;
mod strings;
mod terminal;
mod theme;
mod ui;

use anyhow::Result;
use blue_providers::FileConfig;
use terminal::TerminalGuard;
use tracing::info;

fn main() -> Result<()> {
    let _log_guard = logging::init()?;
    info!(target: "tui", "starting blue {}", env!("CARGO_PKG_VERSION"));

    let file_cfg = FileConfig::load();
    let store = store::Store::open_default()?;
    let backends = app::Backends::from_config(&file_cfg);
    let mut app = app::App::new(store, backends)?;

    let mut term = TerminalGuard::new()?;
    events::run(&mut term.terminal, &mut app)
}
