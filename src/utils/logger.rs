use env_logger::{Builder, Env};
use log::LevelFilter;

fn env() -> Env<'static> {
    Env::default().default_filter_or("info")
}

/// Module paths only help once someone asked for debug output
fn show_target(level: LevelFilter) -> bool {
    level >= LevelFilter::Debug
}

/// Plain operator-facing output at `info`, overridable through `RUST_LOG`.
pub fn init() {
    let level = Builder::from_env(env()).build().filter();
    Builder::from_env(env())
        .format_timestamp(None)
        .format_target(show_target(level))
        .init();
}
