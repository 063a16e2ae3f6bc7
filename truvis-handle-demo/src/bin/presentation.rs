use std::path::PathBuf;

use truvis_handle_demo::app::{PresentationApp, run};

/// 用法：`presentation [settings.toml]`，省略时读取 crate 目录下的 `handle-graph.toml`
fn main() -> anyhow::Result<()> {
    truvis_crate_tools::init_log::init_log();

    let settings_path = PresentationApp::settings_path(std::env::args_os().nth(1).map(PathBuf::from));
    let settings = PresentationApp::load_settings(settings_path.as_deref())?;
    log::info!("handle graph settings: {:?}", settings);

    run(settings)?;

    log::info!("end run.");
    Ok(())
}
