mod analysis;
mod engine;
mod gui;
mod report;
mod session;
mod structs;
mod worker;

use crate::gui::DLSApp;

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1500.0, 1000.0])
            .with_min_inner_size([1200.0, 800.0]),
        ..Default::default()
    };

    eframe::run_native(
        "DLS Live Measurement",
        options,
        Box::new(|cc| Ok(Box::new(DLSApp::new(cc)))),
    )
}
