use crate::report::{export_chart, export_csv, MeasurementView};
use crate::session::{RunState, SessionController};
use crate::structs::{MeasurementConfig, DT};
use chrono::Utc;
use eframe::egui;
use egui_plot::{Line, Plot, PlotPoints, Points};
use rfd;

/// Slider-facing copy of the configuration in display units. Converted back
/// to SI and diffed against the session config once per frame.
struct ConfigDraft {
    temperature_k: f64,
    viscosity_mpa_s: f64,
    diameter_nm: f64,
    wavelength_nm: f64,
    num_particles: usize,
    polydispersity: f64,
}

impl ConfigDraft {
    fn from_config(config: &MeasurementConfig) -> Self {
        Self {
            temperature_k: config.temperature,
            viscosity_mpa_s: config.viscosity * 1e3,
            diameter_nm: config.diameter * 1e9,
            wavelength_nm: config.wavelength * 1e9,
            num_particles: config.num_particles,
            polydispersity: config.polydispersity,
        }
    }

    fn to_config(&self) -> MeasurementConfig {
        MeasurementConfig {
            temperature: self.temperature_k,
            viscosity: self.viscosity_mpa_s * 1e-3,
            diameter: self.diameter_nm * 1e-9,
            wavelength: self.wavelength_nm * 1e-9,
            num_particles: self.num_particles,
            polydispersity: self.polydispersity,
        }
    }
}

pub struct DLSApp {
    session: SessionController,
    draft: ConfigDraft,
}

impl DLSApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let config = MeasurementConfig::default();
        Self {
            session: SessionController::new(config),
            draft: ConfigDraft::from_config(&config),
        }
    }

    fn export_view(&self) -> MeasurementView {
        MeasurementView {
            intensity: self.session.intensity_trace().collect(),
            correlation: self.session.correlation().to_vec(),
            distribution: self.session.distribution().to_vec(),
            smoothed_diameter: self.session.estimated_size(),
            sample_count: self.session.sample_count(),
            runtime_seconds: self.session.runtime_seconds(),
        }
    }
}

impl eframe::App for DLSApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.session.poll();

        let pending = self.draft.to_config();
        if pending != self.session.params() {
            self.session.set_params(pending);
        }

        egui::TopBottomPanel::top("header")
            .exact_height(70.0)
            .show(ctx, |ui| {
                ui.add_space(10.0);
                ui.vertical_centered(|ui| {
                    ui.label(
                        egui::RichText::new("DYNAMIC LIGHT SCATTERING")
                            .size(26.0)
                            .strong()
                            .color(egui::Color32::from_rgb(52, 152, 219)),
                    );
                });
            });

        egui::SidePanel::left("params")
            .min_width(260.0)
            .max_width(260.0)
            .show(ctx, |ui| {
                ui.add_space(3.0);
                ui.label(
                    egui::RichText::new("PARAMETERS")
                        .size(13.0)
                        .strong()
                        .color(egui::Color32::from_rgb(230, 126, 34)),
                );
                ui.separator();

                ui.add(
                    egui::Slider::new(&mut self.draft.temperature_k, 273.15..=353.15)
                        .text("Temp (K)")
                        .custom_formatter(|n, _| format!("{:.2}", n)),
                );

                ui.add(
                    egui::Slider::new(&mut self.draft.viscosity_mpa_s, 0.1..=10.0)
                        .text("Viscosity (mPa·s)")
                        .custom_formatter(|n, _| format!("{:.2}", n)),
                );

                ui.add(
                    egui::Slider::new(&mut self.draft.diameter_nm, 1.0..=1000.0)
                        .logarithmic(true)
                        .text("Diameter (nm)")
                        .custom_formatter(|n, _| format!("{:.1}", n)),
                );

                ui.add(
                    egui::Slider::new(&mut self.draft.wavelength_nm, 400.0..=800.0)
                        .text("λ (nm)")
                        .custom_formatter(|n, _| format!("{:.0}", n)),
                );

                ui.add(
                    egui::Slider::new(&mut self.draft.num_particles, 10..=1000)
                        .text("Particles"),
                );

                ui.add(
                    egui::Slider::new(&mut self.draft.polydispersity, 0.0..=0.5)
                        .text("PDI")
                        .custom_formatter(|n, _| format!("{:.2}", n)),
                );

                ui.add_space(6.0);
                ui.separator();

                let running = self.session.state() == RunState::Running;
                let (label, fill) = if running {
                    ("STOP", egui::Color32::from_rgb(231, 76, 60))
                } else {
                    ("START", egui::Color32::from_rgb(46, 204, 113))
                };
                let run_btn =
                    egui::Button::new(egui::RichText::new(label).size(13.0).strong()).fill(fill);
                if ui
                    .add_sized([ui.available_width(), 32.0], run_btn)
                    .clicked()
                {
                    if running {
                        self.session.stop();
                    } else {
                        self.session.start();
                    }
                }

                if ui
                    .add_sized(
                        [ui.available_width(), 24.0],
                        egui::Button::new("Reset").small(),
                    )
                    .clicked()
                {
                    self.session.reset();
                }

                if running {
                    ui.add_space(6.0);
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label(
                            egui::RichText::new("Measuring...")
                                .size(11.0)
                                .color(egui::Color32::from_rgb(52, 152, 219)),
                        );
                    });
                }

                if let Some(message) = self.session.fatal_error() {
                    ui.add_space(6.0);
                    ui.label(
                        egui::RichText::new(format!("Error: {message}"))
                            .size(11.0)
                            .color(egui::Color32::from_rgb(231, 76, 60)),
                    );
                }

                ui.add_space(6.0);
                ui.separator();
                ui.label(
                    egui::RichText::new("RESULTS")
                        .size(13.0)
                        .strong()
                        .color(egui::Color32::from_rgb(155, 89, 182)),
                );

                ui.add_space(3.0);
                egui::Grid::new("stats_grid")
                    .num_columns(2)
                    .spacing([6.0, 2.0])
                    .show(ui, |ui| {
                        ui.label(egui::RichText::new("Diameter:").size(11.0).strong());
                        let diameter_text = match self.session.estimated_size() {
                            Some(diameter) => format!("{:.1} nm", diameter * 1e9),
                            None => "--".to_string(),
                        };
                        ui.label(
                            egui::RichText::new(diameter_text)
                                .size(11.0)
                                .color(egui::Color32::from_rgb(46, 204, 113)),
                        );
                        ui.end_row();

                        ui.label(egui::RichText::new("Intensity:").size(11.0).strong());
                        ui.label(
                            egui::RichText::new(format!(
                                "{:.2}",
                                self.session.display_intensity()
                            ))
                            .size(11.0),
                        );
                        ui.end_row();

                        ui.label(egui::RichText::new("Runtime:").size(11.0).strong());
                        ui.label(
                            egui::RichText::new(format!(
                                "{:.1} s",
                                self.session.runtime_seconds()
                            ))
                            .size(11.0),
                        );
                        ui.end_row();

                        ui.label(egui::RichText::new("Samples:").size(11.0).strong());
                        ui.label(
                            egui::RichText::new(self.session.sample_count().to_string())
                                .size(11.0),
                        );
                        ui.end_row();
                    });

                ui.add_space(6.0);

                if ui
                    .add_sized(
                        [ui.available_width(), 24.0],
                        egui::Button::new("Export chart").small(),
                    )
                    .clicked()
                {
                    let default_name =
                        format!("dls_live_{}.png", Utc::now().format("%Y-%m-%d_%H-%M-%S"));
                    if let Some(path) = rfd::FileDialog::new()
                        .add_filter("PNG Files", &["png"])
                        .set_file_name(&default_name)
                        .save_file()
                    {
                        let view = self.export_view();
                        if let Err(err) = export_chart(&path.to_string_lossy(), &view) {
                            log::error!("chart export failed: {err}");
                        }
                    }
                }

                if ui
                    .add_sized(
                        [ui.available_width(), 24.0],
                        egui::Button::new("Export CSVs").small(),
                    )
                    .clicked()
                {
                    if let Some(path) = rfd::FileDialog::new().pick_folder() {
                        let view = self.export_view();
                        if let Err(err) =
                            export_csv(&path.to_string_lossy(), &self.session.params(), &view)
                        {
                            log::error!("CSV export failed: {err}");
                        }
                    }
                }
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.add_space(8.0);

                let available_width = ui.available_width();
                let plot_width = available_width - 20.0;
                let plot_height = 220.0;

                ui.group(|ui| {
                    ui.label(
                        egui::RichText::new("SAMPLE CELL (x–y projection)")
                            .size(14.0)
                            .strong()
                            .color(egui::Color32::from_rgb(46, 204, 113)),
                    );
                    Plot::new("cell_plot")
                        .width(plot_width)
                        .height(plot_height)
                        .allow_zoom(true)
                        .allow_drag(true)
                        .x_axis_label("x (µm)")
                        .y_axis_label("y (µm)")
                        .show(ui, |plot_ui| {
                            let points: PlotPoints = self
                                .session
                                .positions()
                                .chunks_exact(3)
                                .map(|p| [p[0] * 1e6, p[1] * 1e6])
                                .collect();
                            plot_ui.points(
                                Points::new("Particles", points)
                                    .color(egui::Color32::from_rgb(46, 204, 113))
                                    .radius(2.0),
                            );
                        });
                });

                ui.add_space(12.0);

                ui.group(|ui| {
                    ui.label(
                        egui::RichText::new("SCATTERED INTENSITY")
                            .size(14.0)
                            .strong()
                            .color(egui::Color32::from_rgb(231, 76, 60)),
                    );
                    Plot::new("intensity_plot")
                        .width(plot_width)
                        .height(plot_height)
                        .allow_zoom(true)
                        .allow_drag(true)
                        .x_axis_label("Frame")
                        .y_axis_label("Intensity (a.u.)")
                        .show(ui, |plot_ui| {
                            let points: PlotPoints = self
                                .session
                                .intensity_trace()
                                .enumerate()
                                .map(|(i, intensity)| [i as f64, intensity])
                                .collect();
                            plot_ui.line(
                                Line::new("Intensity", points)
                                    .color(egui::Color32::from_rgb(231, 76, 60))
                                    .width(1.8),
                            );
                        });
                });

                ui.add_space(12.0);

                ui.group(|ui| {
                    ui.label(
                        egui::RichText::new("INTENSITY AUTOCORRELATION g₂(τ)")
                            .size(14.0)
                            .strong()
                            .color(egui::Color32::from_rgb(52, 152, 219)),
                    );
                    Plot::new("g2_plot")
                        .width(plot_width)
                        .height(plot_height)
                        .allow_zoom(true)
                        .allow_drag(true)
                        .x_axis_label("log₁₀(τ) [s]")
                        .y_axis_label("g₂(τ)")
                        .show(ui, |plot_ui| {
                            let points: PlotPoints = self
                                .session
                                .correlation()
                                .iter()
                                .enumerate()
                                .map(|(lag, &g2)| (lag as f64 * DT, g2 as f64))
                                .filter(|(tau, _)| *tau > 1e-10)
                                .map(|(tau, g2)| [tau.log10(), g2])
                                .collect();
                            plot_ui.line(
                                Line::new("g₂", points)
                                    .color(egui::Color32::from_rgb(52, 152, 219))
                                    .width(2.5),
                            );
                        });
                });

                ui.add_space(12.0);

                ui.group(|ui| {
                    ui.label(
                        egui::RichText::new("PARTICLE SIZE DISTRIBUTION")
                            .size(14.0)
                            .strong()
                            .color(egui::Color32::from_rgb(230, 126, 34)),
                    );
                    Plot::new("size_plot")
                        .width(plot_width)
                        .height(plot_height)
                        .allow_zoom(true)
                        .allow_drag(true)
                        .x_axis_label("log₁₀(d) [nm]")
                        .y_axis_label("Density")
                        .show(ui, |plot_ui| {
                            let points: PlotPoints = self
                                .session
                                .distribution()
                                .iter()
                                .map(|point| [point[0].log10(), point[1]])
                                .collect();
                            plot_ui.line(
                                Line::new("Distribution", points)
                                    .color(egui::Color32::from_rgb(155, 89, 182))
                                    .width(3.0),
                            );
                        });
                });

                ui.add_space(15.0);
            });
        });

        if self.session.state() == RunState::Running {
            ctx.request_repaint();
        }
    }
}
