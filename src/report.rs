use crate::structs::{MeasurementConfig, DT};
use chrono::Utc;
use csv;
use plotters::prelude::*;
use std::path::Path;

/// Immutable copy of the foreground measurement state handed to the
/// exporters, taken at the moment the user asks for an export.
pub struct MeasurementView {
    pub intensity: Vec<f64>,
    pub correlation: Vec<f32>,
    pub distribution: Vec<[f64; 2]>,
    pub smoothed_diameter: Option<f64>,
    pub sample_count: u64,
    pub runtime_seconds: f64,
}

pub fn export_csv(
    dir_path: &str,
    params: &MeasurementConfig,
    view: &MeasurementView,
) -> anyhow::Result<()> {
    let dir = Path::new(dir_path);

    {
        let default_name = format!(
            "measurement_params_{}.csv",
            Utc::now().format("%Y-%m-%d_%H-%M-%S")
        );
        let path = dir.join(default_name);
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(["Parameter", "Value"])?;
        wtr.write_record(["Temperature (K)", &params.temperature.to_string()])?;
        wtr.write_record(["Viscosity (Pa·s)", &params.viscosity.to_string()])?;
        wtr.write_record(["Diameter (m)", &params.diameter.to_string()])?;
        wtr.write_record(["Wavelength (m)", &params.wavelength.to_string()])?;
        wtr.write_record(["Particles", &params.num_particles.to_string()])?;
        wtr.write_record(["PDI", &params.polydispersity.to_string()])?;
        let smoothed = view
            .smoothed_diameter
            .map(|d| (d * 1e9).to_string())
            .unwrap_or_default();
        wtr.write_record(["Estimated diameter (nm)", &smoothed])?;
        wtr.write_record(["Samples", &view.sample_count.to_string()])?;
        wtr.write_record(["Runtime (s)", &view.runtime_seconds.to_string()])?;
        wtr.flush()?;
    }

    {
        let default_name = format!("g2_tau_{}.csv", Utc::now().format("%Y-%m-%d_%H-%M-%S"));
        let path = dir.join(default_name);
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(["Tau (s)", "g2"])?;
        for (lag, &g2) in view.correlation.iter().enumerate() {
            wtr.write_record(&[(lag as f64 * DT).to_string(), g2.to_string()])?;
        }
        wtr.flush()?;
    }

    {
        let default_name = format!("intensity_{}.csv", Utc::now().format("%Y-%m-%d_%H-%M-%S"));
        let path = dir.join(default_name);
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(["Frame", "Intensity (a.u.)"])?;
        for (frame, &intensity) in view.intensity.iter().enumerate() {
            wtr.write_record(&[frame.to_string(), intensity.to_string()])?;
        }
        wtr.flush()?;
    }

    {
        let default_name = format!(
            "size_distribution_{}.csv",
            Utc::now().format("%Y-%m-%d_%H-%M-%S")
        );
        let path = dir.join(default_name);
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(["Size (nm)", "Density"])?;
        for point in &view.distribution {
            wtr.write_record(&[point[0].to_string(), point[1].to_string()])?;
        }
        wtr.flush()?;
    }

    log::info!("CSV export written to {dir_path}");
    Ok(())
}

/// Renders the current correlation curve and size distribution side by side
/// into one PNG.
pub fn export_chart(path: &str, view: &MeasurementView) -> anyhow::Result<()> {
    let root = BitMapBackend::new(path, (1600, 700)).into_drawing_area();
    root.fill(&WHITE)?;
    let (left, right) = root.split_horizontally(800);

    {
        let points: Vec<(f64, f64)> = view
            .correlation
            .iter()
            .enumerate()
            .map(|(lag, &g2)| (lag as f64 * DT, g2 as f64))
            .filter(|(tau, _)| *tau > 1e-10)
            .map(|(tau, g2)| (tau.log10(), g2))
            .collect();
        let (min_x, max_x) = value_range(points.iter().map(|p| p.0), -6.0, -2.0);
        let (min_y, max_y) = value_range(points.iter().map(|p| p.1), 0.9, 2.1);

        let mut chart = ChartBuilder::on(&left)
            .caption("Intensity Autocorrelation", ("sans-serif", 36))
            .margin(20)
            .x_label_area_size(60)
            .y_label_area_size(80)
            .build_cartesian_2d(min_x..max_x, min_y..max_y)?;
        chart
            .configure_mesh()
            .x_desc("log10(tau) [s]")
            .y_desc("g2(tau)")
            .label_style(("sans-serif", 24))
            .draw()?;
        chart
            .draw_series(LineSeries::new(points, BLUE.stroke_width(3)))?
            .label("g2")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
        chart
            .configure_series_labels()
            .background_style(&WHITE)
            .label_font(("sans-serif", 24))
            .draw()?;
    }

    {
        let points: Vec<(f64, f64)> = view
            .distribution
            .iter()
            .map(|point| (point[0].log10(), point[1]))
            .collect();
        let (min_x, max_x) = value_range(points.iter().map(|p| p.0), 0.0, 4.0);
        let (min_y, max_y) = value_range(points.iter().map(|p| p.1), 0.0, 1.0);

        let mut chart = ChartBuilder::on(&right)
            .caption("Size Distribution", ("sans-serif", 36))
            .margin(20)
            .x_label_area_size(60)
            .y_label_area_size(80)
            .build_cartesian_2d(min_x..max_x, min_y..max_y)?;
        chart
            .configure_mesh()
            .x_desc("log10(d) [nm]")
            .y_desc("Density")
            .label_style(("sans-serif", 24))
            .draw()?;
        chart
            .draw_series(LineSeries::new(points, GREEN.stroke_width(3)))?
            .label("Density")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &GREEN));
        chart
            .configure_series_labels()
            .background_style(&WHITE)
            .label_font(("sans-serif", 24))
            .draw()?;
    }

    root.present()?;
    log::info!("chart export written to {path}");
    opener::open(path)?;
    Ok(())
}

/// Padded min/max over `values`, or the fallback range when empty or flat.
fn value_range(
    values: impl Iterator<Item = f64>,
    fallback_min: f64,
    fallback_max: f64,
) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for value in values {
        min = min.min(value);
        max = max.max(value);
    }
    if !min.is_finite() || !max.is_finite() || min >= max {
        return (fallback_min, fallback_max);
    }
    let pad = (max - min) * 0.05;
    (min - pad, max + pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_view() -> MeasurementView {
        MeasurementView {
            intensity: vec![1.0, 2.0, 1.5],
            correlation: vec![1.8, 1.5, 1.2, 1.05],
            distribution: vec![[50.0, 0.0], [100.0, 0.02], [200.0, 0.0]],
            smoothed_diameter: Some(100e-9),
            sample_count: 42,
            runtime_seconds: 3.5,
        }
    }

    #[test]
    fn value_range_pads_and_falls_back() {
        let (min, max) = value_range([1.0, 3.0].into_iter(), 0.0, 1.0);
        assert!(min < 1.0 && max > 3.0);
        let (min, max) = value_range(std::iter::empty(), 0.0, 1.0);
        assert_eq!((min, max), (0.0, 1.0));
        let (min, max) = value_range([2.0, 2.0].into_iter(), 0.0, 1.0);
        assert_eq!((min, max), (0.0, 1.0));
    }

    #[test]
    fn csv_export_writes_all_tables() {
        let dir = std::env::temp_dir().join(format!(
            "dls_live_csv_test_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let view = sample_view();
        let params = MeasurementConfig::default();
        export_csv(&dir.to_string_lossy(), &params, &view).unwrap();
        let written: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(written.len(), 4, "files: {written:?}");
        assert!(written.iter().any(|name| name.starts_with("g2_tau_")));
        assert!(written
            .iter()
            .any(|name| name.starts_with("size_distribution_")));
        std::fs::remove_dir_all(&dir).ok();
    }
}
