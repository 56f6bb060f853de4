//! Loss curves from the training log.
//!
//! The output format follows the file extension: `.svg` is written with the
//! SVG backend, everything else as a bitmap. Both carry the axis labels and
//! the legend; bitmap text is rendered with a bundled DejaVu Sans.

use std::path::Path;
use std::sync::OnceLock;

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::register_font;

use crate::{Error, Result};

/// One entry of the training log, with whatever keys it was written with.
pub type Record = serde_json::Map<String, serde_json::Value>;

pub const DEFAULT_LOG: &str = "result/log";
pub const DEFAULT_OUTFILE: &str = "dcgan_loss.png";
pub const DEFAULT_TARGETS: [&str; 2] = ["gen/loss", "dis/loss"];

const SIZE: (u32, u32) = (800, 600);

static FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Makes the bundled font the `sans-serif` family every chart label uses.
fn register_fonts() -> Result<()> {
    static REGISTERED: OnceLock<bool> = OnceLock::new();
    let ok = *REGISTERED.get_or_init(|| register_font("sans-serif", FontStyle::Normal, FONT).is_ok());
    if ok {
        Ok(())
    } else {
        Err(Error::Plot("bundled font could not be loaded".into()))
    }
}

/// Reads a JSON log: an array of objects.
pub fn load_log<P: AsRef<Path>>(logfile: P) -> Result<Vec<Record>> {
    let file = std::fs::File::open(logfile.as_ref())?;
    let entries: Vec<Record> = serde_json::from_reader(std::io::BufReader::new(file))?;
    Ok(entries)
}

/// `(iteration, entry[target])` for every entry of the log.
pub fn series(entries: &[Record], target: &str) -> Result<Vec<(f64, f64)>> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let x = number(entry, "iteration", i)?;
            let y = number(entry, target, i)?;
            Ok((x, y))
        })
        .collect()
}

fn number(entry: &Record, key: &str, index: usize) -> Result<f64> {
    match entry.get(key) {
        Some(value) => value.as_f64().ok_or_else(|| {
            Error::Plot(format!("entry {index}: `{key}` is not a number ({value})"))
        }),
        None => Err(Error::Plot(format!("entry {index}: missing key `{key}`"))),
    }
}

/// Plots `entry[target]` against `entry["iteration"]` for every target, one
/// labeled line with point markers each, and writes the figure to `outfile`.
pub fn plot_result<P: AsRef<Path>, Q: AsRef<Path>>(
    logfile: P,
    targets: &[&str],
    outfile: Q,
) -> Result<()> {
    let entries = load_log(logfile.as_ref())?;
    if entries.is_empty() {
        return Err(Error::Plot(format!(
            "{} holds no entries",
            logfile.as_ref().display()
        )));
    }
    if targets.is_empty() {
        return Err(Error::Plot("nothing to plot".into()));
    }
    let lines = targets
        .iter()
        .map(|&target| Ok((target, series(&entries, target)?)))
        .collect::<Result<Vec<_>>>()?;

    register_fonts()?;
    let outfile = outfile.as_ref();
    if let Some(dir) = outfile.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let is_svg = outfile
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("svg"));
    if is_svg {
        draw(SVGBackend::new(outfile, SIZE).into_drawing_area(), &lines)
    } else {
        draw(BitMapBackend::new(outfile, SIZE).into_drawing_area(), &lines)
    }?;
    tracing::info!(outfile = %outfile.display(), ?targets, "plotted training log");
    Ok(())
}

fn bounds(lines: &[(&str, Vec<(f64, f64)>)]) -> ((f64, f64), (f64, f64)) {
    let points = lines.iter().flat_map(|(_, pts)| pts.iter());
    let (mut x0, mut x1, mut y0, mut y1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    for &(x, y) in points {
        x0 = x0.min(x);
        x1 = x1.max(x);
        y0 = y0.min(y);
        y1 = y1.max(y);
    }
    if x1 <= x0 {
        (x0, x1) = (x0 - 1.0, x1 + 1.0);
    }
    let pad = if y1 > y0 { 0.05 * (y1 - y0) } else { 1.0 };
    ((x0, x1), (y0 - pad, y1 + pad))
}

fn draw<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    lines: &[(&str, Vec<(f64, f64)>)],
) -> Result<()> {
    root.fill(&WHITE)
        .map_err(|e| Error::Plot(format!("backend error: {e}")))?;
    let ((x0, x1), (y0, y1)) = bounds(lines);

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x0..x1, y0..y1)
        .map_err(|e| Error::Plot(format!("chart build error: {e}")))?;

    chart
        .configure_mesh()
        .x_desc("iteration")
        .y_desc("loss")
        .draw()
        .map_err(|e| Error::Plot(format!("mesh error: {e}")))?;

    for (i, (target, points)) in lines.iter().enumerate() {
        let color = Palette99::pick(i).mix(1.0);
        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(1)).point_size(2))
            .map_err(|e| Error::Plot(format!("draw error: {e}")))?
            .label(*target)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| Error::Plot(format!("legend error: {e}")))?;

    root.present()
        .map_err(|e| Error::Plot(format!("render error: {e}")))?;
    Ok(())
}
