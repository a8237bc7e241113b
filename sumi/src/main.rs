#![warn(clippy::pedantic)]

pub mod compositor;
pub mod config;
pub mod frame;
pub mod input;
pub mod raster;
pub mod session;
pub mod view_transform;

use std::path::Path;

use anyhow::Result as AnyResult;
use sumi_core::{
    curve::StrokeStyle,
    texture::Extent,
    touch::{Microseconds, TouchPhase, TouchPoint, TouchSource},
};

use raster::Paint;
use session::Session;

/// Headless demonstration: drive a few scripted strokes through the whole
/// pipeline - normalizer, curve generator, rasterizer, compositor, history -
/// then export the canvas, a presented viewport, and the latest thumbnail
/// as PNGs in the working directory.
fn main() -> AnyResult<()> {
    let has_term = std::io::IsTerminal::is_terminal(&std::io::stdin());
    // Log to a terminal, if available. Else, log to "log.out" in the working directory.
    if has_term {
        env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        let _ = simple_logging::log_to_file("log.out", log::LevelFilter::Info);
    }

    let preferences = match config::Preferences::default_path() {
        Some(path) => config::Preferences::load(&path),
        None => config::Preferences::default(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    runtime.block_on(demo(&preferences))
}

async fn demo(preferences: &config::Preferences) -> AnyResult<()> {
    let mut session = Session::open(preferences, Vec::new()).await?;
    let mut thumbnails = session.thumbnails();
    let extent = session.extent();
    log::info!(
        "session open: {}x{} canvas, {} layer(s)",
        extent.width(),
        extent.height(),
        session.layers().len()
    );

    // Feed scripted input through the actor loop, paced so the frame ticker
    // interleaves live raster updates with arriving samples.
    let (send, recv) = tokio::sync::mpsc::unbounded_channel();
    let script = async move {
        for point in scripted_strokes(extent) {
            if send.send(point).is_err() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(8)).await;
        }
        // Channel closes on drop; the session loop returns.
    };
    tokio::join!(script, session.run(recv));
    log::info!("strokes committed, undo depth {}", session.undo_depth());

    // An eraser pass over the middle, driven frame by frame.
    session.set_paint(Paint::eraser());
    session.set_brush_style(StrokeStyle {
        diameter: 48.0,
        blur: 8.0,
    });
    for point in eraser_pass(extent) {
        session.ingest(point).await;
        session.tick_frame().await;
    }

    // Round-trip the history to show the eraser pass is reversible.
    session.undo().await;
    session.redo().await;
    log::info!(
        "history: {} undoable, {} redoable",
        session.undo_depth(),
        session.redo_depth()
    );

    write_png(
        Path::new("canvas.png"),
        extent.width(),
        extent.height(),
        session.canvas().bytes(),
    )?;

    // Present through a fitted view into a window-ish viewport.
    let viewport = Extent::new(1280, 720)?;
    if let Some(view) = view_transform::ViewTransform::fit(
        cgmath::vec2(extent.width() as f32, extent.height() as f32),
        cgmath::vec2(viewport.width() as f32, viewport.height() as f32),
    ) {
        session.set_view(view);
    }
    let presented = session.present(viewport);
    write_png(
        Path::new("view.png"),
        viewport.width(),
        viewport.height(),
        presented.bytes(),
    )?;

    // The freshest preview off the side channel, if anything was emitted.
    // Lagging is expected - only the newest frame matters.
    let mut latest = None;
    loop {
        match thumbnails.try_recv() {
            Ok(thumbnail) => latest = Some(thumbnail),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    if let Some(thumbnail) = latest {
        write_png(
            Path::new("thumbnail.png"),
            thumbnail.width,
            thumbnail.height,
            &thumbnail.pixels,
        )?;
    }

    log::info!("wrote canvas.png, view.png, thumbnail.png");
    Ok(())
}

/// Two pen strokes and one finger stroke across the canvas, with a pressure
/// swell along each.
fn scripted_strokes(extent: Extent) -> Vec<TouchPoint> {
    let w = extent.width() as f32;
    let h = extent.height() as f32;
    let mut points = Vec::new();
    let mut clock = 0u32;
    let mut at = |points: &mut Vec<TouchPoint>,
                  source: TouchSource,
                  phase: TouchPhase,
                  pos: [f32; 2],
                  pressure: f32| {
        clock += 8_000;
        points.push(TouchPoint {
            pos,
            pressure,
            phase,
            time: Microseconds(clock),
            source,
        });
    };

    // Diagonal pen stroke, swelling pressure.
    let steps = 24;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let phase = match i {
            0 => TouchPhase::Began,
            i if i == steps => TouchPhase::Ended,
            _ => TouchPhase::Moved,
        };
        let swell = (t * std::f32::consts::PI).sin();
        at(
            &mut points,
            TouchSource::Pen,
            phase,
            [w * (0.1 + 0.8 * t), h * (0.1 + 0.8 * t)],
            0.3 + 0.7 * swell,
        );
    }
    // Arcing pen stroke across the other diagonal.
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let phase = match i {
            0 => TouchPhase::Began,
            i if i == steps => TouchPhase::Ended,
            _ => TouchPhase::Moved,
        };
        let arc = (t * std::f32::consts::PI).sin();
        at(
            &mut points,
            TouchSource::Pen,
            phase,
            [w * (0.9 - 0.8 * t), h * (0.1 + 0.8 * t) - h * 0.2 * arc],
            0.8,
        );
    }
    // A finger stroke along the bottom; travels fast enough to classify as
    // drawing well before the window closes.
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let phase = match i {
            0 => TouchPhase::Began,
            i if i == steps => TouchPhase::Ended,
            _ => TouchPhase::Moved,
        };
        at(
            &mut points,
            TouchSource::Finger(1),
            phase,
            [w * (0.1 + 0.8 * t), h * 0.85],
            1.0,
        );
    }
    points
}

/// A horizontal eraser drag through the canvas center.
fn eraser_pass(extent: Extent) -> Vec<TouchPoint> {
    let w = extent.width() as f32;
    let h = extent.height() as f32;
    let steps = 16u32;
    (0..=steps)
        .map(|i| {
            let t = i as f32 / steps as f32;
            TouchPoint {
                pos: [w * (0.2 + 0.6 * t), h * 0.5],
                pressure: 1.0,
                phase: match i {
                    0 => TouchPhase::Began,
                    i if i == steps => TouchPhase::Ended,
                    _ => TouchPhase::Moved,
                },
                time: Microseconds(1_000_000 + i * 8_000),
                source: TouchSource::Pen,
            }
        })
        .collect()
}

/// Encode premultiplied RGBA8 as a straight-alpha PNG.
fn write_png(path: &Path, width: u32, height: u32, premultiplied: &[u8]) -> AnyResult<()> {
    let mut data = premultiplied.to_vec();
    for pixel in data.chunks_exact_mut(4) {
        let alpha = u32::from(pixel[3]);
        if alpha > 0 && alpha < 255 {
            for channel in &mut pixel[..3] {
                *channel = ((u32::from(*channel) * 255 + alpha / 2) / alpha).min(255) as u8;
            }
        }
    }
    let file = std::fs::File::create(path)?;
    let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&data)?;
    Ok(())
}
