//! Single-writer assembly of raster tiles into the output mosaics.
//!
//! The output GeoTIFFs are opened once, before any tile runs. Tiles arrive
//! in completion order; each one is placed by its cell-centre bounds,
//! clipped to the mosaic, and written into its window right away.

mod geotiff;

use std::path::{Path, PathBuf};

use crate::collab::{Band, CountBand, RasterTile};
use crate::config::ColorDtype;
use crate::error::{DsmError, Result};
use crate::srs::Epsg;
use crate::tiling::Region;

pub use geotiff::{
    read_geotiff, write_geotiff, GeoRaster, GeoTiffWriter, GeoTransform, SampleFormat, Samples,
};

pub const DSM_FILE: &str = "dsm.tif";
pub const COLOR_FILE: &str = "clr.tif";
pub const MEAN_FILE: &str = "dsm_mean.tif";
pub const STD_FILE: &str = "dsm_std.tif";
pub const N_PTS_FILE: &str = "dsm_n_pts.tif";
pub const PTS_IN_CELL_FILE: &str = "dsm_pts_in_cell.tif";

/// Absolute pixel window `(x0, y0, width, height)`; may extend past the
/// mosaic before clipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PixelWindow {
    pub x0: i64,
    pub y0: i64,
    pub width: i64,
    pub height: i64,
}

/// Extent and georeferencing of the output mosaic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MosaicLayout {
    pub bounds: Region,
    pub resolution: f64,
    pub epsg: Epsg,
    pub width: usize,
    pub height: usize,
}

impl MosaicLayout {
    pub fn new(bounds: Region, resolution: f64, epsg: Epsg) -> Self {
        let w = bounds.origin_window(resolution);
        Self {
            bounds,
            resolution,
            epsg,
            width: w.xsize,
            height: w.ysize,
        }
    }

    pub fn transform(&self) -> GeoTransform {
        GeoTransform::north_up(&self.bounds, self.resolution, self.epsg)
    }

    /// Destination window of a tile from its cell-centre bounds.
    pub fn window_of(&self, tile: &RasterTile) -> PixelWindow {
        let c = tile.center_bounds();
        let res = self.resolution;
        let col = |x: f64| ((x - self.bounds.xmin) / res - 0.5).round() as i64;
        let row = |y: f64| ((self.bounds.ymax - y) / res - 0.5).round() as i64;
        let (x0, x1) = (col(c.xmin), col(c.xmax));
        let (y0, y1) = (row(c.ymax), row(c.ymin));
        PixelWindow {
            x0,
            y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
        }
    }
}

/// Encoding options of the outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MosaicOptions {
    pub dsm_no_data: f64,
    pub color_no_data: f64,
    pub color_bands: usize,
    pub color_dtype: ColorDtype,
    pub with_stats: bool,
}

/// Paths of the written rasters.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MosaicOutputs {
    pub dsm: PathBuf,
    pub color: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_pts: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pts_in_cell: Option<PathBuf>,
}

struct StatsRasters {
    mean: GeoTiffWriter,
    std_dev: GeoTiffWriter,
    n_pts: GeoTiffWriter,
    pts_in_cell: GeoTiffWriter,
}

/// Clipped pixel window, half-open on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Clip {
    x0: usize,
    x1: usize,
    y0: usize,
    y1: usize,
}

impl Clip {
    fn intersect(&self, other: &Clip) -> Option<Clip> {
        let c = Clip {
            x0: self.x0.max(other.x0),
            x1: self.x1.min(other.x1),
            y0: self.y0.max(other.y0),
            y1: self.y1.min(other.y1),
        };
        (c.x0 < c.x1 && c.y0 < c.y1).then_some(c)
    }

    fn area(&self) -> usize {
        (self.x1 - self.x0) * (self.y1 - self.y0)
    }
}

/// Windows written so far. Memory follows the tile count, not the mosaic
/// area.
#[derive(Debug, Default)]
struct Coverage {
    windows: Vec<Clip>,
}

impl Coverage {
    /// Record `w` and return how many of its pixels were already written.
    fn insert(&mut self, w: Clip) -> usize {
        let hits: Vec<Clip> = self.windows.iter().filter_map(|o| o.intersect(&w)).collect();
        let mut ys: Vec<usize> = hits.iter().flat_map(|h| [h.y0, h.y1]).collect();
        ys.sort_unstable();
        ys.dedup();

        let mut overlap = 0;
        for band in ys.windows(2) {
            let (a, b) = (band[0], band[1]);
            let mut spans: Vec<(usize, usize)> = hits
                .iter()
                .filter(|h| h.y0 <= a && h.y1 >= b)
                .map(|h| (h.x0, h.x1))
                .collect();
            spans.sort_unstable();
            let (mut cols, mut end) = (0, 0);
            for (x0, x1) in spans {
                let start = x0.max(end);
                if x1 > start {
                    cols += x1 - start;
                }
                end = end.max(x1);
            }
            overlap += cols * (b - a);
        }
        self.windows.push(w);
        overlap
    }

    fn covered_pixels(&self) -> usize {
        let mut union = Coverage::default();
        self.windows.iter().map(|w| w.area() - union.insert(*w)).sum()
    }
}

/// Writes raster tiles straight into their windows of the output GeoTIFFs.
///
/// Every output file is created, filled with no-data, when the writer is
/// built and stays open until [`MosaicWriter::finish`]; a tile is on disk
/// as soon as [`MosaicWriter::push`] returns. Only one row of one tile is
/// buffered at a time.
pub struct MosaicWriter {
    out_dir: PathBuf,
    layout: MosaicLayout,
    options: MosaicOptions,
    dsm: GeoTiffWriter,
    color: GeoTiffWriter,
    stats: Option<StatsRasters>,
    coverage: Coverage,
    tiles_written: usize,
    overlapping_pixels: usize,
}

impl MosaicWriter {
    /// Create the output rasters in `out_dir`.
    pub fn new(layout: MosaicLayout, options: MosaicOptions, out_dir: &Path) -> Result<Self> {
        if ![1, 3, 4].contains(&options.color_bands) {
            return Err(DsmError::Raster(format!(
                "{} color bands cannot be encoded (1, 3 or 4)",
                options.color_bands
            )));
        }
        std::fs::create_dir_all(out_dir).map_err(|e| DsmError::file(out_dir, e))?;
        tracing::info!(
            "DSM output image size: {}x{} pixels",
            layout.width,
            layout.height
        );
        let (w, h) = (layout.width, layout.height);
        let geo = layout.transform();
        let single = |name: &str, format, nodata| {
            GeoTiffWriter::create(&out_dir.join(name), w, h, 1, format, &geo, nodata)
        };

        let dsm = single(DSM_FILE, SampleFormat::F32, options.dsm_no_data)?;
        let color = GeoTiffWriter::create(
            &out_dir.join(COLOR_FILE),
            w,
            h,
            options.color_bands,
            color_format(options.color_dtype),
            &geo,
            options.color_no_data,
        )?;
        let stats = if options.with_stats {
            Some(StatsRasters {
                mean: single(MEAN_FILE, SampleFormat::F32, options.dsm_no_data)?,
                std_dev: single(STD_FILE, SampleFormat::F32, options.dsm_no_data)?,
                n_pts: single(N_PTS_FILE, SampleFormat::U16, 0.0)?,
                pts_in_cell: single(PTS_IN_CELL_FILE, SampleFormat::U16, 0.0)?,
            })
        } else {
            None
        };
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            layout,
            options,
            dsm,
            color,
            stats,
            coverage: Coverage::default(),
            tiles_written: 0,
            overlapping_pixels: 0,
        })
    }

    pub fn tiles_written(&self) -> usize {
        self.tiles_written
    }

    /// Write a tile, or skip a missing one.
    pub fn push(&mut self, tile: Option<&RasterTile>) -> Result<()> {
        match tile {
            Some(t) => self.write_tile(t),
            None => Ok(()),
        }
    }

    /// Write a tile into its window. Parts outside the mosaic are dropped.
    pub fn write_tile(&mut self, tile: &RasterTile) -> Result<()> {
        tile.check_shape().map_err(DsmError::Raster)?;
        if tile.color.len() != self.options.color_bands {
            return Err(DsmError::Raster(format!(
                "tile has {} color bands, mosaic has {}",
                tile.color.len(),
                self.options.color_bands
            )));
        }
        if self.stats.is_some() && tile.stats.is_none() {
            return Err(DsmError::Raster("tile carries no statistics bands".into()));
        }

        let win = self.layout.window_of(tile);
        let (tw, th) = (tile.width() as i64, tile.rows() as i64);
        let (mw, mh) = (self.layout.width as i64, self.layout.height as i64);
        let cols = win.x0.max(0)..(win.x0 + win.width.min(tw)).min(mw);
        let rows = win.y0.max(0)..(win.y0 + win.height.min(th)).min(mh);
        if cols.is_empty() || rows.is_empty() {
            tracing::warn!("raster tile at {:?} lies outside the mosaic", win);
            return Ok(());
        }
        let clip = Clip {
            x0: cols.start as usize,
            x1: cols.end as usize,
            y0: rows.start as usize,
            y1: rows.end as usize,
        };

        let tx = (cols.start - win.x0) as u32..(cols.end - win.x0) as u32;
        for y in rows {
            let ty = (y - win.y0) as u32;
            let row = y as usize;
            let band_row = |band: &Band| -> Vec<f32> {
                tx.clone().map(|x| band.get_pixel(x, ty).0[0]).collect()
            };
            self.dsm.write_row(clip.x0, row, Samples::F32(&band_row(&tile.height)))?;

            let color: Vec<f32> = tx
                .clone()
                .flat_map(|x| tile.color.iter().map(move |b| b.get_pixel(x, ty).0[0]))
                .collect();
            write_color_row(&mut self.color, self.options.color_dtype, clip.x0, row, &color)?;

            if let (Some(out), Some(s)) = (self.stats.as_mut(), tile.stats.as_ref()) {
                let counts = |band: &CountBand| -> Vec<u16> {
                    tx.clone().map(|x| band.get_pixel(x, ty).0[0]).collect()
                };
                out.mean.write_row(clip.x0, row, Samples::F32(&band_row(&s.mean)))?;
                out.std_dev.write_row(clip.x0, row, Samples::F32(&band_row(&s.std_dev)))?;
                out.n_pts.write_row(clip.x0, row, Samples::U16(&counts(&s.n_pts)))?;
                out.pts_in_cell
                    .write_row(clip.x0, row, Samples::U16(&counts(&s.pts_in_cell)))?;
            }
        }

        let overlaps = self.coverage.insert(clip);
        if overlaps > 0 {
            tracing::warn!("raster tile at {:?} overwrote {overlaps} already written pixels", win);
            self.overlapping_pixels += overlaps;
        }
        self.tiles_written += 1;
        Ok(())
    }

    /// Flush and close every output raster.
    pub fn finish(self) -> Result<MosaicOutputs> {
        let mut outputs = MosaicOutputs {
            dsm: self.dsm.close()?,
            color: self.color.close()?,
            mean: None,
            std_dev: None,
            n_pts: None,
            pts_in_cell: None,
        };
        if let Some(s) = self.stats {
            outputs.mean = Some(s.mean.close()?);
            outputs.std_dev = Some(s.std_dev.close()?);
            outputs.n_pts = Some(s.n_pts.close()?);
            outputs.pts_in_cell = Some(s.pts_in_cell.close()?);
        }
        tracing::info!(
            "wrote {} raster tiles to {}{}",
            self.tiles_written,
            self.out_dir.display(),
            if self.overlapping_pixels > 0 {
                format!(" ({} overlapping pixels)", self.overlapping_pixels)
            } else {
                String::new()
            }
        );
        Ok(outputs)
    }
}

fn color_format(dtype: ColorDtype) -> SampleFormat {
    match dtype {
        ColorDtype::Float32 => SampleFormat::F32,
        ColorDtype::Uint16 => SampleFormat::U16,
        ColorDtype::Uint8 => SampleFormat::U8,
    }
}

fn write_color_row(
    out: &mut GeoTiffWriter,
    dtype: ColorDtype,
    x0: usize,
    y: usize,
    samples: &[f32],
) -> Result<()> {
    match dtype {
        ColorDtype::Float32 => out.write_row(x0, y, Samples::F32(samples)),
        ColorDtype::Uint16 => {
            let v: Vec<u16> = samples.iter().map(|&c| c.round().clamp(0.0, 65535.0) as u16).collect();
            out.write_row(x0, y, Samples::U16(&v))
        }
        ColorDtype::Uint8 => {
            let v: Vec<u8> = samples.iter().map(|&c| c.round().clamp(0.0, 255.0) as u8).collect();
            out.write_row(x0, y, Samples::U8(&v))
        }
    }
}
