//! Minimal GeoTIFF encoding: north-up rasters with pixel scale, tiepoint,
//! GeoKey directory and GDAL no-data tags.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use crate::error::{DsmError, Result};
use crate::srs::Epsg;
use crate::tiling::Region;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u16 = 32767;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Georeferencing shared by every output raster of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// Top-left corner, `(xmin, ymax)`.
    pub origin: [f64; 2],
    pub resolution: f64,
    pub epsg: Epsg,
}

impl GeoTransform {
    pub fn north_up(bounds: &Region, resolution: f64, epsg: Epsg) -> Self {
        Self {
            origin: [bounds.xmin, bounds.ymax],
            resolution,
            epsg,
        }
    }

    /// GDAL-style `(x0, dx, 0, y0, 0, -dy)`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin[0],
            self.resolution,
            0.0,
            self.origin[1],
            0.0,
            -self.resolution,
        ]
    }

    fn geo_keys(&self) -> Vec<u16> {
        let code = match u16::try_from(self.epsg.code()) {
            Ok(c) => c,
            Err(_) => {
                tracing::warn!("{} does not fit a GeoKey, written as user-defined", self.epsg);
                USER_DEFINED
            }
        };
        let (model, cs_key) = if self.epsg.is_geographic() {
            (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE)
        } else {
            (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE)
        };
        // Header: version 1, revision 1.0, three keys.
        vec![
            1, 1, 0, 3, //
            GT_MODEL_TYPE, 0, 1, model, //
            GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA, //
            cs_key, 0, 1, code,
        ]
    }
}

/// Sample layout of an encoded raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    U16,
    F32,
}

impl SampleFormat {
    pub fn sample_bytes(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::U16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Interleaved samples of a run of pixels.
pub enum Samples<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
    F32(&'a [f32]),
}

impl Samples<'_> {
    pub fn format(&self) -> SampleFormat {
        match self {
            Samples::U8(_) => SampleFormat::U8,
            Samples::U16(_) => SampleFormat::U16,
            Samples::F32(_) => SampleFormat::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::U8(d) => d.len(),
            Samples::U16(d) => d.len(),
            Samples::F32(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples in the byte order the encoder writes (native).
    fn to_ne_bytes(&self) -> Vec<u8> {
        match self {
            Samples::U8(d) => d.to_vec(),
            Samples::U16(d) => d.iter().flat_map(|v| v.to_ne_bytes()).collect(),
            Samples::F32(d) => d.iter().flat_map(|v| v.to_ne_bytes()).collect(),
        }
    }
}

/// Rasters whose sample data would not fit 32-bit offsets are written as
/// BigTIFF.
const BIGTIFF_THRESHOLD: u64 = 1 << 31;

macro_rules! blank_image {
    ($encoder:expr, $color:ty, $w:expr, $h:expr, $geo:expr, $nodata:expr, $fill:expr) => {{
        let mut image = $encoder.new_image::<$color>($w, $h)?;
        let dir = image.encoder();
        dir.write_tag(tag(MODEL_PIXEL_SCALE), &[$geo.resolution, $geo.resolution, 0.0][..])?;
        dir.write_tag(
            tag(MODEL_TIEPOINT),
            &[0.0, 0.0, 0.0, $geo.origin[0], $geo.origin[1], 0.0][..],
        )?;
        dir.write_tag(tag(GEO_KEY_DIRECTORY), &$geo.geo_keys()[..])?;
        dir.write_tag(tag(GDAL_NODATA), $nodata)?;
        image.rows_per_strip(1)?;
        let row = vec![$fill; $w as usize * <$color as colortype::ColorType>::BITS_PER_SAMPLE.len()];
        for _ in 0..$h {
            image.write_strip(&row)?;
        }
        image.finish()?;
    }};
}

macro_rules! blank_raster {
    ($encoder:expr, $format:expr, $bands:expr, $w:expr, $h:expr, $geo:expr, $nodata:expr, $path:expr) => {{
        let nodata = $nodata.to_string();
        let nd = nodata.as_str();
        let (f, u, b) = ($nodata as f32, $nodata.clamp(0.0, 65535.0) as u16, $nodata.clamp(0.0, 255.0) as u8);
        match ($format, $bands) {
            (SampleFormat::F32, 1) => blank_image!($encoder, colortype::Gray32Float, $w, $h, $geo, nd, f),
            (SampleFormat::F32, 3) => blank_image!($encoder, colortype::RGB32Float, $w, $h, $geo, nd, f),
            (SampleFormat::F32, 4) => blank_image!($encoder, colortype::RGBA32Float, $w, $h, $geo, nd, f),
            (SampleFormat::U16, 1) => blank_image!($encoder, colortype::Gray16, $w, $h, $geo, nd, u),
            (SampleFormat::U16, 3) => blank_image!($encoder, colortype::RGB16, $w, $h, $geo, nd, u),
            (SampleFormat::U16, 4) => blank_image!($encoder, colortype::RGBA16, $w, $h, $geo, nd, u),
            (SampleFormat::U8, 1) => blank_image!($encoder, colortype::Gray8, $w, $h, $geo, nd, b),
            (SampleFormat::U8, 3) => blank_image!($encoder, colortype::RGB8, $w, $h, $geo, nd, b),
            (SampleFormat::U8, 4) => blank_image!($encoder, colortype::RGBA8, $w, $h, $geo, nd, b),
            (_, n) => {
                return Err(DsmError::Raster(format!(
                    "{}: {n}-band rasters are not supported (1, 3 or 4)",
                    $path.display()
                )))
            }
        }
    }};
}

/// An uncompressed, one-row-per-strip GeoTIFF open for windowed writes.
///
/// The file is complete and readable from creation on: every pixel starts
/// as no-data and [`GeoTiffWriter::write_row`] overwrites runs of pixels in
/// place.
#[derive(Debug)]
pub struct GeoTiffWriter {
    path: PathBuf,
    file: File,
    width: usize,
    bands: usize,
    format: SampleFormat,
    /// File offset of the first sample of each row.
    row_offsets: Vec<u64>,
}

impl GeoTiffWriter {
    /// Create `path` as a `width x height` raster of `bands` interleaved
    /// samples (1, 3 or 4) filled with `nodata`.
    pub fn create(
        path: &Path,
        width: usize,
        height: usize,
        bands: usize,
        format: SampleFormat,
        geo: &GeoTransform,
        nodata: f64,
    ) -> Result<Self> {
        let (w, h) = (dim(width)?, dim(height)?);
        let file = File::create(path).map_err(|e| DsmError::file(path, e))?;
        let mut buf = BufWriter::new(file);
        let data_bytes = (width * height * bands * format.sample_bytes()) as u64;
        if data_bytes >= BIGTIFF_THRESHOLD {
            let mut encoder = TiffEncoder::new_big(&mut buf)?;
            blank_raster!(encoder, format, bands, w, h, geo, nodata, path);
        } else {
            let mut encoder = TiffEncoder::new(&mut buf)?;
            blank_raster!(encoder, format, bands, w, h, geo, nodata, path);
        }
        let file = buf.into_inner().map_err(|e| DsmError::file(path, e.into_error()))?;

        let row_bytes = (width * bands * format.sample_bytes()) as u64;
        let mut decoder = Decoder::new(File::open(path).map_err(|e| DsmError::file(path, e))?)?;
        let row_offsets = decoder.get_tag_u64_vec(Tag::StripOffsets)?;
        let counts = decoder.get_tag_u64_vec(Tag::StripByteCounts)?;
        if row_offsets.len() != height || counts.iter().any(|&c| c != row_bytes) {
            return Err(DsmError::Raster(format!(
                "{}: unexpected strip layout ({} strips for {height} rows)",
                path.display(),
                row_offsets.len()
            )));
        }
        tracing::debug!("{}: opened {width}x{height}x{bands} raster", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            width,
            bands,
            format,
            row_offsets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the pixels of row `y` starting at column `x0` with
    /// interleaved `samples`.
    pub fn write_row(&mut self, x0: usize, y: usize, samples: Samples<'_>) -> Result<()> {
        let pixels = samples.len() / self.bands;
        if samples.format() != self.format || samples.len() % self.bands != 0 {
            return Err(DsmError::Raster(format!(
                "{}: {} {:?} samples do not match {} {:?} bands",
                self.path.display(),
                samples.len(),
                samples.format(),
                self.bands,
                self.format
            )));
        }
        let Some(&row) = self.row_offsets.get(y) else {
            return Err(DsmError::Raster(format!("{}: row {y} out of range", self.path.display())));
        };
        if x0 + pixels > self.width {
            return Err(DsmError::Raster(format!(
                "{}: columns {x0}..{} exceed width {}",
                self.path.display(),
                x0 + pixels,
                self.width
            )));
        }
        let offset = row + (x0 * self.bands * self.format.sample_bytes()) as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(&samples.to_ne_bytes()))
            .map_err(|e| DsmError::file(&self.path, e))
    }

    /// Flush the file to disk and close it.
    pub fn close(self) -> Result<PathBuf> {
        self.file.sync_all().map_err(|e| DsmError::file(&self.path, e))?;
        Ok(self.path)
    }
}

/// Write a whole `width x height` raster of interleaved samples.
pub fn write_geotiff(
    path: &Path,
    width: usize,
    height: usize,
    bands: usize,
    samples: Samples<'_>,
    geo: &GeoTransform,
    nodata: f64,
) -> Result<()> {
    let expected = width * height * bands;
    if samples.len() != expected {
        return Err(DsmError::Raster(format!(
            "{}: {} samples for a {width}x{height}x{bands} raster",
            path.display(),
            samples.len()
        )));
    }
    let mut out = GeoTiffWriter::create(path, width, height, bands, samples.format(), geo, nodata)?;
    let row = width * bands;
    for y in 0..height {
        let r = y * row..(y + 1) * row;
        let slice = match &samples {
            Samples::U8(d) => Samples::U8(&d[r]),
            Samples::U16(d) => Samples::U16(&d[r]),
            Samples::F32(d) => Samples::F32(&d[r]),
        };
        out.write_row(0, y, slice)?;
    }
    out.close()?;
    Ok(())
}

fn dim(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| DsmError::Raster(format!("raster dimension {n} exceeds u32")))
}

/// A GeoTIFF read back into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRaster {
    pub width: usize,
    pub height: usize,
    pub format: SampleFormat,
    /// Band-major samples, `bands[b][row * width + col]`.
    pub bands: Vec<Vec<f64>>,
    pub pixel_scale: Option<Vec<f64>>,
    pub tiepoint: Option<Vec<f64>>,
    pub nodata: Option<f64>,
    /// EPSG code from the GeoKey directory.
    pub epsg: Option<Epsg>,
}

impl GeoRaster {
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn get(&self, band: usize, col: usize, row: usize) -> f64 {
        self.bands[band][row * self.width + col]
    }

    /// Samples of `band` inside the `(x0, y0, width, height)` window.
    pub fn window(&self, band: usize, x0: usize, y0: usize, width: usize, height: usize) -> Vec<f64> {
        (y0..y0 + height)
            .flat_map(|row| (x0..x0 + width).map(move |col| (row, col)))
            .map(|(row, col)| self.get(band, col, row))
            .collect()
    }
}

/// Read a single-image GeoTIFF written by [`GeoTiffWriter`].
pub fn read_geotiff(path: &Path) -> Result<GeoRaster> {
    let file = File::open(path).map_err(|e| DsmError::file(path, e))?;
    let mut decoder = Decoder::new(file)?.with_limits(Limits::unlimited());
    let (w, h) = decoder.dimensions()?;
    let (width, height) = (w as usize, h as usize);

    let pixel_scale = decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE)).ok();
    let tiepoint = decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT)).ok();
    let nodata = decoder
        .get_tag_ascii_string(tag(GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse().ok());
    let epsg = decoder
        .get_tag_u16_vec(tag(GEO_KEY_DIRECTORY))
        .ok()
        .and_then(|keys| epsg_from_geo_keys(&keys));

    let (format, interleaved): (SampleFormat, Vec<f64>) = match decoder.read_image()? {
        DecodingResult::U8(d) => (SampleFormat::U8, d.into_iter().map(f64::from).collect()),
        DecodingResult::U16(d) => (SampleFormat::U16, d.into_iter().map(f64::from).collect()),
        DecodingResult::F32(d) => (SampleFormat::F32, d.into_iter().map(f64::from).collect()),
        _ => {
            return Err(DsmError::Raster(format!(
                "{}: unsupported sample format",
                path.display()
            )))
        }
    };
    let pixels = width * height;
    if pixels == 0 || interleaved.len() % pixels != 0 {
        return Err(DsmError::Raster(format!(
            "{}: {} samples for {width}x{height} pixels",
            path.display(),
            interleaved.len()
        )));
    }
    let band_count = interleaved.len() / pixels;
    let bands = (0..band_count)
        .map(|b| interleaved.iter().skip(b).step_by(band_count).copied().collect())
        .collect();

    Ok(GeoRaster {
        width,
        height,
        format,
        bands,
        pixel_scale,
        tiepoint,
        nodata,
        epsg,
    })
}

fn epsg_from_geo_keys(keys: &[u16]) -> Option<Epsg> {
    let count = *keys.get(3)? as usize;
    keys.get(4..4 + 4 * count)?
        .chunks_exact(4)
        .find(|k| k[0] == PROJECTED_CS_TYPE || k[0] == GEOGRAPHIC_TYPE)
        .map(|k| Epsg(u32::from(k[3])))
}
