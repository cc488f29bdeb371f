//! Builders for synthetic stereo pairs shared by unit tests.

use crate::collab::AffineModelSpec;
use crate::config::{PairConfiguration, PairInput, PairInputs, Preprocessing, PreprocessingOutput};
use crate::srs::Epsg;

pub(crate) const TEST_EPSG: Epsg = Epsg(32631);
pub(crate) const TEST_ORIGIN: [f64; 2] = [500_000.0, 4_800_000.0];
pub(crate) const TEST_RATIO: f64 = 2.5;

/// North-up affine pair in UTM 31N observing a flat surface at disparity 1.
pub(crate) fn affine_pair_config(
    width: usize,
    height: usize,
    disparity: [f64; 2],
    gsd: f64,
) -> PairConfiguration {
    let mut model = AffineModelSpec::north_up(TEST_EPSG, TEST_ORIGIN, gsd);
    model.surface = [1.0, 0.0, 0.0];
    PairConfiguration {
        input: PairInputs {
            img1: "left.tif".into(),
            img2: "right.tif".into(),
            ..PairInputs::default()
        },
        preprocessing: Preprocessing {
            version: Some("test".into()),
            output: PreprocessingOutput {
                epipolar_size_x: width,
                epipolar_size_y: height,
                minimum_disparity: disparity[0],
                maximum_disparity: disparity[1],
                disp_to_alt_ratio: TEST_RATIO,
                ..PreprocessingOutput::default()
            },
        },
        affine_model: Some(model),
    }
}

pub(crate) fn affine_pair(
    id: &str,
    width: usize,
    height: usize,
    disparity: [f64; 2],
    gsd: f64,
) -> PairInput {
    PairInput::new(id, affine_pair_config(width, height, disparity, gsd))
        .expect("synthetic pair is valid")
}
