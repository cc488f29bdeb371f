//! Run configuration: pair content files, run parameters, static parameters.

mod content;
mod geoid;
mod params;
mod static_params;

pub use content::{
    validate_pair_configuration, CoverageEnvelope, PairConfiguration, PairInput, PairInputs,
    Preprocessing, PreprocessingOutput,
};
pub use geoid::GeoidGrid;
pub use params::{DsmParams, FailurePolicy, PoolConfig, Roi};
pub use static_params::{
    ColorDtype, EpipolarTilingParams, RasterizationStatic, SmallComponentsParams, StaticParams,
    StatisticalOutliersParams,
};
