pub mod engine;

pub use engine::{
    clamp_rate, daily_delta, interp, DerivedSignalSet, EmptySeriesError, SignalEngine,
    DEFAULT_SICKTIME_DAYS,
};
