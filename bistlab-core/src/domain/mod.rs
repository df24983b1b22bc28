pub mod bar;
pub mod interval;
pub mod series;
pub mod signal;

pub use bar::{Bar, BarError};
pub use interval::{Interval, ParseIntervalError, Period};
pub use series::{DataSource, Series, SeriesError};
pub use signal::Signal;
