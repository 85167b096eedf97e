pub mod ohlcv;

pub use ohlcv::{data_quality_from_bars, load_csv, read_csv, DataQualityReport};
