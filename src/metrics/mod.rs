pub mod engine;
pub mod function;
pub mod growth;
pub mod rollup;
pub mod table;

pub use engine::MetricEngine;
pub use rollup::{Rollup, RollupValue};
pub use table::{CellValue, DailyRow, DailySeries, DailyTable};
