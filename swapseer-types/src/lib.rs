pub mod events;

pub use events::{TradeEvent, TradeStage};
