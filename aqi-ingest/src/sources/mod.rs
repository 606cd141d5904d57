pub mod history;

pub use history::HistorySource;
