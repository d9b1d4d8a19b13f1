//! Part of the Sparkplug directory.
//!
//! Protocol utilities shared by the directory crates: Sparkplug B payload messages,
//! [topic::Address] and [topic::Topic] value types, and the [metric_tree::MetricTree]
//! used to recover structure from flat, `/` delimited metric names.

pub mod constants;

pub mod payload;

pub mod metric_tree;
pub mod topic;

pub mod utils;
