//! Load scenarios driving a real nack tracker and its timer thread.

pub mod recorder;
pub mod scenarios;
