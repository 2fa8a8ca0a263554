pub mod config;
pub mod encoder;
pub mod model;
pub mod pipeline;
pub mod rate;
pub mod report;
pub mod rescue;
pub mod split;
